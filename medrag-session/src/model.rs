//! Session data model and the structured-state merge rule.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use medrag_retrieval::SearchResult;
use serde::{Deserialize, Deserializer, Serialize};

/// One symptom as extracted from the conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymptomFact {
    /// Symptom name; facts are matched case-insensitively on it.
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    /// How long the symptom has lasted.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub duration: Option<String>,
    /// How bad it is.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub severity: Option<String>,
    /// Frequency, location, triggers and similar details.
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub additional_context: Option<String>,
}

impl SymptomFact {
    /// A fact with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    fn matches(&self, other: &SymptomFact) -> bool {
        self.name.trim().eq_ignore_ascii_case(other.name.trim())
    }

    fn absorb(&mut self, other: &SymptomFact) {
        override_if_set(&mut self.duration, &other.duration);
        override_if_set(&mut self.severity, &other.severity);
        override_if_set(&mut self.additional_context, &other.additional_context);
    }
}

/// Facts accumulated over a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuredState {
    /// Patient age; accepts a JSON number or string.
    #[serde(default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub age: Option<String>,
    /// Patient gender.
    #[serde(default, deserialize_with = "lenient_opt_string", skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// Symptoms in first-mentioned order.
    #[serde(default)]
    pub symptoms: Vec<SymptomFact>,
    /// Completeness flag proposed by the collaborator.
    #[serde(default)]
    pub has_enough_info: bool,
}

impl StructuredState {
    /// Merge a collaborator proposal into this state.
    ///
    /// Scalars are overridden only by set values. Symptoms are matched by
    /// case-insensitive name: set fields override, unknown symptoms are
    /// appended, symptoms the proposal omits are kept. The completeness flag
    /// is taken from the proposal. Merging the same proposal twice is a no-op.
    pub fn merge(&mut self, proposal: &StructuredState) {
        override_if_set(&mut self.age, &proposal.age);
        override_if_set(&mut self.gender, &proposal.gender);

        for proposed in proposal.symptoms.iter().filter(|s| !s.name.trim().is_empty()) {
            match self.symptoms.iter_mut().find(|s| s.matches(proposed)) {
                Some(existing) => existing.absorb(proposed),
                None => {
                    let mut fact = SymptomFact::named(proposed.name.trim());
                    fact.absorb(proposed);
                    self.symptoms.push(fact);
                }
            }
        }
        self.has_enough_info = proposal.has_enough_info;
    }
}

fn override_if_set(target: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        *target = Some(v.to_string());
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Scalar> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        let text = match v {
            Scalar::Text(s) => s,
            Scalar::Integer(n) => n.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        };
        let text = text.trim();
        // Models sometimes spell out the schema placeholder.
        (!text.is_empty() && !text.eq_ignore_ascii_case("null")).then(|| text.to_string())
    }))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_string(deserializer)?.unwrap_or_default())
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accumulating facts.
    Active,
    /// Terminal: the retrieval query has been issued.
    Complete,
}

/// Who said a transcript line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The person describing symptoms.
    User,
    /// The elicitation assistant.
    Assistant,
}

/// One line of the append-only transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnEntry {
    /// Speaker.
    pub role: Role,
    /// What was said.
    pub text: String,
    /// When it was recorded.
    pub at: DateTime<Utc>,
}

impl TurnEntry {
    /// A line recorded now.
    pub fn now(role: Role, text: impl Into<String>) -> Self {
        Self { role, text: text.into(), at: Utc::now() }
    }
}

/// The single retrieval issued when a session completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletedRetrieval {
    /// Corpus that was queried.
    pub corpus: String,
    /// Query text synthesized from the structured state.
    pub query: String,
    /// Ranked results.
    pub results: Vec<SearchResult>,
    /// When the query ran.
    pub at: DateTime<Utc>,
}

/// What a caller gets back from one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnReply {
    /// Session the turn belongs to.
    pub session_id: String,
    /// Assistant message: a follow-up question or the closing confirmation.
    pub reply: String,
    /// Session status after the turn.
    pub status: SessionStatus,
    /// Structured state after the turn.
    pub structured_state: StructuredState,
    /// Mirror of `structured_state.has_enough_info`.
    pub has_enough_info: bool,
    /// Retrieval result, on the completing turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<CompletedRetrieval>,
    /// Whether this reply was replayed for a repeated request id.
    #[serde(default)]
    pub replayed: bool,
}

/// Response of session start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartedSession {
    /// New session id.
    pub session_id: String,
    /// Opening assistant message.
    pub prompt: String,
    /// Always [`SessionStatus::Active`].
    pub status: SessionStatus,
}

/// Listing entry for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session id.
    pub session_id: String,
    /// Current status.
    pub status: SessionStatus,
    /// Number of user turns applied.
    pub turn_count: usize,
    /// Whether the completion retrieval ran.
    pub has_result: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A full elicitation session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElicitationSession {
    /// Session id (a UUID).
    pub session_id: String,
    /// Accumulated facts.
    pub structured_state: StructuredState,
    /// Append-only transcript, starting with the greeting.
    pub turn_log: Vec<TurnEntry>,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Cached completion retrieval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CompletedRetrieval>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last applied turn.
    pub updated_at: DateTime<Utc>,
    /// Replies of applied turns, keyed by request id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub applied_requests: BTreeMap<String, TurnReply>,
}

impl ElicitationSession {
    /// A fresh session whose transcript starts with `greeting`.
    pub fn new(session_id: impl Into<String>, greeting: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            structured_state: StructuredState::default(),
            turn_log: vec![TurnEntry::now(Role::Assistant, greeting)],
            status: SessionStatus::Active,
            result: None,
            created_at: now,
            updated_at: now,
            applied_requests: BTreeMap::new(),
        }
    }

    /// Number of user turns applied.
    pub fn turn_count(&self) -> usize {
        self.turn_log.iter().filter(|t| t.role == Role::User).count()
    }

    /// Listing entry for this session.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            status: self.status,
            turn_count: self.turn_count(),
            has_result: self.result.is_some(),
            created_at: self.created_at,
        }
    }
}
