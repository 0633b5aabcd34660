//! The language-model collaborator that proposes structured-state updates.
//!
//! The collaborator returns raw text. [`parse_proposal`] extracts the JSON
//! object `{"symptom_dict": {...}, "bot_message": "..."}` from it, tolerating
//! prose or code fences around the object. Parsing lives on the session side
//! so that a malformed answer can be retried without the collaborator knowing.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::model::{Role, StructuredState, TurnEntry};

/// Everything a collaborator sees for one turn.
#[derive(Debug, Clone)]
pub struct TurnContext<'a> {
    /// Session the turn belongs to.
    pub session_id: &'a str,
    /// The user's latest message.
    pub message: &'a str,
    /// Structured state before this turn.
    pub state: &'a StructuredState,
    /// Transcript before this turn, one `User:` / `Assistant:` line per entry.
    pub transcript: String,
}

/// A parsed collaborator answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    /// Proposed structured state.
    pub state: StructuredState,
    /// Next assistant message.
    pub reply: String,
}

/// A language model that proposes the next structured state and reply.
///
/// # Example
///
/// ```rust,ignore
/// struct Scripted(Vec<String>);
///
/// #[async_trait]
/// impl Collaborator for Scripted {
///     async fn propose(&self, ctx: &TurnContext<'_>) -> Result<String> {
///         Ok(self.0[ctx.state.symptoms.len()].clone())
///     }
/// }
/// ```
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Produce a raw answer for this turn.
    async fn propose(&self, ctx: &TurnContext<'_>) -> Result<String>;

    /// Short name used in logs and errors.
    fn name(&self) -> &str {
        "collaborator"
    }
}

#[derive(Deserialize)]
struct RawProposal {
    symptom_dict: StructuredState,
    bot_message: String,
}

/// Parse a collaborator answer.
///
/// The whole answer is tried first, then the span from the first `{` to the
/// last `}`. A blank `bot_message` is rejected.
pub fn parse_proposal(raw: &str) -> std::result::Result<Proposal, String> {
    let raw = raw.trim();
    let parsed = match serde_json::from_str::<RawProposal>(raw) {
        Ok(parsed) => parsed,
        Err(whole) => {
            let span = match (raw.find('{'), raw.rfind('}')) {
                (Some(start), Some(end)) if start < end => &raw[start..=end],
                _ => return Err(format!("no JSON object in answer: {whole}")),
            };
            serde_json::from_str::<RawProposal>(span).map_err(|e| format!("malformed proposal: {e}"))?
        }
    };

    let reply = parsed.bot_message.trim();
    if reply.is_empty() {
        return Err("proposal has an empty bot_message".to_string());
    }
    Ok(Proposal { state: parsed.symptom_dict, reply: reply.to_string() })
}

/// Render a transcript as `User: ...` / `Assistant: ...` lines.
pub fn format_transcript(turns: &[TurnEntry]) -> String {
    turns
        .iter()
        .map(|t| match t.role {
            Role::User => format!("User: {}", t.text),
            Role::Assistant => format!("Assistant: {}", t.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The elicitation prompt sent to text-generation collaborators.
pub fn render_prompt(ctx: &TurnContext<'_>) -> String {
    let state = serde_json::to_string_pretty(ctx.state).unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"You are a medical triage assistant collecting symptoms before a clinician reviews them.

Conversation so far:
{transcript}

Current symptom record:
{state}

Latest user message:
"{message}"

Update the symptom record using the conversation and the latest message. Use this shape:
{{
  "age": "<age if mentioned, else null>",
  "gender": "<gender if mentioned, else null>",
  "symptoms": [
    {{
      "name": "<symptom>",
      "duration": "<duration if mentioned, else null>",
      "severity": "<severity if mentioned, else null>",
      "additional_context": "<frequency, location, triggers if mentioned, else null>"
    }}
  ],
  "has_enough_info": <true or false>
}}

Set has_enough_info to true once every symptom has a duration and a severity.
If the user sounds worried or describes an emergency, answer kindly and say that only a doctor can fully assess them.
Only ask about what the record needs.
If has_enough_info is false, ask ONE empathetic follow-up question.
If has_enough_info is true, reply "Thank you, I have enough information now."

Answer with JSON only:
{{
  "symptom_dict": <updated symptom record>,
  "bot_message": "<your next message>"
}}"#,
        transcript = ctx.transcript,
        message = ctx.message,
    )
}
