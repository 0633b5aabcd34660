//! The elicitation state machine.
//!
//! A session is `Active` until the collaborator proposes `has_enough_info =
//! true`; that turn issues exactly one retrieval query, caches the result and
//! moves the session to the terminal `Complete` state.
//!
//! Turns against one session are serialized by a per-session lock. Each turn
//! works on a copy of the session and stores it only after every fallible step
//! succeeded, so a timeout, parse failure, or retrieval failure leaves the
//! stored session untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = SessionManager::new(
//!     SessionConfig::default(),
//!     Arc::new(collaborator),
//!     Arc::new(retrieval_service),
//!     Arc::new(InMemorySessionStore::new()),
//! )?;
//! let started = manager.start_session().await?;
//! let reply = manager.submit_turn(&started.session_id, "I have had a fever for 3 days", None).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use medrag_retrieval::Retriever;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborator::{Collaborator, Proposal, TurnContext, format_transcript, parse_proposal};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::model::{
    CompletedRetrieval, ElicitationSession, Role, SessionStatus, SessionSummary, StartedSession,
    TurnEntry, TurnReply,
};
use crate::query::build_search_query;
use crate::store::SessionStore;

const MAX_REQUEST_ID_CHARS: usize = 128;

/// Runs elicitation sessions against a collaborator, a retriever and a store.
pub struct SessionManager {
    config: SessionConfig,
    collaborator: Arc<dyn Collaborator>,
    retriever: Arc<dyn Retriever>,
    store: Arc<dyn SessionStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    /// Create a manager.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Validation`] if `config` is invalid.
    pub fn new(
        config: SessionConfig,
        collaborator: Arc<dyn Collaborator>,
        retriever: Arc<dyn Retriever>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, collaborator, retriever, store, locks: Mutex::new(HashMap::new()) })
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a session and return its id with the opening prompt.
    pub async fn start_session(&self) -> Result<StartedSession> {
        let session_id = Uuid::new_v4().to_string();
        let session = ElicitationSession::new(&session_id, &self.config.greeting);
        self.store.put(session).await?;
        info!(session_id = %session_id, "session started");
        Ok(StartedSession {
            session_id,
            prompt: self.config.greeting.clone(),
            status: SessionStatus::Active,
        })
    }

    /// Apply one user turn.
    ///
    /// A turn that repeats the `request_id` of an already applied turn gets the
    /// stored reply back (with `replayed = true`) and changes nothing.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Validation`] for a malformed session id, message, or request id
    /// - [`SessionError::NotFound`] for an unknown session
    /// - [`SessionError::SessionComplete`] for a session that already completed
    /// - [`SessionError::CollaboratorTimeout`], [`SessionError::Collaborator`],
    ///   [`SessionError::CollaboratorParse`] when no usable proposal was obtained
    /// - [`SessionError::Retrieval`] when the completing turn's query failed
    pub async fn submit_turn(
        &self,
        session_id: &str,
        message: &str,
        request_id: Option<&str>,
    ) -> Result<TurnReply> {
        validate_session_id(session_id)?;
        let message = self.validate_message(message)?;
        let request_id = request_id.map(validate_request_id).transpose()?;

        // Unknown ids never get a lock entry.
        if self.store.get(session_id).await?.is_none() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }

        let lock = self.session_lock(session_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.apply_turn(session_id, message, request_id).await
        };
        self.release_lock(session_id, lock).await;
        result
    }

    async fn apply_turn(&self, session_id: &str, message: &str, request_id: Option<&str>) -> Result<TurnReply> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        if let Some(stored) = request_id.and_then(|id| session.applied_requests.get(id)) {
            debug!(session_id, request_id = ?request_id, "replaying applied turn");
            return Ok(TurnReply { replayed: true, ..stored.clone() });
        }
        if session.status == SessionStatus::Complete {
            return Err(SessionError::SessionComplete { session_id: session_id.to_string() });
        }

        let ctx = TurnContext {
            session_id,
            message,
            state: &session.structured_state,
            transcript: format_transcript(&session.turn_log),
        };
        let proposal = self.propose(&ctx).await?;

        let mut next = session.clone();
        next.structured_state.merge(&proposal.state);
        next.turn_log.push(TurnEntry::now(Role::User, message));
        next.turn_log.push(TurnEntry::now(Role::Assistant, &proposal.reply));
        next.updated_at = Utc::now();

        if next.structured_state.has_enough_info {
            let query = build_search_query(&next.structured_state);
            let results = self.retriever.retrieve(&self.config.corpus, &query, self.config.top_k).await?;
            info!(
                session_id,
                corpus = %self.config.corpus,
                result_count = results.len(),
                "session complete"
            );
            next.result = Some(CompletedRetrieval {
                corpus: self.config.corpus.clone(),
                query,
                results,
                at: Utc::now(),
            });
            next.status = SessionStatus::Complete;
        }

        let reply = TurnReply {
            session_id: session_id.to_string(),
            reply: proposal.reply,
            status: next.status,
            has_enough_info: next.structured_state.has_enough_info,
            structured_state: next.structured_state.clone(),
            retrieval: next.result.clone(),
            replayed: false,
        };
        if let Some(id) = request_id {
            next.applied_requests.insert(id.to_string(), reply.clone());
        }
        self.store.put(next).await?;
        Ok(reply)
    }

    /// Fetch a full session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for an unknown session.
    pub async fn get_session(&self, session_id: &str) -> Result<ElicitationSession> {
        validate_session_id(session_id)?;
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Summaries of all sessions.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.store.list().await
    }

    /// Call the collaborator, retrying malformed answers up to `parse_retries` times.
    async fn propose(&self, ctx: &TurnContext<'_>) -> Result<Proposal> {
        let timeout = self.config.collaborator_timeout();
        let attempts = self.config.parse_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let raw = tokio::time::timeout(timeout, self.collaborator.propose(ctx)).await.map_err(|_| {
                warn!(session_id = ctx.session_id, "collaborator timed out");
                SessionError::CollaboratorTimeout {
                    session_id: ctx.session_id.to_string(),
                    seconds: timeout.as_secs(),
                }
            })??;

            match parse_proposal(&raw) {
                Ok(proposal) => return Ok(proposal),
                Err(e) => {
                    warn!(
                        session_id = ctx.session_id,
                        collaborator = self.collaborator.name(),
                        attempt,
                        error = %e,
                        "malformed collaborator answer"
                    );
                    last_error = e;
                }
            }
        }

        Err(SessionError::CollaboratorParse {
            session_id: ctx.session_id.to_string(),
            attempts,
            message: last_error,
        })
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(session_id.to_string()).or_default().clone()
    }

    /// Drop the session's lock entry unless another turn holds or awaits it.
    async fn release_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // The map and `lock` are the only owners.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(session_id);
        }
    }

    fn validate_message<'m>(&self, message: &'m str) -> Result<&'m str> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SessionError::Validation("message must not be empty".into()));
        }
        if message.chars().count() > self.config.max_message_chars {
            return Err(SessionError::Validation(format!(
                "message exceeds {} characters",
                self.config.max_message_chars
            )));
        }
        Ok(message)
    }
}

fn validate_session_id(session_id: &str) -> Result<()> {
    Uuid::parse_str(session_id)
        .map(|_| ())
        .map_err(|_| SessionError::Validation(format!("malformed session id '{session_id}'")))
}

fn validate_request_id(request_id: &str) -> Result<&str> {
    let request_id = request_id.trim();
    if request_id.is_empty() || request_id.chars().count() > MAX_REQUEST_ID_CHARS {
        return Err(SessionError::Validation(format!(
            "request_id must be 1 to {MAX_REQUEST_ID_CHARS} characters"
        )));
    }
    Ok(request_id)
}
