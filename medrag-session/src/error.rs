//! Error types for the `medrag-session` crate.

use medrag_retrieval::RagError;
use thiserror::Error;

/// Errors that can occur while running an elicitation session.
///
/// Every turn-level error leaves the session exactly as it was before the turn.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The collaborator's output did not have the expected shape, even after retrying.
    #[error("Collaborator output for session {session_id} could not be parsed after {attempts} attempts: {message}")]
    CollaboratorParse {
        /// The session whose turn failed.
        session_id: String,
        /// How many collaborator calls were made.
        attempts: u32,
        /// The last parse failure.
        message: String,
    },

    /// The collaborator did not answer in time.
    #[error("Collaborator timed out after {seconds}s for session {session_id}")]
    CollaboratorTimeout {
        /// The session whose turn failed.
        session_id: String,
        /// The configured timeout.
        seconds: u64,
    },

    /// The collaborator call itself failed (transport, quota, API error).
    #[error("Collaborator '{collaborator}' failed: {message}")]
    Collaborator {
        /// Collaborator name.
        collaborator: String,
        /// A description of the failure.
        message: String,
    },

    /// The session already completed; further turns are rejected.
    #[error("Session {session_id} is complete and accepts no further turns")]
    SessionComplete {
        /// The completed session.
        session_id: String,
    },

    /// No session with this id exists.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Caller-supplied input was rejected before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The completion query against the retrieval service failed.
    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RagError),

    /// The session store failed.
    #[error("Session store error: {0}")]
    Store(String),
}

impl SessionError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CollaboratorParse { .. } => "collaborator_parse_error",
            Self::CollaboratorTimeout { .. } => "collaborator_timeout",
            Self::Collaborator { .. } => "collaborator_error",
            Self::SessionComplete { .. } => "session_complete",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::Retrieval(e) => e.kind(),
            Self::Store(_) => "store_error",
        }
    }
}

/// A convenience result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
