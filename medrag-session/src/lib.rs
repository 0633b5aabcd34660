//! Multi-turn symptom elicitation for medrag.
//!
//! This crate provides:
//! - Structured symptom state with a deterministic merge rule
//! - A collaborator trait for the language model that proposes updates
//! - The session state machine with per-session serialization and request-id replay
//! - Retrieval query synthesis for completed sessions
//! - A swappable session store with an in-memory implementation
//!
//! # Features
//!
//! - `gemini` – [`gemini::GeminiCollaborator`] backed by the Gemini REST API

pub mod collaborator;
pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod query;
pub mod store;

#[cfg(feature = "gemini")]
pub mod gemini;

pub use collaborator::{Collaborator, Proposal, TurnContext, format_transcript, parse_proposal, render_prompt};
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use manager::SessionManager;
pub use model::{
    CompletedRetrieval, ElicitationSession, Role, SessionStatus, SessionSummary, StartedSession,
    StructuredState, SymptomFact, TurnEntry, TurnReply,
};
pub use query::build_search_query;
pub use store::{InMemorySessionStore, SessionStore};
