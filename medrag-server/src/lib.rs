//! `medrag-server` exposes elicitation sessions and retrieval queries over HTTP.
//! Errors are returned as JSON `{"error": kind, "message": text}` bodies.

pub mod error;
pub mod protocol;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, ServerConfig, app_router, run_server};
