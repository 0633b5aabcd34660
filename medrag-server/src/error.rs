//! Mapping of domain errors onto HTTP responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use medrag_retrieval::RagError;
use medrag_session::SessionError;
use tracing::error;

use crate::protocol::ErrorBody;

/// An error rendered as `{"error": kind, "message": text}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self { status, kind, message: message.into() }
    }
}

fn rag_status(err: &RagError) -> StatusCode {
    match err {
        RagError::Validation(_) => StatusCode::BAD_REQUEST,
        RagError::CorpusLoad { .. } | RagError::DimensionMismatch { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RagError::Embedding { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        Self::new(rag_status(&err), err.kind(), err.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::Validation(_) => StatusCode::BAD_REQUEST,
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::SessionComplete { .. } => StatusCode::CONFLICT,
            SessionError::CollaboratorTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            SessionError::CollaboratorParse { .. } | SessionError::Collaborator { .. } => StatusCode::BAD_GATEWAY,
            SessionError::Retrieval(inner) => rag_status(inner),
            SessionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, kind = self.kind, message = %self.message, "request failed");
        }
        let body = ErrorBody { error: self.kind.to_string(), message: self.message };
        (self.status, Json(body)).into_response()
    }
}
