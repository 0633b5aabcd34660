use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use medrag_retrieval::RetrievalService;
use medrag_session::{CompletedRetrieval, ElicitationSession, SessionManager, StartedSession, TurnReply};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;
use crate::protocol::{ChatRequest, HealthResponse, QueryRequest, QueryResponse, SessionsResponse};

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub retrieval: Arc<RetrievalService>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 5000 }
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/start-session", post(start_session))
        .route("/api/chat", post(chat))
        .route("/api/session/{session_id}", get(get_session))
        .route("/api/session/{session_id}/result", get(get_result))
        .route("/api/sessions", get(list_sessions))
        .route("/api/query", post(query))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run_server(config: ServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for medrag server")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("medrag listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let corpora = state.retrieval.status().await;
    let status = if corpora.iter().all(|c| c.available) { "ok" } else { "degraded" };
    Json(HealthResponse { status: status.to_string(), corpora })
}

async fn start_session(State(state): State<AppState>) -> Result<Json<StartedSession>, ApiError> {
    Ok(Json(state.sessions.start_session().await?))
}

async fn chat(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<TurnReply>, ApiError> {
    let Json(request) = request?;
    let reply = state
        .sessions
        .submit_turn(&request.session_id, &request.message, request.request_id.as_deref())
        .await?;
    Ok(Json(reply))
}

async fn get_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ElicitationSession>, ApiError> {
    Ok(Json(state.sessions.get_session(&session_id).await?))
}

async fn get_result(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CompletedRetrieval>, ApiError> {
    let session = state.sessions.get_session(&session_id).await?;
    session.result.map(Json).ok_or_else(|| {
        ApiError::new(StatusCode::NOT_FOUND, "result_not_ready", format!("session {session_id} has not completed"))
    })
}

async fn list_sessions(State(state): State<AppState>) -> Result<Json<SessionsResponse>, ApiError> {
    Ok(Json(SessionsResponse { sessions: state.sessions.list_sessions().await? }))
}

async fn query(
    State(state): State<AppState>,
    request: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = request?;
    let k = request.k.unwrap_or(state.retrieval.config().default_top_k);
    let results = state.retrieval.query(&request.corpus, &request.text, k).await?;
    Ok(Json(QueryResponse { corpus: request.corpus, results }))
}
