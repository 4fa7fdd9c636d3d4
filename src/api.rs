use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, Query, State,
    },
    http::{Method, StatusCode},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::chat::ChatPipeline;
use crate::conversation::SessionStore;
use crate::error::RagError;
use crate::models::{
    AskRequest, AskResponse, LogQuery, RetrievedReview, SessionCreated, SessionHistory, TurnRecord,
};

const INDEX_HTML: &str = include_str!("../static/index.html");
const DEFAULT_LOG_LIMIT: usize = 50;

pub struct AppState {
    pub pipeline: ChatPipeline,
    pub sessions: SessionStore,
}

pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

pub fn rag_error(e: RagError) -> ApiError {
    let status = match e {
        RagError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        RagError::IndexNotBuilt | RagError::IndexMismatch { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RagError::Generation(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!("Chat error: {}", e);
    api_error(status, e.to_string())
}

fn unknown_session() -> ApiError {
    api_error(StatusCode::NOT_FOUND, "Unknown session")
}

fn session_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id).map_err(|_| unknown_session())
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_page))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(session_history).delete(end_session))
        .route("/api/sessions/:id/messages", post(ask_handler))
        .route("/api/logs", get(query_logs_handler))
        .route("/api/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically drop idle chat sessions for the lifetime of the server.
pub fn spawn_session_sweeper(
    state: Arc<AppState>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            state.sessions.evict_idle().await;
        }
    })
}

async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn create_session(State(state): State<Arc<AppState>>) -> Json<SessionCreated> {
    let (session_id, created_at) = state.sessions.create().await;
    Json(SessionCreated { session_id, created_at })
}

async fn session_history(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SessionHistory>, ApiError> {
    let id = session_id(path)?;
    let session = state.sessions.get(&id).await.ok_or_else(unknown_session)?;
    let conversation = session.lock().await;
    Ok(Json(SessionHistory {
        session_id: id,
        messages: conversation.messages().to_vec(),
    }))
}

async fn end_session(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let id = session_id(path)?;
    if state.sessions.remove(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(unknown_session())
    }
}

async fn ask_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, ApiError> {
    let id = session_id(path)?;
    let Json(request) = payload.map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e.body_text()))
    })?;
    let session = state.sessions.get(&id).await.ok_or_else(unknown_session)?;

    let mut conversation = session.lock().await;
    let turn = state
        .pipeline
        .answer(&mut conversation, &request.question)
        .await
        .map_err(rag_error)?;

    Ok(Json(AskResponse {
        answer: turn.answer,
        reviews: turn.reviews.iter().map(RetrievedReview::from).collect(),
        history_len: conversation.len(),
    }))
}

async fn query_logs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<TurnRecord>>, ApiError> {
    let logger = state
        .pipeline
        .logger()
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Turn log is disabled"))?;

    let records = logger
        .recent(query.limit.unwrap_or(DEFAULT_LOG_LIMIT))
        .await
        .map_err(|e| {
            tracing::error!("Query logs error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {}", e))
        })?;

    Ok(Json(records))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let generator_healthy = state.pipeline.generator().health_check().await.unwrap_or(false);
    let index = state.pipeline.store().status().await;

    Json(serde_json::json!({
        "status": if index.is_built { "healthy" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339(),
        "sessions": state.sessions.len().await,
        "index": index,
        "services": {
            "generator": generator_healthy
        }
    }))
}
