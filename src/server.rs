use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::cascade::Resolver;
use crate::config::AppConfig;
use crate::models::{ChatRequest, ConversationState, ResolvedTurn, SessionResponse};

/// Thin display layer: sessions in memory, one JSON endpoint per concern.
/// All answer-resolution behavior lives in the resolver.
#[derive(Clone)]
struct AppState {
    resolver: Arc<Resolver>,
    sessions: Arc<Mutex<HashMap<String, ConversationState>>>,
}

pub async fn run_server(config: AppConfig, resolver: Resolver) -> Result<()> {
    let state = AppState {
        resolver: Arc::new(resolver),
        sessions: Arc::new(Mutex::new(HashMap::new())),
    };

    let app = Router::new()
        .route("/api/session", post(create_session))
        .route("/api/chat", post(chat_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn create_session(State(state): State<AppState>) -> Result<Json<SessionResponse>, ApiError> {
    let session_id = Uuid::new_v4().to_string();
    state
        .sessions
        .lock()
        .map_err(|_| ApiError::from(anyhow::anyhow!("lock poisoned")))?
        .insert(session_id.clone(), ConversationState::new());
    Ok(Json(SessionResponse { session_id }))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ResolvedTurn>, ApiError> {
    let mut history = {
        let sessions = state
            .sessions
            .lock()
            .map_err(|_| ApiError::from(anyhow::anyhow!("lock poisoned")))?;
        match sessions.get(&request.session_id) {
            Some(history) => history.clone(),
            None => {
                return Err(ApiError::not_found(format!(
                    "session not found: {}",
                    request.session_id
                )))
            }
        }
    };

    let turn = state
        .resolver
        .resolve_turn(&request.question, request.mode, &mut history)
        .await?;

    state
        .sessions
        .lock()
        .map_err(|_| ApiError::from(anyhow::anyhow!("lock poisoned")))?
        .insert(request.session_id, history);

    Ok(Json(turn))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
