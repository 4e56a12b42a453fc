use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::agent::{ComposeAgent, ReplyResult};
use crate::config::AppConfig;
use crate::email::EmailRecord;
use crate::error::ComposeError;

type SharedState = Arc<AppState>;

pub struct AppState {
    agent: ComposeAgent,
    config: AppConfig,
}

impl AppState {
    pub fn new(agent: ComposeAgent, config: AppConfig) -> Self {
        Self { agent, config }
    }
}

/// Error body returned by the API: `{"detail": "..."}`
pub struct ApiError(ComposeError);

impl From<ComposeError> for ApiError {
    fn from(err: ComposeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            ComposeError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ComposeError::Upstream(_) | ComposeError::Generation(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({"detail": self.0.to_string()}))).into_response()
    }
}

async fn compose_handler(
    State(state): State<SharedState>,
    payload: Result<Json<EmailRecord>, JsonRejection>,
) -> Result<Json<ReplyResult>, ApiError> {
    let Json(email) = payload.map_err(|e| ComposeError::Validation(e.body_text()))?;
    email.validate()?;

    tracing::info!(
        "Composing reply for {} from {} ({})",
        email.domain,
        email.sender,
        email.subject
    );
    let reply = state.agent.run(&email).await?;
    Ok(Json(reply))
}

async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "api_key_configured": !state.config.openai_api_key.is_empty(),
        "default_model": state.config.default_model,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub fn app(app_state: AppState) -> Router {
    let shared_state = SharedState::new(app_state);
    let cors = CorsLayer::permissive();

    Router::new()
        // Compose a reply to an inbound email
        .route("/api/v1/email/compose", post(compose_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

// Run the server
pub async fn serve(host: String, port: String, config: AppConfig) -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // axum logs rejections from built-in extractors with the `axum::rejection`
                // target, at `TRACE` level. `axum::rejection=trace` enables showing those events
                format! {
                    "{}=debug,tower_http=debug,axum::rejection=trace",
                    env!("CARGO_CRATE_NAME")
                }
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Using model {} ({} reasoning)",
        config.default_model,
        config.reasoning_level
    );
    let agent = ComposeAgent::from_config(&config);
    let app = app(AppState::new(agent, config));

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    tracing::debug!("Server started. Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
