//! Webhook HTTP surface
//!
//! ```text
//! POST /webhook  ── verify HMAC ── parse ── enqueue ──▶ 200 {message, message_id}
//!                       │            │         │
//!                      401          400       503
//! GET  /health   ──▶ 200 {status: "ok"}
//! ```

pub mod error;
pub mod ingest;
pub mod signature;

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderName, header::InvalidHeaderName},
    routing::{get, post},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

pub use error::IngestError;
pub use ingest::{IngestOutcome, WebhookIngest};

use crate::config::WebhookConfig;

pub struct WebhookState {
    pub ingest: WebhookIngest,
    pub signature_header: HeaderName,
}

impl WebhookState {
    pub fn new(ingest: WebhookIngest, signature_header: &str) -> Result<Self, InvalidHeaderName> {
        let signature_header =
            HeaderName::from_bytes(signature_header.to_ascii_lowercase().as_bytes())?;
        Ok(Self {
            ingest,
            signature_header,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub fn router(state: Arc<WebhookState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, IngestError> {
    let signature = headers
        .get(&state.signature_header)
        .and_then(|v| v.to_str().ok());

    let response = match state.ingest.ingest(signature, &body).await? {
        IngestOutcome::Enqueued(message_id) => WebhookResponse {
            message: "Webhook queued successfully",
            message_id: Some(message_id),
        },
        IngestOutcome::Ping => WebhookResponse {
            message: "pong",
            message_id: None,
        },
    };
    Ok(Json(response))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Bind and serve until Ctrl-C
pub async fn run_server(config: &WebhookConfig, state: Arc<WebhookState>) -> std::io::Result<()> {
    let app = router(state, config.max_body_bytes);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(addr = %addr, "Webhook server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
}
