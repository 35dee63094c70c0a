//! Control plane
//!
//! Information Hiding:
//! - Two POST routes free and restore the text backend's model
//! - The routes only flip shared load state through `TextBackendClient`
//! - Results are reported as small JSON bodies for out-of-band tooling

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::text_backend::{ControlOutcome, TextBackendClient};
use crate::error::BridgeResult;

pub fn control_router(client: Arc<TextBackendClient>) -> Router {
    Router::new()
        .route("/unload", post(unload_handler))
        .route("/reload", post(reload_handler))
        .with_state(client)
}

async fn unload_handler(State(client): State<Arc<TextBackendClient>>) -> impl IntoResponse {
    respond(client.unload_model().await, "unloaded")
}

async fn reload_handler(State(client): State<Arc<TextBackendClient>>) -> impl IntoResponse {
    respond(client.reload_model().await, "reloaded")
}

fn respond(result: BridgeResult<ControlOutcome>, done: &str) -> (StatusCode, Json<serde_json::Value>) {
    match result {
        Ok(outcome) => {
            let status = match outcome {
                ControlOutcome::Done => done,
                ControlOutcome::AlreadyUnloaded => "already_unloaded",
                ControlOutcome::NotUnloaded => "not_unloaded",
            };
            (StatusCode::OK, Json(json!({ "status": status })))
        }
        Err(e) => {
            tracing::error!("[Control] Request failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
        }
    }
}

/// Serves the control routes until `shutdown` fires.
pub async fn serve(
    bind: &str,
    client: Arc<TextBackendClient>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("[Control] Listening on http://{}", bind);

    axum::serve(listener, control_router(client))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("[Control] Stopped");
    Ok(())
}
