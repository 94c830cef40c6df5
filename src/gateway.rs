//! Subscription gateway: the external attach point. Resolves an opaque key
//! to a job, replays buffered history to the new viewer, then hands the
//! viewer a live queue if the job is still running.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::registry::ReceiverRegistry;
use crate::store::{JobStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request did not carry enough to address a job. Always a client
    /// error, never retried.
    #[error("unable to derive job key: {0}")]
    InvalidKey(String),
}

/// Pluggable derivation of the opaque partition key from request routing
/// parameters.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self, params: &HashMap<String, String>) -> Result<String, GatewayError>;
}

/// Default generator: the `key` path segment is the job id.
pub struct PathKeyGenerator;

impl KeyGenerator for PathKeyGenerator {
    fn generate(&self, params: &HashMap<String, String>) -> Result<String, GatewayError> {
        match params.get("key") {
            Some(key) if !key.is_empty() => Ok(key.clone()),
            _ => Err(GatewayError::InvalidKey("missing key segment".to_string())),
        }
    }
}

pub struct Gateway {
    store: Arc<JobStore>,
    registry: Arc<ReceiverRegistry>,
    key_generator: Arc<dyn KeyGenerator>,
    receiver_capacity: usize,
}

impl Gateway {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<ReceiverRegistry>,
        key_generator: Arc<dyn KeyGenerator>,
        receiver_capacity: usize,
    ) -> Self {
        Self {
            store,
            registry,
            key_generator,
            receiver_capacity,
        }
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/jobs/{key}/ws", get(ws_attach))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self)
    }

    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("gateway listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn healthz() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_attach(
    State(gateway): State<Arc<Gateway>>,
    Path(params): Path<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let key = match gateway.key_generator.generate(&params) {
        Ok(key) => key,
        Err(e) => {
            tracing::debug!("rejecting attach: {e}");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    // Unknown keys are rejected before the upgrade; there is no job to show.
    if let Err(e) = gateway.store.get(&key).await {
        return match e {
            StoreError::NotFound(_) => {
                (StatusCode::NOT_FOUND, format!("no job found for key {key}")).into_response()
            }
            other => {
                tracing::error!("job lookup failed for {key}: {other}");
                (StatusCode::INTERNAL_SERVER_ERROR, "job lookup failed".to_string())
                    .into_response()
            }
        };
    }

    ws.on_upgrade(move |socket| attach(gateway, key, socket))
}

/// Per-attach state machine: backfill, then live forwarding. Runs as its
/// own task, blocking only on its own delivery queue.
async fn attach(gateway: Arc<Gateway>, key: String, mut socket: WebSocket) {
    let job = match gateway.store.get(&key).await {
        Ok(job) => job,
        Err(e) => {
            tracing::debug!(job_id = %key, "job disappeared before backfill: {e}");
            close_socket(&mut socket, "no job found").await;
            return;
        }
    };

    tracing::debug!(job_id = %key, lines = job.output.len(), "backfilling viewer");
    for line in &job.output {
        if socket.send(Message::Text(line.clone().into())).await.is_err() {
            return;
        }
    }

    // Backfill already contains everything that will ever exist.
    if job.is_complete() {
        close_socket(&mut socket, "job complete").await;
        return;
    }

    // Register for live delivery only after backfill, so a line can never
    // be delivered twice. A line broadcast between backfill and this
    // registration is missed; accepted best-effort window.
    let (tx, mut rx) = mpsc::channel(gateway.receiver_capacity);
    gateway.registry.add_receiver(&key, tx);

    // The job may have been closed inside that window, in which case the
    // registry entry we just created will never be closed for us. Drop it
    // so the viewer is not left blocked on a queue with no producer.
    match gateway.store.get(&key).await {
        Ok(job) if job.is_complete() => gateway.registry.close(&key),
        Ok(_) => {}
        Err(_) => gateway.registry.close(&key),
    }

    while let Some(line) = rx.recv().await {
        if socket.send(Message::Text(line.into())).await.is_err() {
            return;
        }
    }

    close_socket(&mut socket, "job complete").await;
}

async fn close_socket(socket: &mut WebSocket, reason: &str) {
    let frame = CloseFrame {
        code: axum::extract::ws::close_code::NORMAL,
        reason: reason.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_key_generator_reads_key_segment() {
        let params = HashMap::from([("key".to_string(), "1234".to_string())]);
        assert_eq!(PathKeyGenerator.generate(&params).unwrap(), "1234");
    }

    #[test]
    fn test_path_key_generator_rejects_missing_or_empty_key() {
        assert!(PathKeyGenerator.generate(&HashMap::new()).is_err());

        let params = HashMap::from([("key".to_string(), String::new())]);
        assert!(PathKeyGenerator.generate(&params).is_err());
    }
}
