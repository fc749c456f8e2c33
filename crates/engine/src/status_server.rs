//! Status HTTP server.
//!
//! Exposes the queue snapshot for monitoring tools.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;

use crate::queue::JobQueue;
use crate::status::QueueSnapshot;

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /status
async fn get_status(State(queue): State<JobQueue>) -> Json<QueueSnapshot> {
    Json(queue.snapshot())
}

/// Creates the axum Router with the status endpoint
pub fn create_status_router(queue: JobQueue) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(queue)
}

/// Runs the status server until it fails
///
/// # Arguments
/// * `queue` - Queue to report on
/// * `bind` - Address such as `127.0.0.1:7879`
pub async fn run_status_server(queue: JobQueue, bind: &str) -> Result<(), ServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind.to_string()))?;

    let app = create_status_router(queue);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "status server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::channel;
    use crate::probe::FfprobeProbe;
    use crate::process_control::SysinfoProcessControl;
    use crate::supervisor::SupervisorSettings;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tokio::runtime::Handle;
    use tower::ServiceExt;

    fn idle_queue() -> JobQueue {
        let (tx, _rx) = channel();
        JobQueue::new(
            Handle::current(),
            SupervisorSettings::default(),
            Arc::new(FfprobeProbe::new("ffprobe")),
            Arc::new(SysinfoProcessControl),
            tx,
        )
    }

    #[tokio::test]
    async fn test_get_status_returns_json() {
        let app = create_status_router(idle_queue());

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .expect("should have content-type header");
        assert!(content_type.to_str().unwrap().contains("application/json"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let snapshot: QueueSnapshot =
            serde_json::from_slice(&body).expect("should deserialize to QueueSnapshot");
        assert!(snapshot.is_idle());
        assert!(!snapshot.paused);
        assert!(snapshot.timestamp_unix_ms > 0);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = create_status_router(idle_queue());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_bind_address() {
        let result = run_status_server(idle_queue(), "not-an-address").await;
        assert!(matches!(result, Err(ServerError::InvalidAddress(_))));
    }
}
