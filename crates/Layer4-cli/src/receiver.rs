//! HTTP event receiver
//!
//! Accepts structured CloudEvents and hands triggers to the coordinator.
//! Handling happens in the background; the response only reports intake.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jobexec_foundation::{CloudEvent, TriggerEvent};
use jobexec_task::{ExecutionCoordinator, Intake};
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const HEALTH_PATH: &str = "/health";

/// Build the receiver routes
pub fn router(coordinator: ExecutionCoordinator, path: &str) -> Router {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(&path, post(receive))
        .with_state(coordinator)
}

/// Serve until SIGINT/SIGTERM, then drain in-flight handlers
pub async fn serve(
    coordinator: ExecutionCoordinator,
    port: u16,
    path: &str,
    grace: Duration,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, path, "Listening for events");

    axum::serve(listener, router(coordinator.clone(), path))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Receiver stopped");
    coordinator.shutdown(grace).await;
    Ok(())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn receive(State(coordinator): State<ExecutionCoordinator>, body: Bytes) -> Response {
    let event: CloudEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Malformed CloudEvent");
            return reply(StatusCode::BAD_REQUEST, "rejected", e.to_string());
        }
    };

    let trigger = match TriggerEvent::from_cloud_event(event) {
        Ok(trigger) => trigger,
        Err(e) => {
            warn!(error = %e, "Unusable CloudEvent");
            return reply(StatusCode::BAD_REQUEST, "rejected", e.to_string());
        }
    };

    let event_id = trigger.id.clone();
    match coordinator.submit(trigger) {
        Intake::Accepted => {
            info!(event_id = %event_id, "Event accepted");
            reply(StatusCode::ACCEPTED, "accepted", event_id)
        }
        Intake::Ignored => reply(StatusCode::OK, "ignored", event_id),
        Intake::Duplicate => reply(StatusCode::OK, "duplicate", event_id),
        Intake::ShuttingDown => reply(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "shutting down".to_string(),
        ),
    }
}

fn reply(status: StatusCode, outcome: &str, detail: String) -> Response {
    (status, Json(json!({ "status": outcome, "detail": detail }))).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
