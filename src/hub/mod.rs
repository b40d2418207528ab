//! Control surface for the companion status interface
//!
//! The HTML dashboard itself lives outside this process; this router only
//! carries the out-of-band triggers the core needs: session introspection
//! and the remote shutdown request.

use crate::session::{Coordinator, Session};
use crate::Result;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::info;

/// State shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Session,
    pub coordinator: Arc<Coordinator>,
    /// Wakes the daemon's termination wait; the daemon owns the actual
    /// shutdown pass so every trigger funnels through one latch.
    pub shutdown_notify: Arc<Notify>,
}

impl AppState {
    pub fn new(session: Session, coordinator: Arc<Coordinator>, shutdown_notify: Arc<Notify>) -> Self {
        AppState {
            session,
            coordinator,
            shutdown_notify,
        }
    }
}

/// Create the router with all control endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/session", get(session_info))
        .route("/shutdown", post(shutdown))
        .with_state(state)
}

/// Serve the control surface on an already-bound listener
pub async fn start_server(state: AppState, listener: TcpListener) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("control surface listening on {}", addr);
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

async fn hello() -> Json<Value> {
    Json(json!({ "hello": "dohgate" }))
}

async fn session_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "id": state.session.id(),
        "proxy-port": state.session.proxy_port,
        "dashboard-port": state.session.dashboard_port,
        "static-port": state.session.static_port,
        "cleanup-in-progress": state.coordinator.is_shut_down(),
    }))
}

async fn shutdown(State(state): State<AppState>) -> Json<Value> {
    info!("remote shutdown requested");
    let notify = state.shutdown_notify.clone();
    tokio::spawn(async move {
        // let the response flush before the server is torn down
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        notify.notify_one();
    });
    Json(json!({ "status": "shutting down" }))
}
