//! Liveness endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::ws::Gateway;

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(gateway)
}

async fn health_check(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    let (sdks, browsers) = gateway.connection_counts();
    Json(json!({
        "status": "healthy",
        "service": "cg-server",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": {
            "sdk": sdks,
            "browser": browsers,
        },
    }))
}
