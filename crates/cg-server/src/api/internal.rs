//! Operator routes: connection summary and out-of-band browser
//! authorization.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::middleware::InternalCaller;
use crate::ws::{Gateway, GatewaySummary};

pub struct InternalState {
    pub gateway: Arc<Gateway>,
    pub token: String,
}

pub fn router(gateway: Arc<Gateway>, token: String) -> Router {
    Router::new()
        .route("/ws-summary", get(ws_summary))
        .route("/browser-authorizations", post(authorize_browser))
        .with_state(Arc::new(InternalState { gateway, token }))
}

async fn ws_summary(
    _caller: InternalCaller,
    State(state): State<Arc<InternalState>>,
) -> Json<GatewaySummary> {
    Json(state.gateway.summarize())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeBrowser {
    session_id: String,
    app_route: String,
    environment_id: String,
}

/// Called once the app's own access check has passed for a session.
async fn authorize_browser(
    _caller: InternalCaller,
    State(state): State<Arc<InternalState>>,
    Json(body): Json<AuthorizeBrowser>,
) -> StatusCode {
    state
        .gateway
        .authorize_browser(&body.session_id, &body.app_route, &body.environment_id);
    tracing::debug!(
        session_id = %body.session_id,
        environment_id = %body.environment_id,
        "Browser authorized out of band"
    );
    StatusCode::NO_CONTENT
}
