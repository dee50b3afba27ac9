//! WebSocket gateway relaying SDK ↔ browser traffic.

pub mod authorizations;
pub mod base;
pub mod browser;
pub mod initialize;
pub mod registry;
pub mod sdk;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use cg_common::config::GatewayConfig;
use cg_protocol::{BROWSER_PATH, SDK_PATH};

use self::authorizations::Authorizations;
use self::base::{handle_upgrade, UpgradeRequest, WsBase};
use self::browser::BrowserProtocol;
use self::registry::{BrowserConnections, RegistrySummary, SdkConnections};
use self::sdk::SdkProtocol;
use crate::db::Store;
use crate::services::api_key::ApiKeyHasher;
use crate::services::error_log::ErrorLog;
use crate::services::session::SessionValidator;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySummary {
    pub sdk_connections: RegistrySummary,
    pub browser_connections: RegistrySummary,
    pub authorized_sessions: usize,
    pub authorized_executions: usize,
}

/// Owns the registries and the authorization ledger and hands the same
/// instances to both endpoints.
pub struct Gateway {
    sdk: Arc<SdkProtocol>,
    browser: Arc<BrowserProtocol>,
    sdks: Arc<SdkConnections>,
    browsers: Arc<BrowserConnections>,
    authorizations: Arc<Authorizations>,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        store: Arc<dyn Store>,
        validator: Arc<dyn SessionValidator>,
        hasher: ApiKeyHasher,
        error_log: Arc<dyn ErrorLog>,
    ) -> Self {
        let sdks = Arc::new(SdkConnections::new());
        let browsers = Arc::new(BrowserConnections::new());
        let authorizations = Arc::new(Authorizations::new());

        let sdk = Arc::new(SdkProtocol::new(
            WsBase::new(config),
            store.clone(),
            hasher,
            sdks.clone(),
            browsers.clone(),
            authorizations.clone(),
            error_log,
        ));

        let browser = Arc::new(BrowserProtocol::new(
            WsBase::new(config),
            store,
            validator,
            sdks.clone(),
            browsers.clone(),
            authorizations.clone(),
        ));

        Self {
            sdk,
            browser,
            sdks,
            browsers,
            authorizations,
        }
    }

    /// Upgrade routes. Any other path is a 404.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(SDK_PATH, get(sdk_upgrade))
            .route(BROWSER_PATH, get(browser_upgrade))
            .fallback(not_found)
            .with_state(self.clone())
    }

    /// Close every socket with the server-update code.
    pub async fn handle_sigterm(&self) {
        tracing::info!(
            sdks = self.sdk.base().open_sockets(),
            browsers = self.browser.base().open_sockets(),
            "Closing WebSocket connections"
        );
        self.sdk.base().handle_sigterm().await;
        self.browser.base().handle_sigterm().await;
    }

    pub fn summarize(&self) -> GatewaySummary {
        let (authorized_sessions, authorized_executions) = self.authorizations.counts();
        GatewaySummary {
            sdk_connections: self.sdks.summarize(),
            browser_connections: self.browsers.summarize(),
            authorized_sessions,
            authorized_executions,
        }
    }

    /// Open SDK and browser connections.
    pub fn connection_counts(&self) -> (usize, usize) {
        (self.sdks.len(), self.browsers.len())
    }

    /// Authorize a session for an app outside the upgrade, e.g. when the
    /// tab navigates to another app on a live socket.
    pub fn authorize_browser(&self, session_id: &str, app_route: &str, environment_id: &str) {
        self.authorizations
            .authorize_browser(session_id, environment_id, app_route);
    }
}

async fn sdk_upgrade(
    State(gateway): State<Arc<Gateway>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    handle_upgrade(gateway.sdk.clone(), ws, UpgradeRequest { headers, query }).await
}

async fn browser_upgrade(
    State(gateway): State<Arc<Gateway>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    handle_upgrade(gateway.browser.clone(), ws, UpgradeRequest { headers, query }).await
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}
