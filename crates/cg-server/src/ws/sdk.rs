//! SDK endpoint: one backend process per environment.

use std::sync::Arc;

use axum::extract::ws::{close_code, Message, WebSocket};
use bytes::Bytes;

use cg_protocol::event::sdk_to_server;
use cg_protocol::message::{self, PackageInfo};
use cg_protocol::package::meets_minimum_version;
use cg_protocol::{frame, headers, HeaderFormat, SdkPackage};

use super::authorizations::Authorizations;
use super::base::{close_message, ConnectionError, Protocol, UpgradeRequest, WsBase};
use super::initialize::initialize_environment;
use super::registry::{BrowserConnections, SdkConnections, SdkMetadata, WsSender};
use crate::db::{Company, Environment, Store};
use crate::services::api_key::ApiKeyHasher;
use crate::services::error_log::ErrorLog;

/// An authenticated SDK, fixed for the connection's lifetime.
#[derive(Debug, Clone)]
pub struct SdkClient {
    pub environment: Environment,
    pub company: Company,
    pub package: SdkPackage,
    pub package_version: String,
    pub header_format: HeaderFormat,
}

pub struct SdkProtocol {
    base: WsBase,
    store: Arc<dyn Store>,
    hasher: ApiKeyHasher,
    sdks: Arc<SdkConnections>,
    browsers: Arc<BrowserConnections>,
    authorizations: Arc<Authorizations>,
    error_log: Arc<dyn ErrorLog>,
}

/// How a header value is reported back in rejection messages.
fn describe(value: Option<&str>) -> String {
    match value {
        Some(v) => serde_json::Value::from(v).to_string(),
        None => "undefined".to_string(),
    }
}

fn store_unavailable(err: cg_common::AppError) -> ConnectionError {
    tracing::error!(error = %err, "SDK authentication lookup failed");
    ConnectionError::new("srvr3", "Failed to authenticate. Please try again.")
}

impl SdkProtocol {
    pub fn new(
        base: WsBase,
        store: Arc<dyn Store>,
        hasher: ApiKeyHasher,
        sdks: Arc<SdkConnections>,
        browsers: Arc<BrowserConnections>,
        authorizations: Arc<Authorizations>,
        error_log: Arc<dyn ErrorLog>,
    ) -> Self {
        Self {
            base,
            store,
            hasher,
            sdks,
            browsers,
            authorizations,
            error_log,
        }
    }

    pub fn base(&self) -> &WsBase {
        &self.base
    }

    /// Tell every browser watching this environment whether its SDK is up.
    fn broadcast_status(&self, client: &SdkClient, is_online: bool) -> usize {
        let environment_id = &client.environment.id;
        let package = PackageInfo {
            name: client.package.as_str(),
            version: &client.package_version,
        };

        self.browsers.push_to_subscribers(environment_id, |session_id| {
            message::connection_status(session_id, environment_id, is_online, Some(package))
                .ok()
                .map(Message::Binary)
        })
    }

    fn on_message(self: &Arc<Self>, client: &Arc<SdkClient>, data: Bytes) {
        let event_type = match frame::event_type(&data) {
            Ok(event_type) => event_type,
            Err(e) => {
                tracing::debug!(environment_id = %client.environment.id, error = %e, "Dropping SDK frame");
                return;
            }
        };

        if event_type == sdk_to_server::INITIALIZE {
            // Off the receive loop so pongs keep flowing while the store works.
            let this = self.clone();
            let client = client.clone();
            tokio::spawn(async move { this.handle_initialize(&client, &data).await });
            return;
        }

        let frame = match frame::split(&data, client.header_format) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(environment_id = %client.environment.id, error = %e, "Dropping SDK frame");
                return;
            }
        };

        if let Some(execution_id) = frame.execution_id {
            if !self.authorizations.validate_existing_execution(
                execution_id,
                frame.connection_id,
                &client.environment.id,
            ) {
                tracing::debug!(
                    environment_id = %client.environment.id,
                    session_id = frame.connection_id,
                    %execution_id,
                    "Dropping SDK frame for unauthorized execution"
                );
                return;
            }
        }

        let session_id = frame.connection_id.to_string();
        self.browsers.push(&session_id, Message::Binary(data));
    }

    async fn handle_initialize(&self, client: &SdkClient, payload: &[u8]) {
        let payload = match frame::untagged_payload(payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(environment_id = %client.environment.id, error = %e, "Dropping SDK frame");
                return;
            }
        };

        if let Err(err) = initialize_environment(
            self.store.as_ref(),
            &self.browsers,
            self.error_log.as_ref(),
            client,
            payload,
        )
        .await
        {
            self.error_log
                .record(&client.environment.id, "Error initializing environment", &err);
        }
    }

    fn on_close(&self, client: &SdkClient, tx: &WsSender) {
        if !self.sdks.remove(&client.environment.id, tx) {
            return;
        }
        self.broadcast_status(client, false);
        tracing::info!(environment_id = %client.environment.id, "SDK disconnected");
    }
}

impl Protocol for SdkProtocol {
    type Client = SdkClient;

    async fn authenticate(&self, request: &UpgradeRequest) -> Result<SdkClient, ConnectionError> {
        let package_name = request.header(headers::PACKAGE_NAME);
        let package = match package_name.map(str::parse::<SdkPackage>) {
            Some(Ok(package)) => package,
            _ => {
                return Err(ConnectionError::new(
                    "srvr4",
                    format!("Invalid package name. Received {}.", describe(package_name)),
                ))
            }
        };

        let Some(package_version) = request
            .header(headers::PACKAGE_VERSION)
            .filter(|v| !v.is_empty())
        else {
            return Err(ConnectionError::new(
                "srvr5",
                format!(
                    "Invalid package version. Received {}.",
                    describe(request.header(headers::PACKAGE_VERSION))
                ),
            ));
        };

        meets_minimum_version(package_version, package.min_supported_version())
            .map_err(|e| ConnectionError::new("srvr1", e.to_string()))?;

        let Some(api_key) = request.headers.get(headers::API_KEY) else {
            return Err(ConnectionError::new("srvr6", "Missing API key."));
        };
        let Ok(api_key) = api_key.to_str() else {
            return Err(ConnectionError::new("srvr7", "Invalid API key."));
        };

        let hash = self.hasher.one_way_hash(api_key);
        let Some(environment) = self
            .store
            .environment_by_api_key_hash(&hash)
            .await
            .map_err(store_unavailable)?
        else {
            return Err(ConnectionError::new("srvr8", "Invalid API key."));
        };

        let Some(company) = self
            .store
            .company_by_id(&environment.company_id)
            .await
            .map_err(store_unavailable)?
        else {
            return Err(ConnectionError::new(
                "srvr10",
                "Could not find account associated with this API key.",
            ));
        };

        if self.sdks.exists(&environment.id) {
            return Err(ConnectionError::new("srvr9", "Connection already exists."));
        }

        Ok(SdkClient {
            header_format: package.header_format(package_version),
            package_version: package_version.to_string(),
            package,
            environment,
            company,
        })
    }

    async fn on_connection(self: Arc<Self>, socket: WebSocket, client: SdkClient) {
        let client = Arc::new(client);
        let mut socket = self.base.open(socket);

        let registered = self.sdks.try_add(
            &client.environment.id,
            socket.tx.clone(),
            &[],
            SdkMetadata {
                package: client.package,
                package_version: client.package_version.clone(),
                header_format: client.header_format,
            },
        );
        if !registered {
            // Another upgrade for this environment registered first.
            tracing::info!(environment_id = %client.environment.id, "Duplicate SDK connection closed");
            let _ = socket.tx.send(close_message(close_code::NORMAL, "Connection already exists."));
            self.base.finish(socket).await;
            return;
        }
        tracing::info!(
            environment_id = %client.environment.id,
            company = %client.company.name,
            package = %client.package,
            version = %client.package_version,
            "SDK connected"
        );
        self.broadcast_status(&client, true);

        self.base
            .run(&mut socket, |data| self.on_message(&client, data))
            .await;

        self.on_close(&client, &socket.tx);
        self.base.finish(socket).await;
    }
}
