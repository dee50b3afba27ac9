//! Browser endpoint: one socket per tab session.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::ws::{close_code, Message, WebSocket};
use bytes::Bytes;

use cg_protocol::event::browser_to_sdk;
use cg_protocol::message::{self, PackageInfo, StartExecution};
use cg_protocol::frame;

use super::authorizations::Authorizations;
use super::base::{close_message, ConnectionError, Protocol, UpgradeRequest, WsBase};
use super::registry::{BrowserConnections, SdkConnections, WsSender};
use crate::db::{EnvironmentKind, Store};
use crate::services::session::{SessionUser, SessionValidator};

#[derive(Debug, Clone)]
pub struct BrowserClient {
    pub session_id: String,
    pub app_route: Option<String>,
    pub environment_id: Option<String>,
    pub execution_id: Option<String>,
    pub user: SessionUser,
}

pub struct BrowserProtocol {
    base: WsBase,
    store: Arc<dyn Store>,
    validator: Arc<dyn SessionValidator>,
    sdks: Arc<SdkConnections>,
    browsers: Arc<BrowserConnections>,
    authorizations: Arc<Authorizations>,
}

impl BrowserProtocol {
    pub fn new(
        base: WsBase,
        store: Arc<dyn Store>,
        validator: Arc<dyn SessionValidator>,
        sdks: Arc<SdkConnections>,
        browsers: Arc<BrowserConnections>,
        authorizations: Arc<Authorizations>,
    ) -> Self {
        Self {
            base,
            store,
            validator,
            sdks,
            browsers,
            authorizations,
        }
    }

    pub fn base(&self) -> &WsBase {
        &self.base
    }

    /// Push the initial status and work out what the tab subscribes to.
    /// `None` means the home view cannot be served to this caller.
    async fn initial_subscriptions(
        &self,
        client: &BrowserClient,
        tx: &WsSender,
    ) -> Option<Vec<String>> {
        if let Some(environment_id) = &client.environment_id {
            let sdk = self.sdks.get(environment_id);
            let package = sdk.as_ref().map(|m| PackageInfo {
                name: m.package.as_str(),
                version: &m.package_version,
            });

            match message::connection_status(
                &client.session_id,
                environment_id,
                sdk.is_some(),
                package,
            ) {
                Ok(status) => {
                    let _ = tx.send(Message::Binary(status));
                }
                Err(e) => tracing::warn!(error = %e, "Failed to encode connection status"),
            }

            return Some(vec![environment_id.clone()]);
        }

        let (Some(company_id), Some(user_id)) = (&client.user.company_id, &client.user.user_id)
        else {
            return None;
        };

        let environments = match self.store.environments_by_company(company_id).await {
            Ok(environments) => environments,
            Err(e) => {
                tracing::error!(%company_id, error = %e, "Failed to load company environments");
                return None;
            }
        };

        let user = match self.store.user_by_id(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(%user_id, error = %e, "Failed to load user");
                return None;
            }
        };

        // Development environments are private to the user who owns them.
        let visible: Vec<String> = environments
            .into_iter()
            .filter(|env| {
                env.kind != EnvironmentKind::Development
                    || user.development_environment_id.as_deref() == Some(env.id.as_str())
            })
            .map(|env| env.id)
            .collect();

        let online: BTreeMap<String, bool> = visible
            .iter()
            .map(|id| (id.clone(), self.sdks.exists(id)))
            .collect();

        match message::active_company_connections(&online) {
            Ok(snapshot) => {
                let _ = tx.send(Message::Binary(snapshot));
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode connection snapshot"),
        }

        Some(visible)
    }

    fn on_message(&self, client: &BrowserClient, data: Bytes) {
        let Some(environment_id) = client.environment_id.as_deref() else {
            return;
        };
        // Nothing to relay to; the frame would be dropped anyway.
        let Some(sdk) = self.sdks.get(environment_id) else {
            return;
        };

        let frame = match frame::split(&data, sdk.header_format) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(session_id = %client.session_id, error = %e, "Dropping browser frame");
                return;
            }
        };

        if frame.connection_id != environment_id {
            tracing::debug!(
                session_id = %client.session_id,
                target = frame.connection_id,
                "Dropping browser frame for another environment"
            );
            return;
        }

        if let Some(execution_id) = frame.execution_id {
            let allowed = if frame.event_type == browser_to_sdk::START_EXECUTION {
                match serde_json::from_slice::<StartExecution>(frame.payload) {
                    Ok(start) => self.authorizations.authorize_new_execution_if_valid(
                        &client.session_id,
                        execution_id,
                        environment_id,
                        &start.app_route,
                    ),
                    Err(_) => false,
                }
            } else {
                self.authorizations.validate_existing_execution(
                    execution_id,
                    &client.session_id,
                    environment_id,
                )
            };

            if !allowed {
                tracing::debug!(
                    session_id = %client.session_id,
                    %execution_id,
                    event = %frame.event_type,
                    "Dropping browser frame for unauthorized execution"
                );
                return;
            }
        }

        let session_ended = frame.event_type == browser_to_sdk::BROWSER_SESSION_ENDED;
        self.sdks.push(environment_id, Message::Binary(data));

        if session_ended {
            self.authorizations.remove_browser_session(&client.session_id);
        }
    }

    fn on_close(&self, client: &BrowserClient, tx: &WsSender) {
        if !self.browsers.remove(&client.session_id, tx) {
            return;
        }
        self.authorizations.remove_browser_session(&client.session_id);
        tracing::debug!(session_id = %client.session_id, "Browser disconnected");
    }
}

impl Protocol for BrowserProtocol {
    type Client = BrowserClient;

    async fn authenticate(
        &self,
        request: &UpgradeRequest,
    ) -> Result<BrowserClient, ConnectionError> {
        let app_route = request.query("appRoute");
        let environment_id = request.query("environmentId");
        let execution_id = request.query("executionId");

        let Some(session_id) = request.query("sessionId") else {
            return Err(ConnectionError::new("brwsr2", "Session ID missing"));
        };

        if self.browsers.exists(session_id) {
            return Err(ConnectionError::new("brwsr3", "Session already exists"));
        }

        let user = match self
            .validator
            .validate(&request.headers, app_route, environment_id)
            .await
        {
            Ok(Some(user)) => user,
            Ok(None) => return Err(ConnectionError::new("brwsr1", "Invalid session")),
            Err(e) => {
                tracing::error!(%session_id, error = %e, "Session validation failed");
                return Err(ConnectionError::new("brwsr1", "Invalid session"));
            }
        };

        Ok(BrowserClient {
            session_id: session_id.to_string(),
            app_route: app_route.map(str::to_string),
            environment_id: environment_id.map(str::to_string),
            execution_id: execution_id.map(str::to_string),
            user,
        })
    }

    async fn on_connection(self: Arc<Self>, socket: WebSocket, client: BrowserClient) {
        let mut socket = self.base.open(socket);

        let Some(subscribe_to) = self.initial_subscriptions(&client, &socket.tx).await else {
            let _ = socket.tx.send(close_message(close_code::NORMAL, ""));
            self.base.finish(socket).await;
            return;
        };

        if !self
            .browsers
            .try_add(&client.session_id, socket.tx.clone(), &subscribe_to, ())
        {
            // Another tab claimed this session id first.
            tracing::debug!(session_id = %client.session_id, "Duplicate browser session closed");
            let _ = socket.tx.send(close_message(close_code::NORMAL, "Session already exists"));
            self.base.finish(socket).await;
            return;
        }

        if let (Some(environment_id), Some(app_route)) = (&client.environment_id, &client.app_route)
        {
            match &client.execution_id {
                Some(execution_id) => self.authorizations.authorize_browser_and_execution(
                    &client.session_id,
                    environment_id,
                    app_route,
                    execution_id,
                ),
                None => self.authorizations.authorize_browser(
                    &client.session_id,
                    environment_id,
                    app_route,
                ),
            }
        }

        tracing::debug!(
            session_id = %client.session_id,
            subscriptions = subscribe_to.len(),
            "Browser connected"
        );

        self.base
            .run(&mut socket, |data| self.on_message(&client, data))
            .await;

        self.on_close(&client, &socket.tx);
        self.base.finish(socket).await;
    }
}
