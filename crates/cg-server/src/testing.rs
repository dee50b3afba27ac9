//! Fixtures shared by the handler tests.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::Message;
use axum::http::HeaderMap;
use tokio::sync::mpsc;

use crate::db::memory::MemoryStore;
use crate::db::{Company, Environment, EnvironmentKind, User};
use crate::services::api_key::ApiKeyHasher;
use crate::services::session::{SessionUser, SessionValidator};
use cg_common::config::GatewayConfig;
use cg_common::{AppError, AppResult};

pub const COMPANY_ID: &str = "c0000000-0000-4000-8000-000000000001";
pub const USER_ID: &str = "u0000000-0000-4000-8000-000000000001";
pub const PROD_ENV: &str = "e0000000-0000-4000-8000-000000000001";
pub const DEV_ENV: &str = "e0000000-0000-4000-8000-000000000002";
pub const OTHER_DEV_ENV: &str = "e0000000-0000-4000-8000-000000000003";
pub const SESSION_ID: &str = "s0000000-0000-4000-8000-000000000001";
pub const EXECUTION_ID: &str = "x0000000-0000-4000-8000-000000000001";

pub const API_KEY: &str = "ck_prod_test";
pub const API_KEY_SECRET: &str = "api-key-secret";

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        ping_interval_secs: 20,
        shutdown_timeout_secs: 3,
    }
}

pub fn hasher() -> ApiKeyHasher {
    ApiKeyHasher::new(API_KEY_SECRET)
}

pub fn environment(id: &str, kind: EnvironmentKind) -> Environment {
    Environment {
        id: id.into(),
        company_id: COMPANY_ID.into(),
        name: format!("env {id}"),
        kind,
    }
}

/// A company with one production environment (reachable with [`API_KEY`]),
/// the user's development environment and a colleague's.
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let hasher = hasher();

    store.insert_company(Company {
        id: COMPANY_ID.into(),
        name: "Acme".into(),
    });
    store.insert_user(User {
        id: USER_ID.into(),
        company_id: COMPANY_ID.into(),
        development_environment_id: Some(DEV_ENV.into()),
    });
    store.insert_environment(
        environment(PROD_ENV, EnvironmentKind::Production),
        &hasher.one_way_hash(API_KEY),
    );
    store.insert_environment(
        environment(DEV_ENV, EnvironmentKind::Development),
        &hasher.one_way_hash("ck_dev_mine"),
    );
    store.insert_environment(
        environment(OTHER_DEV_ENV, EnvironmentKind::Development),
        &hasher.one_way_hash("ck_dev_theirs"),
    );

    store
}

pub fn member() -> SessionUser {
    SessionUser {
        user_id: Some(USER_ID.into()),
        company_id: Some(COMPANY_ID.into()),
        email: "member@acme.test".into(),
        is_external: false,
    }
}

/// Accepts or rejects every session the same way.
pub enum StaticValidator {
    Accept(SessionUser),
    Reject,
    Fail,
}

#[async_trait]
impl SessionValidator for StaticValidator {
    async fn validate(
        &self,
        _headers: &HeaderMap,
        _app_route: Option<&str>,
        _environment_id: Option<&str>,
    ) -> AppResult<Option<SessionUser>> {
        match self {
            Self::Accept(user) => Ok(Some(user.clone())),
            Self::Reject => Ok(None),
            Self::Fail => Err(AppError::Internal(anyhow::anyhow!("session store down"))),
        }
    }
}

pub fn channel() -> (
    mpsc::UnboundedSender<Message>,
    mpsc::UnboundedReceiver<Message>,
) {
    mpsc::unbounded_channel()
}

/// Every binary frame queued on `rx` so far.
pub fn drain_binary(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<bytes::Bytes> {
    let mut frames = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Binary(data) = msg {
            frames.push(data);
        }
    }
    frames
}
