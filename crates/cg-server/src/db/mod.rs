//! Persistence collaborator.
//!
//! The gateway only reads and writes a handful of records: environments
//! (looked up by hashed API key), their owning company, the viewing user,
//! inherited-permission app-user rows, and the configuration an SDK declares
//! on `INITIALIZE`. Everything goes through the [`Store`] trait so handlers can
//! be exercised against an in-memory store in tests.

#[cfg(test)]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use cg_common::AppResult;

/// Email prefix marking an app-user row as "inherit access from app X".
pub const INHERIT_PERMISSIONS_PREFIX: &str = "__inherit_permissions_from_app__:";

/// Email value of the app-user row that opens an app to anyone with the link.
pub const PUBLIC_APP_EMAIL: &str = "__public_app__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentKind {
    Development,
    Production,
}

impl EnvironmentKind {
    pub fn from_db(value: &str) -> Self {
        match value {
            "dev" => Self::Development,
            _ => Self::Production,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub id: String,
    pub company_id: String,
    pub name: String,
    pub kind: EnvironmentKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Company {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub company_id: String,
    /// The single development environment this user owns, if any.
    pub development_environment_id: Option<String>,
}

/// A row granting an email (or, via the sentinel prefix, another app's
/// audience) access to one app route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppUser {
    pub id: String,
    pub company_id: String,
    pub email: String,
    pub environment_id: String,
    pub app_route: String,
}

impl AppUser {
    /// The parent route this row inherits from, if it is an inheritance row.
    pub fn inherited_route(&self) -> Option<&str> {
        self.email.strip_prefix(INHERIT_PERMISSIONS_PREFIX)
    }
}

/// Build the pseudo-email of an inheritance row.
pub fn inherit_permissions_email(parent_route: &str) -> String {
    format!("{INHERIT_PERMISSIONS_PREFIX}{parent_route}")
}

/// An app as persisted after initialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    pub name: String,
    pub route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_app_route: Option<String>,
    pub hidden: bool,
    /// Remaining declared fields, stored as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavItem {
    pub label: String,
    pub route: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavRecord {
    pub items: Vec<NavItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// SDK metadata persisted next to the app list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentMeta {
    pub package_name: String,
    pub package_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navs: Option<Vec<NavRecord>>,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn environment_by_api_key_hash(&self, hash: &str) -> AppResult<Option<Environment>>;

    async fn environment_by_id(&self, id: &str) -> AppResult<Option<Environment>>;

    async fn environments_by_company(&self, company_id: &str) -> AppResult<Vec<Environment>>;

    async fn company_by_id(&self, id: &str) -> AppResult<Option<Company>>;

    async fn user_by_id(&self, id: &str) -> AppResult<Option<User>>;

    async fn app_users_by_route(
        &self,
        environment_id: &str,
        app_route: &str,
    ) -> AppResult<Vec<AppUser>>;

    async fn delete_app_user(&self, id: &str) -> AppResult<()>;

    async fn insert_app_user_from_sdk(
        &self,
        company_id: &str,
        email: &str,
        environment_id: &str,
        app_route: &str,
    ) -> AppResult<()>;

    /// Persist what an SDK declared on `INITIALIZE`.
    async fn update_configuration(
        &self,
        environment_id: &str,
        apps: &[AppRecord],
        theme: Option<&Value>,
        meta: &EnvironmentMeta,
    ) -> AppResult<()>;
}
