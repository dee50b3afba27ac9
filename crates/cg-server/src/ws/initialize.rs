//! The `INITIALIZE` handshake: an SDK declares its apps, theme and
//! navigation, and the gateway reconciles stored state to match.

use axum::extract::ws::Message;
use serde::Deserialize;
use serde_json::{Map, Value};

use cg_common::{AppError, AppResult};
use cg_protocol::message;

use super::registry::BrowserConnections;
use super::sdk::SdkClient;
use crate::db::{
    inherit_permissions_email, AppRecord, Environment, EnvironmentMeta, NavItem, NavRecord, Store,
};
use crate::services::error_log::ErrorLog;

#[derive(Debug, thiserror::Error)]
pub enum InitializeError {
    #[error("malformed INITIALIZE payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("error parsing navs: {0}")]
    Navs(#[source] serde_json::Error),

    #[error("failed to reconcile permissions for app {route}: {source}")]
    Permissions {
        route: String,
        #[source]
        source: AppError,
    },

    #[error("failed to persist configuration: {0}")]
    Persist(#[source] AppError),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeData {
    #[serde(default)]
    apps: Vec<DeclaredApp>,
    #[serde(default)]
    theme: Option<Value>,
    /// Kept raw so a bad nav only costs the navs.
    #[serde(default)]
    navs: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeclaredApp {
    name: String,
    route: String,
    #[serde(default)]
    parent_app_route: Option<String>,
    #[serde(default)]
    hidden: Option<bool>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct DeclaredNav {
    items: Vec<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Explicit value wins; child apps default to hidden.
fn is_app_hidden(hidden: Option<bool>, is_child_app: bool) -> bool {
    hidden.unwrap_or(is_child_app)
}

/// Make the inheritance rows of `app` point at exactly its declared parent.
/// Existing correct rows are kept, so repeated handshakes are idempotent.
async fn reconcile_inherited_permissions(
    store: &dyn Store,
    environment: &Environment,
    route: &str,
    parent: Option<&str>,
) -> AppResult<()> {
    let existing: Vec<_> = store
        .app_users_by_route(&environment.id, route)
        .await?
        .into_iter()
        .filter(|row| row.inherited_route().is_some())
        .collect();

    let Some(parent) = parent else {
        for row in &existing {
            store.delete_app_user(&row.id).await?;
        }
        return Ok(());
    };

    let stale: Vec<_> = existing
        .iter()
        .filter(|row| row.inherited_route() != Some(parent))
        .collect();

    for row in &stale {
        store.delete_app_user(&row.id).await?;
    }

    if stale.len() == existing.len() {
        store
            .insert_app_user_from_sdk(
                &environment.company_id,
                &inherit_permissions_email(parent),
                &environment.id,
                route,
            )
            .await?;
    }

    Ok(())
}

/// Nav items name app routes; show the app's name where one matches.
fn resolve_navs(raw: Value, apps: &[AppRecord]) -> Result<Vec<NavRecord>, InitializeError> {
    let navs: Vec<DeclaredNav> = serde_json::from_value(raw).map_err(InitializeError::Navs)?;

    Ok(navs
        .into_iter()
        .map(|nav| NavRecord {
            items: nav
                .items
                .into_iter()
                .map(|route| NavItem {
                    label: apps
                        .iter()
                        .find(|app| app.route == route)
                        .map_or_else(|| route.clone(), |app| app.name.clone()),
                    route,
                })
                .collect(),
            extra: nav.extra,
        })
        .collect())
}

/// Run the handshake for `client`. Per-app and nav failures are recorded
/// and skipped; a malformed payload or failed persist aborts before any
/// browser is told the environment changed. Returns how many browsers were
/// notified.
pub async fn initialize_environment(
    store: &dyn Store,
    browsers: &BrowserConnections,
    error_log: &dyn ErrorLog,
    client: &SdkClient,
    payload: &[u8],
) -> Result<usize, InitializeError> {
    let environment = &client.environment;
    let data: InitializeData = serde_json::from_slice(payload).map_err(InitializeError::Payload)?;

    let mut apps = Vec::with_capacity(data.apps.len());
    for app in data.apps {
        let parent = app.parent_app_route.as_deref();

        if let Err(source) =
            reconcile_inherited_permissions(store, environment, &app.route, parent).await
        {
            let err = InitializeError::Permissions {
                route: app.route.clone(),
                source,
            };
            error_log.record(&environment.id, "Error updating app permissions", &err);
        }

        apps.push(AppRecord {
            hidden: is_app_hidden(app.hidden, parent.is_some()),
            name: app.name,
            route: app.route,
            parent_app_route: app.parent_app_route,
            extra: app.extra,
        });
    }

    let navs = match data.navs {
        None | Some(Value::Null) => None,
        Some(raw) => match resolve_navs(raw, &apps) {
            Ok(navs) => Some(navs),
            Err(err) => {
                error_log.record(&environment.id, "Error parsing navs", &err);
                None
            }
        },
    };

    let meta = EnvironmentMeta {
        package_name: client.package.as_str().to_string(),
        package_version: client.package_version.clone(),
        navs,
    };

    store
        .update_configuration(&environment.id, &apps, data.theme.as_ref(), &meta)
        .await
        .map_err(InitializeError::Persist)?;

    tracing::info!(
        environment_id = %environment.id,
        apps = apps.len(),
        "Environment initialized"
    );

    Ok(browsers.push_to_subscribers(&environment.id, |session_id| {
        message::environment_initialized(session_id, &environment.id)
            .ok()
            .map(Message::Binary)
    }))
}
