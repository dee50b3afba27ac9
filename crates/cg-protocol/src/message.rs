//! Gateway-originated messages and the payloads the gateway parses.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::event::server_to_browser;
use crate::frame::encode;
use crate::EventType;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionStatus<'a> {
    #[serde(rename = "type")]
    event_type: EventType,
    environment_id: &'a str,
    is_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    package_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    package_version: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvironmentInitialized<'a> {
    #[serde(rename = "type")]
    event_type: EventType,
    environment_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ActiveCompanyConnections<'a> {
    #[serde(rename = "type")]
    event_type: EventType,
    connections: &'a BTreeMap<String, bool>,
}

/// SDK package identity reported alongside an online status.
#[derive(Debug, Clone, Copy)]
pub struct PackageInfo<'a> {
    pub name: &'a str,
    pub version: &'a str,
}

/// Online/offline status of one environment, addressed to `session_id`.
pub fn connection_status(
    session_id: &str,
    environment_id: &str,
    is_online: bool,
    package: Option<PackageInfo<'_>>,
) -> Result<Bytes, serde_json::Error> {
    let event_type = server_to_browser::SDK_CONNECTION_STATUS_CHANGED;
    let body = serde_json::to_vec(&ConnectionStatus {
        event_type,
        environment_id,
        is_online,
        package_name: package.map(|p| p.name),
        package_version: package.map(|p| p.version),
    })?;
    Ok(encode(event_type, &[session_id], &body))
}

/// Tells `session_id` that the environment re-declared its apps.
pub fn environment_initialized(
    session_id: &str,
    environment_id: &str,
) -> Result<Bytes, serde_json::Error> {
    let event_type = server_to_browser::ENVIRONMENT_INITIALIZED;
    let body = serde_json::to_vec(&EnvironmentInitialized {
        event_type,
        environment_id,
    })?;
    Ok(encode(event_type, &[session_id], &body))
}

/// Bulk online snapshot for the home view. The header carries no id.
pub fn active_company_connections(
    connections: &BTreeMap<String, bool>,
) -> Result<Bytes, serde_json::Error> {
    let event_type = server_to_browser::REPORT_ACTIVE_COMPANY_CONNECTIONS;
    let body = serde_json::to_vec(&ActiveCompanyConnections {
        event_type,
        connections,
    })?;
    Ok(encode(event_type, &[], &body))
}

/// Payload of a browser `START_EXECUTION` frame. Only the route is inspected.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartExecution {
    pub app_route: String,
}
