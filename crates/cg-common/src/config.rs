use std::time::Duration;

use serde::Deserialize;

/// Top-level application configuration.
/// Loaded from environment variables (and a `.env` file, if present).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Database settings
    pub database: DatabaseConfig,
    /// Session and API key secrets
    pub auth: AuthConfig,
    /// WebSocket gateway tuning
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP/WebSocket port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log level used when `RUST_LOG` is unset (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Bearer token guarding the internal summary endpoint.
    /// The endpoint is not mounted when unset.
    #[serde(default)]
    pub internal_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            internal_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Max connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret that browser session tokens are signed with
    pub session_secret: String,
    /// HMAC secret for one-way API key hashes
    pub api_key_secret: String,
    /// Cookie carrying the browser session token (default: cg_session)
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    /// Accept any `Origin` on browser upgrades (local development only)
    #[serde(default)]
    pub dev_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Seconds between liveness pings (default: 20)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Upper bound on graceful shutdown (default: 3)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl GatewayConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl AppConfig {
    /// Load config from environment variables, e.g. `CG_DATABASE__URL`.
    pub fn load() -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("CG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        cfg.try_deserialize()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_connections() -> u32 {
    10
}
fn default_session_cookie() -> String {
    "cg_session".to_string()
}
fn default_ping_interval() -> u64 {
    cg_protocol::PING_INTERVAL_SECS
}
fn default_shutdown_timeout() -> u64 {
    cg_protocol::SHUTDOWN_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_defaults_match_protocol() {
        let gw = GatewayConfig::default();
        assert_eq!(gw.ping_interval(), Duration::from_secs(20));
        assert_eq!(gw.shutdown_timeout(), Duration::from_secs(3));
        assert_eq!(gw.ping_interval_secs, cg_protocol::PING_INTERVAL_SECS);
        assert_eq!(gw.shutdown_timeout_secs, cg_protocol::SHUTDOWN_TIMEOUT_SECS);
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: AppConfig = serde_json::from_value(serde_json::json!({
            "database": { "url": "postgres://localhost/compose" },
            "auth": { "session_secret": "s", "api_key_secret": "k" }
        }))
        .unwrap();

        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.database.max_connections, 10);
        assert_eq!(cfg.auth.session_cookie, "cg_session");
        assert!(!cfg.auth.dev_mode);
        assert_eq!(cfg.gateway.ping_interval_secs, 20);
        assert!(cfg.server.internal_token.is_none());
    }
}
