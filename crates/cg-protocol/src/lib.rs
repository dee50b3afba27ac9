//! # cg-protocol
//!
//! Wire vocabulary shared by the gateway, the SDKs and the browser client:
//! event-type codes, binary frame layout, outbound message builders and
//! SDK package/version negotiation.

pub mod event;
pub mod frame;
pub mod message;
pub mod package;

pub use event::EventType;
pub use frame::{Frame, FrameError, HeaderFormat, EVENT_TYPE_LEN, ID_LEN};
pub use package::{SdkPackage, Version, VersionError};

/// Upgrade path served to SDK processes.
pub const SDK_PATH: &str = "/api/v1/sdk/ws";

/// Upgrade path served to browser tabs.
pub const BROWSER_PATH: &str = "/api/v1/browser/ws";

/// Close code sent to every socket when the gateway is shutting down.
pub const SERVER_UPDATE_CODE: u16 = 3782;

/// Close code sent when a peer misses a liveness check.
pub const PING_TIMEOUT_CODE: u16 = 3783;

/// Interval between liveness pings in seconds.
pub const PING_INTERVAL_SECS: u64 = 20;

/// Upper bound on graceful shutdown in seconds.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 3;

/// Custom HTTP header names used during the upgrade.
pub mod headers {
    pub const API_KEY: &str = "x-compose-api-key";
    pub const PACKAGE_NAME: &str = "x-compose-package-name";
    pub const PACKAGE_VERSION: &str = "x-compose-package-version";
    pub const ERROR_REASON: &str = "x-compose-error-reason";
    pub const ERROR_CODE: &str = "x-compose-error-code";
}
