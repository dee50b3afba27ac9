//! Two-byte event-type codes.
//!
//! Every frame starts with an ASCII event-type code. Codes are namespaced by
//! direction, so the same two bytes may mean different things depending on
//! who sent the frame.

use std::fmt;

use serde::{Serialize, Serializer};

/// A fixed-width, two-byte event-type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventType([u8; 2]);

impl EventType {
    pub const fn new(code: [u8; 2]) -> Self {
        Self(code)
    }

    /// Read the event type from the first two bytes of a buffer.
    pub fn from_prefix(buf: &[u8]) -> Option<Self> {
        match buf {
            [a, b, ..] => Some(Self([*a, *b])),
            _ => None,
        }
    }

    pub const fn as_bytes(&self) -> &[u8; 2] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Events an SDK sends that the gateway consumes itself.
pub mod sdk_to_server {
    use super::EventType;

    /// Declares the environment's apps, theme and navigation. Never relayed.
    pub const INITIALIZE: EventType = EventType::new(*b"0a");
}

/// Browser events the gateway inspects before relaying them to the SDK.
pub mod browser_to_sdk {
    use super::EventType;

    pub const START_EXECUTION: EventType = EventType::new(*b"ab");
    /// Sent when a tab closes or navigates away, ahead of the socket closing.
    pub const BROWSER_SESSION_ENDED: EventType = EventType::new(*b"ae");
}

/// Events originated by the gateway itself.
pub mod server_to_browser {
    use super::EventType;

    pub const REPORT_ACTIVE_COMPANY_CONNECTIONS: EventType = EventType::new(*b"0a");
    pub const SDK_CONNECTION_STATUS_CHANGED: EventType = EventType::new(*b"0b");
    pub const ENVIRONMENT_INITIALIZED: EventType = EventType::new(*b"0c");
}
