//! Binary frame layout.
//!
//! ```text
//! [2: event type][36: environment or session id][36: execution id]?[payload]
//! ```
//!
//! All header fields are fixed-width ASCII. The execution id is only present
//! when the SDK connection negotiated [`HeaderFormat::WithExecutionId`].
//! `INITIALIZE` frames carry no id at all: the JSON payload follows the
//! event type directly.

use bytes::{BufMut, Bytes, BytesMut};

use crate::event::EventType;

/// Width of the event-type field.
pub const EVENT_TYPE_LEN: usize = 2;

/// Width of an id field (a hyphenated UUID).
pub const ID_LEN: usize = 36;

/// Frame header layout, negotiated once per SDK connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderFormat {
    /// `[type][connection id][payload]`
    Legacy,
    /// `[type][connection id][execution id][payload]`
    WithExecutionId,
}

impl HeaderFormat {
    /// Total header length in bytes.
    pub const fn header_len(self) -> usize {
        match self {
            Self::Legacy => EVENT_TYPE_LEN + ID_LEN,
            Self::WithExecutionId => EVENT_TYPE_LEN + ID_LEN + ID_LEN,
        }
    }

    pub const fn has_execution_id(self) -> bool {
        matches!(self, Self::WithExecutionId)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("{0} is not valid UTF-8")]
    InvalidId(&'static str),
}

/// A borrowed view over a received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub event_type: EventType,
    /// Environment id (browser → SDK) or session id (SDK → browser).
    pub connection_id: &'a str,
    pub execution_id: Option<&'a str>,
    pub payload: &'a [u8],
}

/// Read only the event type.
pub fn event_type(buf: &[u8]) -> Result<EventType, FrameError> {
    EventType::from_prefix(buf).ok_or(FrameError::Truncated {
        expected: EVENT_TYPE_LEN,
        actual: buf.len(),
    })
}

/// Split a frame according to `format`.
pub fn split(buf: &[u8], format: HeaderFormat) -> Result<Frame<'_>, FrameError> {
    let expected = format.header_len();
    if buf.len() < expected {
        return Err(FrameError::Truncated {
            expected,
            actual: buf.len(),
        });
    }

    let event_type = event_type(buf)?;
    let id_end = EVENT_TYPE_LEN + ID_LEN;
    let connection_id = std::str::from_utf8(&buf[EVENT_TYPE_LEN..id_end])
        .map_err(|_| FrameError::InvalidId("connection id"))?;

    let execution_id = if format.has_execution_id() {
        let exec = std::str::from_utf8(&buf[id_end..expected])
            .map_err(|_| FrameError::InvalidId("execution id"))?;
        Some(exec)
    } else {
        None
    };

    Ok(Frame {
        event_type,
        connection_id,
        execution_id,
        payload: &buf[expected..],
    })
}

/// Payload of a frame whose header is only the event type (`INITIALIZE`).
pub fn untagged_payload(buf: &[u8]) -> Result<&[u8], FrameError> {
    event_type(buf)?;
    Ok(&buf[EVENT_TYPE_LEN..])
}

/// Concatenate an event type, zero or more header fields and a payload.
pub fn encode(event_type: EventType, fields: &[&str], payload: &[u8]) -> Bytes {
    let header: usize = fields.iter().map(|f| f.len()).sum();
    let mut buf = BytesMut::with_capacity(EVENT_TYPE_LEN + header + payload.len());
    buf.put_slice(event_type.as_bytes());
    for field in fields {
        buf.put_slice(field.as_bytes());
    }
    buf.put_slice(payload);
    buf.freeze()
}
