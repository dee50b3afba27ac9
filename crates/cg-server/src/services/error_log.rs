//! Sink for failures that must not tear down a connection.

use std::fmt;

pub trait ErrorLog: Send + Sync + 'static {
    fn record(&self, environment_id: &str, context: &str, error: &dyn fmt::Display);
}

/// Writes every recorded failure to the tracing pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorLog;

impl ErrorLog for TracingErrorLog {
    fn record(&self, environment_id: &str, context: &str, error: &dyn fmt::Display) {
        tracing::error!(%environment_id, context, error = %error, "Environment error");
    }
}
