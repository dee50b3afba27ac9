pub mod api_key;
pub mod error_log;
pub mod session;
