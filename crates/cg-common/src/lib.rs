//! # cg-common
//!
//! Shared configuration and error types for the Compose gateway.

pub mod config;
pub mod error;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
