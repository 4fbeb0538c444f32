//! RepoMind core library.
//!
//! Foundational utilities shared by every RepoMind crate:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging setup
//! - Application configuration

pub mod config;
pub mod error;
pub mod logging;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
