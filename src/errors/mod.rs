//! Centralized error handling for the tab suspender
//!
//! # Error Categories
//!
//! - **Job Errors**: settlement and configuration failures of a job queue
//! - **Browser Errors**: tabs that vanished or agents that did not answer
//! - **Configuration Errors**: invalid or unreadable config files
//!
//! # Usage
//!
//! ```rust
//! use tab_suspender::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Err(AppError::configuration("missing section"))
//! }
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;
