//! Error type definitions for the tab suspender
//!
//! Queue and browser failures keep their own enums next to the code that
//! raises them; this module gathers them under one application error.

use crate::job_scheduling::JobError;
use crate::tabs::BrowserError;
use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Job queue errors
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// Browser errors
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Config serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl AppError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
