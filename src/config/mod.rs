use crate::errors::{AppError, AppResult};
use crate::job_scheduling::{JobError, QueueConfig, RequeuePolicy};
use crate::tabs::SuspendedPage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use defaults::*;

/// Settings shared by every tab job queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum number of jobs running at once
    pub concurrency_limit: usize,
    /// Budget from a job's first attempt until it is forced or given up
    #[serde(with = "duration_serde::duration")]
    pub job_timeout: Duration,
    /// Pause before the next job starts after one settles
    #[serde(
        with = "duration_serde::duration",
        default = "default_processing_delay"
    )]
    pub processing_delay: Duration,
    #[serde(
        with = "duration_serde::duration",
        default = "default_processing_buffer"
    )]
    pub processing_buffer: Duration,
    #[serde(with = "duration_serde::duration", default = "default_requeue_delay")]
    pub requeue_delay: Duration,
    #[serde(default)]
    pub requeue_policy: RequeuePolicy,
}

impl QueueSettings {
    pub fn new(concurrency_limit: usize, job_timeout: Duration) -> Self {
        Self {
            concurrency_limit,
            job_timeout,
            processing_delay: DEFAULT_PROCESSING_DELAY,
            processing_buffer: DEFAULT_PROCESSING_BUFFER,
            requeue_delay: DEFAULT_REQUEUE_DELAY,
            requeue_policy: RequeuePolicy::default(),
        }
    }

    /// Validated scheduler configuration for this section
    pub fn to_queue_config(&self) -> Result<QueueConfig, JobError> {
        let config = QueueConfig {
            concurrency_limit: self.concurrency_limit,
            job_timeout: self.job_timeout,
            processing_delay: self.processing_delay,
            processing_buffer: self.processing_buffer,
            default_requeue_delay: self.requeue_delay,
            requeue_policy: self.requeue_policy,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionSettings {
    #[serde(flatten)]
    pub queue: QueueSettings,
    /// Render a preview of the page before suspending it
    #[serde(default)]
    pub generate_preview: bool,
}

impl Default for SuspensionSettings {
    fn default() -> Self {
        Self {
            queue: QueueSettings::new(DEFAULT_SUSPENSION_CONCURRENCY, DEFAULT_SUSPENSION_TIMEOUT),
            generate_preview: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSettings {
    #[serde(flatten)]
    pub queue: QueueSettings,
    /// How long to wait before checking a tab that is still loading
    #[serde(
        with = "duration_serde::duration",
        default = "default_loading_requeue_delay"
    )]
    pub loading_requeue_delay: Duration,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            queue: QueueSettings::new(DEFAULT_CHECK_CONCURRENCY, DEFAULT_CHECK_TIMEOUT),
            loading_requeue_delay: DEFAULT_LOADING_REQUEUE_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendedPageSettings {
    pub base_url: String,
}

impl Default for SuspendedPageSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SUSPENDED_PAGE_URL.to_string(),
        }
    }
}

impl SuspendedPageSettings {
    pub fn page(&self) -> SuspendedPage {
        SuspendedPage::new(self.base_url.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub suspension: SuspensionSettings,
    #[serde(default)]
    pub check: CheckSettings,
    #[serde(default = "default_discard_settings")]
    pub discard: QueueSettings,
    #[serde(default)]
    pub suspended_page: SuspendedPageSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            suspension: SuspensionSettings::default(),
            check: CheckSettings::default(),
            discard: default_discard_settings(),
            suspended_page: SuspendedPageSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(config_file: impl AsRef<Path>) -> AppResult<Self> {
        let config_file = config_file.as_ref();
        if config_file.exists() {
            let contents = std::fs::read_to_string(config_file)?;
            let config: Self = toml::from_str(&contents)?;
            info!("Loaded config file: {}", config_file.display());
            Ok(config)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file.display());
            Ok(default_config)
        }
    }

    /// Check every section can be turned into a running queue
    pub fn validate(&self) -> AppResult<()> {
        let sections = [
            ("suspension", &self.suspension.queue),
            ("check", &self.check.queue),
            ("discard", &self.discard),
        ];
        for (name, settings) in sections {
            settings
                .to_queue_config()
                .map_err(|e| AppError::configuration(format!("[{name}] {e}")))?;
        }

        if self.check.loading_requeue_delay.is_zero() {
            return Err(AppError::configuration(
                "[check] loading_requeue_delay must be greater than zero",
            ));
        }
        if self.suspended_page.base_url.trim().is_empty() {
            return Err(AppError::configuration(
                "[suspended_page] base_url must not be empty",
            ));
        }
        Ok(())
    }
}

fn default_processing_delay() -> Duration {
    DEFAULT_PROCESSING_DELAY
}

fn default_processing_buffer() -> Duration {
    DEFAULT_PROCESSING_BUFFER
}

fn default_requeue_delay() -> Duration {
    DEFAULT_REQUEUE_DELAY
}

fn default_loading_requeue_delay() -> Duration {
    DEFAULT_LOADING_REQUEUE_DELAY
}

fn default_discard_settings() -> QueueSettings {
    QueueSettings::new(DEFAULT_DISCARD_CONCURRENCY, DEFAULT_DISCARD_TIMEOUT)
}
