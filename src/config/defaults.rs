/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
use std::time::Duration;

// Config file
pub const DEFAULT_CONFIG_FILE: &str = "tab-suspender.toml";

// Shared queue defaults
pub const DEFAULT_PROCESSING_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_PROCESSING_BUFFER: Duration = Duration::from_millis(50);
pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(5);

// Suspension defaults
pub const DEFAULT_SUSPENSION_CONCURRENCY: usize = 3;
pub const DEFAULT_SUSPENSION_TIMEOUT: Duration = Duration::from_secs(60);

// Tab check defaults
pub const DEFAULT_CHECK_CONCURRENCY: usize = 3;
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_LOADING_REQUEUE_DELAY: Duration = Duration::from_secs(1);

// Discard defaults
pub const DEFAULT_DISCARD_CONCURRENCY: usize = 5;
pub const DEFAULT_DISCARD_TIMEOUT: Duration = Duration::from_secs(5);

// Suspended page
pub const DEFAULT_SUSPENDED_PAGE_URL: &str = "chrome-extension://tab-suspender/suspended.html";
