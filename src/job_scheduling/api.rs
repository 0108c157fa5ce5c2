//! External API for the tab job queues

use super::job_queue::QueueStats;
use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::services::{DiscardService, SuspensionService, TabCheckService};
use crate::tabs::TabBrowser;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Bundles the suspension, check and discard services.
///
/// This provides a single interface for the rest of the application.
#[derive(Clone)]
pub struct TabJobsApi {
    suspension: SuspensionService,
    check: TabCheckService,
    discard: DiscardService,
}

impl TabJobsApi {
    pub fn new(
        suspension: SuspensionService,
        check: TabCheckService,
        discard: DiscardService,
    ) -> Self {
        Self {
            suspension,
            check,
            discard,
        }
    }

    /// Build all three services from a validated configuration
    pub fn from_config(browser: Arc<dyn TabBrowser>, config: &AppConfig) -> AppResult<Self> {
        config.validate()?;
        let page = config.suspended_page.page();

        let suspension = SuspensionService::new(
            browser.clone(),
            page.clone(),
            config.suspension.queue.to_queue_config()?,
        )?;
        let check = TabCheckService::new(
            browser.clone(),
            page,
            config.check.queue.to_queue_config()?,
            config.check.loading_requeue_delay,
        )?;
        let discard = DiscardService::new(browser, config.discard.to_queue_config()?)?;

        Ok(Self::new(suspension, check, discard))
    }

    pub fn suspension(&self) -> &SuspensionService {
        &self.suspension
    }

    pub fn check(&self) -> &TabCheckService {
        &self.check
    }

    pub fn discard(&self) -> &DiscardService {
        &self.discard
    }

    /// Health check for the job queues.
    ///
    /// Unhealthy while any job is still unsettled a full timeout after its
    /// timeout fired, i.e. an exception handler is stuck.
    pub fn health_check(&self) -> TabJobsHealthStatus {
        let suspension = self.suspension.queue().stats();
        let check = self.check.queue().stats();
        let discard = self.discard.queue().stats();
        let overdue = suspension.overdue + check.overdue + discard.overdue;
        if overdue > 0 {
            warn!("API: {} tab jobs are overdue", overdue);
        }

        TabJobsHealthStatus {
            is_healthy: overdue == 0,
            suspension,
            check,
            discard,
            pending_previews: self.suspension.pending_previews(),
        }
    }

    /// Cancel every tracked job on all queues
    pub fn shutdown(&self) -> usize {
        let cancelled = self.suspension.queue().shutdown()
            + self.check.queue().shutdown()
            + self.discard.queue().shutdown();
        info!("API: Shut down tab job queues, {} jobs cancelled", cancelled);
        cancelled
    }
}

/// Health status of the tab job queues
#[derive(Debug, Clone, Serialize)]
pub struct TabJobsHealthStatus {
    pub is_healthy: bool,
    pub suspension: QueueStats,
    pub check: QueueStats,
    pub discard: QueueStats,
    /// Suspensions waiting for a preview notification
    pub pending_previews: usize,
}

impl TabJobsHealthStatus {
    pub fn total_jobs(&self) -> usize {
        self.suspension.total() + self.check.total() + self.discard.total()
    }
}
