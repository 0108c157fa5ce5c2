//! Tab discarding service

use super::SkipReason;
use crate::job_scheduling::{
    ExceptionReason, ExecutionProps, JobError, JobHandle, JobHandler, JobOutcome, QueueConfig,
    TabJobQueue,
};
use crate::tabs::{BrowserError, Tab, TabBrowser, TabId};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardOutcome {
    Discarded,
    Skipped(SkipReason),
    /// The browser never confirmed the discard
    TimedOut,
}

#[derive(Clone)]
pub struct DiscardService {
    queue: TabJobQueue<Tab, DiscardOutcome>,
}

impl DiscardService {
    pub fn new(browser: Arc<dyn TabBrowser>, config: QueueConfig) -> Result<Self, JobError> {
        let queue = TabJobQueue::new("discard", config, Arc::new(DiscardHandler { browser }))?;
        Ok(Self { queue })
    }

    pub fn discard(&self, tab: Tab) -> JobOutcome<DiscardOutcome> {
        self.queue.enqueue(tab, ExecutionProps::new(), None)
    }

    pub fn discard_after(&self, tab: Tab, delay: Duration) -> JobOutcome<DiscardOutcome> {
        self.queue.enqueue(tab, ExecutionProps::new(), Some(delay))
    }

    pub fn cancel(&self, id: TabId) -> bool {
        self.queue.unqueue(&id)
    }

    pub fn queue(&self) -> &TabJobQueue<Tab, DiscardOutcome> {
        &self.queue
    }
}

struct DiscardHandler {
    browser: Arc<dyn TabBrowser>,
}

#[async_trait]
impl JobHandler<Tab, DiscardOutcome> for DiscardHandler {
    async fn execute(&self, job: JobHandle<Tab, DiscardOutcome>) -> anyhow::Result<()> {
        let id = *job.entity_id();

        // The tab may have changed or closed since it was queued
        let Some(tab) = self.browser.get_tab(id).await? else {
            job.resolve(DiscardOutcome::Skipped(SkipReason::Missing));
            return Ok(());
        };
        job.update_entity(tab.clone());

        if tab.active {
            debug!("Not discarding active {}", id);
            job.resolve(DiscardOutcome::Skipped(SkipReason::Active));
            return Ok(());
        }
        if tab.discarded {
            job.resolve(DiscardOutcome::Discarded);
            return Ok(());
        }

        match self.browser.discard(id).await {
            Ok(_) => {
                info!("Discarded {} ({})", id, tab.url);
                job.resolve(DiscardOutcome::Discarded);
            }
            Err(BrowserError::TabNotFound(_)) => {
                job.resolve(DiscardOutcome::Skipped(SkipReason::Missing));
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn handle_exception(
        &self,
        job: JobHandle<Tab, DiscardOutcome>,
        reason: ExceptionReason,
    ) -> anyhow::Result<()> {
        warn!("Discard of {} hit {}", job.entity_id(), reason);
        job.resolve(DiscardOutcome::TimedOut);
        Ok(())
    }
}
