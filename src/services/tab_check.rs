//! Responsiveness checks for tabs

use crate::job_scheduling::{
    ExceptionReason, ExecutionProps, JobError, JobHandle, JobHandler, JobOutcome, QueueConfig,
    TabJobQueue,
};
use crate::tabs::{
    BrowserError, ContentMessage, SuspendedPage, Tab, TabBrowser, TabId, TabKind, TabLoadStatus,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Execution property: fetch the tab again instead of trusting the queued snapshot
pub const PROP_REFETCH: &str = "refetch";
/// Execution property: the tab was already reloaded once by this job
pub const PROP_RELOADED: &str = "reloaded";

/// Result of checking a tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TabCheckStatus {
    Normal,
    Suspended,
    Discarded,
    /// Browser-internal page without an agent
    Special,
    Missing,
    Unresponsive,
}

type CheckHandle = JobHandle<Tab, TabCheckStatus>;

#[derive(Clone)]
pub struct TabCheckService {
    queue: TabJobQueue<Tab, TabCheckStatus>,
}

impl TabCheckService {
    pub fn new(
        browser: Arc<dyn TabBrowser>,
        page: SuspendedPage,
        config: QueueConfig,
        loading_requeue_delay: Duration,
    ) -> Result<Self, JobError> {
        let handler = Arc::new(TabCheckHandler {
            browser,
            page,
            loading_requeue_delay,
        });
        let queue = TabJobQueue::new("tab_check", config, handler)?;
        Ok(Self { queue })
    }

    /// Check `tab`, trusting the snapshot for the first attempt
    pub fn check(&self, tab: Tab) -> JobOutcome<TabCheckStatus> {
        self.queue
            .enqueue(tab, ExecutionProps::new().with(PROP_REFETCH, false), None)
    }

    /// Check a tab known only by id
    pub fn check_id(&self, id: TabId) -> JobOutcome<TabCheckStatus> {
        self.queue.enqueue(
            Tab::new(id.0, String::new()),
            ExecutionProps::new().with(PROP_REFETCH, true),
            None,
        )
    }

    pub fn cancel(&self, id: TabId) -> bool {
        self.queue.unqueue(&id)
    }

    pub fn queue(&self) -> &TabJobQueue<Tab, TabCheckStatus> {
        &self.queue
    }
}

struct TabCheckHandler {
    browser: Arc<dyn TabBrowser>,
    page: SuspendedPage,
    loading_requeue_delay: Duration,
}

impl TabCheckHandler {
    async fn ping(&self, id: TabId) -> Result<bool, BrowserError> {
        match self.browser.send_message(id, ContentMessage::Ping).await {
            Ok(_) => Ok(true),
            Err(BrowserError::NoResponse(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl JobHandler<Tab, TabCheckStatus> for TabCheckHandler {
    async fn execute(&self, job: CheckHandle) -> anyhow::Result<()> {
        let id = *job.entity_id();
        let tab = if job.props().get_bool(PROP_REFETCH).unwrap_or(true) {
            let Some(tab) = self.browser.get_tab(id).await? else {
                job.resolve(TabCheckStatus::Missing);
                return Ok(());
            };
            job.update_entity(tab.clone());
            tab
        } else {
            job.entity().clone()
        };

        if tab.status == TabLoadStatus::Loading {
            debug!("{} still loading, checking again later", id);
            job.requeue(
                Some(self.loading_requeue_delay),
                Some(ExecutionProps::new().with(PROP_REFETCH, true)),
            );
            return Ok(());
        }

        let status = match TabKind::classify(&tab, &self.page) {
            TabKind::Special => TabCheckStatus::Special,
            TabKind::Discarded => TabCheckStatus::Discarded,
            TabKind::Normal => match self.ping(id).await {
                Ok(true) => TabCheckStatus::Normal,
                Ok(false) => TabCheckStatus::Unresponsive,
                Err(BrowserError::TabNotFound(_)) => TabCheckStatus::Missing,
                Err(e) => return Err(e.into()),
            },
            TabKind::Suspended { .. } => match self.ping(id).await {
                Ok(true) => TabCheckStatus::Suspended,
                Ok(false) if job.props().get_bool(PROP_RELOADED) != Some(true) => {
                    info!("Suspended {} is unresponsive, reloading", id);
                    self.browser.reload(id).await?;
                    job.requeue(
                        Some(self.loading_requeue_delay),
                        Some(
                            ExecutionProps::new()
                                .with(PROP_RELOADED, true)
                                .with(PROP_REFETCH, true),
                        ),
                    );
                    return Ok(());
                }
                Ok(false) => TabCheckStatus::Unresponsive,
                Err(BrowserError::TabNotFound(_)) => TabCheckStatus::Missing,
                Err(e) => return Err(e.into()),
            },
        };

        debug!("Checked {}: {:?}", id, status);
        job.resolve(status);
        Ok(())
    }

    async fn handle_exception(
        &self,
        job: CheckHandle,
        reason: ExceptionReason,
    ) -> anyhow::Result<()> {
        warn!("Check of {} hit {}, marking unresponsive", job.entity_id(), reason);
        job.resolve(TabCheckStatus::Unresponsive);
        Ok(())
    }
}
