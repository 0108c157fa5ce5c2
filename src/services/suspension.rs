//! Tab suspension service

use super::SkipReason;
use crate::job_scheduling::{
    ExceptionReason, ExecutionProps, JobError, JobHandle, JobHandler, JobOutcome,
    PendingCompletions, QueueConfig, TabJobQueue,
};
use crate::tabs::{
    BrowserError, ContentMessage, ContentResponse, ContentStatus, SuspendedPage, Tab,
    TabBrowser, TabId, TabKind,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Execution property: [`ForceLevel`] as a number
pub const PROP_FORCE_LEVEL: &str = "force_level";
/// Execution property: render a preview before suspending
pub const PROP_GENERATE_PREVIEW: &str = "generate_preview";

const PREVIEW_QUALITY: f32 = 0.8;

/// How many safety checks a suspension request bypasses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ForceLevel {
    /// Requested explicitly by the user; only structural checks apply
    User = 1,
    /// Also respect the active tab and unsaved form input
    Interactive = 2,
    /// Automatic suspension; also respect pinned and audible tabs
    #[default]
    Automatic = 3,
}

impl ForceLevel {
    pub fn from_level(level: u64) -> Self {
        match level {
            0 | 1 => ForceLevel::User,
            2 => ForceLevel::Interactive,
            _ => ForceLevel::Automatic,
        }
    }

    pub fn level(self) -> u64 {
        self as u64
    }
}

/// Parameters of one suspension request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuspendRequest {
    pub force_level: ForceLevel,
    pub generate_preview: bool,
}

impl SuspendRequest {
    pub fn forced() -> Self {
        Self {
            force_level: ForceLevel::User,
            ..Self::default()
        }
    }

    pub fn with_preview(mut self) -> Self {
        self.generate_preview = true;
        self
    }

    fn into_props(self) -> ExecutionProps {
        ExecutionProps::new()
            .with(PROP_FORCE_LEVEL, self.force_level.level())
            .with(PROP_GENERATE_PREVIEW, self.generate_preview)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendOutcome {
    Suspended,
    Skipped(SkipReason),
}

type SuspendHandle = JobHandle<Tab, SuspendOutcome>;

/// Suspension waiting for its preview to be rendered
struct PendingPreview {
    job: SuspendHandle,
    tab: Tab,
}

/// Suspends tabs through a dedicated job queue.
///
/// When a preview is requested the job stays in progress until
/// [`SuspensionService::on_preview_ready`] is called for the tab.
#[derive(Clone)]
pub struct SuspensionService {
    queue: TabJobQueue<Tab, SuspendOutcome>,
    handler: Arc<SuspensionHandler>,
}

impl SuspensionService {
    pub fn new(
        browser: Arc<dyn TabBrowser>,
        page: SuspendedPage,
        config: QueueConfig,
    ) -> Result<Self, JobError> {
        let handler = Arc::new(SuspensionHandler {
            browser,
            page,
            previews: PendingCompletions::new(),
        });
        let queue = TabJobQueue::new("suspension", config, handler.clone())?;
        Ok(Self { queue, handler })
    }

    pub fn suspend(&self, tab: Tab, request: SuspendRequest) -> JobOutcome<SuspendOutcome> {
        self.queue.enqueue(tab, request.into_props(), None)
    }

    /// Suspend once `delay` has elapsed, unless a direct request wakes the job earlier
    pub fn suspend_after(
        &self,
        tab: Tab,
        request: SuspendRequest,
        delay: Duration,
    ) -> JobOutcome<SuspendOutcome> {
        self.queue.enqueue(tab, request.into_props(), Some(delay))
    }

    pub fn cancel(&self, id: TabId) -> bool {
        self.handler.previews.remove(&id);
        self.queue.unqueue(&id)
    }

    /// Finish a suspension that was waiting for its preview.
    ///
    /// Returns `false` when no job was waiting for this tab.
    pub async fn on_preview_ready(&self, id: TabId) -> bool {
        let Some(pending) = self.handler.previews.take(&id) else {
            debug!("Preview ready for {} but no suspension is waiting", id);
            return false;
        };
        self.handler.commit(&pending.job, &pending.tab).await;
        true
    }

    pub fn pending_previews(&self) -> usize {
        self.handler.previews.len()
    }

    pub fn queue(&self) -> &TabJobQueue<Tab, SuspendOutcome> {
        &self.queue
    }
}

struct SuspensionHandler {
    browser: Arc<dyn TabBrowser>,
    page: SuspendedPage,
    previews: PendingCompletions<TabId, PendingPreview>,
}

impl SuspensionHandler {
    /// Safety checks a tab must pass at the given force level
    fn ineligible(tab: &Tab, force_level: ForceLevel) -> Option<SkipReason> {
        if force_level >= ForceLevel::Interactive && tab.active {
            return Some(SkipReason::Active);
        }
        if force_level >= ForceLevel::Automatic {
            if tab.pinned {
                return Some(SkipReason::Pinned);
            }
            if tab.audible {
                return Some(SkipReason::Audible);
            }
        }
        None
    }

    /// Navigate to the suspended page and settle the job
    async fn commit(&self, job: &SuspendHandle, tab: &Tab) {
        let url = self.page.suspended_url(tab);
        match self.browser.navigate(tab.id, &url).await {
            Ok(_) => {
                info!("Suspended {} ({})", tab.id, tab.url);
                job.resolve(SuspendOutcome::Suspended);
            }
            Err(BrowserError::TabNotFound(_)) => {
                job.resolve(SuspendOutcome::Skipped(SkipReason::Missing));
            }
            Err(e) => {
                warn!("Failed to suspend {}: {}", tab.id, e);
                job.reject(JobError::executor(e.to_string()));
            }
        }
    }
}

#[async_trait]
impl JobHandler<Tab, SuspendOutcome> for SuspensionHandler {
    async fn execute(&self, job: SuspendHandle) -> anyhow::Result<()> {
        let id = *job.entity_id();
        let Some(tab) = self.browser.get_tab(id).await? else {
            job.resolve(SuspendOutcome::Skipped(SkipReason::Missing));
            return Ok(());
        };
        job.update_entity(tab.clone());

        let skip = match TabKind::classify(&tab, &self.page) {
            TabKind::Special => Some(SkipReason::SpecialPage),
            TabKind::Suspended { .. } => Some(SkipReason::AlreadySuspended),
            TabKind::Discarded => Some(SkipReason::AlreadyDiscarded),
            TabKind::Normal => None,
        };
        let force_level = ForceLevel::from_level(
            job.props()
                .get_u64(PROP_FORCE_LEVEL)
                .unwrap_or(ForceLevel::default().level()),
        );
        if let Some(reason) = skip.or_else(|| Self::ineligible(&tab, force_level)) {
            debug!("Not suspending {}: {}", id, reason);
            job.resolve(SuspendOutcome::Skipped(reason));
            return Ok(());
        }

        // A page without a running agent cannot object to being suspended
        match self.browser.send_message(id, ContentMessage::RequestInfo).await {
            Ok(ContentResponse::Info(info))
                if info.status == ContentStatus::FormInput
                    && force_level >= ForceLevel::Interactive =>
            {
                job.resolve(SuspendOutcome::Skipped(SkipReason::UnsavedFormInput));
                return Ok(());
            }
            Ok(_) | Err(BrowserError::NoResponse(_)) => {}
            Err(BrowserError::TabNotFound(_)) => {
                job.resolve(SuspendOutcome::Skipped(SkipReason::Missing));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if job.props().get_bool(PROP_GENERATE_PREVIEW) == Some(true) {
            self.previews.register(
                id,
                PendingPreview {
                    job: job.clone(),
                    tab: tab.clone(),
                },
            );
            let request = ContentMessage::GeneratePreview {
                quality: PREVIEW_QUALITY,
            };
            match self.browser.send_message(id, request).await {
                Ok(_) => {
                    debug!("Waiting for preview of {}", id);
                    return Ok(());
                }
                Err(e) => {
                    debug!("Preview of {} unavailable ({}), suspending without", id, e);
                    self.previews.remove(&id);
                }
            }
        }

        self.commit(&job, &tab).await;
        Ok(())
    }

    async fn handle_exception(
        &self,
        job: SuspendHandle,
        reason: ExceptionReason,
    ) -> anyhow::Result<()> {
        let id = *job.entity_id();
        self.previews.remove(&id);
        warn!("Suspension of {} hit {}, forcing it", id, reason);

        let Some(tab) = self.browser.get_tab(id).await? else {
            job.reject(JobError::Timeout);
            return Ok(());
        };
        match TabKind::classify(&tab, &self.page) {
            TabKind::Suspended { .. } => {
                job.resolve(SuspendOutcome::Suspended);
            }
            TabKind::Special => {
                job.resolve(SuspendOutcome::Skipped(SkipReason::SpecialPage));
            }
            TabKind::Normal | TabKind::Discarded => self.commit(&job, &tab).await,
        }
        Ok(())
    }
}
