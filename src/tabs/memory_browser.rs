//! In-process browser used by the simulation binary and tests

use super::browser::{
    BrowserError, ContentInfo, ContentMessage, ContentResponse, ContentStatus, TabBrowser,
};
use super::model::{Tab, TabId, TabLoadStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::sleep;
use tracing::debug;

/// How the simulated in-tab agent answers messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentBehaviour {
    #[default]
    Responsive,
    /// Never answers; fixed by a reload
    Unresponsive,
    /// Answers, reporting unsaved form input
    FormInput,
}

/// Side effect recorded by the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    Navigated { tab: TabId, url: String },
    Reloaded(TabId),
    Discarded(TabId),
    PreviewRequested(TabId),
}

struct SimulatedTab {
    tab: Tab,
    behaviour: ContentBehaviour,
    latency: Duration,
}

/// Deterministic [`TabBrowser`] keeping every tab in memory.
///
/// Message latency is simulated with `tokio::time::sleep`, so tests running
/// on a paused clock stay deterministic. Preview completions are delivered on
/// the channel returned by [`InMemoryBrowser::preview_notifications`].
pub struct InMemoryBrowser {
    tabs: RwLock<HashMap<TabId, SimulatedTab>>,
    events: Mutex<Vec<BrowserEvent>>,
    default_latency: Duration,
    preview_tx: mpsc::UnboundedSender<TabId>,
    preview_rx: Mutex<Option<mpsc::UnboundedReceiver<TabId>>>,
}

impl InMemoryBrowser {
    pub fn new(default_latency: Duration) -> Self {
        let (preview_tx, preview_rx) = mpsc::unbounded_channel();
        Self {
            tabs: RwLock::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            default_latency,
            preview_tx,
            preview_rx: Mutex::new(Some(preview_rx)),
        }
    }

    pub async fn insert_tab(&self, tab: Tab) {
        self.insert_tab_with(tab, ContentBehaviour::Responsive).await;
    }

    pub async fn insert_tab_with(&self, tab: Tab, behaviour: ContentBehaviour) {
        let simulated = SimulatedTab {
            tab,
            behaviour,
            latency: self.default_latency,
        };
        self.tabs.write().await.insert(simulated.tab.id, simulated);
    }

    /// Close a tab
    pub async fn remove_tab(&self, id: TabId) -> Option<Tab> {
        self.tabs.write().await.remove(&id).map(|simulated| simulated.tab)
    }

    pub async fn tab(&self, id: TabId) -> Option<Tab> {
        self.tabs.read().await.get(&id).map(|simulated| simulated.tab.clone())
    }

    pub async fn tabs(&self) -> Vec<Tab> {
        let mut tabs: Vec<Tab> = self
            .tabs
            .read()
            .await
            .values()
            .map(|simulated| simulated.tab.clone())
            .collect();
        tabs.sort_by_key(|tab| tab.id);
        tabs
    }

    pub async fn set_behaviour(&self, id: TabId, behaviour: ContentBehaviour) {
        if let Some(simulated) = self.tabs.write().await.get_mut(&id) {
            simulated.behaviour = behaviour;
        }
    }

    pub async fn set_latency(&self, id: TabId, latency: Duration) {
        if let Some(simulated) = self.tabs.write().await.get_mut(&id) {
            simulated.latency = latency;
        }
    }

    pub async fn set_status(&self, id: TabId, status: TabLoadStatus) {
        if let Some(simulated) = self.tabs.write().await.get_mut(&id) {
            simulated.tab.status = status;
        }
    }

    pub async fn set_active(&self, id: TabId, active: bool) {
        if let Some(simulated) = self.tabs.write().await.get_mut(&id) {
            simulated.tab.active = active;
        }
    }

    pub async fn events(&self) -> Vec<BrowserEvent> {
        self.events.lock().await.clone()
    }

    /// Receiver of "preview ready" notifications; available once
    pub async fn preview_notifications(&self) -> Option<mpsc::UnboundedReceiver<TabId>> {
        self.preview_rx.lock().await.take()
    }

    async fn record(&self, event: BrowserEvent) {
        debug!("Browser event: {:?}", event);
        self.events.lock().await.push(event);
    }

    async fn behaviour_of(&self, id: TabId) -> Result<(Tab, ContentBehaviour, Duration), BrowserError> {
        self.tabs
            .read()
            .await
            .get(&id)
            .map(|simulated| (simulated.tab.clone(), simulated.behaviour, simulated.latency))
            .ok_or(BrowserError::TabNotFound(id))
    }
}

#[async_trait]
impl TabBrowser for InMemoryBrowser {
    async fn get_tab(&self, id: TabId) -> Result<Option<Tab>, BrowserError> {
        Ok(self.tab(id).await)
    }

    async fn send_message(
        &self,
        id: TabId,
        message: ContentMessage,
    ) -> Result<ContentResponse, BrowserError> {
        let (tab, behaviour, latency) = self.behaviour_of(id).await?;
        sleep(latency).await;

        // Discarded tabs have no running agent
        if tab.discarded || behaviour == ContentBehaviour::Unresponsive {
            return Err(BrowserError::NoResponse(id));
        }

        match message {
            ContentMessage::Ping => Ok(ContentResponse::Pong),
            ContentMessage::RequestInfo => {
                let status = match behaviour {
                    ContentBehaviour::FormInput => ContentStatus::FormInput,
                    _ => ContentStatus::Normal,
                };
                Ok(ContentResponse::Info(ContentInfo {
                    status,
                    scroll_position: 0,
                }))
            }
            ContentMessage::GeneratePreview { .. } => {
                self.record(BrowserEvent::PreviewRequested(id)).await;
                let notify = self.preview_tx.clone();
                tokio::spawn(async move {
                    sleep(latency).await;
                    // Receiver gone means nobody is waiting for previews
                    let _ = notify.send(id);
                });
                Ok(ContentResponse::Accepted)
            }
        }
    }

    async fn navigate(&self, id: TabId, url: &str) -> Result<Tab, BrowserError> {
        let tab = {
            let mut tabs = self.tabs.write().await;
            let simulated = tabs.get_mut(&id).ok_or(BrowserError::TabNotFound(id))?;
            simulated.tab.url = url.to_string();
            simulated.tab.discarded = false;
            simulated.tab.status = TabLoadStatus::Complete;
            simulated.behaviour = ContentBehaviour::Responsive;
            simulated.tab.clone()
        };
        self.record(BrowserEvent::Navigated {
            tab: id,
            url: url.to_string(),
        })
        .await;
        Ok(tab)
    }

    async fn reload(&self, id: TabId) -> Result<(), BrowserError> {
        {
            let mut tabs = self.tabs.write().await;
            let simulated = tabs.get_mut(&id).ok_or(BrowserError::TabNotFound(id))?;
            simulated.tab.discarded = false;
            simulated.tab.status = TabLoadStatus::Complete;
            if simulated.behaviour == ContentBehaviour::Unresponsive {
                simulated.behaviour = ContentBehaviour::Responsive;
            }
        }
        self.record(BrowserEvent::Reloaded(id)).await;
        Ok(())
    }

    async fn discard(&self, id: TabId) -> Result<Tab, BrowserError> {
        let tab = {
            let mut tabs = self.tabs.write().await;
            let simulated = tabs.get_mut(&id).ok_or(BrowserError::TabNotFound(id))?;
            if simulated.tab.active {
                return Err(BrowserError::Rejected {
                    tab: id,
                    message: "cannot discard the active tab".to_string(),
                });
            }
            simulated.tab.discarded = true;
            simulated.tab.clone()
        };
        self.record(BrowserEvent::Discarded(id)).await;
        Ok(tab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_tab_recovers_after_reload() {
        let browser = InMemoryBrowser::new(Duration::from_millis(5));
        browser
            .insert_tab_with(Tab::new(1, "https://example.com"), ContentBehaviour::Unresponsive)
            .await;

        assert_eq!(
            browser.send_message(TabId(1), ContentMessage::Ping).await,
            Err(BrowserError::NoResponse(TabId(1)))
        );

        browser.reload(TabId(1)).await.unwrap();
        assert_eq!(
            browser.send_message(TabId(1), ContentMessage::Ping).await,
            Ok(ContentResponse::Pong)
        );
        assert_eq!(browser.events().await, vec![BrowserEvent::Reloaded(TabId(1))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_notification_is_delivered() {
        let browser = InMemoryBrowser::new(Duration::from_millis(5));
        browser.insert_tab(Tab::new(3, "https://example.com")).await;
        let mut previews = browser.preview_notifications().await.unwrap();
        assert!(browser.preview_notifications().await.is_none());

        let response = browser
            .send_message(TabId(3), ContentMessage::GeneratePreview { quality: 0.8 })
            .await
            .unwrap();

        assert_eq!(response, ContentResponse::Accepted);
        assert_eq!(previews.recv().await, Some(TabId(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_refuses_active_tab() {
        let browser = InMemoryBrowser::new(Duration::ZERO);
        browser.insert_tab(Tab::new(1, "https://example.com").active()).await;

        assert!(matches!(
            browser.discard(TabId(1)).await,
            Err(BrowserError::Rejected { .. })
        ));
        assert!(browser.events().await.is_empty());
    }
}
