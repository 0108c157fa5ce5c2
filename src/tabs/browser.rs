//! Seam between the tab services and the host browser

use super::model::{Tab, TabId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message sent to the agent running inside a tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentMessage {
    /// Ask for the page state relevant to suspension
    RequestInfo,
    /// Liveness probe
    Ping,
    /// Start rendering a preview; completion arrives as a separate notification
    GeneratePreview { quality: f32 },
}

/// Page state reported by the in-tab agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Normal,
    /// The user has typed into a form that has not been submitted
    FormInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentInfo {
    pub status: ContentStatus,
    pub scroll_position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentResponse {
    Info(ContentInfo),
    Pong,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrowserError {
    #[error("Tab {0} not found")]
    TabNotFound(TabId),

    /// The in-tab agent did not answer
    #[error("No response from tab {0}")]
    NoResponse(TabId),

    #[error("Browser rejected operation on tab {tab}: {message}")]
    Rejected { tab: TabId, message: String },
}

/// Operations the tab services need from the browser
#[async_trait]
pub trait TabBrowser: Send + Sync {
    /// Current state of a tab, `None` if it was closed
    async fn get_tab(&self, id: TabId) -> Result<Option<Tab>, BrowserError>;

    async fn send_message(
        &self,
        id: TabId,
        message: ContentMessage,
    ) -> Result<ContentResponse, BrowserError>;

    /// Load `url` in the tab, returning the updated tab
    async fn navigate(&self, id: TabId, url: &str) -> Result<Tab, BrowserError>;

    async fn reload(&self, id: TabId) -> Result<(), BrowserError>;

    /// Unload the tab from memory, returning the updated tab
    async fn discard(&self, id: TabId) -> Result<Tab, BrowserError>;
}
