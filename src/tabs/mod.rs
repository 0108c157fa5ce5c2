//! Tab domain shared by the tab services

pub mod browser;
pub mod memory_browser;
pub mod model;

pub use browser::{
    BrowserError, ContentInfo, ContentMessage, ContentResponse, ContentStatus, TabBrowser,
};
pub use memory_browser::{BrowserEvent, ContentBehaviour, InMemoryBrowser};
pub use model::{SuspendedPage, Tab, TabId, TabKind, TabLoadStatus};
