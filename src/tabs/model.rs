//! Tab model and tab-kind classification

use crate::job_scheduling::QueueEntity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Browser-assigned tab identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabLoadStatus {
    Loading,
    #[default]
    Complete,
}

/// Snapshot of a browser tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub window_id: u32,
    pub url: String,
    pub title: String,
    pub active: bool,
    pub pinned: bool,
    pub audible: bool,
    pub discarded: bool,
    pub status: TabLoadStatus,
}

impl Tab {
    pub fn new(id: u32, url: impl Into<String>) -> Self {
        Self {
            id: TabId(id),
            window_id: 1,
            url: url.into(),
            title: String::new(),
            active: false,
            pinned: false,
            audible: false,
            discarded: false,
            status: TabLoadStatus::Complete,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    pub fn audible(mut self) -> Self {
        self.audible = true;
        self
    }

    pub fn loading(mut self) -> Self {
        self.status = TabLoadStatus::Loading;
        self
    }
}

impl QueueEntity for Tab {
    type Id = TabId;

    fn entity_id(&self) -> TabId {
        self.id
    }
}

/// URL prefixes of pages owned by the browser itself
const SPECIAL_URL_PREFIXES: &[&str] = &[
    "chrome://",
    "chrome-extension://",
    "edge://",
    "about:",
    "view-source:",
    "devtools://",
];

/// What a tab currently is, decided once per job attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabKind {
    /// Browser-internal page; never suspended or checked
    Special,
    /// Showing the suspended placeholder for `original_url`
    Suspended { original_url: String },
    /// Unloaded by the browser
    Discarded,
    Normal,
}

impl TabKind {
    pub fn classify(tab: &Tab, page: &SuspendedPage) -> Self {
        if let Some(original_url) = page.original_url(&tab.url) {
            return TabKind::Suspended { original_url };
        }
        if tab.discarded {
            return TabKind::Discarded;
        }
        if SPECIAL_URL_PREFIXES
            .iter()
            .any(|prefix| tab.url.starts_with(prefix))
        {
            return TabKind::Special;
        }
        TabKind::Normal
    }
}

/// Location of the placeholder page that replaces a suspended tab.
///
/// Suspended URLs look like `{base_url}#ttl={title}&uri={original url}`, with
/// both values percent-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendedPage {
    base_url: String,
}

impl SuspendedPage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn suspended_url(&self, tab: &Tab) -> String {
        format!(
            "{}#ttl={}&uri={}",
            self.base_url,
            urlencoding::encode(&tab.title),
            urlencoding::encode(&tab.url)
        )
    }

    /// Original URL encoded in a suspended URL, or `None` for any other URL
    pub fn original_url(&self, url: &str) -> Option<String> {
        let fragment = url.strip_prefix(&self.base_url)?.strip_prefix('#')?;
        let encoded = fragment
            .split('&')
            .find_map(|pair| pair.strip_prefix("uri="))?;
        urlencoding::decode(encoded).ok().map(|url| url.into_owned())
    }
}
