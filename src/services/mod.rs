//! Tab services built on the job queue
//!
//! Each service owns one `TabJobQueue` with its own concurrency limit,
//! timeout and handler:
//! - `SuspensionService`: replaces a tab with the suspended placeholder page
//! - `TabCheckService`: verifies the in-tab agent is alive
//! - `DiscardService`: unloads a tab from memory

pub mod discard;
pub mod suspension;
pub mod tab_check;

pub use discard::{DiscardOutcome, DiscardService};
pub use suspension::{ForceLevel, SuspendOutcome, SuspendRequest, SuspensionService};
pub use tab_check::{TabCheckService, TabCheckStatus};

use serde::Serialize;
use std::fmt;

/// Why a tab operation left the tab untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The tab was closed before the job ran
    Missing,
    Active,
    Pinned,
    Audible,
    SpecialPage,
    AlreadySuspended,
    AlreadyDiscarded,
    UnsavedFormInput,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::Missing => "tab missing",
            SkipReason::Active => "tab active",
            SkipReason::Pinned => "tab pinned",
            SkipReason::Audible => "tab playing audio",
            SkipReason::SpecialPage => "browser page",
            SkipReason::AlreadySuspended => "already suspended",
            SkipReason::AlreadyDiscarded => "already discarded",
            SkipReason::UnsavedFormInput => "unsaved form input",
        };
        f.write_str(reason)
    }
}
