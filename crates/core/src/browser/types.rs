//! Types for the browser abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Browser-assigned tab identifier.
pub type TabId = u64;

/// Browser-assigned window identifier.
pub type WindowId = u64;

/// URL of the placeholder document a tab shows before navigation starts.
pub const BLANK_URL: &str = "about:blank";

/// Errors from browser operations.
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    #[error("Tab creation failed: {0}")]
    TabCreation(String),

    #[error("Tab not found: {0}")]
    TabNotFound(TabId),

    #[error("Browser bridge is not connected")]
    Disconnected,

    #[error("Browser operation timed out: {0}")]
    Timeout(String),

    #[error("Browser command failed: {0}")]
    Command(String),

    #[error("Unexpected browser response: {0}")]
    Protocol(String),
}

/// Document load status of a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabStatus {
    Loading,
    Complete,
}

impl std::fmt::Display for TabStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TabStatus::Loading => write!(f, "loading"),
            TabStatus::Complete => write!(f, "complete"),
        }
    }
}

/// Point-in-time view of a browser tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabSnapshot {
    pub id: TabId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<WindowId>,
    /// Resolved URL; empty while the browser has not committed a navigation.
    #[serde(default)]
    pub url: String,
    pub status: TabStatus,
}

impl TabSnapshot {
    /// A tab is ready once its document finished loading a real page.
    ///
    /// Freshly created tabs report `complete` for the blank placeholder
    /// before navigation starts, so the URL has to be checked as well.
    pub fn is_ready(&self) -> bool {
        self.status == TabStatus::Complete && !self.url.is_empty() && self.url != BLANK_URL
    }
}

/// Load-progress notification for one tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabUpdate {
    pub tab_id: TabId,
    /// State of the tab after the update.
    pub tab: TabSnapshot,
}

/// Request to open a new tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTabRequest {
    pub url: String,
    /// Window to open the tab in (the requesting page's window).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<WindowId>,
    /// Whether the tab should be focused.
    #[serde(default)]
    pub active: bool,
}

/// What the page script in a report tab should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabAction {
    /// Fill the report form and leave it for the user to submit.
    #[serde(rename = "bct-tab-open-report")]
    OpenReport,
    /// Fill the report form, wait out the dwell, then submit.
    #[serde(rename = "bct-tab-submit-report")]
    SubmitReport,
}

impl TabAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TabAction::OpenReport => "bct-tab-open-report",
            TabAction::SubmitReport => "bct-tab-submit-report",
        }
    }
}

/// Instruction sent to the page script of a report tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInstruction {
    /// Target tab id, echoed back by the page script.
    pub id: TabId,
    pub action: TabAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Whether the report is submitted without user interaction.
    pub auto: bool,
    /// Dwell the page script must observe before acknowledging a submit.
    pub dwell_ms: u64,
}

/// Page script acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabReply {
    /// `"OK"` once the form has been filled (and the dwell elapsed for submits).
    #[serde(default)]
    pub result: Option<String>,
}

/// Tab operations the report pipeline needs from a browser.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Open a new tab and return its initial state.
    async fn create_tab(&self, request: CreateTabRequest) -> Result<TabSnapshot, BrowserError>;

    /// Get the current state of a tab.
    async fn get_tab(&self, tab_id: TabId) -> Result<TabSnapshot, BrowserError>;

    /// Close a tab.
    async fn remove_tab(&self, tab_id: TabId) -> Result<(), BrowserError>;

    /// Deliver an instruction to the page script of a tab and wait for its reply.
    async fn send_tab_message(
        &self,
        tab_id: TabId,
        message: TabInstruction,
    ) -> Result<TabReply, BrowserError>;

    /// Subscribe to tab load-progress notifications.
    ///
    /// Dropping the receiver unsubscribes.
    fn subscribe_updates(&self) -> broadcast::Receiver<TabUpdate>;
}
