//! Types for report orchestration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::browser::{BrowserError, TabId, WindowId};
use crate::queue::QueueError;
use crate::tab::TabError;

/// Suffix appended to the report URL when the report is auto-submitted.
///
/// The page the forum redirects to after submission checks its referrer for
/// this marker and closes its own tab.
pub const AUTO_SUBMIT_MARKER: &str = ";a";

/// A request to report one forum post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// Correlation id for logs.
    pub id: Uuid,
    /// Report form URL of the post.
    pub url: String,
    #[serde(default)]
    pub comment: Option<String>,
    /// Submit without user interaction.
    #[serde(default)]
    pub auto: bool,
    #[serde(default)]
    pub post_id: Option<String>,
    /// Window of the requesting page; the report tab opens there.
    #[serde(default)]
    pub window_id: Option<WindowId>,
    /// The inbound message, echoed back augmented with the result.
    pub message: Value,
}

impl ReportRequest {
    pub fn new(url: impl Into<String>, message: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            comment: None,
            auto: false,
            post_id: None,
            window_id: None,
            message,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_auto(mut self, auto: bool) -> Self {
        self.auto = auto;
        self
    }

    pub fn with_post_id(mut self, post_id: impl Into<String>) -> Self {
        self.post_id = Some(post_id.into());
        self
    }

    pub fn with_window(mut self, window_id: Option<WindowId>) -> Self {
        self.window_id = window_id;
        self
    }

    /// URL the report tab is opened at.
    pub fn tab_url(&self) -> String {
        if self.auto {
            format!("{}{}", self.url, AUTO_SUBMIT_MARKER)
        } else {
            self.url.clone()
        }
    }
}

/// Outcome of a successful report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResult {
    pub request_id: Uuid,
    /// The original message with `action_result` added.
    pub reply: Value,
    /// Page script acknowledgement.
    pub action_result: String,
    pub tab_id: TabId,
    /// Time from admission to acknowledgement.
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Orchestration stage a report reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStage {
    /// Waiting for (or failing to get) an admission ticket.
    Admission,
    /// Opening the report tab.
    TabOpen,
    /// Waiting for the report tab to load.
    TabLoad,
    /// Waiting for the page script's acknowledgement.
    PageAck,
}

impl ReportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStage::Admission => "admission",
            ReportStage::TabOpen => "tab_open",
            ReportStage::TabLoad => "tab_load",
            ReportStage::PageAck => "page_ack",
        }
    }
}

impl std::fmt::Display for ReportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a report failed.
#[derive(Debug, Clone, Error)]
pub enum ReportErrorKind {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    TabCreation(BrowserError),

    #[error(transparent)]
    TabLoad(TabError),

    #[error("Page script did not acknowledge: {0}")]
    PageScript(String),

    #[error("Page script did not answer within {timeout_ms} ms")]
    AckTimeout { timeout_ms: u64 },
}

/// A failed report, qualified by the stage it failed in.
#[derive(Debug, Clone, Error)]
pub struct ReportError {
    pub stage: ReportStage,
    #[source]
    pub kind: ReportErrorKind,
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stage {
            ReportStage::TabOpen | ReportStage::TabLoad => {
                write!(f, "Tab load/check failed: {}", self.kind)
            }
            _ => write!(f, "{}", self.kind),
        }
    }
}

impl ReportError {
    pub fn new(stage: ReportStage, kind: ReportErrorKind) -> Self {
        Self { stage, kind }
    }

    pub fn queue(err: QueueError) -> Self {
        Self::new(ReportStage::Admission, ReportErrorKind::Queue(err))
    }

    pub fn tab_creation(err: BrowserError) -> Self {
        Self::new(ReportStage::TabOpen, ReportErrorKind::TabCreation(err))
    }

    pub fn tab_load(err: TabError) -> Self {
        Self::new(ReportStage::TabLoad, ReportErrorKind::TabLoad(err))
    }

    pub fn page_script(reason: impl Into<String>) -> Self {
        Self::new(ReportStage::PageAck, ReportErrorKind::PageScript(reason.into()))
    }

    pub fn ack_timeout(timeout_ms: u64) -> Self {
        Self::new(ReportStage::PageAck, ReportErrorKind::AckTimeout { timeout_ms })
    }

    /// Whether the request was turned away by back-pressure.
    pub fn is_queue_full(&self) -> bool {
        matches!(self.kind, ReportErrorKind::Queue(QueueError::Full { .. }))
    }

    /// Whether the failure was a timeout at any horizon.
    pub fn is_timeout(&self) -> bool {
        match &self.kind {
            ReportErrorKind::Queue(QueueError::TimedOut { .. }) => true,
            ReportErrorKind::TabLoad(TabError::LoadTimeout { .. }) => true,
            ReportErrorKind::TabLoad(TabError::Browser(BrowserError::Timeout(_))) => true,
            ReportErrorKind::TabCreation(BrowserError::Timeout(_)) => true,
            ReportErrorKind::AckTimeout { .. } => true,
            _ => false,
        }
    }
}

/// Running report counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStats {
    /// Requests accepted into the queue.
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Requests whose caller went away before an outcome.
    pub cancelled: u64,
    /// Requests turned away because the queue was full.
    pub rejected: u64,
    /// Reports currently between admission and completion.
    pub in_flight: u64,
}
