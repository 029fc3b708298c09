//! Report orchestration.
//!
//! A report request passes through admission, tab creation, tab load and
//! page-script acknowledgement, and resolves to exactly one outcome.

mod orchestrator;
mod types;

pub use orchestrator::ReportOrchestrator;
pub use types::{
    ReportError, ReportErrorKind, ReportRequest, ReportResult, ReportStage, ReportStats,
    AUTO_SUBMIT_MARKER,
};
