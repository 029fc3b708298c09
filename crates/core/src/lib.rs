pub mod bridge;
pub mod browser;
pub mod config;
pub mod metrics;
pub mod queue;
pub mod report;
pub mod router;
pub mod tab;
pub mod testing;

pub use bridge::{
    BridgeBrowser, BridgeCommand, BridgeConnection, ClientFrame, MessageSender, ServerFrame,
};
pub use browser::{
    Browser, BrowserError, CreateTabRequest, TabAction, TabId, TabInstruction, TabReply,
    TabSnapshot, TabStatus, TabUpdate, WindowId,
};
pub use config::{
    load_config, load_config_from_env, load_config_from_str, validate_config, BridgeConfig,
    Config, ConfigError, PageConfig, QueueConfig, ServerConfig, TabConfig,
};
pub use queue::{Admission, AdmissionQueue, QueueError, QueueStatus, TicketId};
pub use report::{
    ReportError, ReportErrorKind, ReportOrchestrator, ReportRequest, ReportResult, ReportStage,
    ReportStats,
};
pub use router::{ListStore, MessageRouter, PageAction, RouterError};
pub use tab::{TabError, TabLifecycleWaiter};
