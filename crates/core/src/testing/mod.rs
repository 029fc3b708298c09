//! Testing utilities and a mock browser.
//!
//! The mock implements the [`Browser`](crate::browser::Browser) trait with
//! scriptable tab loading and page-script replies, so the report pipeline
//! can be exercised without a browser attached.
//!
//! # Example
//!
//! ```rust,ignore
//! use modreport_core::testing::{LoadBehavior, MockBrowser, PageScriptBehavior};
//!
//! let browser = Arc::new(MockBrowser::new());
//! browser.set_load_behavior(LoadBehavior::Never).await;
//! browser.set_page_behavior(PageScriptBehavior::Silent).await;
//!
//! // Use in ReportOrchestrator / MessageRouter...
//! ```

mod mock_browser;

pub use mock_browser::{
    LoadBehavior, MockBrowser, PageScriptBehavior, RecordedInstruction, RecordedTab,
};

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::{json, Value};

    use crate::bridge::MessageSender;
    use crate::browser::{TabId, TabSnapshot, TabStatus, WindowId};
    use crate::config::Config;

    /// Default timings with a small queue.
    pub fn test_config() -> Config {
        let mut config = Config::default();
        config.queue.capacity = 5;
        config
    }

    /// A `bct-report` message as posted by a forum page.
    pub fn report_message(url: &str, post_id: &str, comment: &str, auto: bool) -> Value {
        json!({
            "action_name": "bct-report",
            "action_url": url,
            "action_payload": {
                "post_id": post_id,
                "comment": comment,
                "auto": auto,
            }
        })
    }

    /// Report form URL for a post.
    pub fn report_url(topic: u64, msg: u64) -> String {
        format!(
            "https://bitcointalk.org/index.php?action=reporttm;topic={};msg={}",
            topic, msg
        )
    }

    pub fn sender(tab_id: TabId, window_id: WindowId) -> MessageSender {
        MessageSender {
            tab_id,
            window_id: Some(window_id),
        }
    }

    pub fn loaded_tab(id: TabId, url: &str) -> TabSnapshot {
        TabSnapshot {
            id,
            window_id: Some(1),
            url: url.to_string(),
            status: TabStatus::Complete,
        }
    }
}
