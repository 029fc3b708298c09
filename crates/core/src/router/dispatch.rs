//! Message dispatch by action name.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::list_store::ListStore;
use crate::bridge::MessageSender;
use crate::browser::{Browser, BrowserError};
use crate::report::{ReportError, ReportOrchestrator, ReportRequest};

/// Errors from routing a page message.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid message: {0}")]
    InvalidPayload(String),

    #[error("Action {0} requires a sender tab")]
    MissingSender(&'static str),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Actions a page can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAction {
    /// Close the tab that sent the message.
    CloseThisTab,
    /// Store `{item_id, item}` in the list store.
    PutInList,
    /// Look up `{item_id}` in the list store.
    GetFromList,
    /// Report a post.
    Report,
}

impl PageAction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "close-this-tab" => Some(PageAction::CloseThisTab),
            "put-in-list" => Some(PageAction::PutInList),
            "get-from-list" => Some(PageAction::GetFromList),
            "bct-report" => Some(PageAction::Report),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageAction::CloseThisTab => "close-this-tab",
            PageAction::PutInList => "put-in-list",
            PageAction::GetFromList => "get-from-list",
            PageAction::Report => "bct-report",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    action_name: String,
}

/// Item ids arrive as strings or as bare post numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ItemKey {
    Text(String),
    Number(u64),
}

impl ItemKey {
    fn into_string(self) -> String {
        match self {
            ItemKey::Text(s) => s,
            ItemKey::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PutPayload {
    item_id: ItemKey,
    item: Value,
}

#[derive(Debug, Deserialize)]
struct GetPayload {
    item_id: ItemKey,
}

#[derive(Debug, Deserialize)]
struct ReportMessage {
    action_url: String,
    #[serde(default)]
    action_payload: ReportPayload,
}

#[derive(Debug, Default, Deserialize)]
struct ReportPayload {
    #[serde(default)]
    post_id: Option<ItemKey>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    auto: bool,
}

/// Routes page messages to their handlers.
pub struct MessageRouter {
    orchestrator: Arc<ReportOrchestrator>,
    browser: Arc<dyn Browser>,
    list: ListStore,
}

impl MessageRouter {
    pub fn new(orchestrator: Arc<ReportOrchestrator>, browser: Arc<dyn Browser>) -> Self {
        Self {
            orchestrator,
            browser,
            list: ListStore::new(),
        }
    }

    pub fn list(&self) -> &ListStore {
        &self.list
    }

    pub fn orchestrator(&self) -> &Arc<ReportOrchestrator> {
        &self.orchestrator
    }

    /// Handle one page message.
    ///
    /// Returns the reply payload, or `None` for actions that answer nothing.
    pub async fn dispatch(
        &self,
        message: Value,
        sender: Option<MessageSender>,
    ) -> Result<Option<Value>, RouterError> {
        let envelope: Envelope = parse(&message)?;
        let action = PageAction::from_name(&envelope.action_name)
            .ok_or(RouterError::UnknownAction(envelope.action_name))?;
        debug!(action = action.as_str(), sender = ?sender, "Dispatching page message");

        match action {
            PageAction::CloseThisTab => {
                let sender = sender.ok_or(RouterError::MissingSender(action.as_str()))?;
                self.browser.remove_tab(sender.tab_id).await?;
                debug!(tab_id = sender.tab_id, "Closed sender tab");
                Ok(None)
            }
            PageAction::PutInList => {
                let payload: PutPayload = parse(action_payload(&message)?)?;
                self.list.put(payload.item_id.into_string(), payload.item).await;
                Ok(None)
            }
            PageAction::GetFromList => {
                let payload: GetPayload = parse(action_payload(&message)?)?;
                let item = self.list.get(&payload.item_id.into_string()).await;
                Ok(Some(item.unwrap_or(Value::Null)))
            }
            PageAction::Report => {
                let report: ReportMessage = parse(&message)?;
                if report.action_url.trim().is_empty() {
                    return Err(RouterError::InvalidPayload(
                        "action_url must not be empty".to_string(),
                    ));
                }

                let payload = report.action_payload;
                let mut request = ReportRequest::new(report.action_url, message)
                    .with_auto(payload.auto)
                    .with_window(sender.and_then(|s| s.window_id));
                if let Some(comment) = payload.comment {
                    request = request.with_comment(comment);
                }
                if let Some(post_id) = payload.post_id {
                    request = request.with_post_id(post_id.into_string());
                }

                info!(
                    report = %request.id,
                    post_id = ?request.post_id,
                    auto = request.auto,
                    "Report requested"
                );
                let result = self.orchestrator.submit(request).await?;
                Ok(Some(result.reply))
            }
        }
    }
}

fn action_payload(message: &Value) -> Result<&Value, RouterError> {
    message
        .get("action_payload")
        .ok_or_else(|| RouterError::InvalidPayload("missing action_payload".to_string()))
}

fn parse<T: DeserializeOwned>(value: &Value) -> Result<T, RouterError> {
    T::deserialize(value).map_err(|e| RouterError::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::AdmissionQueue;
    use crate::testing::{fixtures, MockBrowser};
    use serde_json::json;

    async fn router() -> (MessageRouter, Arc<MockBrowser>) {
        let config = fixtures::test_config();
        let browser = Arc::new(MockBrowser::new());
        let queue = Arc::new(AdmissionQueue::new(&config.queue));
        queue.start().await;
        let orchestrator = Arc::new(ReportOrchestrator::new(&config, queue, browser.clone()));
        (MessageRouter::new(orchestrator, browser.clone()), browser)
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let (router, _) = router().await;
        let item = json!({"timestamp": 1_700_000_000_000u64, "status": "Good"});

        let reply = router
            .dispatch(
                json!({"action_name": "put-in-list", "action_payload": {"item_id": "555", "item": item}}),
                None,
            )
            .await
            .unwrap();
        assert!(reply.is_none());

        let reply = router
            .dispatch(
                json!({"action_name": "get-from-list", "action_payload": {"item_id": 555}}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(reply, Some(item));
    }

    #[tokio::test]
    async fn test_get_unknown_item_is_null() {
        let (router, _) = router().await;
        let reply = router
            .dispatch(
                json!({"action_name": "get-from-list", "action_payload": {"item_id": "nope"}}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(reply, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_unknown_action_rejected() {
        let (router, _) = router().await;
        let err = router
            .dispatch(json!({"action_name": "launch-rockets"}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownAction(name) if name == "launch-rockets"));
    }

    #[tokio::test]
    async fn test_malformed_messages_rejected() {
        let (router, _) = router().await;
        let err = router.dispatch(json!({"foo": 1}), None).await.unwrap_err();
        assert!(matches!(err, RouterError::InvalidPayload(_)));

        let err = router
            .dispatch(json!({"action_name": "put-in-list"}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidPayload(_)));

        let err = router
            .dispatch(json!({"action_name": "bct-report", "action_url": ""}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_close_this_tab_removes_sender_tab() {
        let (router, browser) = router().await;
        browser
            .insert_tab(fixtures::loaded_tab(42, "https://bitcointalk.org/index.php"))
            .await;

        let reply = router
            .dispatch(
                json!({"action_name": "close-this-tab"}),
                Some(fixtures::sender(42, 1)),
            )
            .await
            .unwrap();
        assert!(reply.is_none());
        assert!(!browser.has_tab(42).await);
        assert_eq!(browser.removed_tabs().await, vec![42]);
    }

    #[tokio::test]
    async fn test_close_this_tab_requires_sender() {
        let (router, _) = router().await;
        let err = router
            .dispatch(json!({"action_name": "close-this-tab"}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::MissingSender("close-this-tab")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_reply_is_augmented_message() {
        let (router, browser) = router().await;
        let url = fixtures::report_url(10, 20);
        let message = fixtures::report_message(&url, "20", "off-topic", false);

        let reply = router
            .dispatch(message.clone(), Some(fixtures::sender(7, 3)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply["action_result"], "OK");
        assert_eq!(reply["action_url"], message["action_url"]);
        assert_eq!(reply["action_payload"], message["action_payload"]);

        let created = browser.created_tabs().await;
        assert_eq!(created[0].request.window_id, Some(3));
        let instructions = browser.instructions().await;
        assert_eq!(instructions[0].instruction.comment.as_deref(), Some("off-topic"));
    }
}
