//! Frames exchanged with the browser shim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::{CreateTabRequest, TabId, TabInstruction, TabUpdate, WindowId};

/// The tab a page message originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    pub tab_id: TabId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<WindowId>,
}

/// Tab command relayed to the shim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BridgeCommand {
    CreateTab(CreateTabRequest),
    GetTab { tab_id: TabId },
    RemoveTab { tab_id: TabId },
    SendTabMessage { tab_id: TabId, message: TabInstruction },
}

impl BridgeCommand {
    /// Short name for logs and error messages.
    pub fn op(&self) -> &'static str {
        match self {
            BridgeCommand::CreateTab(_) => "create_tab",
            BridgeCommand::GetTab { .. } => "get_tab",
            BridgeCommand::RemoveTab { .. } => "remove_tab",
            BridgeCommand::SendTabMessage { .. } => "send_tab_message",
        }
    }
}

/// Frame sent from the service to the shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Execute a tab command and answer with a `command_result`.
    Command {
        command_id: u64,
        command: BridgeCommand,
    },
    /// Result of a `page_message`, delivered back to the originating page.
    PageReply {
        request_id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ServerFrame {
    /// Build the reply frame for a routed page message.
    pub fn page_reply(request_id: impl Into<String>, result: Result<Option<Value>, String>) -> Self {
        match result {
            Ok(data) => ServerFrame::PageReply {
                request_id: request_id.into(),
                ok: true,
                data,
                error: None,
            },
            Err(error) => ServerFrame::PageReply {
                request_id: request_id.into(),
                ok: false,
                data: None,
                error: Some(error),
            },
        }
    }
}

/// Frame sent from the shim to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A message posted by a forum page or a report tab's page script.
    PageMessage {
        request_id: String,
        #[serde(default)]
        sender: Option<MessageSender>,
        message: Value,
    },
    /// A tab's load progress changed.
    TabUpdated(TabUpdate),
    /// Outcome of a previously sent command.
    CommandResult {
        command_id: u64,
        ok: bool,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
}
