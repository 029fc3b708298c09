//! Browser implementation backed by the shim connection.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use super::protocol::{BridgeCommand, ServerFrame};
use crate::browser::{
    Browser, BrowserError, CreateTabRequest, TabId, TabInstruction, TabReply, TabSnapshot,
    TabUpdate,
};

/// Outbound frame buffer per connection.
const FRAME_BUFFER: usize = 256;

/// Tab update fan-out capacity.
const UPDATE_BUFFER: usize = 256;

type CommandReply = oneshot::Sender<Result<Value, BrowserError>>;

/// A command awaiting its result on a specific connection.
struct PendingCommand {
    connection: u64,
    reply: CommandReply,
}

/// Handle for one attached shim connection.
///
/// The socket handler forwards `frames` to the shim and may push its own
/// frames (page replies) through `outbound`.
pub struct BridgeConnection {
    pub id: u64,
    pub frames: mpsc::Receiver<ServerFrame>,
    pub outbound: mpsc::Sender<ServerFrame>,
}

struct Attached {
    id: u64,
    tx: mpsc::Sender<ServerFrame>,
}

/// [`Browser`] that relays tab commands to the connected browser shim.
///
/// Only one shim connection is active; attaching a new one replaces the
/// previous connection and fails its in-flight commands.
pub struct BridgeBrowser {
    command_timeout: Duration,
    connection: RwLock<Option<Attached>>,
    pending: StdMutex<HashMap<u64, PendingCommand>>,
    next_command_id: AtomicU64,
    next_connection_id: AtomicU64,
    updates: broadcast::Sender<TabUpdate>,
}

impl BridgeBrowser {
    pub fn new(command_timeout: Duration) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            command_timeout,
            connection: RwLock::new(None),
            pending: StdMutex::new(HashMap::new()),
            next_command_id: AtomicU64::new(1),
            next_connection_id: AtomicU64::new(1),
            updates,
        }
    }

    /// Attach a new shim connection, replacing any existing one.
    pub async fn attach(&self) -> BridgeConnection {
        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let (tx, frames) = mpsc::channel(FRAME_BUFFER);

        let mut connection = self.connection.write().await;
        // Commands register under the read lock, so everything sent on the
        // previous connection is already pending here.
        let failed = connection
            .as_ref()
            .map(|previous| self.fail_pending(previous.id))
            .unwrap_or(0);
        let previous = connection.replace(Attached {
            id,
            tx: tx.clone(),
        });
        drop(connection);

        if let Some(previous) = previous {
            warn!(
                previous = previous.id,
                connection = id,
                failed_commands = failed,
                "Browser shim reconnected, replacing previous connection"
            );
        } else {
            info!(connection = id, "Browser shim attached");
        }

        BridgeConnection {
            id,
            frames,
            outbound: tx,
        }
    }

    /// Detach a connection. Ignored if it was already replaced.
    pub async fn detach(&self, connection_id: u64) {
        let mut connection = self.connection.write().await;
        if connection.as_ref().map(|c| c.id) != Some(connection_id) {
            debug!(connection = connection_id, "Stale connection detached");
            return;
        }
        let failed = self.fail_pending(connection_id);
        *connection = None;
        drop(connection);

        info!(
            connection = connection_id,
            failed_commands = failed,
            "Browser shim detached"
        );
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    /// Number of commands awaiting a result.
    pub fn pending_commands(&self) -> usize {
        self.pending().len()
    }

    /// Resolve a pending command with the shim's result.
    pub fn complete_command(
        &self,
        command_id: u64,
        ok: bool,
        data: Option<Value>,
        error: Option<String>,
    ) {
        let Some(PendingCommand { reply, .. }) = self.pending().remove(&command_id) else {
            debug!(command_id, "Result for unknown or expired command");
            return;
        };

        let result = if ok {
            Ok(data.unwrap_or(Value::Null))
        } else {
            Err(BrowserError::Command(
                error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        };
        let _ = reply.send(result);
    }

    /// Fan a tab notification out to subscribers.
    pub fn publish_update(&self, update: TabUpdate) {
        // No receivers just means nobody is waiting on a tab.
        let _ = self.updates.send(update);
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, PendingCommand>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the commands sent on `connection_id`; others stay pending.
    fn fail_pending(&self, connection_id: u64) -> usize {
        let failed: Vec<PendingCommand> = {
            let mut pending = self.pending();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, command)| command.connection == connection_id)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        let count = failed.len();
        for command in failed {
            let _ = command.reply.send(Err(BrowserError::Disconnected));
        }
        count
    }

    async fn execute(
        &self,
        command: BridgeCommand,
        timeout: Option<Duration>,
    ) -> Result<Value, BrowserError> {
        let op = command.op();
        let command_id = self.next_command_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();

        let tx = {
            let connection = self.connection.read().await;
            let Some(attached) = connection.as_ref() else {
                return Err(BrowserError::Disconnected);
            };
            self.pending().insert(
                command_id,
                PendingCommand {
                    connection: attached.id,
                    reply: reply_tx,
                },
            );
            attached.tx.clone()
        };
        let _guard = PendingGuard {
            browser: self,
            command_id,
        };

        debug!(command_id, op, "Sending bridge command");
        tx.send(ServerFrame::Command {
            command_id,
            command,
        })
        .await
        .map_err(|_| BrowserError::Disconnected)?;

        let reply = match timeout {
            Some(limit) => tokio::time::timeout(limit, reply_rx)
                .await
                .map_err(|_| BrowserError::Timeout(format!("{} after {:?}", op, limit)))?,
            None => reply_rx.await,
        };

        reply.map_err(|_| BrowserError::Disconnected)?
    }
}

/// Removes a command's reply slot when its caller stops waiting.
struct PendingGuard<'a> {
    browser: &'a BridgeBrowser,
    command_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.browser.pending().remove(&self.command_id);
    }
}

fn decode<T: DeserializeOwned>(op: &str, value: Value) -> Result<T, BrowserError> {
    serde_json::from_value(value)
        .map_err(|e| BrowserError::Protocol(format!("invalid {} result: {}", op, e)))
}

#[async_trait]
impl Browser for BridgeBrowser {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn create_tab(&self, request: CreateTabRequest) -> Result<TabSnapshot, BrowserError> {
        let value = self
            .execute(BridgeCommand::CreateTab(request), Some(self.command_timeout))
            .await
            .map_err(|e| match e {
                BrowserError::Command(msg) => BrowserError::TabCreation(msg),
                other => other,
            })?;
        decode("create_tab", value)
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<TabSnapshot, BrowserError> {
        let value = self
            .execute(BridgeCommand::GetTab { tab_id }, Some(self.command_timeout))
            .await?;
        decode("get_tab", value)
    }

    async fn remove_tab(&self, tab_id: TabId) -> Result<(), BrowserError> {
        self.execute(BridgeCommand::RemoveTab { tab_id }, Some(self.command_timeout))
            .await
            .map(|_| ())
    }

    async fn send_tab_message(
        &self,
        tab_id: TabId,
        message: TabInstruction,
    ) -> Result<TabReply, BrowserError> {
        // Bounded by the caller: submits legitimately take longer than a command.
        let value = self
            .execute(BridgeCommand::SendTabMessage { tab_id, message }, None)
            .await?;
        if value.is_null() {
            return Ok(TabReply::default());
        }
        decode("send_tab_message", value)
    }

    fn subscribe_updates(&self) -> broadcast::Receiver<TabUpdate> {
        self.updates.subscribe()
    }
}
