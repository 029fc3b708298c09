//! Mock browser for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

use crate::browser::{
    Browser, BrowserError, CreateTabRequest, TabAction, TabId, TabInstruction, TabReply,
    TabSnapshot, TabStatus, TabUpdate, BLANK_URL,
};

/// How newly created tabs progress through loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadBehavior {
    /// `create_tab` returns an already loaded tab.
    Immediate,
    /// The tab finishes loading after the given delay.
    After(Duration),
    /// The tab starts navigating but never finishes.
    Never,
}

/// How the page script in a report tab answers instructions.
#[derive(Debug, Clone)]
pub enum PageScriptBehavior {
    /// Reply `"OK"`, honoring `dwell_ms` for submit instructions.
    Acknowledge,
    /// Reply with the given payload.
    Reply(TabReply),
    /// Fail delivery with the given error.
    Fail(BrowserError),
    /// Never reply.
    Silent,
}

/// A recorded `create_tab` call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedTab {
    pub tab_id: TabId,
    pub request: CreateTabRequest,
    pub created_at: Instant,
}

/// A recorded page-script instruction for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedInstruction {
    pub tab_id: TabId,
    pub instruction: TabInstruction,
    pub received_at: Instant,
}

/// Mock implementation of the Browser trait.
///
/// Provides controllable behavior for testing:
/// - Scripted tab load progress with update notifications
/// - Scripted page script replies
/// - Records of created tabs, instructions and removed tabs
///
/// # Example
///
/// ```rust,ignore
/// let browser = Arc::new(MockBrowser::new());
/// browser.set_load_behavior(LoadBehavior::After(Duration::from_millis(200))).await;
///
/// let tab = browser.create_tab(request).await?;
/// // ... tab_updated notifications follow on subscribe_updates()
///
/// let created = browser.created_tabs().await;
/// assert_eq!(created.len(), 1);
/// ```
#[derive(Debug)]
pub struct MockBrowser {
    /// Current tab states by id.
    tabs: Arc<RwLock<HashMap<TabId, TabSnapshot>>>,
    /// Recorded create_tab calls.
    created: Arc<RwLock<Vec<RecordedTab>>>,
    /// Recorded send_tab_message calls.
    instructions: Arc<RwLock<Vec<RecordedInstruction>>>,
    /// Recorded remove_tab calls.
    removed: Arc<RwLock<Vec<TabId>>>,
    load_behavior: Arc<RwLock<LoadBehavior>>,
    page_behavior: Arc<RwLock<PageScriptBehavior>>,
    /// If set, the next create_tab will fail with this error.
    next_error: Arc<RwLock<Option<BrowserError>>>,
    next_tab_id: AtomicU64,
    /// Update sender; taken by `close_updates`.
    updates: StdMutex<Option<broadcast::Sender<TabUpdate>>>,
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrowser {
    /// Create a mock whose tabs load immediately and whose page script acknowledges.
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            tabs: Arc::new(RwLock::new(HashMap::new())),
            created: Arc::new(RwLock::new(Vec::new())),
            instructions: Arc::new(RwLock::new(Vec::new())),
            removed: Arc::new(RwLock::new(Vec::new())),
            load_behavior: Arc::new(RwLock::new(LoadBehavior::Immediate)),
            page_behavior: Arc::new(RwLock::new(PageScriptBehavior::Acknowledge)),
            next_error: Arc::new(RwLock::new(None)),
            next_tab_id: AtomicU64::new(100),
            updates: StdMutex::new(Some(updates)),
        }
    }

    pub async fn set_load_behavior(&self, behavior: LoadBehavior) {
        *self.load_behavior.write().await = behavior;
    }

    pub async fn set_page_behavior(&self, behavior: PageScriptBehavior) {
        *self.page_behavior.write().await = behavior;
    }

    /// Configure the next create_tab to fail with the given error.
    pub async fn set_next_error(&self, error: BrowserError) {
        *self.next_error.write().await = Some(error);
    }

    /// Insert or replace a tab without emitting a notification.
    pub async fn insert_tab(&self, tab: TabSnapshot) {
        self.tabs.write().await.insert(tab.id, tab);
    }

    /// Check if a tab is open.
    pub async fn has_tab(&self, tab_id: TabId) -> bool {
        self.tabs.read().await.contains_key(&tab_id)
    }

    pub async fn created_tabs(&self) -> Vec<RecordedTab> {
        self.created.read().await.clone()
    }

    pub async fn instructions(&self) -> Vec<RecordedInstruction> {
        self.instructions.read().await.clone()
    }

    pub async fn removed_tabs(&self) -> Vec<TabId> {
        self.removed.read().await.clone()
    }

    /// Broadcast a tab update to all subscribers.
    pub fn emit_update(&self, update: TabUpdate) {
        if let Some(tx) = self.sender() {
            let _ = tx.send(update);
        }
    }

    /// Number of live update subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender().map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// Drop the update sender so subscribers observe a closed stream.
    pub fn close_updates(&self) {
        if let Ok(mut guard) = self.updates.lock() {
            guard.take();
        }
    }

    fn sender(&self) -> Option<broadcast::Sender<TabUpdate>> {
        self.updates.lock().ok().and_then(|guard| guard.clone())
    }

    async fn take_error(&self) -> Option<BrowserError> {
        self.next_error.write().await.take()
    }

    /// Drive a created tab through its scripted load progress.
    fn spawn_load(&self, tab: TabSnapshot, url: String, finish_after: Option<Duration>) {
        let tabs = Arc::clone(&self.tabs);
        let Some(updates) = self.sender() else {
            return;
        };

        tokio::spawn(async move {
            // Navigation commits: the real URL shows up while still loading.
            let navigating = TabSnapshot {
                url: url.clone(),
                status: TabStatus::Loading,
                ..tab.clone()
            };
            if let Some(current) = tabs.write().await.get_mut(&tab.id) {
                *current = navigating.clone();
            } else {
                return;
            }
            let _ = updates.send(TabUpdate {
                tab_id: tab.id,
                tab: navigating,
            });

            let Some(delay) = finish_after else {
                return;
            };
            tokio::time::sleep(delay).await;

            let loaded = TabSnapshot {
                url,
                status: TabStatus::Complete,
                ..tab
            };
            if let Some(current) = tabs.write().await.get_mut(&loaded.id) {
                *current = loaded.clone();
            } else {
                return;
            }
            let _ = updates.send(TabUpdate {
                tab_id: loaded.id,
                tab: loaded,
            });
        });
    }
}

#[async_trait]
impl Browser for MockBrowser {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_tab(&self, request: CreateTabRequest) -> Result<TabSnapshot, BrowserError> {
        if let Some(err) = self.take_error().await {
            return Err(err);
        }

        let tab_id = self.next_tab_id.fetch_add(1, Ordering::SeqCst);
        self.created.write().await.push(RecordedTab {
            tab_id,
            request: request.clone(),
            created_at: Instant::now(),
        });

        let behavior = self.load_behavior.read().await.clone();
        let tab = match behavior {
            LoadBehavior::Immediate => TabSnapshot {
                id: tab_id,
                window_id: request.window_id,
                url: request.url.clone(),
                status: TabStatus::Complete,
            },
            LoadBehavior::After(_) | LoadBehavior::Never => TabSnapshot {
                id: tab_id,
                window_id: request.window_id,
                url: BLANK_URL.to_string(),
                status: TabStatus::Loading,
            },
        };
        self.tabs.write().await.insert(tab_id, tab.clone());

        match behavior {
            LoadBehavior::Immediate => {}
            LoadBehavior::After(delay) => self.spawn_load(tab.clone(), request.url, Some(delay)),
            LoadBehavior::Never => self.spawn_load(tab.clone(), request.url, None),
        }

        Ok(tab)
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<TabSnapshot, BrowserError> {
        self.tabs
            .read()
            .await
            .get(&tab_id)
            .cloned()
            .ok_or(BrowserError::TabNotFound(tab_id))
    }

    async fn remove_tab(&self, tab_id: TabId) -> Result<(), BrowserError> {
        self.removed.write().await.push(tab_id);
        self.tabs
            .write()
            .await
            .remove(&tab_id)
            .map(|_| ())
            .ok_or(BrowserError::TabNotFound(tab_id))
    }

    async fn send_tab_message(
        &self,
        tab_id: TabId,
        message: TabInstruction,
    ) -> Result<TabReply, BrowserError> {
        self.instructions.write().await.push(RecordedInstruction {
            tab_id,
            instruction: message.clone(),
            received_at: Instant::now(),
        });

        if !self.has_tab(tab_id).await {
            return Err(BrowserError::TabNotFound(tab_id));
        }

        let behavior = self.page_behavior.read().await.clone();
        match behavior {
            PageScriptBehavior::Acknowledge => {
                if message.action == TabAction::SubmitReport {
                    tokio::time::sleep(Duration::from_millis(message.dwell_ms)).await;
                }
                Ok(TabReply {
                    result: Some("OK".to_string()),
                })
            }
            PageScriptBehavior::Reply(reply) => Ok(reply),
            PageScriptBehavior::Fail(err) => Err(err),
            PageScriptBehavior::Silent => std::future::pending().await,
        }
    }

    fn subscribe_updates(&self) -> broadcast::Receiver<TabUpdate> {
        match self.sender() {
            Some(tx) => tx.subscribe(),
            None => {
                // Closed: hand out a receiver whose sender is already gone.
                let (_, rx) = broadcast::channel(1);
                rx
            }
        }
    }
}
