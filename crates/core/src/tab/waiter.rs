//! Waits for a report tab to finish loading.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::browser::{Browser, BrowserError, TabId, TabSnapshot, TabStatus, TabUpdate};
use crate::metrics::TAB_LOAD_TIMEOUTS;

/// Errors while waiting for a tab to load.
#[derive(Debug, Clone, Error)]
pub enum TabError {
    /// The tab did not reach a loaded state before the deadline.
    #[error("Tab status {status}: {url}")]
    LoadTimeout {
        tab_id: TabId,
        status: TabStatus,
        url: String,
        waited_ms: u64,
    },

    /// The browser stopped delivering tab notifications.
    #[error("Tab update stream closed")]
    UpdatesClosed,

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Resolves once a tab's document has loaded, bounded by a timeout.
pub struct TabLifecycleWaiter {
    browser: Arc<dyn Browser>,
    timeout: Duration,
}

impl TabLifecycleWaiter {
    pub fn new(browser: Arc<dyn Browser>, timeout: Duration) -> Self {
        Self { browser, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait until `tab` is complete with a non-blank URL.
    ///
    /// The update subscription lives for the duration of this call only and
    /// is released on every exit path.
    pub async fn await_loaded(&self, tab: TabSnapshot) -> Result<TabSnapshot, TabError> {
        // Subscribe before checking so no update can slip in between.
        let mut updates = self.browser.subscribe_updates();

        if tab.is_ready() {
            debug!(tab_id = tab.id, url = %tab.url, "Tab already loaded");
            return Ok(tab);
        }

        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut last_known = tab;

        loop {
            match time::timeout_at(deadline, updates.recv()).await {
                Ok(Ok(update)) => {
                    if update.tab_id != last_known.id {
                        continue;
                    }
                    debug!(
                        tab_id = update.tab_id,
                        status = %update.tab.status,
                        url = %update.tab.url,
                        "Tab updated"
                    );
                    if update.tab.is_ready() {
                        return Ok(update.tab);
                    }
                    last_known = update.tab;
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(
                        tab_id = last_known.id,
                        skipped, "Tab update subscription lagged, re-reading tab"
                    );
                    // A failed re-read is not fatal; the deadline still decides.
                    match self.browser.get_tab(last_known.id).await {
                        Ok(current) if current.is_ready() => return Ok(current),
                        Ok(current) => last_known = current,
                        Err(e) => {
                            warn!(tab_id = last_known.id, "Tab re-read after lag failed: {}", e)
                        }
                    }
                }
                Ok(Err(RecvError::Closed)) => return Err(TabError::UpdatesClosed),
                Err(_) => return self.recheck_at_deadline(&mut updates, last_known, started).await,
            }
        }
    }

    /// Last look before declaring a timeout: a qualifying notification may
    /// have been delivered late or dropped.
    async fn recheck_at_deadline(
        &self,
        updates: &mut broadcast::Receiver<TabUpdate>,
        mut last_known: TabSnapshot,
        started: Instant,
    ) -> Result<TabSnapshot, TabError> {
        loop {
            match updates.try_recv() {
                Ok(update) if update.tab_id == last_known.id => {
                    if update.tab.is_ready() {
                        return Ok(update.tab);
                    }
                    last_known = update.tab;
                }
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        match self.browser.get_tab(last_known.id).await {
            Ok(current) if current.is_ready() => {
                debug!(tab_id = current.id, "Tab loaded without a notification");
                return Ok(current);
            }
            Ok(current) => last_known = current,
            Err(e) => debug!(tab_id = last_known.id, "Final tab re-check failed: {}", e),
        }

        let waited_ms = started.elapsed().as_millis() as u64;
        TAB_LOAD_TIMEOUTS.inc();
        warn!(
            tab_id = last_known.id,
            status = %last_known.status,
            url = %last_known.url,
            waited_ms,
            "Tab did not finish loading"
        );

        Err(TabError::LoadTimeout {
            tab_id: last_known.id,
            status: last_known.status,
            url: last_known.url,
            waited_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BLANK_URL;
    use crate::testing::MockBrowser;
    use tokio_test::{assert_ready_ok, task};

    const REPORT_URL: &str = "https://bitcointalk.org/index.php?action=reporttm;topic=1;msg=2";

    fn snapshot(id: TabId, url: &str, status: TabStatus) -> TabSnapshot {
        TabSnapshot {
            id,
            window_id: Some(1),
            url: url.to_string(),
            status,
        }
    }

    fn update(id: TabId, url: &str, status: TabStatus) -> TabUpdate {
        TabUpdate {
            tab_id: id,
            tab: snapshot(id, url, status),
        }
    }

    async fn wait_for_subscriber(browser: &MockBrowser) {
        for _ in 0..100 {
            if browser.subscriber_count() > 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("waiter never subscribed");
    }

    #[tokio::test]
    async fn test_ready_tab_resolves_without_waiting() {
        let browser = Arc::new(MockBrowser::new());
        let waiter = TabLifecycleWaiter::new(browser.clone(), Duration::from_secs(60));

        let tab = snapshot(3, REPORT_URL, TabStatus::Complete);
        let mut fut = task::spawn(waiter.await_loaded(tab.clone()));
        let loaded = assert_ready_ok!(fut.poll());
        assert_eq!(loaded, tab);
        drop(fut);

        assert_eq!(browser.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_other_tabs_and_unready_states() {
        let browser = Arc::new(MockBrowser::new());
        let waiter = TabLifecycleWaiter::new(browser.clone(), Duration::from_secs(60));

        let handle = tokio::spawn(async move {
            waiter
                .await_loaded(snapshot(5, BLANK_URL, TabStatus::Loading))
                .await
        });
        wait_for_subscriber(&browser).await;

        browser.emit_update(update(9, REPORT_URL, TabStatus::Complete));
        browser.emit_update(update(5, BLANK_URL, TabStatus::Complete));
        browser.emit_update(update(5, REPORT_URL, TabStatus::Loading));
        browser.emit_update(update(5, REPORT_URL, TabStatus::Complete));

        let loaded = handle.await.unwrap().unwrap();
        assert_eq!(loaded.id, 5);
        assert_eq!(loaded.url, REPORT_URL);
        assert_eq!(loaded.status, TabStatus::Complete);
        assert_eq!(browser.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_last_known_state_and_unsubscribes() {
        let browser = Arc::new(MockBrowser::new());
        browser
            .insert_tab(snapshot(5, BLANK_URL, TabStatus::Loading))
            .await;
        let waiter = TabLifecycleWaiter::new(browser.clone(), Duration::from_secs(60));

        let started = Instant::now();
        let handle = tokio::spawn(async move {
            waiter
                .await_loaded(snapshot(5, BLANK_URL, TabStatus::Loading))
                .await
        });
        wait_for_subscriber(&browser).await;
        browser.emit_update(update(5, REPORT_URL, TabStatus::Loading));
        browser
            .insert_tab(snapshot(5, REPORT_URL, TabStatus::Loading))
            .await;

        let err = handle.await.unwrap().unwrap_err();
        assert!(started.elapsed() >= Duration::from_secs(60));
        match err {
            TabError::LoadTimeout {
                tab_id,
                status,
                url,
                ..
            } => {
                assert_eq!(tab_id, 5);
                assert_eq!(status, TabStatus::Loading);
                assert_eq!(url, REPORT_URL);
            }
            other => panic!("Expected LoadTimeout, got {:?}", other),
        }
        assert_eq!(browser.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_recheck_catches_missed_notification() {
        let browser = Arc::new(MockBrowser::new());
        browser
            .insert_tab(snapshot(5, BLANK_URL, TabStatus::Loading))
            .await;
        let waiter = TabLifecycleWaiter::new(browser.clone(), Duration::from_secs(1));

        let handle = tokio::spawn(async move {
            waiter
                .await_loaded(snapshot(5, BLANK_URL, TabStatus::Loading))
                .await
        });
        wait_for_subscriber(&browser).await;

        // The tab finishes loading but its notification never arrives.
        browser
            .insert_tab(snapshot(5, REPORT_URL, TabStatus::Complete))
            .await;

        let loaded = handle.await.unwrap().unwrap();
        assert!(loaded.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagged_subscription_rereads_tab() {
        let browser = Arc::new(MockBrowser::new());
        browser
            .insert_tab(snapshot(5, REPORT_URL, TabStatus::Complete))
            .await;
        let waiter = TabLifecycleWaiter::new(browser.clone(), Duration::from_secs(60));

        let started = Instant::now();
        let handle = tokio::spawn(async move {
            waiter
                .await_loaded(snapshot(5, BLANK_URL, TabStatus::Loading))
                .await
        });
        wait_for_subscriber(&browser).await;

        // Overflow the subscription with other tabs' traffic.
        for _ in 0..100 {
            browser.emit_update(update(9, REPORT_URL, TabStatus::Loading));
        }

        let loaded = handle.await.unwrap().unwrap();
        assert_eq!(loaded.id, 5);
        assert!(loaded.is_ready());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reread_after_lag_keeps_waiting() {
        // Tab 5 is unknown to the browser, so the re-read fails.
        let browser = Arc::new(MockBrowser::new());
        let waiter = TabLifecycleWaiter::new(browser.clone(), Duration::from_secs(60));

        let handle = tokio::spawn(async move {
            waiter
                .await_loaded(snapshot(5, BLANK_URL, TabStatus::Loading))
                .await
        });
        wait_for_subscriber(&browser).await;

        for _ in 0..100 {
            browser.emit_update(update(9, REPORT_URL, TabStatus::Loading));
        }
        browser.emit_update(update(5, REPORT_URL, TabStatus::Complete));

        let loaded = handle.await.unwrap().unwrap();
        assert_eq!(loaded.id, 5);
        assert_eq!(loaded.url, REPORT_URL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reread_after_lag_still_times_out() {
        let browser = Arc::new(MockBrowser::new());
        let waiter = TabLifecycleWaiter::new(browser.clone(), Duration::from_secs(60));

        let started = Instant::now();
        let handle = tokio::spawn(async move {
            waiter
                .await_loaded(snapshot(5, BLANK_URL, TabStatus::Loading))
                .await
        });
        wait_for_subscriber(&browser).await;

        for _ in 0..100 {
            browser.emit_update(update(9, REPORT_URL, TabStatus::Loading));
        }

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, TabError::LoadTimeout { tab_id: 5, .. }));
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_closed_update_stream_fails() {
        let browser = Arc::new(MockBrowser::new());
        let waiter = TabLifecycleWaiter::new(browser.clone(), Duration::from_secs(60));
        browser.close_updates();

        let err = waiter
            .await_loaded(snapshot(5, BLANK_URL, TabStatus::Loading))
            .await
            .unwrap_err();
        assert!(matches!(err, TabError::UpdatesClosed));
    }

    #[test]
    fn test_timeout_error_message_names_status_and_url() {
        let err = TabError::LoadTimeout {
            tab_id: 1,
            status: TabStatus::Loading,
            url: REPORT_URL.to_string(),
            waited_ms: 60_000,
        };
        assert_eq!(err.to_string(), format!("Tab status loading: {}", REPORT_URL));
    }
}
