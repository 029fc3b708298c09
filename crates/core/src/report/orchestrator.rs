//! Report orchestrator implementation.
//!
//! Drives one report request through its stages:
//! - Admission: wait for a ticket from the rate-limited queue
//! - Tab open: open an inactive report tab in the requester's window
//! - Tab load: wait for the tab to finish loading
//! - Page ack: instruct the page script and wait for its acknowledgement
//!
//! Reports run strictly one at a time; the admission is released when the
//! run ends, whatever the outcome.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browser::{Browser, CreateTabRequest, TabAction, TabId, TabInstruction};
use crate::config::Config;
use crate::metrics::{REPORTS_TOTAL, REPORT_DURATION, REPORT_FAILURES};
use crate::queue::{AdmissionQueue, QueueError};
use crate::tab::TabLifecycleWaiter;

use super::types::{ReportError, ReportRequest, ReportResult, ReportStage, ReportStats};

/// Turns report requests into paced, acknowledged report tabs.
pub struct ReportOrchestrator {
    queue: Arc<AdmissionQueue>,
    browser: Arc<dyn Browser>,
    waiter: TabLifecycleWaiter,
    submit_dwell: Duration,
    ack_timeout: Duration,
    stats: Mutex<ReportStats>,
}

impl ReportOrchestrator {
    pub fn new(config: &Config, queue: Arc<AdmissionQueue>, browser: Arc<dyn Browser>) -> Self {
        let waiter = TabLifecycleWaiter::new(Arc::clone(&browser), config.tabs.load_timeout());
        Self {
            queue,
            browser,
            waiter,
            submit_dwell: Duration::from_millis(config.page.submit_dwell_ms),
            ack_timeout: config.page.ack_timeout(),
            stats: Mutex::new(ReportStats::default()),
        }
    }

    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    pub async fn stats(&self) -> ReportStats {
        lock_stats(&self.stats).clone()
    }

    /// Run a report to completion.
    ///
    /// Fails immediately when the queue is saturated; otherwise suspends
    /// until admitted and returns exactly one outcome. Dropping the returned
    /// future counts the report as cancelled.
    pub async fn submit(&self, request: ReportRequest) -> Result<ReportResult, ReportError> {
        if self.queue.is_full().await {
            return Err(self.reject(&request));
        }

        let mut tracker = StatsTracker::submitted(&self.stats);
        debug!(
            report = %request.id,
            post_id = ?request.post_id,
            auto = request.auto,
            "Report queued"
        );

        let admission = match self.queue.enqueue().await {
            Ok(admission) => admission,
            Err(QueueError::Full { .. }) => {
                tracker.withdraw();
                return Err(self.reject(&request));
            }
            Err(e) => {
                let err = ReportError::queue(e);
                tracker.failed();
                self.record_failure(&request, &err, None);
                return Err(err);
            }
        };

        info!(
            report = %request.id,
            ticket = admission.ticket_id(),
            waited_ms = admission.waited().as_millis() as u64,
            "Report admitted"
        );
        tracker.admitted();

        let started = Instant::now();
        let outcome = self.run(&request).await;
        let elapsed = started.elapsed();

        // Releasing the admission schedules the next ticket.
        drop(admission);

        match outcome {
            Ok((tab_id, action_result)) => {
                tracker.completed();
                REPORTS_TOTAL.with_label_values(&["completed"]).inc();
                REPORT_DURATION
                    .with_label_values(&["completed"])
                    .observe(elapsed.as_secs_f64());

                info!(
                    report = %request.id,
                    tab_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Report acknowledged"
                );

                Ok(ReportResult {
                    request_id: request.id,
                    reply: with_action_result(request.message, &action_result),
                    action_result,
                    tab_id,
                    elapsed_ms: elapsed.as_millis() as u64,
                    completed_at: Utc::now(),
                })
            }
            Err(err) => {
                tracker.failed();
                self.record_failure(&request, &err, Some(elapsed));
                Err(err)
            }
        }
    }

    /// Stages after admission. The caller holds the admission throughout.
    async fn run(&self, request: &ReportRequest) -> Result<(TabId, String), ReportError> {
        let tab = self
            .browser
            .create_tab(CreateTabRequest {
                url: request.tab_url(),
                window_id: request.window_id,
                active: false,
            })
            .await
            .map_err(ReportError::tab_creation)?;
        debug!(report = %request.id, tab_id = tab.id, "Report tab opened");

        let tab = self
            .waiter
            .await_loaded(tab)
            .await
            .map_err(ReportError::tab_load)?;
        debug!(report = %request.id, tab_id = tab.id, url = %tab.url, "Report tab loaded");

        let action = if request.auto {
            TabAction::SubmitReport
        } else {
            TabAction::OpenReport
        };
        let instruction = TabInstruction {
            id: tab.id,
            action,
            comment: request.comment.clone(),
            auto: request.auto,
            dwell_ms: self.submit_dwell.as_millis() as u64,
        };

        let reply = tokio::time::timeout(
            self.ack_timeout,
            self.browser.send_tab_message(tab.id, instruction),
        )
        .await
        .map_err(|_| ReportError::ack_timeout(self.ack_timeout.as_millis() as u64))?
        .map_err(|e| ReportError::page_script(e.to_string()))?;

        let result = reply
            .result
            .filter(|result| !result.is_empty())
            .ok_or_else(|| ReportError::page_script("reply carried no result"))?;
        debug!(report = %request.id, tab_id = tab.id, action = action.as_str(), %result, "Page script acknowledged");

        Ok((tab.id, result))
    }

    fn reject(&self, request: &ReportRequest) -> ReportError {
        lock_stats(&self.stats).rejected += 1;
        REPORTS_TOTAL.with_label_values(&["rejected"]).inc();

        let err = ReportError::queue(QueueError::Full {
            capacity: self.queue.capacity(),
        });
        warn!(report = %request.id, "{}", err);
        err
    }

    fn record_failure(&self, request: &ReportRequest, err: &ReportError, elapsed: Option<Duration>) {
        REPORTS_TOTAL.with_label_values(&["failed"]).inc();
        REPORT_FAILURES
            .with_label_values(&[err.stage.as_str()])
            .inc();
        if let Some(elapsed) = elapsed {
            REPORT_DURATION
                .with_label_values(&["failed"])
                .observe(elapsed.as_secs_f64());
        }

        if err.stage == ReportStage::Admission {
            warn!(report = %request.id, "Report was never admitted: {}", err);
        } else {
            warn!(report = %request.id, stage = %err.stage, "Report failed: {}", err);
        }
    }
}

/// Counters stay usable even if a holder panicked mid-update.
fn lock_stats(stats: &Mutex<ReportStats>) -> MutexGuard<'_, ReportStats> {
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Queued,
    Running,
    Settled,
}

/// Keeps `ReportStats` balanced for one submission.
///
/// Counts the submission on creation. If it is dropped before an outcome is
/// recorded (the caller went away), the report is counted as cancelled and
/// leaves `in_flight`.
struct StatsTracker<'a> {
    stats: &'a Mutex<ReportStats>,
    progress: Progress,
}

impl<'a> StatsTracker<'a> {
    fn submitted(stats: &'a Mutex<ReportStats>) -> Self {
        lock_stats(stats).submitted += 1;
        Self {
            stats,
            progress: Progress::Queued,
        }
    }

    fn admitted(&mut self) {
        lock_stats(self.stats).in_flight += 1;
        self.progress = Progress::Running;
    }

    /// The submission never took a slot after all.
    fn withdraw(&mut self) {
        let mut stats = lock_stats(self.stats);
        stats.submitted = stats.submitted.saturating_sub(1);
        self.progress = Progress::Settled;
    }

    fn completed(&mut self) {
        self.settle(|stats| stats.completed += 1);
    }

    fn failed(&mut self) {
        self.settle(|stats| stats.failed += 1);
    }

    fn settle(&mut self, count: impl FnOnce(&mut ReportStats)) {
        let mut stats = lock_stats(self.stats);
        if self.progress == Progress::Running {
            stats.in_flight = stats.in_flight.saturating_sub(1);
        }
        count(&mut stats);
        self.progress = Progress::Settled;
    }
}

impl Drop for StatsTracker<'_> {
    fn drop(&mut self) {
        if self.progress == Progress::Settled {
            return;
        }
        let was_running = self.progress == Progress::Running;
        self.settle(|stats| stats.cancelled += 1);
        REPORTS_TOTAL.with_label_values(&["cancelled"]).inc();
        warn!(admitted = was_running, "Report cancelled by caller");
    }
}

/// The reply to a report is the inbound message with `action_result` set.
fn with_action_result(mut message: Value, action_result: &str) -> Value {
    match &mut message {
        Value::Object(map) => {
            map.insert(
                "action_result".to_string(),
                Value::String(action_result.to_string()),
            );
            message
        }
        _ => serde_json::json!({
            "message": message,
            "action_result": action_result,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserError, TabReply};
    use crate::testing::{fixtures, LoadBehavior, MockBrowser, PageScriptBehavior};
    use serde_json::json;

    const REPORT_URL: &str = "https://bitcointalk.org/index.php?action=reporttm;topic=1;msg=2";

    async fn orchestrator(config: &Config, browser: Arc<MockBrowser>) -> ReportOrchestrator {
        let queue = Arc::new(AdmissionQueue::new(&config.queue));
        queue.start().await;
        ReportOrchestrator::new(config, queue, browser)
    }

    fn request(auto: bool) -> ReportRequest {
        let message = fixtures::report_message(REPORT_URL, "2", "spam", auto);
        ReportRequest::new(REPORT_URL, message)
            .with_comment("spam")
            .with_auto(auto)
            .with_window(Some(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_report_sends_open_action_without_marker() {
        let config = fixtures::test_config();
        let browser = Arc::new(MockBrowser::new());
        let orchestrator = orchestrator(&config, browser.clone()).await;

        let result = orchestrator.submit(request(false)).await.unwrap();
        assert_eq!(result.action_result, "OK");
        assert_eq!(result.reply["action_result"], "OK");
        assert_eq!(result.reply["action_name"], "bct-report");

        let created = browser.created_tabs().await;
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].request.url, REPORT_URL);
        assert!(!created[0].request.active);
        assert_eq!(created[0].request.window_id, Some(1));

        let instructions = browser.instructions().await;
        assert_eq!(instructions[0].instruction.action, TabAction::OpenReport);
        assert_eq!(instructions[0].instruction.id, result.tab_id);
        assert!(!instructions[0].instruction.auto);

        let stats = orchestrator.stats().await;
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tab_creation_failure_is_stage_qualified() {
        let config = fixtures::test_config();
        let browser = Arc::new(MockBrowser::new());
        browser
            .set_next_error(BrowserError::TabCreation("No window with id: 1".into()))
            .await;
        let orchestrator = orchestrator(&config, browser.clone()).await;

        let err = orchestrator.submit(request(false)).await.unwrap_err();
        assert_eq!(err.stage, ReportStage::TabOpen);
        assert!(err.to_string().starts_with("Tab load/check failed: "));
        assert!(browser.instructions().await.is_empty());
        assert_eq!(orchestrator.stats().await.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_result_is_page_script_error() {
        let config = fixtures::test_config();
        let browser = Arc::new(MockBrowser::new());
        browser
            .set_page_behavior(PageScriptBehavior::Reply(TabReply::default()))
            .await;
        let orchestrator = orchestrator(&config, browser).await;

        let err = orchestrator.submit(request(false)).await.unwrap_err();
        assert_eq!(err.stage, ReportStage::PageAck);
        assert!(!err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_page_script_times_out() {
        let config = fixtures::test_config();
        let browser = Arc::new(MockBrowser::new());
        browser.set_page_behavior(PageScriptBehavior::Silent).await;
        let orchestrator = orchestrator(&config, browser).await;

        let started = Instant::now();
        let err = orchestrator.submit(request(false)).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.stage, ReportStage::PageAck);
        assert!(started.elapsed() >= config.page.ack_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_timeout_sends_no_instruction() {
        let config = fixtures::test_config();
        let browser = Arc::new(MockBrowser::new());
        browser.set_load_behavior(LoadBehavior::Never).await;
        let orchestrator = orchestrator(&config, browser.clone()).await;

        let err = orchestrator.submit(request(true)).await.unwrap_err();
        assert_eq!(err.stage, ReportStage::TabLoad);
        assert!(err.to_string().starts_with("Tab load/check failed: Tab status loading"));
        assert!(browser.instructions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_submit_is_counted_as_cancelled() {
        let config = fixtures::test_config();
        let browser = Arc::new(MockBrowser::new());
        browser.set_load_behavior(LoadBehavior::Never).await;
        let orchestrator = Arc::new(orchestrator(&config, browser.clone()).await);

        let task = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.submit(request(false)).await })
        };

        // Admitted after one interval, then stuck waiting for the tab to load.
        tokio::time::sleep(config.queue.release_interval() * 2).await;
        assert_eq!(browser.created_tabs().await.len(), 1);
        assert_eq!(orchestrator.stats().await.in_flight, 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let stats = orchestrator.stats().await;
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.completed + stats.failed, 0);

        // The queue keeps releasing for the next caller.
        browser.set_load_behavior(LoadBehavior::Immediate).await;
        orchestrator.submit(request(false)).await.unwrap();
        let stats = orchestrator.stats().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_queued_submit_leaves_no_in_flight() {
        let config = fixtures::test_config();
        let browser = Arc::new(MockBrowser::new());
        let orchestrator = Arc::new(orchestrator(&config, browser.clone()).await);

        let task = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.submit(request(false)).await })
        };
        while orchestrator.queue().pending_len().await == 0 {
            tokio::task::yield_now().await;
        }

        task.abort();
        let _ = task.await;

        let stats = orchestrator.stats().await;
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(orchestrator.queue().pending_len().await, 0);
        assert!(browser.created_tabs().await.is_empty());
    }

    #[test]
    fn test_action_result_added_to_message() {
        let reply = with_action_result(json!({"action_name": "bct-report"}), "OK");
        assert_eq!(reply, json!({"action_name": "bct-report", "action_result": "OK"}));
    }
}
