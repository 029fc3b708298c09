//! Admission queue implementation.
//!
//! A single release loop is the only timer that drives releases:
//! sleep one interval, hand the head ticket an [`Admission`], wait until that
//! admission is dropped, sleep one interval again. An empty queue just costs
//! another interval; there is no catch-up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::metrics::{QUEUE_RELEASES, QUEUE_REJECTIONS, QUEUE_TIMEOUTS, QUEUE_WAIT_DURATION};

use super::types::{QueueError, QueueStatus, TicketId};

/// Permission to run one report task.
///
/// Held by the running task for its whole lifecycle. Dropping it, on any
/// path including unwinding, tells the queue the task is over and starts the
/// countdown to the next release.
#[derive(Debug)]
pub struct Admission {
    ticket_id: TicketId,
    waited: Duration,
    done: Option<oneshot::Sender<()>>,
}

impl Admission {
    pub fn ticket_id(&self) -> TicketId {
        self.ticket_id
    }

    /// Time spent in the queue before release.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            debug!(ticket_id = self.ticket_id, "Admission released");
            let _ = done.send(());
        }
    }
}

/// A ticket waiting for release.
struct PendingTicket {
    id: TicketId,
    enqueued_at: Instant,
    deadline: Instant,
    release_tx: oneshot::Sender<Admission>,
}

impl PendingTicket {
    /// The waiter gave up (timed out or was cancelled) or the deadline passed.
    fn is_abandoned(&self, now: Instant) -> bool {
        self.release_tx.is_closed() || now >= self.deadline
    }
}

/// Mutable queue state, owned by one `AdmissionQueue`.
#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingTicket>,
    active: Option<TicketId>,
    next_ticket_id: TicketId,
    released_total: u64,
    timed_out_total: u64,
    closed: bool,
}

impl QueueState {
    fn purge_abandoned(&mut self, now: Instant) {
        let before = self.pending.len();
        self.pending.retain(|ticket| !ticket.is_abandoned(now));
        let purged = before - self.pending.len();
        if purged > 0 {
            debug!(purged, "Purged abandoned tickets");
        }
    }

    /// Pop the first live ticket and hand it an admission.
    fn release_next(&mut self, now: Instant) -> Option<oneshot::Receiver<()>> {
        while let Some(ticket) = self.pending.pop_front() {
            if ticket.is_abandoned(now) {
                debug!(ticket_id = ticket.id, "Skipping abandoned ticket");
                continue;
            }

            let (done_tx, done_rx) = oneshot::channel();
            let waited = now.duration_since(ticket.enqueued_at);
            let admission = Admission {
                ticket_id: ticket.id,
                waited,
                done: Some(done_tx),
            };

            match ticket.release_tx.send(admission) {
                Ok(()) => {
                    self.active = Some(ticket.id);
                    self.released_total += 1;
                    QUEUE_RELEASES.inc();
                    QUEUE_WAIT_DURATION.observe(waited.as_secs_f64());
                    info!(
                        ticket_id = ticket.id,
                        waited_ms = waited.as_millis() as u64,
                        remaining = self.pending.len(),
                        "Released admission ticket"
                    );
                    return Some(done_rx);
                }
                Err(_unclaimed) => {
                    debug!(ticket_id = ticket.id, "Waiter went away before release");
                }
            }
        }
        None
    }
}

/// Bounded FIFO of admission tickets released at a fixed pace.
pub struct AdmissionQueue {
    capacity: usize,
    release_interval: Duration,
    entry_timeout: Duration,
    state: Arc<Mutex<QueueState>>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl AdmissionQueue {
    /// Create a new queue. Tickets can be enqueued right away but nothing is
    /// released until [`start`](Self::start) is called.
    pub fn new(config: &QueueConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            capacity: config.capacity,
            release_interval: config.release_interval(),
            entry_timeout: config.entry_timeout(),
            state: Arc::new(Mutex::new(QueueState::default())),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn release_interval(&self) -> Duration {
        self.release_interval
    }

    /// Start the release loop (spawns a background task).
    pub async fn start(&self) {
        if self.state.lock().await.closed {
            warn!("Admission queue is closed, not starting");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Admission queue already running");
            return;
        }

        info!(
            capacity = self.capacity,
            release_interval_ms = self.release_interval.as_millis() as u64,
            entry_timeout_ms = self.entry_timeout.as_millis() as u64,
            "Starting admission queue"
        );

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let interval = self.release_interval;
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(Self::release_loop(state, running, interval, shutdown_rx));
    }

    /// Stop the release loop and close the queue. Pending waiters fail with
    /// [`QueueError::Closed`].
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let mut state = self.state.lock().await;
        state.closed = true;
        let dropped = state.pending.len();
        state.pending.clear();
        state.active = None;
        info!(dropped, "Admission queue stopped");
    }

    /// Append a ticket and wait until it is released.
    ///
    /// Fails immediately with [`QueueError::Full`] when `capacity` tickets are
    /// already pending; the rejected call does not take a slot.
    pub async fn enqueue(&self) -> Result<Admission, QueueError> {
        let (ticket_id, enqueued_at, deadline, mut release_rx) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }

            let now = Instant::now();
            state.purge_abandoned(now);
            if state.pending.len() >= self.capacity {
                QUEUE_REJECTIONS.inc();
                warn!(capacity = self.capacity, "Queue limit reached, rejecting");
                return Err(QueueError::Full {
                    capacity: self.capacity,
                });
            }

            let ticket_id = state.next_ticket_id;
            state.next_ticket_id += 1;
            let deadline = now + self.entry_timeout;
            let (release_tx, release_rx) = oneshot::channel();
            state.pending.push_back(PendingTicket {
                id: ticket_id,
                enqueued_at: now,
                deadline,
                release_tx,
            });
            debug!(ticket_id, position = state.pending.len(), "Ticket enqueued");

            (ticket_id, now, deadline, release_rx)
        };

        match time::timeout_at(deadline, &mut release_rx).await {
            Ok(Ok(admission)) => Ok(admission),
            Ok(Err(_)) if Instant::now() < deadline => Err(QueueError::Closed),
            // Dropped by the release loop at the deadline, or our own timer fired.
            Ok(Err(_)) | Err(_) => {
                let mut state = self.state.lock().await;
                state.pending.retain(|ticket| ticket.id != ticket_id);
                // The release may have landed in the same instant as the deadline.
                if let Ok(admission) = release_rx.try_recv() {
                    return Ok(admission);
                }
                state.timed_out_total += 1;
                QUEUE_TIMEOUTS.inc();

                let waited_ms = enqueued_at.elapsed().as_millis() as u64;
                warn!(ticket_id, waited_ms, "Queued task has timed out");
                Err(QueueError::TimedOut {
                    ticket_id,
                    waited_ms,
                })
            }
        }
    }

    /// Whether an enqueue right now would be rejected.
    pub async fn is_full(&self) -> bool {
        let mut state = self.state.lock().await;
        state.purge_abandoned(Instant::now());
        state.pending.len() >= self.capacity
    }

    /// Number of live pending tickets.
    pub async fn pending_len(&self) -> usize {
        let mut state = self.state.lock().await;
        state.purge_abandoned(Instant::now());
        state.pending.len()
    }

    /// Get current queue status.
    pub async fn status(&self) -> QueueStatus {
        let mut state = self.state.lock().await;
        state.purge_abandoned(Instant::now());
        QueueStatus {
            running: self.running.load(Ordering::Relaxed),
            pending: state.pending.len(),
            capacity: self.capacity,
            active_ticket: state.active,
            released_total: state.released_total,
            timed_out_total: state.timed_out_total,
            release_interval_ms: self.release_interval.as_millis() as u64,
        }
    }

    async fn release_loop(
        state: Arc<Mutex<QueueState>>,
        running: Arc<AtomicBool>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        debug!("Release loop started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = time::sleep(interval) => {}
            }
            if !running.load(Ordering::Relaxed) {
                break;
            }

            let done_rx = state.lock().await.release_next(Instant::now());
            let Some(done_rx) = done_rx else {
                continue;
            };

            // Gate the next release on the whole task, not just the tick.
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = done_rx => {}
            }
            state.lock().await.active = None;
        }
        debug!("Release loop stopped");
    }
}

impl Drop for AdmissionQueue {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
