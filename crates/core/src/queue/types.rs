//! Types for the admission queue.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sequential ticket identifier, unique per queue instance.
pub type TicketId = u64;

/// Errors that can occur while waiting for admission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Back-pressure: the queue already holds `capacity` pending tickets.
    #[error("Try again later, queue limit reached: {capacity}")]
    Full { capacity: usize },

    /// The ticket was not released before its deadline.
    #[error("Queued task has timed out after {waited_ms} ms (ticket {ticket_id})")]
    TimedOut { ticket_id: TicketId, waited_ms: u64 },

    /// The queue was stopped while the ticket was pending.
    #[error("Admission queue is closed")]
    Closed,
}

/// Snapshot of the admission queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Whether the release loop is running.
    pub running: bool,
    /// Tickets waiting for release.
    pub pending: usize,
    /// Maximum number of pending tickets.
    pub capacity: usize,
    /// Ticket currently holding the admission, if any.
    pub active_ticket: Option<TicketId>,
    /// Tickets released since start.
    pub released_total: u64,
    /// Tickets that expired before release.
    pub timed_out_total: u64,
    /// Configured pause between releases.
    pub release_interval_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueueError::Full { capacity: 100 };
        assert_eq!(
            err.to_string(),
            "Try again later, queue limit reached: 100"
        );

        let err = QueueError::TimedOut {
            ticket_id: 3,
            waited_ms: 1500,
        };
        assert_eq!(
            err.to_string(),
            "Queued task has timed out after 1500 ms (ticket 3)"
        );
    }

    #[test]
    fn test_status_default() {
        let status = QueueStatus::default();
        assert!(!status.running);
        assert_eq!(status.pending, 0);
        assert!(status.active_ticket.is_none());
    }
}
