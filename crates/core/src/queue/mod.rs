//! Rate-limited admission queue.
//!
//! Report tasks wait here for a ticket. Tickets are released strictly FIFO,
//! one at a time: the next release happens one interval after the previous
//! task has finished, so consecutive submissions never overlap and never
//! come faster than the forum's flood control allows.

mod admission;
mod types;

pub use admission::{Admission, AdmissionQueue};
pub use types::{QueueError, QueueStatus, TicketId};
