//! Tab lifecycle synchronization.
//!
//! Waits for a freshly opened report tab to finish loading. Load progress is
//! only observable through asynchronous update notifications, which may be
//! delayed, duplicated, or belong to other tabs.

mod waiter;

pub use waiter::{TabError, TabLifecycleWaiter};
