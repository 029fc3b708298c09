//! Page message routing.
//!
//! Every message posted by a forum page or report tab carries an
//! `action_name`. The router dispatches it to the report orchestrator, the
//! browser, or the in-memory list store, and produces one result per message.

mod dispatch;
mod list_store;

pub use dispatch::{MessageRouter, PageAction, RouterError};
pub use list_store::ListStore;
