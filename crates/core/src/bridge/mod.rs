//! Browser bridge.
//!
//! The browser shim connects to the service over a WebSocket and relays
//! page messages, tab notifications and tab commands. This module holds the
//! frame definitions and a [`Browser`](crate::browser::Browser) backed by the
//! attached connection.

mod client;
mod protocol;

pub use client::{BridgeBrowser, BridgeConnection};
pub use protocol::{BridgeCommand, ClientFrame, MessageSender, ServerFrame};
