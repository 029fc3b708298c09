//! Browser abstraction.
//!
//! This module provides a `Browser` trait covering the handful of tab
//! operations the report pipeline needs: open a tab, observe its load
//! progress, talk to its page script, and close it.

mod types;

pub use types::*;
