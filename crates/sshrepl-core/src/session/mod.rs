//! Session negotiation for sshrepl.
//!
//! This module provides:
//! - Per-connection admission of a single interactive session
//! - Terminal geometry captured before the shell starts

mod state;

pub use state::{AuthStatus, ConnectionState};
