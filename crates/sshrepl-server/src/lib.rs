//! sshrepl-server: Serve interactive REPL sessions over SSH.
//!
//! Provides:
//! - Command-line interface and configuration loading
//! - SSH transport adapter on top of russh
//! - TCP listener with a close handle
//! - The built-in line REPL engine

pub mod cli;
pub mod listener;
pub mod repl;
pub mod ssh;

pub use cli::{Cli, CliLogFormat};
pub use listener::{Server, ServerHandle};
pub use repl::LineRepl;
