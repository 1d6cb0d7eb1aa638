//! sshrepl-core: authentication and session plumbing for serving an
//! interactive shell over SSH.
//!
//! This crate provides:
//! - Credential stores and the authentication state machine
//! - Timing-safe secret comparison
//! - Per-connection session admission
//! - Line-ending conversion for terminal output
//! - The evaluation engine contract and the bridge that attaches it to a channel
//! - Startup configuration, errors and logging

pub mod auth;
pub mod bridge;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod logging;
pub mod newline;
pub mod session;

pub use auth::{AuthAttempt, AuthDecision, Authenticator, CredentialRecord, CredentialResolver};
pub use bridge::{ChannelControl, SessionHandle, ShellBridge};
pub use config::{RawConfig, ServerConfig, Users};
pub use engine::{Bindings, Context, EngineConfig, EvalEngine, RunningEngine, SessionOptions};
pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
pub use newline::{NewlineWriter, convert_newlines};
pub use session::ConnectionState;
