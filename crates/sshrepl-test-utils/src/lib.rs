//! sshrepl-test-utils: Test infrastructure for sshrepl.
//!
//! Provides:
//! - MockChannelControl: records teardown requests from the shell bridge
//! - MockEngine: line-echo evaluation engine that records its configuration
//! - FakeChannel: in-memory shell channel driven like a user terminal
//! - TestKeys: fixed and generated SSH keys

mod fake_channel;
mod mock_control;
mod mock_engine;
mod test_keys;

pub use fake_channel::{FakeChannel, ServerChannel, fake_channel};
pub use mock_control::MockChannelControl;
pub use mock_engine::{MockEngine, StartRecord};
pub use test_keys::{TestKey, TestKeys};
