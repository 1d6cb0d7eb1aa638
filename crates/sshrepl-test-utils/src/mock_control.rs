//! Mock channel control for testing teardown without a transport.
//!
//! Records how often the bridge asked to close the channel or end the
//! connection, and lets tests wait for either.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use sshrepl_core::bridge::ChannelControl;
use sshrepl_core::error::{Error, Result};

/// A channel control that counts calls.
#[derive(Debug, Default)]
pub struct MockChannelControl {
    closed: AtomicUsize,
    ended: AtomicUsize,
    /// Whether calls should report failure after recording.
    failing: AtomicBool,
    changed: Notify,
}

impl MockChannelControl {
    /// Create a new mock control.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a mock control whose calls return errors.
    pub fn failing() -> Arc<Self> {
        let control = Self::default();
        control.failing.store(true, Ordering::SeqCst);
        Arc::new(control)
    }

    /// Number of `close_channel` calls so far.
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of `end_connection` calls so far.
    pub fn end_count(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }

    /// Wait until the channel has been closed at least once.
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, || self.close_count() > 0).await
    }

    /// Wait until the connection has been ended at least once.
    pub async fn wait_ended(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, || self.end_count() > 0).await
    }

    async fn wait_for(&self, timeout: Duration, done: impl Fn() -> bool) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.changed.notified();
                if done() {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn result(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Channel {
                message: "mock failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChannelControl for MockChannelControl {
    async fn close_channel(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
        self.result()
    }

    async fn end_connection(&self) -> Result<()> {
        self.ended.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
        self.result()
    }
}

// =============================================================================
// Tests
// =============================================================================
