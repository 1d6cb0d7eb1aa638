//! Attaches an evaluation engine to an accepted shell channel.
//!
//! Teardown runs both ways:
//! - engine exit closes the channel
//! - channel close ends the whole connection

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::engine::{Bindings, EngineConfig, EngineInput, SessionOptions, SharedEngine};
use crate::error::Result;
use crate::newline::NewlineWriter;

/// Transport operations the bridge needs on teardown.
#[async_trait]
pub trait ChannelControl: Send + Sync {
    /// Close the shell channel.
    async fn close_channel(&self) -> Result<()>;

    /// End the client connection.
    async fn end_connection(&self) -> Result<()>;
}

/// Starts engines on shell channels.
#[derive(Clone)]
pub struct ShellBridge {
    engine: SharedEngine,
    context: Option<Arc<Bindings>>,
}

impl ShellBridge {
    /// `context` is merged into every session's evaluation context.
    pub fn new(engine: SharedEngine, context: Option<Arc<Bindings>>) -> Self {
        Self { engine, context }
    }

    /// Start an engine session on a channel.
    ///
    /// `columns` is the width from the pty request, 0 if none was made.
    pub async fn start<R, W>(
        &self,
        input: R,
        output: W,
        control: Arc<dyn ChannelControl>,
        columns: u16,
        options: Option<&SessionOptions>,
    ) -> Result<SessionHandle>
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
        W: AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let (columns_tx, columns_rx) = watch::channel(columns);

        let input: EngineInput = Box::new(input);
        let output: Box<dyn AsyncWrite + Send + Sync + Unpin> = Box::new(output);
        let output = NewlineWriter::new(output, columns_rx);
        let mut config = EngineConfig::new(input, output, columns > 0);
        if let Some(options) = options {
            config.apply_options(options);
        }
        debug!(?config, "starting engine");

        let running = self.engine.start(config).await?;
        if let Some(context) = &self.context {
            running.context().merge(context).await;
        }

        let (_, exit) = running.into_parts();
        let engine = exit.abort_handle();
        let watcher = tokio::spawn(watch_engine(exit, Arc::clone(&control)));

        info!(columns, "shell session started");
        Ok(SessionHandle {
            columns: columns_tx,
            control,
            engine,
            watcher,
        })
    }
}

impl std::fmt::Debug for ShellBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellBridge")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

async fn watch_engine(exit: JoinHandle<Result<()>>, control: Arc<dyn ChannelControl>) {
    match exit.await {
        Ok(Ok(())) => debug!("engine exited"),
        Ok(Err(e)) => warn!(error = %e, "engine failed"),
        Err(e) if e.is_cancelled() => return,
        Err(e) => warn!(error = %e, "engine task panicked"),
    }

    if let Err(e) = control.close_channel().await {
        debug!(error = %e, "failed to close channel after engine exit");
    }
}

/// Handle to a running shell session.
///
/// Dropping it stops the engine without touching the transport.
pub struct SessionHandle {
    columns: watch::Sender<u16>,
    control: Arc<dyn ChannelControl>,
    engine: AbortHandle,
    watcher: JoinHandle<()>,
}

impl SessionHandle {
    /// Forward a window change to the engine's output stream.
    pub fn resize(&self, columns: u16) {
        self.columns.send_replace(columns);
    }

    pub fn columns(&self) -> u16 {
        *self.columns.borrow()
    }

    /// True once the engine has stopped and the channel close was requested.
    pub fn is_finished(&self) -> bool {
        self.watcher.is_finished()
    }

    /// The channel was closed: stop the engine and end the connection.
    pub async fn channel_closed(self) {
        self.watcher.abort();
        self.engine.abort();
        if let Err(e) = self.control.end_connection().await {
            debug!(error = %e, "failed to end connection after channel close");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.watcher.abort();
        self.engine.abort();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("columns", &self.columns())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}
