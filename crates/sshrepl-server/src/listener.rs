//! TCP listener and accept loop.
//!
//! This module provides `Server`, which binds the listening socket and hands
//! every accepted connection to its own russh session task, and
//! `ServerHandle`, which stops accepting without touching running sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use sshrepl_core::auth::Authenticator;
use sshrepl_core::bridge::ShellBridge;
use sshrepl_core::config::ServerConfig;
use sshrepl_core::engine::SharedEngine;
use sshrepl_core::error::{Error, Result};

use crate::ssh::{ConnectionHandler, russh_config};

/// Everything a connection task needs, shared read-only.
struct Shared {
    russh: Arc<russh::server::Config>,
    authenticator: Arc<Authenticator>,
    bridge: ShellBridge,
}

/// SSH REPL server.
pub struct Server;

impl Server {
    /// Validate the transport setup, bind and start accepting.
    ///
    /// Returns once the socket is listening. Host key and bind failures are
    /// returned here; nothing is spawned in that case.
    pub async fn bind(config: ServerConfig, engine: SharedEngine) -> Result<ServerHandle> {
        let russh = Arc::new(russh_config(&config)?);
        let addr = config.socket_addr();

        let listener = TcpListener::bind(addr).await.map_err(|e| Error::Transport {
            message: format!("failed to bind {}: {}", addr, e),
        })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "server listening");

        let shared = Arc::new(Shared {
            russh,
            authenticator: Arc::new(Authenticator::new(config.users.into_resolver())),
            bridge: ShellBridge::new(engine, config.context),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, shared, shutdown_rx));

        Ok(ServerHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Set once the handle is gone; only `close()` stops the listener.
    let mut detached = false;
    loop {
        tokio::select! {
            changed = shutdown.changed(), if !detached => {
                if changed.is_err() {
                    debug!("server handle dropped, listener keeps running");
                    detached = true;
                } else if *shutdown.borrow() {
                    info!("listener closed");
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(peer = %peer, "accepted connection");
                    if let Err(e) = socket.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
                    }
                    tokio::spawn(serve_connection(socket, peer, Arc::clone(&shared)));
                }
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                }
            },
        }
    }
}

/// Run one connection to completion. Errors stay contained to the connection.
async fn serve_connection(socket: tokio::net::TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    let handler = ConnectionHandler::new(
        Some(peer),
        Arc::clone(&shared.authenticator),
        shared.bridge.clone(),
    );

    let session = match russh::server::run_stream(Arc::clone(&shared.russh), socket, handler).await
    {
        Ok(session) => session,
        Err(e) => {
            debug!(peer = %peer, error = %e, "SSH handshake failed");
            return;
        }
    };

    match session.await {
        Ok(()) => debug!(peer = %peer, "connection closed"),
        Err(e) => warn!(peer = %peer, error = %e, "connection error"),
    }
}

/// Control handle for a listening server.
///
/// Dropping the handle leaves the server running for the life of the
/// runtime; call [`ServerHandle::close`] to stop accepting.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections. Established sessions keep running.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait until the accept loop has stopped.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "accept loop ended abnormally");
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}
