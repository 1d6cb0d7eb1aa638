//! SSH transport adapter.
//!
//! Wires russh's per-connection handler callbacks to the authentication
//! machine, the session state and the shell bridge.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handle, Msg, Session};
use russh::{Channel, ChannelId, Disconnect, MethodSet};
use russh_keys::PublicKeyBase64;
use russh_keys::key::{KeyPair, PublicKey};
use tracing::{debug, info, warn};

use sshrepl_core::auth::{
    AuthAttempt, AuthDecision, Authenticator, Grant, KeyProof, key_fingerprint,
};
use sshrepl_core::bridge::{ChannelControl, SessionHandle, ShellBridge};
use sshrepl_core::config::ServerConfig;
use sshrepl_core::error::{Error, Result};
use sshrepl_core::session::ConnectionState;

/// Build the russh server configuration.
///
/// Host keys are loaded from the configured paths; with none configured an
/// ephemeral Ed25519 key is generated.
pub fn russh_config(config: &ServerConfig) -> Result<russh::server::Config> {
    let mut keys = Vec::with_capacity(config.host_keys.len().max(1));
    for path in &config.host_keys {
        keys.push(load_host_key(path)?);
    }
    if keys.is_empty() {
        info!("generating ephemeral Ed25519 host key");
        let key = KeyPair::generate_ed25519()
            .ok_or_else(|| Error::config("failed to generate Ed25519 host key"))?;
        keys.push(key);
    }

    Ok(russh::server::Config {
        methods: MethodSet::PASSWORD | MethodSet::PUBLICKEY,
        auth_rejection_time: config.auth_rejection_time,
        keys,
        ..Default::default()
    })
}

fn load_host_key(path: &Path) -> Result<KeyPair> {
    let key = russh_keys::load_secret_key(path, None).map_err(|e| {
        Error::config(format!("failed to load host key {}: {}", path.display(), e))
    })?;
    debug!(path = %path.display(), "loaded host key");
    Ok(key)
}

/// Closes channels and connections through a russh session handle.
struct SessionControl {
    handle: Handle,
    channel: ChannelId,
}

#[async_trait]
impl ChannelControl for SessionControl {
    async fn close_channel(&self) -> Result<()> {
        self.handle.close(self.channel).await.map_err(|_| Error::Channel {
            message: format!("failed to close channel {:?}", self.channel),
        })
    }

    async fn end_connection(&self) -> Result<()> {
        self.handle
            .disconnect(
                Disconnect::ByApplication,
                "session closed".to_string(),
                String::new(),
            )
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}

/// The shell channel of a connection.
enum ShellChannel {
    /// Opened, waiting for a shell request.
    Pending(Channel<Msg>),
    /// Engine attached.
    Running(ChannelId, SessionHandle),
}

impl ShellChannel {
    fn id(&self) -> ChannelId {
        match self {
            ShellChannel::Pending(channel) => channel.id(),
            ShellChannel::Running(id, _) => *id,
        }
    }
}

/// Per-connection russh handler.
pub struct ConnectionHandler {
    peer: Option<SocketAddr>,
    authenticator: Arc<Authenticator>,
    bridge: ShellBridge,
    state: ConnectionState,
    shell: Option<ShellChannel>,
}

impl ConnectionHandler {
    pub fn new(
        peer: Option<SocketAddr>,
        authenticator: Arc<Authenticator>,
        bridge: ShellBridge,
    ) -> Self {
        Self {
            peer,
            authenticator,
            bridge,
            state: ConnectionState::new(),
            shell: None,
        }
    }

    async fn decide(&mut self, attempt: AuthAttempt) -> Auth {
        let decision = self.authenticator.authenticate(&attempt).await;
        self.state.record_decision(&decision);
        match decision {
            AuthDecision::Accept(grant) => {
                info!(
                    peer = ?self.peer,
                    identity = %attempt.identity,
                    method = attempt.method.name(),
                    probe = matches!(grant, Grant::Probe),
                    "authentication accepted"
                );
                Auth::Accept
            }
            AuthDecision::Reject => {
                debug!(
                    peer = ?self.peer,
                    identity = %attempt.identity,
                    method = attempt.method.name(),
                    "authentication rejected"
                );
                Auth::Reject {
                    proceed_with_methods: None,
                }
            }
        }
    }

    /// The key's algorithm is taken from its wire encoding: russh names RSA
    /// keys after the signature hash in use, not the key type.
    fn key_attempt(user: &str, key: &PublicKey, proof: KeyProof) -> AuthAttempt {
        let wire = key.public_key_bytes();
        let algorithm = match ssh_key::PublicKey::from_bytes(&wire) {
            Ok(parsed) => {
                debug!(identity = user, fingerprint = %key_fingerprint(&parsed), "public key offered");
                parsed.algorithm().as_str().to_string()
            }
            Err(_) => key.name().to_string(),
        };
        AuthAttempt::public_key(user, algorithm, wire, proof)
    }

    fn is_shell(&self, channel: ChannelId) -> bool {
        self.shell.as_ref().map(ShellChannel::id) == Some(channel)
    }
}

#[async_trait]
impl russh::server::Handler for ConnectionHandler {
    type Error = russh::Error;

    async fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> std::result::Result<Auth, Self::Error> {
        Ok(self.decide(AuthAttempt::secret(user, password)).await)
    }

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> std::result::Result<Auth, Self::Error> {
        let attempt = Self::key_attempt(user, public_key, KeyProof::Probe);
        Ok(self.decide(attempt).await)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> std::result::Result<Auth, Self::Error> {
        // russh calls this only after the signature checked out against this key.
        let attempt = Self::key_attempt(user, public_key, KeyProof::TransportVerified);
        Ok(self.decide(attempt).await)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        if !self.state.admit_session() {
            return Ok(false);
        }
        debug!(peer = ?self.peer, channel = ?channel.id(), "session channel opened");
        self.shell = Some(ShellChannel::Pending(channel));
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        if !self.is_shell(channel) {
            session.channel_failure(channel);
            return Ok(());
        }
        debug!(term, col_width, row_height, "pty requested");
        self.state.set_terminal(clamp_columns(col_width));
        session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        let pending = match self.shell.take() {
            Some(ShellChannel::Pending(pending)) if pending.id() == channel => pending,
            other => {
                self.shell = other;
                session.channel_failure(channel);
                return Ok(());
            }
        };

        let (input, output) = tokio::io::split(pending.into_stream());
        let control = Arc::new(SessionControl {
            handle: session.handle(),
            channel,
        });
        let started = self
            .bridge
            .start(
                input,
                output,
                control,
                self.state.terminal_columns(),
                self.state.session_options(),
            )
            .await;

        match started {
            Ok(handle) => {
                session.channel_success(channel);
                self.shell = Some(ShellChannel::Running(channel, handle));
            }
            Err(e) => {
                warn!(peer = ?self.peer, error = %e, "failed to start shell");
                session.channel_failure(channel);
                session.close(channel);
                self.state.close_session();
            }
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        if let Some(ShellChannel::Running(id, handle)) = &self.shell {
            if *id == channel {
                handle.resize(clamp_columns(col_width));
            }
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        if !self.is_shell(channel) {
            return Ok(());
        }
        debug!(peer = ?self.peer, channel = ?channel, "session channel closed");
        if let Some(ShellChannel::Running(_, handle)) = self.shell.take() {
            handle.channel_closed().await;
        }
        self.state.close_session();
        Ok(())
    }
}

fn clamp_columns(cols: u32) -> u16 {
    u16::try_from(cols).unwrap_or(u16::MAX)
}
