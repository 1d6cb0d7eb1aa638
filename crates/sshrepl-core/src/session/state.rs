//! Per-connection session state.

use tracing::debug;

use crate::auth::{AuthDecision, Grant};
use crate::constants::NO_TERMINAL;
use crate::engine::SessionOptions;

/// Where a connection stands with respect to authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// No verified attempt yet (probes do not count).
    Pending,
    /// A verified attempt was accepted.
    Authenticated,
}

/// State owned by one connection's handler.
///
/// Admits at most one interactive session at a time and remembers the
/// terminal geometry negotiated before the shell starts.
#[derive(Debug)]
pub struct ConnectionState {
    auth: AuthStatus,
    in_session: bool,
    session_options: Option<SessionOptions>,
    terminal_columns: u16,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            auth: AuthStatus::Pending,
            in_session: false,
            session_options: None,
            terminal_columns: NO_TERMINAL,
        }
    }

    /// Fold an authentication decision into the connection.
    ///
    /// Only a verified grant authenticates the connection and captures the
    /// record's session options. Probes and rejections leave state untouched.
    pub fn record_decision(&mut self, decision: &AuthDecision) {
        if let AuthDecision::Accept(Grant::Verified { options }) = decision {
            self.auth = AuthStatus::Authenticated;
            self.session_options = options.clone();
        }
    }

    pub fn auth_status(&self) -> AuthStatus {
        self.auth
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth == AuthStatus::Authenticated
    }

    /// Try to admit a new interactive session.
    ///
    /// Returns false, changing nothing, while another session is active or
    /// before the connection has authenticated.
    pub fn admit_session(&mut self) -> bool {
        if self.in_session {
            debug!("session request rejected: session already active");
            return false;
        }
        if !self.is_authenticated() {
            debug!("session request rejected: not authenticated");
            return false;
        }
        self.in_session = true;
        true
    }

    pub fn in_session(&self) -> bool {
        self.in_session
    }

    /// Record terminal geometry from a pty request. Zero means no terminal.
    pub fn set_terminal(&mut self, columns: u16) {
        self.terminal_columns = columns;
    }

    pub fn terminal_columns(&self) -> u16 {
        self.terminal_columns
    }

    /// True when the shell should run in terminal mode.
    pub fn is_terminal(&self) -> bool {
        self.terminal_columns > NO_TERMINAL
    }

    /// Options captured from the verified credential record.
    pub fn session_options(&self) -> Option<&SessionOptions> {
        self.session_options.as_ref()
    }

    /// Mark the active session closed, allowing a new one.
    pub fn close_session(&mut self) {
        self.in_session = false;
        self.terminal_columns = NO_TERMINAL;
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verified() -> AuthDecision {
        AuthDecision::Accept(Grant::Verified {
            options: json!({ "prompt": "$ " }).as_object().cloned(),
        })
    }

    #[test]
    fn new_state() {
        let state = ConnectionState::new();
        assert_eq!(state.auth_status(), AuthStatus::Pending);
        assert!(!state.in_session());
        assert_eq!(state.terminal_columns(), 0);
        assert!(!state.is_terminal());
        assert!(state.session_options().is_none());
    }

    #[test]
    fn probe_does_not_authenticate() {
        let mut state = ConnectionState::new();
        state.record_decision(&AuthDecision::Accept(Grant::Probe));
        state.record_decision(&AuthDecision::Reject);
        assert!(!state.is_authenticated());
        assert!(!state.admit_session());
    }

    #[test]
    fn verified_grant_captures_options() {
        let mut state = ConnectionState::new();
        state.record_decision(&verified());
        assert!(state.is_authenticated());
        assert_eq!(state.session_options().unwrap()["prompt"], "$ ");
    }

    #[test]
    fn second_session_rejected_without_side_effects() {
        let mut state = ConnectionState::new();
        state.record_decision(&verified());

        assert!(state.admit_session());
        state.set_terminal(80);

        assert!(!state.admit_session());
        assert!(state.in_session());
        assert_eq!(state.terminal_columns(), 80);
    }

    #[test]
    fn close_reenables_admission() {
        let mut state = ConnectionState::new();
        state.record_decision(&verified());

        assert!(state.admit_session());
        state.set_terminal(120);
        state.close_session();

        assert!(!state.in_session());
        assert_eq!(state.terminal_columns(), 0);
        assert!(state.admit_session());
    }

    #[test]
    fn zero_columns_means_no_terminal() {
        let mut state = ConnectionState::new();
        state.set_terminal(0);
        assert!(!state.is_terminal());
        state.set_terminal(1);
        assert!(state.is_terminal());
    }
}
