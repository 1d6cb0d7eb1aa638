//! Startup configuration.
//!
//! [`RawConfig`] is what a JSON file or the CLI provides; [`RawConfig::validate`]
//! turns it into a [`ServerConfig`] or fails before any socket is opened.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::auth::{CredentialRecord, SharedResolver, StaticResolver};
use crate::constants::AUTH_REJECTION_TIME;
use crate::engine::Bindings;
use crate::error::{Error, Result};

/// Unvalidated configuration as read from JSON.
///
/// Fields stay loosely typed so that shape errors can be reported with the
/// same messages whatever the source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub port: Option<Value>,
    #[serde(default)]
    pub users: Option<Value>,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default, alias = "hostKey")]
    pub host_key: Option<PathBuf>,
}

impl RawConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::config(format!("Missing/Invalid configuration: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Check every field and build the server configuration.
    pub fn validate(self) -> Result<ServerConfig> {
        let port = match self.port.as_ref().and_then(Value::as_u64) {
            Some(port) => u16::try_from(port).map_err(|_| Error::config("Missing/Invalid port"))?,
            None => return Err(Error::config("Missing/Invalid port")),
        };

        let users = match self.users {
            Some(Value::Object(entries)) => {
                let mut records = HashMap::with_capacity(entries.len());
                for (identity, entry) in entries {
                    let record: CredentialRecord = serde_json::from_value(entry).map_err(|e| {
                        Error::config(format!("Invalid users configuration for {}: {}", identity, e))
                    })?;
                    records.insert(identity, record);
                }
                Users::Static(records)
            }
            _ => return Err(Error::config("Missing/Invalid users configuration")),
        };

        let context = match self.context {
            None => None,
            Some(Value::Object(bindings)) => Some(Arc::new(bindings)),
            Some(_) => return Err(Error::config("Invalid context")),
        };

        let bind_addr = match self.bind.as_deref() {
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Some(addr) => addr
                .parse()
                .map_err(|_| Error::config(format!("Invalid bind address: {}", addr)))?,
        };

        let config = ServerConfig {
            bind_addr,
            port,
            users,
            context,
            host_keys: self.host_key.into_iter().collect(),
            auth_rejection_time: AUTH_REJECTION_TIME,
        };
        debug!(?config, "configuration validated");
        Ok(config)
    }
}

/// Where identities are looked up.
#[derive(Clone)]
pub enum Users {
    /// Fixed map from identity to record.
    Static(HashMap<String, CredentialRecord>),
    /// Caller-supplied lookup.
    Resolver(SharedResolver),
}

impl Users {
    pub fn into_resolver(self) -> SharedResolver {
        match self {
            Users::Static(records) => Arc::new(StaticResolver::new(records)),
            Users::Resolver(resolver) => resolver,
        }
    }
}

impl fmt::Debug for Users {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Users::Static(records) => {
                let mut names: Vec<_> = records.keys().collect();
                names.sort();
                f.debug_tuple("Static").field(&names).finish()
            }
            Users::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

/// Validated server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    /// Listen port; 0 picks an ephemeral port.
    pub port: u16,
    pub users: Users,
    /// Bindings merged into every session's context.
    pub context: Option<Arc<Bindings>>,
    /// OpenSSH private host keys. Empty means generate one at startup.
    pub host_keys: Vec<PathBuf>,
    pub auth_rejection_time: Duration,
}

impl ServerConfig {
    /// Configuration with a caller-supplied resolver, listening on all addresses.
    pub fn new(port: u16, users: Users) -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            users,
            context: None,
            host_keys: Vec::new(),
            auth_rejection_time: AUTH_REJECTION_TIME,
        }
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_context(mut self, context: Bindings) -> Self {
        self.context = Some(Arc::new(context));
        self
    }

    pub fn with_host_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_keys.push(path.into());
        self
    }

    pub fn with_auth_rejection_time(mut self, delay: Duration) -> Self {
        self.auth_rejection_time = delay;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn raw(value: Value) -> RawConfig {
        serde_json::from_value(value).unwrap()
    }

    fn message(err: Error) -> String {
        assert!(err.is_fatal());
        match err {
            Error::Config { message } => message,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn minimal_config() {
        let config = raw(json!({ "port": 0, "users": {} })).validate().unwrap();
        assert_eq!(config.port, 0);
        assert!(config.context.is_none());
        assert!(config.host_keys.is_empty());
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:0");
    }

    #[test]
    fn missing_port() {
        let err = raw(json!({ "users": {} })).validate().unwrap_err();
        assert_eq!(message(err), "Missing/Invalid port");
    }

    #[test]
    fn non_numeric_or_out_of_range_port() {
        for port in [json!("22"), json!(-1), json!(70000), json!(1.5)] {
            let err = raw(json!({ "port": port, "users": {} })).validate().unwrap_err();
            assert_eq!(message(err), "Missing/Invalid port");
        }
    }

    #[test]
    fn users_wrong_shape() {
        for users in [json!(null), json!("alice"), json!([1, 2])] {
            let err = raw(json!({ "port": 22, "users": users })).validate().unwrap_err();
            assert_eq!(message(err), "Missing/Invalid users configuration");
        }
        let err = raw(json!({ "port": 22 })).validate().unwrap_err();
        assert_eq!(message(err), "Missing/Invalid users configuration");
    }

    #[test]
    fn bad_user_entry() {
        let err = raw(json!({ "port": 22, "users": { "bob": { "password": 7 } } }))
            .validate()
            .unwrap_err();
        assert!(message(err).contains("bob"));
    }

    #[test]
    fn context_must_be_object() {
        let err = raw(json!({ "port": 22, "users": {}, "context": 5 }))
            .validate()
            .unwrap_err();
        assert_eq!(message(err), "Invalid context");

        let config = raw(json!({ "port": 22, "users": {}, "context": { "x": 1 } }))
            .validate()
            .unwrap();
        assert_eq!(config.context.unwrap()["x"], 1);
    }

    #[test]
    fn bind_address() {
        let config = raw(json!({ "port": 22, "users": {}, "bind": "127.0.0.1" }))
            .validate()
            .unwrap();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:22");

        let err = raw(json!({ "port": 22, "users": {}, "bind": "localhost:22" }))
            .validate()
            .unwrap_err();
        assert!(message(err).starts_with("Invalid bind address"));
    }

    #[tokio::test]
    async fn users_become_resolver() {
        let config = raw(json!({
            "port": 22,
            "users": {
                "alice": { "password": "s3cret", "repl": { "prompt": "a> " } },
            },
        }))
        .validate()
        .unwrap();

        let resolver = config.users.into_resolver();
        let record = resolver.resolve("alice").await.unwrap().unwrap();
        assert_eq!(record.secret.unwrap().as_bytes(), b"s3cret");
        assert_eq!(record.session_options.unwrap()["prompt"], "a> ");
        assert!(resolver.resolve("mallory").await.unwrap().is_none());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "port": 2022, "users": {{}}, "hostKey": "/etc/ssh/key" }}"#).unwrap();

        let config = RawConfig::load(file.path()).unwrap().validate().unwrap();
        assert_eq!(config.port, 2022);
        assert_eq!(config.host_keys, vec![PathBuf::from("/etc/ssh/key")]);
    }

    #[test]
    fn load_rejects_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(RawConfig::load(file.path()).unwrap_err().is_fatal());
    }

    #[test]
    fn users_debug_hides_records() {
        let users = Users::Static(HashMap::from([(
            "alice".to_string(),
            CredentialRecord::with_secret("hunter2"),
        )]));
        let debug = format!("{:?}", users);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
