//! Credential records and the stores that resolve them.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::SessionOptions;
use crate::error::Result;

/// Stored credential material, either text or raw bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credential {
    Text(String),
    Bytes(Vec<u8>),
}

impl Credential {
    /// Raw bytes of the credential.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Credential::Text(s) => s.as_bytes(),
            Credential::Bytes(b) => b,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.as_bytes().len())
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Credential::Text(s.to_string())
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Credential::Text(s)
    }
}

impl From<Vec<u8>> for Credential {
    fn from(b: Vec<u8>) -> Self {
        Credential::Bytes(b)
    }
}

/// Authentication material stored for one identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Shared secret (password).
    #[serde(default, alias = "password", skip_serializing_if = "Option::is_none")]
    pub secret: Option<Credential>,

    /// Public key material: OpenSSH public key line, OpenSSH private key,
    /// or SSH wire-format key bytes.
    #[serde(default, alias = "publicKey", skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Credential>,

    /// Evaluation engine options applied when this identity opens a shell.
    #[serde(default, alias = "repl", skip_serializing_if = "Option::is_none")]
    pub session_options: Option<SessionOptions>,
}

impl CredentialRecord {
    /// Record holding a shared secret.
    pub fn with_secret(secret: impl Into<Credential>) -> Self {
        Self {
            secret: Some(secret.into()),
            ..Default::default()
        }
    }

    /// Record holding public key material.
    pub fn with_public_key(key: impl Into<Credential>) -> Self {
        Self {
            public_key: Some(key.into()),
            ..Default::default()
        }
    }

    /// Attach engine options.
    pub fn session_options(mut self, options: SessionOptions) -> Self {
        self.session_options = Some(options);
        self
    }
}

/// Looks up credential records by identity.
///
/// `Ok(None)` means the identity is unknown. Answers may arrive at any later
/// point; callers await them.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, identity: &str) -> Result<Option<CredentialRecord>>;
}

/// Resolver over a fixed in-memory mapping.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    users: HashMap<String, CredentialRecord>,
}

impl StaticResolver {
    pub fn new(users: HashMap<String, CredentialRecord>) -> Self {
        Self { users }
    }

    /// Number of known identities.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<(String, CredentialRecord)> for StaticResolver {
    fn from_iter<I: IntoIterator<Item = (String, CredentialRecord)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[async_trait]
impl CredentialResolver for StaticResolver {
    async fn resolve(&self, identity: &str) -> Result<Option<CredentialRecord>> {
        // Answer on a later poll, like an external store would.
        tokio::task::yield_now().await;
        Ok(self.users.get(identity).cloned())
    }
}

/// Resolver backed by a caller-supplied async function.
///
/// ```ignore
/// let resolver = FnResolver::new(|identity: String| async move {
///     lookup_in_database(&identity).await
/// });
/// ```
pub struct FnResolver<F> {
    lookup: F,
}

impl<F, Fut> FnResolver<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<CredentialRecord>>> + Send,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl<F, Fut> CredentialResolver for FnResolver<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<CredentialRecord>>> + Send,
{
    async fn resolve(&self, identity: &str) -> Result<Option<CredentialRecord>> {
        (self.lookup)(identity.to_string()).await
    }
}

impl<F> fmt::Debug for FnResolver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnResolver").finish_non_exhaustive()
    }
}

/// Shared handle to any resolver.
pub type SharedResolver = Arc<dyn CredentialResolver>;
