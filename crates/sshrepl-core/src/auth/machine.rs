//! Per-attempt authentication decisions.
//!
//! Every attempt starts awaiting a method and ends in exactly one of
//! [`AuthDecision::Accept`] or [`AuthDecision::Reject`]. Rejections carry no
//! reason; the cause is only logged.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::auth::compare::Comparator;
use crate::auth::credentials::{CredentialRecord, CredentialResolver};
use crate::auth::keys::CanonicalKey;
use crate::engine::SessionOptions;

/// Evidence accompanying a public key offer.
#[derive(Clone, PartialEq, Eq)]
pub enum KeyProof {
    /// No signature: the client asks whether this key would be accepted.
    Probe,
    /// Signature to check over `blob` with `algorithm`.
    Signed {
        algorithm: String,
        blob: Vec<u8>,
        signature: Vec<u8>,
    },
    /// The transport already verified a signature made with this key.
    TransportVerified,
}

impl fmt::Debug for KeyProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyProof::Probe => f.write_str("Probe"),
            KeyProof::Signed { algorithm, .. } => {
                f.debug_struct("Signed").field("algorithm", algorithm).finish()
            }
            KeyProof::TransportVerified => f.write_str("TransportVerified"),
        }
    }
}

/// Method-specific part of an attempt.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Shared secret (password).
    Secret(Vec<u8>),
    /// Public key offer.
    PublicKey {
        /// Declared key algorithm (e.g. `ssh-ed25519`).
        algorithm: String,
        /// SSH wire encoding of the offered key.
        key: Vec<u8>,
        proof: KeyProof,
    },
    /// Any method this server does not implement.
    Other(String),
}

impl AuthMethod {
    /// Method name for logs.
    pub fn name(&self) -> &str {
        match self {
            AuthMethod::Secret(_) => "password",
            AuthMethod::PublicKey { .. } => "publickey",
            AuthMethod::Other(name) => name,
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Secret(_) => f.write_str("Secret(<redacted>)"),
            AuthMethod::PublicKey {
                algorithm, proof, ..
            } => f
                .debug_struct("PublicKey")
                .field("algorithm", algorithm)
                .field("proof", proof)
                .finish(),
            AuthMethod::Other(name) => f.debug_tuple("Other").field(name).finish(),
        }
    }
}

/// One authentication try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAttempt {
    /// Claimed identity.
    pub identity: String,
    pub method: AuthMethod,
}

impl AuthAttempt {
    /// Shared secret attempt.
    pub fn secret(identity: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            identity: identity.into(),
            method: AuthMethod::Secret(secret.into()),
        }
    }

    /// Public key attempt.
    pub fn public_key(
        identity: impl Into<String>,
        algorithm: impl Into<String>,
        key: impl Into<Vec<u8>>,
        proof: KeyProof,
    ) -> Self {
        Self {
            identity: identity.into(),
            method: AuthMethod::PublicKey {
                algorithm: algorithm.into(),
                key: key.into(),
                proof,
            },
        }
    }

    /// Attempt with an unsupported method.
    pub fn other(identity: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            method: AuthMethod::Other(method.into()),
        }
    }
}

/// What an accepted attempt grants.
#[derive(Debug, Clone, PartialEq)]
pub enum Grant {
    /// Identity proven; options apply to the shell this connection opens.
    Verified { options: Option<SessionOptions> },
    /// Key would be accepted once signed. Grants no session.
    Probe,
}

/// Terminal state of an attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthDecision {
    Accept(Grant),
    Reject,
}

impl AuthDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, AuthDecision::Accept(_))
    }
}

/// Why an attempt was rejected. Logged, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectReason {
    UnknownIdentity,
    ResolverError,
    UnsupportedMethod,
    MissingCredential,
    SecretMismatch,
    BadKeyMaterial,
    AlgorithmMismatch,
    KeyMismatch,
    BadSignature,
    CompareFailed,
}

/// Drives attempts to a decision against a credential store.
pub struct Authenticator {
    resolver: Arc<dyn CredentialResolver>,
    comparator: Comparator,
}

impl Authenticator {
    pub fn new(resolver: Arc<dyn CredentialResolver>) -> Self {
        Self::with_comparator(resolver, Comparator::new())
    }

    pub fn with_comparator(resolver: Arc<dyn CredentialResolver>, comparator: Comparator) -> Self {
        Self {
            resolver,
            comparator,
        }
    }

    /// Decide a single attempt.
    pub async fn authenticate(&self, attempt: &AuthAttempt) -> AuthDecision {
        match self.decide(attempt).await {
            Ok(grant) => {
                debug!(
                    identity = %attempt.identity,
                    method = attempt.method.name(),
                    grant = ?grant,
                    "attempt accepted"
                );
                AuthDecision::Accept(grant)
            }
            Err(reason) => {
                debug!(
                    identity = %attempt.identity,
                    method = attempt.method.name(),
                    reason = ?reason,
                    "attempt rejected"
                );
                AuthDecision::Reject
            }
        }
    }

    async fn decide(&self, attempt: &AuthAttempt) -> Result<Grant, RejectReason> {
        if let AuthMethod::Other(_) = attempt.method {
            return Err(RejectReason::UnsupportedMethod);
        }

        let record = match self.resolver.resolve(&attempt.identity).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(RejectReason::UnknownIdentity),
            Err(e) => {
                debug!(identity = %attempt.identity, error = %e, "credential lookup failed");
                return Err(RejectReason::ResolverError);
            }
        };

        match &attempt.method {
            AuthMethod::Secret(offered) => self.check_secret(&record, offered),
            AuthMethod::PublicKey {
                algorithm,
                key,
                proof,
            } => self.check_public_key(&record, algorithm, key, proof),
            AuthMethod::Other(_) => Err(RejectReason::UnsupportedMethod),
        }
    }

    fn check_secret(&self, record: &CredentialRecord, offered: &[u8]) -> Result<Grant, RejectReason> {
        let stored = record
            .secret
            .as_ref()
            .ok_or(RejectReason::MissingCredential)?;

        if !self.compare(offered, stored.as_bytes())? {
            return Err(RejectReason::SecretMismatch);
        }

        Ok(Grant::Verified {
            options: record.session_options.clone(),
        })
    }

    fn check_public_key(
        &self,
        record: &CredentialRecord,
        algorithm: &str,
        offered: &[u8],
        proof: &KeyProof,
    ) -> Result<Grant, RejectReason> {
        let material = record
            .public_key
            .as_ref()
            .ok_or(RejectReason::MissingCredential)?;

        // TODO: cache derived keys per identity instead of re-parsing each attempt.
        let stored = CanonicalKey::derive(material).map_err(|e| {
            debug!(error = %e, "stored key material unusable");
            RejectReason::BadKeyMaterial
        })?;

        if algorithm != stored.algorithm() {
            return Err(RejectReason::AlgorithmMismatch);
        }

        if !self.compare(offered, stored.wire_bytes())? {
            return Err(RejectReason::KeyMismatch);
        }

        match proof {
            KeyProof::Probe => Ok(Grant::Probe),
            KeyProof::TransportVerified => Ok(Grant::Verified {
                options: record.session_options.clone(),
            }),
            KeyProof::Signed {
                algorithm,
                blob,
                signature,
            } => match stored.verify(algorithm, blob, signature) {
                Ok(true) => {
                    debug!(fingerprint = %stored.fingerprint(), "signature verified");
                    Ok(Grant::Verified {
                        options: record.session_options.clone(),
                    })
                }
                Ok(false) => Err(RejectReason::BadSignature),
                Err(e) => {
                    debug!(error = %e, "signature unusable");
                    Err(RejectReason::BadSignature)
                }
            },
        }
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Result<bool, RejectReason> {
        self.comparator.equal(a, b).map_err(|e| {
            debug!(error = %e, "comparison failed");
            RejectReason::CompareFailed
        })
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::compare::KeySource;
    use crate::auth::credentials::{FnResolver, StaticResolver};
    use crate::error::{Error, Result};
    use serde_json::json;
    use signature::Signer;
    use ssh_key::{Algorithm, Signature, private::PrivateKey};

    struct BrokenSource;

    impl KeySource for BrokenSource {
        fn fill_key(&self, _key: &mut [u8]) -> Result<()> {
            Err(Error::Entropy {
                message: "no entropy".into(),
            })
        }
    }

    fn options() -> SessionOptions {
        json!({ "prompt": "alice> " }).as_object().unwrap().clone()
    }

    fn keypair() -> (PrivateKey, CanonicalKey) {
        let private = PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519).unwrap();
        let public = CanonicalKey::from_public_key(private.public_key().clone()).unwrap();
        (private, public)
    }

    fn authenticator_for(record: CredentialRecord) -> Authenticator {
        let resolver: StaticResolver = [("alice".to_string(), record)].into_iter().collect();
        Authenticator::new(Arc::new(resolver))
    }

    #[tokio::test]
    async fn secret_accepts_exact_match() {
        let auth =
            authenticator_for(CredentialRecord::with_secret("s3cret").session_options(options()));

        let decision = auth.authenticate(&AuthAttempt::secret("alice", "s3cret")).await;
        assert_eq!(
            decision,
            AuthDecision::Accept(Grant::Verified {
                options: Some(options())
            })
        );
    }

    #[tokio::test]
    async fn secret_rejects_near_misses() {
        let auth = authenticator_for(CredentialRecord::with_secret("s3cret"));

        for offered in ["s3cre", "s3cret ", "S3cret", ""] {
            let decision = auth.authenticate(&AuthAttempt::secret("alice", offered)).await;
            assert_eq!(decision, AuthDecision::Reject, "offered {:?}", offered);
        }
    }

    #[tokio::test]
    async fn unknown_identity_rejects() {
        let auth = authenticator_for(CredentialRecord::with_secret("s3cret"));
        let decision = auth.authenticate(&AuthAttempt::secret("mallory", "s3cret")).await;
        assert_eq!(decision, AuthDecision::Reject);
    }

    #[tokio::test]
    async fn missing_credential_kind_rejects() {
        let (_, public) = keypair();
        let auth = authenticator_for(CredentialRecord::with_secret("s3cret"));
        let attempt = AuthAttempt::public_key(
            "alice",
            public.algorithm(),
            public.wire_bytes(),
            KeyProof::Probe,
        );
        assert_eq!(auth.authenticate(&attempt).await, AuthDecision::Reject);

        let auth = authenticator_for(CredentialRecord::with_public_key(
            public.public_key().to_openssh().unwrap(),
        ));
        assert_eq!(
            auth.authenticate(&AuthAttempt::secret("alice", "s3cret")).await,
            AuthDecision::Reject
        );
    }

    #[tokio::test]
    async fn other_methods_reject() {
        let auth = authenticator_for(CredentialRecord::with_secret("s3cret"));
        let decision = auth
            .authenticate(&AuthAttempt::other("alice", "keyboard-interactive"))
            .await;
        assert_eq!(decision, AuthDecision::Reject);
    }

    #[tokio::test]
    async fn resolver_error_rejects() {
        let resolver = FnResolver::new(|_identity: String| async {
            Err::<Option<CredentialRecord>, _>(Error::Credential {
                message: "store offline".into(),
            })
        });
        let auth = Authenticator::new(Arc::new(resolver));
        let decision = auth.authenticate(&AuthAttempt::secret("alice", "s3cret")).await;
        assert_eq!(decision, AuthDecision::Reject);
    }

    #[tokio::test]
    async fn comparator_failure_rejects_even_on_match() {
        let resolver: StaticResolver = [("alice".to_string(), CredentialRecord::with_secret("pw"))]
            .into_iter()
            .collect();
        let auth =
            Authenticator::with_comparator(Arc::new(resolver), Comparator::with_source(BrokenSource));
        let decision = auth.authenticate(&AuthAttempt::secret("alice", "pw")).await;
        assert_eq!(decision, AuthDecision::Reject);
    }

    #[tokio::test]
    async fn algorithm_mismatch_rejects_regardless_of_bytes() {
        let (_, public) = keypair();
        let auth = authenticator_for(CredentialRecord::with_public_key(
            public.public_key().to_openssh().unwrap(),
        ));

        for algorithm in ["ssh-rsa", "ecdsa-sha2-nistp256", "ssh-ed25519-cert-v01@openssh.com"] {
            let attempt = AuthAttempt::public_key(
                "alice",
                algorithm,
                public.wire_bytes(),
                KeyProof::TransportVerified,
            );
            assert_eq!(auth.authenticate(&attempt).await, AuthDecision::Reject);
        }
    }

    #[tokio::test]
    async fn different_key_rejects() {
        let (_, stored) = keypair();
        let (_, offered) = keypair();
        let auth = authenticator_for(CredentialRecord::with_public_key(
            stored.public_key().to_openssh().unwrap(),
        ));
        let attempt = AuthAttempt::public_key(
            "alice",
            offered.algorithm(),
            offered.wire_bytes(),
            KeyProof::Probe,
        );
        assert_eq!(auth.authenticate(&attempt).await, AuthDecision::Reject);
    }

    #[tokio::test]
    async fn probe_then_signature() {
        let (private, public) = keypair();
        let auth = authenticator_for(
            CredentialRecord::with_public_key(public.public_key().to_openssh().unwrap())
                .session_options(options()),
        );

        let probe = AuthAttempt::public_key(
            "alice",
            public.algorithm(),
            public.wire_bytes(),
            KeyProof::Probe,
        );
        assert_eq!(auth.authenticate(&probe).await, AuthDecision::Accept(Grant::Probe));

        let blob = b"userauth request blob".to_vec();
        let good: Signature = private.try_sign(&blob).unwrap();
        let signed = AuthAttempt::public_key(
            "alice",
            public.algorithm(),
            public.wire_bytes(),
            KeyProof::Signed {
                algorithm: "ssh-ed25519".into(),
                blob: blob.clone(),
                signature: good.as_bytes().to_vec(),
            },
        );
        assert_eq!(
            auth.authenticate(&signed).await,
            AuthDecision::Accept(Grant::Verified {
                options: Some(options())
            })
        );

        let mut forged = good.as_bytes().to_vec();
        forged[0] ^= 0xff;
        let bad = AuthAttempt::public_key(
            "alice",
            public.algorithm(),
            public.wire_bytes(),
            KeyProof::Signed {
                algorithm: "ssh-ed25519".into(),
                blob,
                signature: forged,
            },
        );
        assert_eq!(auth.authenticate(&bad).await, AuthDecision::Reject);
    }

    #[tokio::test]
    async fn signature_over_other_blob_rejects() {
        let (private, public) = keypair();
        let auth = authenticator_for(CredentialRecord::with_public_key(
            public.public_key().to_openssh().unwrap(),
        ));
        let sig: Signature = private.try_sign(b"something else").unwrap();
        let attempt = AuthAttempt::public_key(
            "alice",
            public.algorithm(),
            public.wire_bytes(),
            KeyProof::Signed {
                algorithm: "ssh-ed25519".into(),
                blob: b"declared blob".to_vec(),
                signature: sig.as_bytes().to_vec(),
            },
        );
        assert_eq!(auth.authenticate(&attempt).await, AuthDecision::Reject);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let attempt = AuthAttempt::secret("alice", "hunter2");
        let shown = format!("{:?}", attempt);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("alice"));
    }
}
