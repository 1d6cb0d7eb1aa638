//! Public key derivation and signature checks.
//!
//! Stored key material may be:
//! - an OpenSSH public key line (`ssh-ed25519 AAAA... comment`)
//! - an OpenSSH private key (the public half is derived)
//! - SSH wire-format public key bytes

use signature::Verifier;
use ssh_key::{Algorithm, HashAlg, Signature, private::PrivateKey, public::PublicKey};
use tracing::debug;

use crate::auth::credentials::Credential;
use crate::error::{Error, Result};

const PRIVATE_KEY_HEADER: &str = "-----BEGIN";

/// A stored key reduced to what an attempt is checked against.
#[derive(Debug, Clone)]
pub struct CanonicalKey {
    key: PublicKey,
    algorithm: String,
    wire: Vec<u8>,
}

impl CanonicalKey {
    /// Derive the canonical public key from stored material.
    pub fn derive(material: &Credential) -> Result<Self> {
        let key = match material {
            Credential::Text(text) => parse_text(text)?,
            Credential::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) if looks_textual(text) => parse_text(text)?,
                _ => PublicKey::from_bytes(bytes).map_err(|e| Error::Key {
                    message: format!("failed to decode public key bytes: {}", e),
                })?,
            },
        };
        Self::from_public_key(key)
    }

    /// Wrap an already parsed public key.
    pub fn from_public_key(key: PublicKey) -> Result<Self> {
        let wire = key.to_bytes().map_err(|e| Error::Key {
            message: format!("failed to encode public key: {}", e),
        })?;
        let algorithm = key.algorithm().as_str().to_string();
        Ok(Self {
            key,
            algorithm,
            wire,
        })
    }

    /// Algorithm name as it appears on the wire (e.g. `ssh-ed25519`).
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// SSH wire encoding of the public key.
    pub fn wire_bytes(&self) -> &[u8] {
        &self.wire
    }

    /// The parsed key.
    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }

    /// SHA256 fingerprint for logging.
    pub fn fingerprint(&self) -> String {
        key_fingerprint(&self.key)
    }

    /// Check `signature` over `blob`, produced with `signature_algorithm`.
    ///
    /// Returns `Ok(false)` for a well-formed signature that does not verify.
    pub fn verify(&self, signature_algorithm: &str, blob: &[u8], signature: &[u8]) -> Result<bool> {
        let algorithm = Algorithm::new(signature_algorithm).map_err(|e| Error::Key {
            message: format!("unknown signature algorithm {}: {}", signature_algorithm, e),
        })?;

        let signature = Signature::new(algorithm, signature.to_vec()).map_err(|e| Error::Key {
            message: format!("malformed signature: {}", e),
        })?;

        match Verifier::verify(self.key.key_data(), blob, &signature) {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(error = %e, "signature verification failed");
                Ok(false)
            }
        }
    }
}

fn looks_textual(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with(PRIVATE_KEY_HEADER)
        || trimmed.starts_with("ssh-")
        || trimmed.starts_with("ecdsa-")
        || trimmed.starts_with("sk-")
}

fn parse_text(text: &str) -> Result<PublicKey> {
    let text = text.trim();
    if text.starts_with(PRIVATE_KEY_HEADER) {
        let private = PrivateKey::from_openssh(text).map_err(|e| Error::Key {
            message: format!("failed to parse private key: {}", e),
        })?;
        return Ok(private.public_key().clone());
    }

    PublicKey::from_openssh(text).map_err(|e| Error::Key {
        message: format!("failed to parse public key: {}", e),
    })
}

/// Get the SHA256 fingerprint of a public key.
pub fn key_fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test key, not used for any real authentication.
    const TEST_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl test@example";

    fn random_key() -> PrivateKey {
        PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519).unwrap()
    }

    #[test]
    fn derive_from_public_line() {
        let key = CanonicalKey::derive(&Credential::from(TEST_KEY)).unwrap();
        assert_eq!(key.algorithm(), "ssh-ed25519");
        assert!(key.fingerprint().starts_with("SHA256:"));
    }

    #[test]
    fn derive_from_wire_bytes_matches_text() {
        let from_text = CanonicalKey::derive(&Credential::from(TEST_KEY)).unwrap();
        let wire = from_text.wire_bytes().to_vec();
        let from_bytes = CanonicalKey::derive(&Credential::Bytes(wire.clone())).unwrap();
        assert_eq!(from_bytes.wire_bytes(), wire.as_slice());
        assert_eq!(from_bytes.algorithm(), from_text.algorithm());
    }

    #[test]
    fn derive_from_text_bytes() {
        let key = CanonicalKey::derive(&Credential::Bytes(TEST_KEY.as_bytes().to_vec())).unwrap();
        assert_eq!(key.algorithm(), "ssh-ed25519");
    }

    #[test]
    fn derive_from_private_key() {
        let private = random_key();
        let pem = private.to_openssh(ssh_key::LineEnding::LF).unwrap();
        let derived = CanonicalKey::derive(&Credential::from(pem.as_str())).unwrap();
        assert_eq!(derived.public_key().key_data(), private.public_key().key_data());
    }

    #[test]
    fn derive_rejects_garbage() {
        assert!(CanonicalKey::derive(&Credential::from("not a key")).is_err());
        assert!(CanonicalKey::derive(&Credential::Bytes(vec![0, 1, 2])).is_err());
    }

    #[test]
    fn verify_signature() {
        use signature::Signer;

        let private = random_key();
        let key = CanonicalKey::from_public_key(private.public_key().clone()).unwrap();
        let blob = b"session-id || userauth request";
        let sig: Signature = private.try_sign(blob).unwrap();

        assert!(key.verify("ssh-ed25519", blob, sig.as_bytes()).unwrap());
        assert!(!key.verify("ssh-ed25519", b"other blob", sig.as_bytes()).unwrap());
    }

    #[test]
    fn verify_rejects_unknown_algorithm() {
        let key = CanonicalKey::derive(&Credential::from(TEST_KEY)).unwrap();
        assert!(key.verify("", b"blob", &[0u8; 64]).is_err());
    }
}
