//! Keys for authentication tests.
//!
//! Provides a fixed public key for parsing tests and freshly generated
//! Ed25519 key pairs for signature tests.

use signature::Signer;
use ssh_key::{Algorithm, LineEnding, PrivateKey, Signature};

/// Test key pairs and fixed key material.
pub struct TestKeys;

impl TestKeys {
    /// A fixed Ed25519 public key. The private half is not available.
    pub const ED25519_PUBLIC: &'static str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl test@example";

    /// Generate a new Ed25519 key pair.
    pub fn ed25519() -> TestKey {
        let private = PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519)
            .expect("ed25519 key generation");
        TestKey { private }
    }
}

/// A generated key pair.
#[derive(Clone)]
pub struct TestKey {
    private: PrivateKey,
}

impl TestKey {
    /// Algorithm name as sent on the wire.
    pub fn algorithm(&self) -> String {
        self.private.algorithm().as_str().to_string()
    }

    /// OpenSSH public key line.
    pub fn public_openssh(&self) -> String {
        self.private
            .public_key()
            .to_openssh()
            .expect("encode public key")
    }

    /// OpenSSH private key text.
    pub fn private_openssh(&self) -> String {
        self.private
            .to_openssh(LineEnding::LF)
            .expect("encode private key")
            .to_string()
    }

    /// SSH wire encoding of the public key.
    pub fn wire_bytes(&self) -> Vec<u8> {
        self.private
            .public_key()
            .to_bytes()
            .expect("encode public key bytes")
    }

    /// Raw signature over `blob`.
    pub fn sign(&self, blob: &[u8]) -> Vec<u8> {
        let signature: Signature = self.private.try_sign(blob).expect("sign blob");
        signature.as_bytes().to_vec()
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }
}

// =============================================================================
// Tests
// =============================================================================
