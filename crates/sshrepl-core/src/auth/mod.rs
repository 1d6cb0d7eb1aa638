//! Client authentication.
//!
//! Two mechanisms are supported, both decided per attempt:
//! - Shared secret: compared against the stored secret with a keyed-hash
//!   comparison
//! - Public key: the offered key must match the stored key's algorithm and
//!   bytes; a signature, when present, must verify over the attempt's blob
//!
//! Key offers without a signature are probes and never grant a session.

mod compare;
mod credentials;
mod keys;
mod machine;

pub use compare::{Comparator, KeySource, OsKeySource};
pub use credentials::{
    Credential, CredentialRecord, CredentialResolver, FnResolver, SharedResolver, StaticResolver,
};
pub use keys::{CanonicalKey, key_fingerprint};
pub use machine::{AuthAttempt, AuthDecision, AuthMethod, Authenticator, Grant, KeyProof};
