//! Timing-safe byte comparison.
//!
//! Both inputs are HMAC'd under a key drawn fresh for every call and only the
//! tags are compared. The time taken depends on the input lengths, never on
//! the position of the first differing byte, and an attacker cannot reuse a
//! key across attempts.

use aws_lc_rs::hmac;
use tracing::debug;

use crate::constants::COMPARE_KEY_LEN;
use crate::error::{Error, Result};

/// Source of comparison keys.
pub trait KeySource: Send + Sync {
    /// Fill `key` with fresh random bytes.
    fn fill_key(&self, key: &mut [u8]) -> Result<()>;
}

/// Operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsKeySource;

impl KeySource for OsKeySource {
    fn fill_key(&self, key: &mut [u8]) -> Result<()> {
        aws_lc_rs::rand::fill(key).map_err(|_| Error::Entropy {
            message: "system random source unavailable".into(),
        })
    }
}

/// Keyed-hash comparator.
pub struct Comparator {
    source: Box<dyn KeySource>,
}

impl Comparator {
    /// Comparator backed by the OS random source.
    pub fn new() -> Self {
        Self::with_source(OsKeySource)
    }

    /// Comparator backed by a custom key source.
    pub fn with_source(source: impl KeySource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Compare `a` and `b` for equality.
    ///
    /// Fails if no key could be drawn; a failure is never reported as a
    /// result of the comparison.
    pub fn equal(&self, a: &[u8], b: &[u8]) -> Result<bool> {
        let mut key_bytes = [0u8; COMPARE_KEY_LEN];
        self.source.fill_key(&mut key_bytes)?;

        let key = hmac::Key::new(hmac::HMAC_SHA256, &key_bytes);
        let a_tag = hmac::sign(&key, a);
        let b_tag = hmac::sign(&key, b);

        let equal = a_tag.as_ref() == b_tag.as_ref();
        debug!(a_len = a.len(), b_len = b.len(), equal, "keyed comparison");
        Ok(equal)
    }
}

impl Default for Comparator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comparator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct BrokenSource;

    impl KeySource for BrokenSource {
        fn fill_key(&self, _key: &mut [u8]) -> Result<()> {
            Err(Error::Entropy {
                message: "broken".into(),
            })
        }
    }

    /// Always hands out the same key, to show results never depend on it.
    struct FixedSource(u8);

    impl KeySource for FixedSource {
        fn fill_key(&self, key: &mut [u8]) -> Result<()> {
            key.fill(self.0);
            Ok(())
        }
    }

    #[test]
    fn equal_inputs() {
        let cmp = Comparator::new();
        assert!(cmp.equal(b"hunter2", b"hunter2").unwrap());
        assert!(cmp.equal(b"", b"").unwrap());
    }

    #[test]
    fn unequal_inputs() {
        let cmp = Comparator::new();
        assert!(!cmp.equal(b"hunter2", b"hunter3").unwrap());
        assert!(!cmp.equal(b"hunter2", b"hunter22").unwrap());
        assert!(!cmp.equal(b"", b"x").unwrap());
    }

    #[test]
    fn key_source_failure_is_an_error() {
        let cmp = Comparator::with_source(BrokenSource);
        let err = cmp.equal(b"same", b"same").unwrap_err();
        assert!(matches!(err, Error::Entropy { .. }));
    }

    #[test]
    fn fixed_key_gives_same_answers() {
        let cmp = Comparator::with_source(FixedSource(7));
        assert!(cmp.equal(b"abc", b"abc").unwrap());
        assert!(!cmp.equal(b"abc", b"abd").unwrap());
    }

    proptest! {
        #[test]
        fn matches_plain_equality(
            a in prop::collection::vec(any::<u8>(), 0..64),
            b in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let cmp = Comparator::new();
            prop_assert_eq!(cmp.equal(&a, &b).unwrap(), a == b);
        }

        #[test]
        fn self_comparison_is_stable(a in prop::collection::vec(any::<u8>(), 0..64)) {
            let cmp = Comparator::new();
            for _ in 0..4 {
                prop_assert!(cmp.equal(&a, &a).unwrap());
            }
        }

        #[test]
        fn single_flip_detected(
            a in prop::collection::vec(any::<u8>(), 1..64),
            idx in any::<prop::sample::Index>(),
        ) {
            let mut b = a.clone();
            let i = idx.index(b.len());
            b[i] ^= 0x01;
            let cmp = Comparator::new();
            prop_assert!(!cmp.equal(&a, &b).unwrap());
        }
    }
}
