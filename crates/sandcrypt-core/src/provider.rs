//! The pluggable provider contract.
//!
//! A provider is a named bundle of capabilities. Random bytes are mandatory;
//! digests, key derivation and AEAD are optional and advertised through
//! [`Provider::capabilities`]. Optional methods default to
//! [`CryptoError::CapabilityUnavailable`], so a random-only provider
//! implements three methods and nothing else.
//!
//! Providers receive arguments already validated by the facade (positive
//! lengths, 32-byte keys, 16-byte tags) but must not rely on it for memory
//! safety: the native backend re-checks everything that crosses the sandbox
//! boundary.

use zeroize::Zeroizing;

use crate::{
    capability::{Capability, CapabilitySet, DigestKind, KdfKind},
    error::CryptoError,
};

/// AES-256 key length in bytes.
pub const AEAD_KEY_LEN: usize = 32;

/// GCM authentication tag length in bytes.
pub const AEAD_TAG_LEN: usize = 16;

/// Recommended GCM IV length in bytes. Never applied implicitly.
pub const AEAD_RECOMMENDED_IV_LEN: usize = 12;

/// Largest single random request, the native `int` maximum.
pub const MAX_RANDOM_LEN: usize = 0x7FFF_FFFF;

/// AES-256 key.
pub type AeadKey = [u8; AEAD_KEY_LEN];

/// GCM authentication tag.
pub type AeadTag = [u8; AEAD_TAG_LEN];

/// Output of an AEAD seal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeadSealed {
    /// Ciphertext, byte-for-byte the same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// Authentication tag
    pub tag: AeadTag,
}

/// A pluggable bundle of cryptographic capabilities.
///
/// # Invariants
///
/// - `capabilities()` is constant for the lifetime of the provider
/// - `capabilities()` contains [`Capability::RandomBytes`] for any provider
///   accepted by the registry
/// - A method whose capability is absent returns
///   [`CryptoError::CapabilityUnavailable`]
/// - Successful results are always fully formed: `random_bytes(n)` returns
///   `n` bytes, digests return their fixed length, `derive_key` returns
///   `key_len` bytes, AEAD outputs match their input length
pub trait Provider: Send + Sync {
    /// Short identity label (e.g. `"platform"`, `"native"`).
    fn name(&self) -> &str;

    /// Capabilities this provider implements.
    fn capabilities(&self) -> CapabilitySet;

    /// Fill a fresh buffer of `len` secure random bytes.
    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError>;

    /// Hash `data` with `kind`.
    fn digest(&self, kind: DigestKind, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let _ = data;
        Err(CryptoError::CapabilityUnavailable { capability: kind.capability() })
    }

    /// Derive `key_len` bytes from `password` and `salt` with PBKDF2.
    fn derive_key(
        &self,
        kind: KdfKind,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        key_len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let _ = (password, salt, iterations, key_len);
        Err(CryptoError::CapabilityUnavailable { capability: kind.capability() })
    }

    /// Encrypt and authenticate `plaintext` with AES-256-GCM.
    fn aead_seal(
        &self,
        key: &AeadKey,
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<AeadSealed, CryptoError> {
        let _ = (key, iv, aad, plaintext);
        Err(CryptoError::CapabilityUnavailable { capability: Capability::AeadSeal })
    }

    /// Verify `tag` and decrypt `ciphertext` with AES-256-GCM.
    fn aead_open(
        &self,
        key: &AeadKey,
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &AeadTag,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let _ = (key, iv, aad, ciphertext, tag);
        Err(CryptoError::CapabilityUnavailable { capability: Capability::AeadOpen })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter;

    impl Provider for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::RANDOM_ONLY
        }

        fn random_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
            Ok((0..len).map(|i| i as u8).collect())
        }
    }

    #[test]
    fn optional_capabilities_default_to_unavailable() {
        let provider = Counter;

        assert_eq!(
            provider.digest(DigestKind::Sha512, b"abc"),
            Err(CryptoError::CapabilityUnavailable { capability: Capability::DigestSha512 })
        );
        assert_eq!(
            provider.derive_key(KdfKind::HmacSha256, b"pw", b"salt", 1, 16).map(|k| k.len()),
            Err(CryptoError::CapabilityUnavailable { capability: Capability::KdfHmacSha256 })
        );
        assert_eq!(
            provider.aead_seal(&[0; AEAD_KEY_LEN], &[0; 12], &[], b"x"),
            Err(CryptoError::CapabilityUnavailable { capability: Capability::AeadSeal })
        );
        assert!(matches!(
            provider.aead_open(&[0; AEAD_KEY_LEN], &[0; 12], &[], b"x", &[0; AEAD_TAG_LEN]),
            Err(CryptoError::CapabilityUnavailable { capability: Capability::AeadOpen })
        ));
    }
}
