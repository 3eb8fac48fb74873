//! Error types for Sandcrypt.
//!
//! Two layers: [`CryptoError`] is what callers of the facade and providers
//! see, [`SandboxError`] is what a sandbox implementation reports across the
//! bridge seam. The native backend classifies every [`SandboxError`] into the
//! operation-specific [`CryptoError`] variant, so bridge faults never leak to
//! callers as a separate category.
//!
//! No variant carries key material, IVs, AAD or plaintext. Lengths and
//! capability names only.

use thiserror::Error;

use crate::capability::{Capability, DigestKind, KdfKind};

/// Errors raised by cryptographic operations and provider management.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Caller passed a malformed length or value.
    ///
    /// Detected before any backend call. Never retryable without changing
    /// the arguments.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument
        reason: String,
    },

    /// A provider installed via `set_provider` lacks random bytes.
    #[error("invalid provider '{name}': random bytes capability is required")]
    InvalidProvider {
        /// Identity label of the rejected provider
        name: String,
    },

    /// The active provider does not implement the requested capability.
    #[error("capability unavailable on active provider: {capability}")]
    CapabilityUnavailable {
        /// The capability that was requested
        capability: Capability,
    },

    /// A mandatory native entry point is not exported by the module.
    #[error("native module is missing mandatory entry point '{entry_point}'")]
    MissingCapability {
        /// Canonical symbol of the missing entry point
        entry_point: &'static str,
    },

    /// The sandbox could not provide scratch memory.
    #[error("sandbox allocation of {len} bytes failed")]
    AllocationFailed {
        /// Requested allocation size
        len: usize,
    },

    /// The host has no usable secure random facility.
    ///
    /// Raised once, when constructing the platform backend.
    #[error("no secure random source available: {reason}")]
    NoSecureRandom {
        /// Reason reported by the host
        reason: String,
    },

    /// Backend reported failure generating random bytes.
    #[error("random byte generation failed")]
    RandomGenerationFailed,

    /// Backend reported failure computing a digest.
    #[error("{kind} digest failed")]
    DigestFailed {
        /// Digest algorithm that failed
        kind: DigestKind,
    },

    /// Backend reported failure deriving a key.
    #[error("PBKDF2-{kind} key derivation failed")]
    KdfFailed {
        /// KDF variant that failed
        kind: KdfKind,
    },

    /// AES-256-GCM encryption failed.
    #[error("AEAD seal failed")]
    SealFailed,

    /// AES-256-GCM decryption failed.
    ///
    /// Covers both authentication tag mismatch and native faults. The two
    /// are never distinguished.
    #[error("AEAD authentication failed")]
    AuthenticationFailed,
}

impl CryptoError {
    /// Shorthand for [`CryptoError::InvalidArgument`].
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument { reason: reason.into() }
    }

    /// Returns true if the caller can fix this error by changing arguments
    /// or provider configuration, as opposed to a backend failure.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::InvalidProvider { .. }
                | Self::CapabilityUnavailable { .. }
        )
    }
}

/// Faults reported by a sandbox implementation across the bridge seam.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// The sandbox allocator returned null or memory could not grow.
    #[error("sandbox allocation of {len} bytes failed")]
    AllocationFailed {
        /// Requested allocation size
        len: usize,
    },

    /// A copy touched memory outside the sandbox's linear memory.
    #[error("out of bounds access at offset {offset} ({len} bytes)")]
    OutOfBounds {
        /// Offset into linear memory
        offset: u32,
        /// Length of the access
        len: usize,
    },

    /// The guest trapped or the call could not be performed.
    #[error("sandbox trap: {0}")]
    Trap(String),

    /// The module could not be instantiated.
    #[error("sandbox instantiation failed: {0}")]
    Instantiation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_error_display() {
        let err = CryptoError::CapabilityUnavailable { capability: Capability::DigestSha256 };
        assert_eq!(err.to_string(), "capability unavailable on active provider: digest-sha256");

        let err = CryptoError::DigestFailed { kind: DigestKind::Sha512 };
        assert_eq!(err.to_string(), "SHA-512 digest failed");

        let err = CryptoError::KdfFailed { kind: KdfKind::HmacSha256 };
        assert_eq!(err.to_string(), "PBKDF2-HMAC-SHA256 key derivation failed");

        let err = CryptoError::MissingCapability { entry_point: "openssl_rand_bytes" };
        assert_eq!(
            err.to_string(),
            "native module is missing mandatory entry point 'openssl_rand_bytes'"
        );
    }

    #[test]
    fn caller_errors_are_classified() {
        assert!(CryptoError::invalid_argument("length must be positive").is_caller_error());
        assert!(
            CryptoError::CapabilityUnavailable { capability: Capability::AeadOpen }
                .is_caller_error()
        );
        assert!(!CryptoError::AuthenticationFailed.is_caller_error());
        assert!(!CryptoError::AllocationFailed { len: 16 }.is_caller_error());
    }

    #[test]
    fn authentication_failure_reveals_nothing() {
        assert_eq!(CryptoError::AuthenticationFailed.to_string(), "AEAD authentication failed");
    }
}
