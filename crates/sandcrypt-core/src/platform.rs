//! Platform random backend.
//!
//! Wraps the host's secure random facility behind [`EntropySource`]. The
//! facility is checked once when the provider is constructed; a host without
//! one never gets a platform provider at all, so per-call failures are not
//! part of the normal contract.
//!
//! # Capabilities
//!
//! Random bytes only. Digests, key derivation and AEAD are reported as
//! unavailable by the facade.

use std::fmt;

use crate::{
    capability::CapabilitySet,
    error::CryptoError,
    provider::{MAX_RANDOM_LEN, Provider},
};

/// Identity label of the platform provider.
pub const PLATFORM_PROVIDER_NAME: &str = "platform";

/// Error from an entropy source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntropyError {
    /// Host-reported reason
    pub reason: String,
}

impl fmt::Display for EntropyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entropy unavailable: {}", self.reason)
    }
}

impl std::error::Error for EntropyError {}

/// Host capability: fill a buffer with cryptographically secure bytes.
///
/// # Invariants
///
/// - Production implementations use an OS-level CSPRNG
/// - On `Ok`, every byte of `dest` has been overwritten
pub trait EntropySource: Send + Sync + 'static {
    /// Fill `dest` with secure random bytes.
    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError>;
}

/// Operating system CSPRNG via `getrandom`.
///
/// Linux/Android use the `getrandom()` syscall, macOS `getentropy()`,
/// Windows `ProcessPrng`, WASI `random_get`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), EntropyError> {
        getrandom::fill(dest).map_err(|e| EntropyError { reason: e.to_string() })
    }
}

/// Random-only provider backed by the host.
#[derive(Debug, Clone)]
pub struct PlatformRandom<E: EntropySource = OsEntropy> {
    entropy: E,
}

impl PlatformRandom<OsEntropy> {
    /// Check the operating system CSPRNG and build a provider around it.
    pub fn new() -> Result<Self, CryptoError> {
        Self::with_source(OsEntropy)
    }
}

impl<E: EntropySource> PlatformRandom<E> {
    /// Draw from `entropy` once and build a provider around it.
    ///
    /// Fails with [`CryptoError::NoSecureRandom`] if that first draw fails.
    pub fn with_source(entropy: E) -> Result<Self, CryptoError> {
        let mut first = [0u8; 1];
        entropy.fill(&mut first).map_err(|e| CryptoError::NoSecureRandom { reason: e.reason })?;
        Ok(Self { entropy })
    }
}

impl<E: EntropySource> Provider for PlatformRandom<E> {
    fn name(&self) -> &str {
        PLATFORM_PROVIDER_NAME
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::RANDOM_ONLY
    }

    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
        if len == 0 {
            return Err(CryptoError::invalid_argument("random byte length must be positive"));
        }
        if len > MAX_RANDOM_LEN {
            return Err(CryptoError::invalid_argument("random byte length exceeds native int range"));
        }

        let mut bytes = vec![0u8; len];
        self.entropy.fill(&mut bytes).map_err(|e| {
            tracing::error!(error = %e, len, "host entropy source failed after a successful first draw");
            CryptoError::RandomGenerationFailed
        })?;
        Ok(bytes)
    }
}
