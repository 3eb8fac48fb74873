//! Deterministic simulation harness for Sandcrypt.
//!
//! A simulated native module that speaks the same calling convention as the
//! compiled WebAssembly module, so the native backend, the bridge and the
//! loader can be tested without a sandbox runtime.
//!
//! # Leak checking
//!
//! [`SimSandbox::live_allocations`] counts regions that were allocated but
//! never released, and [`SimStats::invalid_releases`] counts double or
//! foreign frees. [`check_regions`] verifies both are zero and that every
//! allocation was paired with a release.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_fetcher;
pub mod sim_module;

use std::{fmt, sync::Arc};

use sandcrypt_core::{Crypto, CryptoError, NativeBackend, ProviderRegistry};
pub use sim_fetcher::SimFetcher;
pub use sim_module::{DEFAULT_MEMORY_LIMIT, Fault, SimModule, SimSandbox, SimStats};

/// Bind a native backend over a fresh instance of `module`.
pub fn native_backend(module: &SimModule) -> Result<Arc<NativeBackend<SimSandbox>>, CryptoError> {
    NativeBackend::bind(module.build()).map(Arc::new)
}

/// Facade whose active provider is a native backend over `module`.
///
/// Returns the backend too, for region inspection.
pub fn native_crypto(
    module: &SimModule,
) -> Result<(Crypto, Arc<NativeBackend<SimSandbox>>), CryptoError> {
    let backend = native_backend(module)?;
    let registry = ProviderRegistry::new(backend.clone())?;
    Ok((Crypto::with_registry(Arc::new(registry)), backend))
}

/// Region bookkeeping that violates the release invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionViolation {
    /// Counters at the time of the check
    pub stats: SimStats,
    /// Allocations still live
    pub live: usize,
}

impl fmt::Display for RegionViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} live regions, {} allocations vs {} releases, {} invalid releases",
            self.live, self.stats.allocations, self.stats.releases, self.stats.invalid_releases
        )
    }
}

/// Check that every region allocated by `backend` was released exactly once.
pub fn check_regions(backend: &NativeBackend<SimSandbox>) -> Result<(), RegionViolation> {
    backend.inspect(|sandbox| {
        let stats = sandbox.stats();
        let live = sandbox.live_allocations();
        if live == 0 && stats.invalid_releases == 0 && stats.allocations == stats.releases {
            Ok(())
        } else {
            Err(RegionViolation { stats, live })
        }
    })
}

/// Check the release invariant, panicking with context on violation.
///
/// Use this in tests where you want immediate failure.
#[allow(clippy::panic, reason = "test assertion helper")]
pub fn assert_regions_released(backend: &NativeBackend<SimSandbox>, context: &str) {
    if let Err(violation) = check_regions(backend) {
        panic!("Region invariant violated {context}: {violation}");
    }
}
