//! Provider registry.
//!
//! Holds exactly one active provider. Every facade operation runs under a
//! shared lease on the registry and replacement takes the exclusive side of
//! the same lock, so no operation ever straddles a provider swap. Dropping
//! the replaced provider happens after the swap, outside the lock.
//!
//! The registry is an ordinary value: construct one per process (or per
//! test) and share it with `Arc`. There is no hidden global.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use crate::{
    capability::{Capability, CapabilitySet},
    error::CryptoError,
    platform::PlatformRandom,
    provider::Provider,
};

/// Single point of truth for the active provider.
pub struct ProviderRegistry {
    active: RwLock<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create a registry with `initial` as the active provider.
    pub fn new(initial: Arc<dyn Provider>) -> Result<Self, CryptoError> {
        validate(initial.as_ref())?;
        Ok(Self { active: RwLock::new(initial) })
    }

    /// Create a registry backed by the host's secure random facility.
    ///
    /// Fails fast with [`CryptoError::NoSecureRandom`] if the host has none.
    pub fn with_platform_default() -> Result<Self, CryptoError> {
        Self::new(Arc::new(PlatformRandom::new()?))
    }

    /// Replace the active provider.
    ///
    /// Waits for in-flight operations on the previous provider to finish.
    /// Rejects providers without random bytes with
    /// [`CryptoError::InvalidProvider`], leaving the active provider as is.
    pub fn set_provider(&self, provider: Arc<dyn Provider>) -> Result<(), CryptoError> {
        validate(provider.as_ref())?;

        let name = provider.name().to_string();
        let previous = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *active, provider)
        };

        tracing::info!(previous = previous.name(), active = %name, "crypto provider replaced");
        Ok(())
    }

    /// Identity label of the active provider.
    pub fn active_provider_name(&self) -> String {
        self.lease().name().to_string()
    }

    /// Capabilities of the active provider.
    pub fn capabilities(&self) -> CapabilitySet {
        self.lease().capabilities()
    }

    /// Snapshot of the active provider.
    ///
    /// The returned handle stays valid after a later replacement but is no
    /// longer the registry's choice. Prefer [`ProviderRegistry::lease`] for
    /// running operations.
    pub fn current(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.lease())
    }

    /// Shared lease on the active provider.
    ///
    /// Replacement blocks until every outstanding lease is dropped. Do not
    /// hold a lease across an await point.
    pub fn lease(&self) -> RwLockReadGuard<'_, Arc<dyn Provider>> {
        self.active.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.lease();
        f.debug_struct("ProviderRegistry")
            .field("active", &active.name())
            .field("capabilities", &active.capabilities())
            .finish()
    }
}

fn validate(provider: &dyn Provider) -> Result<(), CryptoError> {
    if provider.capabilities().contains(Capability::RandomBytes) {
        Ok(())
    } else {
        Err(CryptoError::InvalidProvider { name: provider.name().to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        capabilities: CapabilitySet,
    }

    impl Provider for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn capabilities(&self) -> CapabilitySet {
            self.capabilities
        }

        fn random_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
            Ok(vec![7; len])
        }
    }

    fn fixed(name: &'static str, capabilities: CapabilitySet) -> Arc<dyn Provider> {
        Arc::new(Fixed { name, capabilities })
    }

    #[test]
    fn platform_default_is_active_at_start() {
        let registry = ProviderRegistry::with_platform_default().unwrap();
        assert_eq!(registry.active_provider_name(), "platform");
        assert_eq!(registry.capabilities(), CapabilitySet::RANDOM_ONLY);
    }

    #[test]
    fn set_provider_replaces_active() {
        let registry = ProviderRegistry::new(fixed("first", CapabilitySet::RANDOM_ONLY)).unwrap();

        registry.set_provider(fixed("second", CapabilitySet::FULL)).unwrap();

        assert_eq!(registry.active_provider_name(), "second");
        assert_eq!(registry.current().capabilities(), CapabilitySet::FULL);
    }

    #[test]
    fn provider_without_random_bytes_is_rejected() {
        let registry = ProviderRegistry::new(fixed("first", CapabilitySet::RANDOM_ONLY)).unwrap();
        let digest_only = CapabilitySet::EMPTY.with(Capability::DigestSha256);

        let result = registry.set_provider(fixed("broken", digest_only));

        assert_eq!(result, Err(CryptoError::InvalidProvider { name: "broken".to_string() }));
        assert_eq!(registry.active_provider_name(), "first", "failed swap must not mutate");
    }

    #[test]
    fn registry_cannot_start_with_invalid_provider() {
        let result = ProviderRegistry::new(fixed("empty", CapabilitySet::EMPTY));
        assert!(matches!(result, Err(CryptoError::InvalidProvider { .. })));
    }

    #[test]
    fn snapshot_survives_replacement() {
        let registry = ProviderRegistry::new(fixed("first", CapabilitySet::RANDOM_ONLY)).unwrap();
        let snapshot = registry.current();

        registry.set_provider(fixed("second", CapabilitySet::RANDOM_ONLY)).unwrap();

        assert_eq!(snapshot.name(), "first");
        assert_eq!(snapshot.random_bytes(3).unwrap(), vec![7; 3]);
    }

    #[test]
    fn replacement_waits_for_outstanding_lease() {
        let registry =
            Arc::new(ProviderRegistry::new(fixed("first", CapabilitySet::RANDOM_ONLY)).unwrap());

        let lease = registry.lease();
        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                registry.set_provider(fixed("second", CapabilitySet::RANDOM_ONLY)).unwrap();
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(lease.name(), "first", "lease pins the provider it started with");
        drop(lease);

        writer.join().unwrap();
        assert_eq!(registry.active_provider_name(), "second");
    }
}
