//! Operation facade.
//!
//! The public entry points. Each operation validates its arguments first
//! (independently of the active provider), then takes a shared lease on the
//! registry, checks the provider's capability set, delegates, and verifies
//! the result is fully formed before returning it.

use std::{path::Path, sync::Arc};

use zeroize::Zeroizing;

use crate::{
    capability::{Capability, CapabilitySet, DigestKind, KdfKind},
    error::CryptoError,
    loader::{ModuleFetcher, ModuleLoader},
    provider::{AEAD_KEY_LEN, AEAD_TAG_LEN, AeadKey, AeadSealed, AeadTag, MAX_RANDOM_LEN, Provider},
    registry::ProviderRegistry,
};

/// Uniform entry point to the active provider.
///
/// Cheap to clone; clones share one registry.
#[derive(Debug, Clone)]
pub struct Crypto {
    registry: Arc<ProviderRegistry>,
}

impl Crypto {
    /// Facade over a fresh registry with the platform random provider.
    ///
    /// Fails with [`CryptoError::NoSecureRandom`] if the host has no
    /// secure random facility.
    pub fn new() -> Result<Self, CryptoError> {
        Ok(Self::with_registry(Arc::new(ProviderRegistry::with_platform_default()?)))
    }

    /// Facade over an existing registry.
    pub fn with_registry(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// `len` cryptographically secure random bytes.
    ///
    /// `len` must be in `1..=MAX_RANDOM_LEN`.
    pub fn random_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
        if len == 0 {
            return Err(CryptoError::invalid_argument("random byte length must be positive"));
        }
        if len > MAX_RANDOM_LEN {
            return Err(CryptoError::invalid_argument("random byte length exceeds native int range"));
        }

        let provider = self.registry.lease();
        require(&**provider, Capability::RandomBytes)?;

        let bytes = provider.random_bytes(len)?;
        if bytes.len() != len {
            return Err(CryptoError::RandomGenerationFailed);
        }
        Ok(bytes)
    }

    /// SHA-256 of `data`.
    pub fn digest_sha256(&self, data: &[u8]) -> Result<[u8; 32], CryptoError> {
        self.digest(DigestKind::Sha256, data)
    }

    /// SHA-512 of `data`.
    pub fn digest_sha512(&self, data: &[u8]) -> Result<[u8; 64], CryptoError> {
        self.digest(DigestKind::Sha512, data)
    }

    /// PBKDF2-HMAC-SHA256 of `password` and `salt`.
    pub fn kdf_hmac_sha256(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        key_len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.derive_key(KdfKind::HmacSha256, password, salt, iterations, key_len)
    }

    /// PBKDF2-HMAC-SHA512 of `password` and `salt`.
    pub fn kdf_hmac_sha512(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        key_len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.derive_key(KdfKind::HmacSha512, password, salt, iterations, key_len)
    }

    /// Encrypt and authenticate `plaintext` under AES-256-GCM.
    ///
    /// `key` must be 32 bytes and `iv` non-empty (12 bytes recommended).
    /// Nonce uniqueness per key is the caller's responsibility.
    pub fn aead_seal(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<AeadSealed, CryptoError> {
        let key = aead_key(key)?;
        require_iv(iv)?;

        let provider = self.registry.lease();
        require(&**provider, Capability::AeadSeal)?;

        let sealed = provider.aead_seal(key, iv, aad, plaintext)?;
        if sealed.ciphertext.len() != plaintext.len() {
            return Err(CryptoError::SealFailed);
        }
        Ok(sealed)
    }

    /// Verify `tag` and decrypt `ciphertext` under AES-256-GCM.
    ///
    /// A wrong key, IV, AAD, ciphertext or tag all fail identically with
    /// [`CryptoError::AuthenticationFailed`].
    pub fn aead_open(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let key = aead_key(key)?;
        let tag: &AeadTag = tag.try_into().map_err(|_| {
            CryptoError::invalid_argument(format!(
                "AEAD tag must be {AEAD_TAG_LEN} bytes, got {}",
                tag.len()
            ))
        })?;
        require_iv(iv)?;

        let provider = self.registry.lease();
        require(&**provider, Capability::AeadOpen)?;

        let plaintext = provider.aead_open(key, iv, aad, ciphertext, tag)?;
        if plaintext.len() != ciphertext.len() {
            return Err(CryptoError::AuthenticationFailed);
        }
        Ok(plaintext)
    }

    /// Replace the active provider. See [`ProviderRegistry::set_provider`].
    pub fn set_provider(&self, provider: Arc<dyn Provider>) -> Result<(), CryptoError> {
        self.registry.set_provider(provider)
    }

    /// Identity label of the active provider.
    pub fn active_provider_name(&self) -> String {
        self.registry.active_provider_name()
    }

    /// Capabilities of the active provider.
    pub fn capabilities(&self) -> CapabilitySet {
        self.registry.capabilities()
    }

    /// Try to install the native backend through `loader`.
    ///
    /// See [`ModuleLoader::load`]: `Ok(false)` means no module was found
    /// and the active provider is unchanged.
    pub async fn load_native_backend<F: ModuleFetcher>(
        &self,
        loader: &ModuleLoader<F>,
        hint: Option<&Path>,
    ) -> Result<bool, CryptoError> {
        loader.load(&self.registry, hint).await
    }

    fn digest<const N: usize>(&self, kind: DigestKind, data: &[u8]) -> Result<[u8; N], CryptoError> {
        let provider = self.registry.lease();
        require(&**provider, kind.capability())?;

        let digest = provider.digest(kind, data)?;
        <[u8; N]>::try_from(digest.as_slice()).map_err(|_| CryptoError::DigestFailed { kind })
    }

    fn derive_key(
        &self,
        kind: KdfKind,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        key_len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if iterations == 0 {
            return Err(CryptoError::invalid_argument("iterations must be positive"));
        }
        if key_len == 0 {
            return Err(CryptoError::invalid_argument("key length must be positive"));
        }

        let provider = self.registry.lease();
        require(&**provider, kind.capability())?;

        let key = provider.derive_key(kind, password, salt, iterations, key_len)?;
        if key.len() != key_len {
            return Err(CryptoError::KdfFailed { kind });
        }
        Ok(key)
    }
}

fn require(provider: &dyn Provider, capability: Capability) -> Result<(), CryptoError> {
    if provider.capabilities().contains(capability) {
        Ok(())
    } else {
        Err(CryptoError::CapabilityUnavailable { capability })
    }
}

fn aead_key(key: &[u8]) -> Result<&AeadKey, CryptoError> {
    key.try_into().map_err(|_| {
        CryptoError::invalid_argument(format!(
            "AES-256 key must be {AEAD_KEY_LEN} bytes, got {}",
            key.len()
        ))
    })
}

fn require_iv(iv: &[u8]) -> Result<(), CryptoError> {
    if iv.is_empty() {
        return Err(CryptoError::invalid_argument("IV must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Provider that answers every capability with fixed bytes and counts
    /// how often it is reached.
    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
        short_output: bool,
    }

    impl Echo {
        fn out(&self, len: usize) -> Vec<u8> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            vec![0xCC; if self.short_output { len.saturating_sub(1) } else { len }]
        }
    }

    impl Provider for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::FULL
        }

        fn random_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
            Ok(self.out(len))
        }

        fn digest(&self, kind: DigestKind, _data: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(self.out(kind.output_len()))
        }

        fn derive_key(
            &self,
            _kind: KdfKind,
            _password: &[u8],
            _salt: &[u8],
            _iterations: u32,
            key_len: usize,
        ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
            Ok(Zeroizing::new(self.out(key_len)))
        }

        fn aead_seal(
            &self,
            _key: &AeadKey,
            _iv: &[u8],
            _aad: &[u8],
            plaintext: &[u8],
        ) -> Result<AeadSealed, CryptoError> {
            Ok(AeadSealed { ciphertext: self.out(plaintext.len()), tag: [0; AEAD_TAG_LEN] })
        }

        fn aead_open(
            &self,
            _key: &AeadKey,
            _iv: &[u8],
            _aad: &[u8],
            ciphertext: &[u8],
            _tag: &AeadTag,
        ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
            Ok(Zeroizing::new(self.out(ciphertext.len())))
        }
    }

    fn facade(provider: Arc<Echo>) -> Crypto {
        Crypto::with_registry(Arc::new(ProviderRegistry::new(provider).unwrap()))
    }

    #[test]
    fn invalid_arguments_never_reach_the_provider() {
        let echo = Arc::new(Echo::default());
        let crypto = facade(Arc::clone(&echo));
        let key = [0u8; AEAD_KEY_LEN];

        let cases = [
            crypto.random_bytes(0).map(drop),
            crypto.random_bytes(MAX_RANDOM_LEN + 1).map(drop),
            crypto.random_bytes(usize::MAX).map(drop),
            crypto.kdf_hmac_sha256(b"pw", b"salt", 0, 32).map(drop),
            crypto.kdf_hmac_sha512(b"pw", b"salt", 1, 0).map(drop),
            crypto.aead_seal(&[0; 31], &[0; 12], &[], b"x").map(drop),
            crypto.aead_seal(&key, &[], &[], b"x").map(drop),
            crypto.aead_open(&[0; 33], &[0; 12], &[], b"x", &[0; 16]).map(drop),
            crypto.aead_open(&key, &[0; 12], &[], b"x", &[0; 15]).map(drop),
            crypto.aead_open(&key, &[], &[], b"x", &[0; 16]).map(drop),
        ];

        for (i, result) in cases.into_iter().enumerate() {
            assert!(
                matches!(result, Err(CryptoError::InvalidArgument { .. })),
                "case {i} should be an invalid argument, got {result:?}"
            );
        }
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn validation_precedes_capability_lookup() {
        let crypto = Crypto::new().unwrap();

        // Random-only provider, but the bad key length is reported first
        assert!(matches!(
            crypto.aead_seal(&[0; 16], &[0; 12], &[], b"x"),
            Err(CryptoError::InvalidArgument { .. })
        ));
        assert_eq!(
            crypto.aead_seal(&[0; 32], &[0; 12], &[], b"x"),
            Err(CryptoError::CapabilityUnavailable { capability: Capability::AeadSeal })
        );
    }

    #[test]
    fn random_only_provider_reports_missing_capabilities() {
        let crypto = Crypto::new().unwrap();

        assert_eq!(crypto.random_bytes(16).unwrap().len(), 16);
        assert_eq!(
            crypto.digest_sha256(b"abc"),
            Err(CryptoError::CapabilityUnavailable { capability: Capability::DigestSha256 })
        );
        assert_eq!(
            crypto.digest_sha512(b"abc"),
            Err(CryptoError::CapabilityUnavailable { capability: Capability::DigestSha512 })
        );
        assert_eq!(
            crypto.kdf_hmac_sha512(b"pw", b"salt", 1, 16).map(|k| k.len()),
            Err(CryptoError::CapabilityUnavailable { capability: Capability::KdfHmacSha512 })
        );
        assert!(matches!(
            crypto.aead_open(&[0; 32], &[0; 12], &[], b"", &[0; 16]),
            Err(CryptoError::CapabilityUnavailable { capability: Capability::AeadOpen })
        ));
    }

    #[test]
    fn well_formed_results_pass_through() {
        let crypto = facade(Arc::new(Echo::default()));

        assert_eq!(crypto.random_bytes(5).unwrap(), vec![0xCC; 5]);
        assert_eq!(crypto.digest_sha256(b"").unwrap(), [0xCC; 32]);
        assert_eq!(crypto.digest_sha512(b"").unwrap(), [0xCC; 64]);
        assert_eq!(crypto.kdf_hmac_sha256(b"pw", b"s", 1, 20).unwrap().len(), 20);
        assert_eq!(crypto.aead_seal(&[0; 32], &[0; 12], &[], b"abc").unwrap().ciphertext.len(), 3);
        assert_eq!(crypto.aead_open(&[0; 32], &[0; 12], &[], b"abc", &[0; 16]).unwrap().len(), 3);
    }

    #[test]
    fn short_provider_output_is_never_returned() {
        let crypto = facade(Arc::new(Echo { short_output: true, ..Echo::default() }));

        assert_eq!(crypto.random_bytes(5), Err(CryptoError::RandomGenerationFailed));
        assert_eq!(
            crypto.digest_sha256(b""),
            Err(CryptoError::DigestFailed { kind: DigestKind::Sha256 })
        );
        assert_eq!(
            crypto.kdf_hmac_sha512(b"pw", b"s", 1, 20).map(|k| k.len()),
            Err(CryptoError::KdfFailed { kind: KdfKind::HmacSha512 })
        );
        assert_eq!(crypto.aead_seal(&[0; 32], &[0; 12], &[], b"abc"), Err(CryptoError::SealFailed));
        assert!(matches!(
            crypto.aead_open(&[0; 32], &[0; 12], &[], b"abc", &[0; 16]),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn clones_share_the_registry() {
        let crypto = Crypto::new().unwrap();
        let other = crypto.clone();

        other.set_provider(Arc::new(Echo::default())).unwrap();

        assert_eq!(crypto.active_provider_name(), "echo");
        assert_eq!(crypto.capabilities(), CapabilitySet::FULL);
    }
}
