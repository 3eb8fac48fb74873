//! Native crypto backend.
//!
//! Binds the entry points of a sandboxed cryptographic module and exposes
//! them as a [`Provider`]. Operands cross into the sandbox through a
//! [`Scratch`], so every region is released (and scrubbed) on every exit
//! path, and the per-backend lock keeps one operation at a time on the
//! module's memory.
//!
//! # Calling convention
//!
//! Every entry point takes and returns 32-bit `int`s. Pointers are guest
//! offsets, lengths are signed byte counts.
//!
//! | Entry point            | Arguments                                             | Returns       |
//! |------------------------|-------------------------------------------------------|---------------|
//! | `openssl_rand_bytes`   | `out, len`                                            | `1` / `0`     |
//! | `sha256_digest`        | `data, data_len, out`                                 | `1` / `0`     |
//! | `sha512_digest`        | `data, data_len, out`                                 | `1` / `0`     |
//! | `pbkdf2_hmac_sha256`   | `pass, pass_len, salt, salt_len, iter, out, out_len`  | `1` / `0`     |
//! | `pbkdf2_hmac_sha512`   | `pass, pass_len, salt, salt_len, iter, out, out_len`  | `1` / `0`     |
//! | `aes_256_gcm_encrypt`  | `key, iv, iv_len, aad, aad_len, pt, pt_len, ct, tag`  | ct len / `-1` |
//! | `aes_256_gcm_decrypt`  | `key, iv, iv_len, aad, aad_len, ct, ct_len, tag, pt`  | pt len / `-1` |
//!
//! Each symbol is also accepted with a leading underscore.

use std::sync::{Mutex, MutexGuard, PoisonError};

use zeroize::Zeroizing;

use crate::{
    bridge::{Sandbox, Scratch},
    capability::{Capability, CapabilitySet, DigestKind, KdfKind},
    error::{CryptoError, SandboxError},
    provider::{AEAD_TAG_LEN, AeadKey, AeadSealed, AeadTag, Provider},
};

/// Identity label of the native provider.
pub const NATIVE_PROVIDER_NAME: &str = "native";

/// Status returned by the `1` / `0` entry points on success.
const NATIVE_OK: i32 = 1;

/// Named entry point of the native module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// Random fill (mandatory)
    RandBytes,
    /// SHA-256 digest
    Sha256Digest,
    /// SHA-512 digest
    Sha512Digest,
    /// PBKDF2-HMAC-SHA256
    Pbkdf2HmacSha256,
    /// PBKDF2-HMAC-SHA512
    Pbkdf2HmacSha512,
    /// AES-256-GCM encrypt
    Aes256GcmEncrypt,
    /// AES-256-GCM decrypt
    Aes256GcmDecrypt,
}

impl EntryPoint {
    /// Every entry point.
    pub const ALL: [Self; 7] = [
        Self::RandBytes,
        Self::Sha256Digest,
        Self::Sha512Digest,
        Self::Pbkdf2HmacSha256,
        Self::Pbkdf2HmacSha512,
        Self::Aes256GcmEncrypt,
        Self::Aes256GcmDecrypt,
    ];

    /// Canonical (unprefixed) symbol.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::RandBytes => "openssl_rand_bytes",
            Self::Sha256Digest => "sha256_digest",
            Self::Sha512Digest => "sha512_digest",
            Self::Pbkdf2HmacSha256 => "pbkdf2_hmac_sha256",
            Self::Pbkdf2HmacSha512 => "pbkdf2_hmac_sha512",
            Self::Aes256GcmEncrypt => "aes_256_gcm_encrypt",
            Self::Aes256GcmDecrypt => "aes_256_gcm_decrypt",
        }
    }

    /// Capability this entry point provides.
    pub const fn capability(self) -> Capability {
        match self {
            Self::RandBytes => Capability::RandomBytes,
            Self::Sha256Digest => Capability::DigestSha256,
            Self::Sha512Digest => Capability::DigestSha512,
            Self::Pbkdf2HmacSha256 => Capability::KdfHmacSha256,
            Self::Pbkdf2HmacSha512 => Capability::KdfHmacSha512,
            Self::Aes256GcmEncrypt => Capability::AeadSeal,
            Self::Aes256GcmDecrypt => Capability::AeadOpen,
        }
    }

    /// Number of native `int` parameters.
    pub const fn arity(self) -> usize {
        match self {
            Self::RandBytes => 2,
            Self::Sha256Digest | Self::Sha512Digest => 3,
            Self::Pbkdf2HmacSha256 | Self::Pbkdf2HmacSha512 => 7,
            Self::Aes256GcmEncrypt | Self::Aes256GcmDecrypt => 9,
        }
    }

    /// Export names tried at bind time, in order.
    pub fn accepted_symbols(self) -> [String; 2] {
        [self.symbol().to_string(), format!("_{}", self.symbol())]
    }
}

struct EntryPoints<X> {
    rand_bytes: X,
    sha256: Option<X>,
    sha512: Option<X>,
    pbkdf2_sha256: Option<X>,
    pbkdf2_sha512: Option<X>,
    encrypt: Option<X>,
    decrypt: Option<X>,
}

/// Provider backed by a sandboxed native module.
pub struct NativeBackend<S: Sandbox> {
    sandbox: Mutex<S>,
    exports: EntryPoints<S::Export>,
    capabilities: CapabilitySet,
}

impl<S: Sandbox> NativeBackend<S> {
    /// Bind the module's entry points.
    ///
    /// Optional entry points that are missing leave their capability
    /// absent. Fails with [`CryptoError::MissingCapability`] if the random
    /// fill entry point is not exported under either accepted name.
    pub fn bind(mut sandbox: S) -> Result<Self, CryptoError> {
        let rand_bytes = resolve(&mut sandbox, EntryPoint::RandBytes).ok_or(
            CryptoError::MissingCapability { entry_point: EntryPoint::RandBytes.symbol() },
        )?;

        let exports = EntryPoints {
            rand_bytes,
            sha256: resolve(&mut sandbox, EntryPoint::Sha256Digest),
            sha512: resolve(&mut sandbox, EntryPoint::Sha512Digest),
            pbkdf2_sha256: resolve(&mut sandbox, EntryPoint::Pbkdf2HmacSha256),
            pbkdf2_sha512: resolve(&mut sandbox, EntryPoint::Pbkdf2HmacSha512),
            encrypt: resolve(&mut sandbox, EntryPoint::Aes256GcmEncrypt),
            decrypt: resolve(&mut sandbox, EntryPoint::Aes256GcmDecrypt),
        };

        let capabilities: CapabilitySet = [
            (Capability::RandomBytes, true),
            (Capability::DigestSha256, exports.sha256.is_some()),
            (Capability::DigestSha512, exports.sha512.is_some()),
            (Capability::KdfHmacSha256, exports.pbkdf2_sha256.is_some()),
            (Capability::KdfHmacSha512, exports.pbkdf2_sha512.is_some()),
            (Capability::AeadSeal, exports.encrypt.is_some()),
            (Capability::AeadOpen, exports.decrypt.is_some()),
        ]
        .into_iter()
        .filter_map(|(capability, present)| present.then_some(capability))
        .collect();

        tracing::debug!(?capabilities, "native module bound");
        Ok(Self { sandbox: Mutex::new(sandbox), exports, capabilities })
    }

    /// Run `f` against the sandbox while no operation is in flight.
    pub fn inspect<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, S> {
        self.sandbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Sandbox> Provider for NativeBackend<S> {
    fn name(&self) -> &str {
        NATIVE_PROVIDER_NAME
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
        if len == 0 {
            return Err(CryptoError::invalid_argument("random byte length must be positive"));
        }
        let len_arg = native_len(len, "random byte")?;
        let fault = classify(CryptoError::RandomGenerationFailed);

        let mut sandbox = self.lock();
        let mut scratch = Scratch::new(&mut *sandbox);

        let out = scratch.reserve(len).map_err(&fault)?;
        let status =
            scratch.invoke(&self.exports.rand_bytes, &[out.ptr(), len_arg]).map_err(&fault)?;
        if status != NATIVE_OK {
            return Err(CryptoError::RandomGenerationFailed);
        }

        scratch.read(&out, len).map_err(&fault)
    }

    fn digest(&self, kind: DigestKind, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let export = match kind {
            DigestKind::Sha256 => self.exports.sha256.as_ref(),
            DigestKind::Sha512 => self.exports.sha512.as_ref(),
        }
        .ok_or(CryptoError::CapabilityUnavailable { capability: kind.capability() })?;
        let data_len = native_len(data.len(), "digest input")?;
        let fault = classify(CryptoError::DigestFailed { kind });

        let mut sandbox = self.lock();
        let mut scratch = Scratch::new(&mut *sandbox);

        let input = scratch.stage(data).map_err(&fault)?;
        let out = scratch.reserve(kind.output_len()).map_err(&fault)?;
        let status = scratch.invoke(export, &[input.ptr(), data_len, out.ptr()]).map_err(&fault)?;
        scratch.release(input);

        if status != NATIVE_OK {
            return Err(CryptoError::DigestFailed { kind });
        }
        scratch.read(&out, kind.output_len()).map_err(&fault)
    }

    fn derive_key(
        &self,
        kind: KdfKind,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        key_len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let export = match kind {
            KdfKind::HmacSha256 => self.exports.pbkdf2_sha256.as_ref(),
            KdfKind::HmacSha512 => self.exports.pbkdf2_sha512.as_ref(),
        }
        .ok_or(CryptoError::CapabilityUnavailable { capability: kind.capability() })?;

        if iterations == 0 {
            return Err(CryptoError::invalid_argument("iterations must be positive"));
        }
        if key_len == 0 {
            return Err(CryptoError::invalid_argument("key length must be positive"));
        }
        let iterations_arg = i32::try_from(iterations)
            .map_err(|_| CryptoError::invalid_argument("iterations exceed native int range"))?;
        let password_len = native_len(password.len(), "password")?;
        let salt_len = native_len(salt.len(), "salt")?;
        let key_len_arg = native_len(key_len, "derived key")?;
        let fault = classify(CryptoError::KdfFailed { kind });

        let mut sandbox = self.lock();
        let mut scratch = Scratch::new(&mut *sandbox);

        let password_region = scratch.stage(password).map_err(&fault)?;
        let salt_region = scratch.stage(salt).map_err(&fault)?;
        let out = scratch.reserve(key_len).map_err(&fault)?;

        let status = scratch
            .invoke(export, &[
                password_region.ptr(),
                password_len,
                salt_region.ptr(),
                salt_len,
                iterations_arg,
                out.ptr(),
                key_len_arg,
            ])
            .map_err(&fault)?;
        scratch.release(password_region);
        scratch.release(salt_region);

        if status != NATIVE_OK {
            return Err(CryptoError::KdfFailed { kind });
        }
        scratch.read(&out, key_len).map(Zeroizing::new).map_err(&fault)
    }

    fn aead_seal(
        &self,
        key: &AeadKey,
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<AeadSealed, CryptoError> {
        let export = self
            .exports
            .encrypt
            .as_ref()
            .ok_or(CryptoError::CapabilityUnavailable { capability: Capability::AeadSeal })?;

        if iv.is_empty() {
            return Err(CryptoError::invalid_argument("IV must not be empty"));
        }
        let iv_len = native_len(iv.len(), "IV")?;
        let aad_len = native_len(aad.len(), "AAD")?;
        let plaintext_len = native_len(plaintext.len(), "plaintext")?;
        let capacity = plaintext.len() + AEAD_TAG_LEN;
        native_len(capacity, "ciphertext buffer")?;
        let fault = classify(CryptoError::SealFailed);

        let mut sandbox = self.lock();
        let mut scratch = Scratch::new(&mut *sandbox);

        let key_region = scratch.stage(key).map_err(&fault)?;
        let iv_region = scratch.stage(iv).map_err(&fault)?;
        let aad_region = scratch.stage(aad).map_err(&fault)?;
        let pt_region = scratch.stage(plaintext).map_err(&fault)?;
        let ct_region = scratch.reserve(capacity).map_err(&fault)?;
        let tag_region = scratch.reserve(AEAD_TAG_LEN).map_err(&fault)?;

        let status = scratch
            .invoke(export, &[
                key_region.ptr(),
                iv_region.ptr(),
                iv_len,
                aad_region.ptr(),
                aad_len,
                pt_region.ptr(),
                plaintext_len,
                ct_region.ptr(),
                tag_region.ptr(),
            ])
            .map_err(&fault)?;
        scratch.release(key_region);
        scratch.release(iv_region);
        scratch.release(aad_region);
        scratch.release(pt_region);

        if status < 0 {
            return Err(CryptoError::SealFailed);
        }
        if status != plaintext_len {
            tracing::warn!(
                expected = plaintext.len(),
                reported = status,
                "native encrypt reported unexpected ciphertext length"
            );
            return Err(CryptoError::SealFailed);
        }

        let ciphertext = scratch.read(&ct_region, plaintext.len()).map_err(&fault)?;
        let tag: AeadTag = scratch.read_array(&tag_region).map_err(&fault)?;
        Ok(AeadSealed { ciphertext, tag })
    }

    fn aead_open(
        &self,
        key: &AeadKey,
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &AeadTag,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let export = self
            .exports
            .decrypt
            .as_ref()
            .ok_or(CryptoError::CapabilityUnavailable { capability: Capability::AeadOpen })?;

        if iv.is_empty() {
            return Err(CryptoError::invalid_argument("IV must not be empty"));
        }
        let iv_len = native_len(iv.len(), "IV")?;
        let aad_len = native_len(aad.len(), "AAD")?;
        let ciphertext_len = native_len(ciphertext.len(), "ciphertext")?;
        let fault = classify(CryptoError::AuthenticationFailed);

        let mut sandbox = self.lock();
        let mut scratch = Scratch::new(&mut *sandbox);

        let key_region = scratch.stage(key).map_err(&fault)?;
        let iv_region = scratch.stage(iv).map_err(&fault)?;
        let aad_region = scratch.stage(aad).map_err(&fault)?;
        let ct_region = scratch.stage(ciphertext).map_err(&fault)?;
        let tag_region = scratch.stage(tag).map_err(&fault)?;
        let pt_region = scratch.reserve(ciphertext.len()).map_err(&fault)?;

        let status = scratch
            .invoke(export, &[
                key_region.ptr(),
                iv_region.ptr(),
                iv_len,
                aad_region.ptr(),
                aad_len,
                ct_region.ptr(),
                ciphertext_len,
                tag_region.ptr(),
                pt_region.ptr(),
            ])
            .map_err(&fault)?;
        scratch.release(key_region);
        scratch.release(iv_region);
        scratch.release(aad_region);
        scratch.release(ct_region);
        scratch.release(tag_region);

        // Tag mismatch and native fault are deliberately indistinguishable
        if status != ciphertext_len {
            return Err(CryptoError::AuthenticationFailed);
        }
        scratch.read(&pt_region, ciphertext.len()).map(Zeroizing::new).map_err(&fault)
    }
}

impl<S: Sandbox> std::fmt::Debug for NativeBackend<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeBackend").field("capabilities", &self.capabilities).finish()
    }
}

fn resolve<S: Sandbox>(sandbox: &mut S, entry_point: EntryPoint) -> Option<S::Export> {
    let arity = entry_point.arity();
    let export =
        entry_point.accepted_symbols().iter().find_map(|symbol| sandbox.bind(symbol, arity));
    if export.is_none() {
        tracing::debug!(
            entry_point = entry_point.symbol(),
            arity,
            capability = %entry_point.capability(),
            "native export not found or mistyped, capability absent"
        );
    }
    export
}

/// Map a bridge fault onto the operation's error. Allocation failures keep
/// their own category; everything else becomes `failure`.
fn classify(failure: CryptoError) -> impl Fn(SandboxError) -> CryptoError {
    move |fault| match fault {
        SandboxError::AllocationFailed { len } => CryptoError::AllocationFailed { len },
        other => {
            tracing::debug!(error = %other, "native call faulted");
            failure.clone()
        },
    }
}

fn native_len(len: usize, what: &str) -> Result<i32, CryptoError> {
    i32::try_from(len)
        .map_err(|_| CryptoError::invalid_argument(format!("{what} length exceeds native int range")))
}
