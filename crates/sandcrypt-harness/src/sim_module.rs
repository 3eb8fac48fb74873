//! Simulated native cryptographic module.
//!
//! [`SimSandbox`] implements the sandbox seam with a flat byte vector as
//! linear memory, a first-fit allocator that tracks every live allocation,
//! and entry points that follow the native calling convention using the
//! RustCrypto reference implementations. It behaves like the real module
//! down to the status codes (`1`/`0` for digest, KDF and random fill,
//! length/`-1` for AEAD), so the native backend can be exercised without a
//! compiled WebAssembly binary.
//!
//! [`SimModule`] is both the configuration and the [`ModuleFactory`]: every
//! `instantiate` produces a fresh sandbox with its own memory.

use std::collections::{BTreeMap, HashMap};

use aes_gcm::{AeadInPlace, Aes256Gcm, KeyInit, aead::generic_array::GenericArray};
use hmac::Hmac;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sandcrypt_core::{
    AEAD_KEY_LEN, AEAD_RECOMMENDED_IV_LEN, AEAD_TAG_LEN, EntryPoint, ModuleFactory, Sandbox,
    SandboxError,
};
use sha2::{Digest, Sha256, Sha512};

/// Default linear memory size (16 pages of 64 KiB).
pub const DEFAULT_MEMORY_LIMIT: usize = 16 * 65_536;

/// Allocation alignment.
const ALIGN: usize = 8;

/// Injected failure for one entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The call traps
    Trap,
    /// The call returns this status without touching memory
    Status(i32),
}

/// Allocation and call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Successful allocations
    pub allocations: usize,
    /// Successful releases
    pub releases: usize,
    /// Releases of an offset that was not live
    pub invalid_releases: usize,
    /// Entry point invocations
    pub calls: usize,
}

/// Configuration of a simulated module.
#[derive(Debug, Clone)]
pub struct SimModule {
    prefix: String,
    excluded: Vec<EntryPoint>,
    faults: HashMap<EntryPoint, Fault>,
    memory_limit: usize,
    seed: u64,
    fail_instantiation: bool,
}

impl Default for SimModule {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            excluded: Vec::new(),
            faults: HashMap::new(),
            memory_limit: DEFAULT_MEMORY_LIMIT,
            seed: 0x5A4D_C0DE,
            fail_instantiation: false,
        }
    }
}

impl SimModule {
    /// Module exporting every entry point under its bare symbol.
    pub fn new() -> Self {
        Self::default()
    }

    /// Export every symbol with `prefix` prepended (e.g. `"_"`).
    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Do not export `entry_point`.
    #[must_use]
    pub fn without(mut self, entry_point: EntryPoint) -> Self {
        self.excluded.push(entry_point);
        self
    }

    /// Make every call to `entry_point` fail with `fault`.
    #[must_use]
    pub fn with_fault(mut self, entry_point: EntryPoint, fault: Fault) -> Self {
        self.faults.insert(entry_point, fault);
        self
    }

    /// Cap linear memory at `bytes`.
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Seed the simulated random fill.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Make `instantiate` fail.
    #[must_use]
    pub fn failing_instantiation(mut self) -> Self {
        self.fail_instantiation = true;
        self
    }

    /// Build a sandbox from this configuration.
    pub fn build(&self) -> SimSandbox {
        let exports = EntryPoint::ALL
            .into_iter()
            .filter(|e| !self.excluded.contains(e))
            .map(|e| (format!("{}{}", self.prefix, e.symbol()), e))
            .collect();

        SimSandbox {
            memory: vec![0; self.memory_limit],
            live: BTreeMap::new(),
            exports,
            faults: self.faults.clone(),
            rng: ChaCha20Rng::seed_from_u64(self.seed),
            stats: SimStats::default(),
        }
    }
}

impl ModuleFactory for SimModule {
    type Sandbox = SimSandbox;

    fn instantiate(&self) -> Result<SimSandbox, SandboxError> {
        if self.fail_instantiation {
            return Err(SandboxError::Instantiation("simulated instantiation failure".to_string()));
        }
        Ok(self.build())
    }
}

/// Simulated sandbox instance.
pub struct SimSandbox {
    memory: Vec<u8>,
    /// offset -> allocated size
    live: BTreeMap<u32, usize>,
    exports: HashMap<String, EntryPoint>,
    faults: HashMap<EntryPoint, Fault>,
    rng: ChaCha20Rng,
    stats: SimStats,
}

impl SimSandbox {
    /// Number of allocations not yet released.
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    /// Counters since instantiation.
    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Raw linear memory.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn find_free(&self, size: usize) -> Option<usize> {
        let mut candidate = ALIGN;
        for (&offset, &len) in &self.live {
            let offset = offset as usize;
            if candidate + size <= offset {
                return Some(candidate);
            }
            candidate = candidate.max((offset + len).next_multiple_of(ALIGN));
        }
        (candidate + size <= self.memory.len()).then_some(candidate)
    }

    fn range(&self, ptr: i32, len: i32) -> Result<std::ops::Range<usize>, SandboxError> {
        let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
            return Err(SandboxError::Trap(format!("negative pointer or length ({ptr}, {len})")));
        };
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.memory.len())
            .ok_or(SandboxError::OutOfBounds { offset: start as u32, len })?;
        Ok(start..end)
    }

    fn load(&self, ptr: i32, len: i32) -> Result<Vec<u8>, SandboxError> {
        Ok(self.memory[self.range(ptr, len)?].to_vec())
    }

    fn store(&mut self, ptr: i32, bytes: &[u8]) -> Result<(), SandboxError> {
        let range = self.range(ptr, bytes.len() as i32)?;
        self.memory[range].copy_from_slice(bytes);
        Ok(())
    }

    fn call(&mut self, entry_point: EntryPoint, args: &[i32]) -> Result<i32, SandboxError> {
        let arity = match entry_point {
            EntryPoint::RandBytes => 2,
            EntryPoint::Sha256Digest | EntryPoint::Sha512Digest => 3,
            EntryPoint::Pbkdf2HmacSha256 | EntryPoint::Pbkdf2HmacSha512 => 7,
            EntryPoint::Aes256GcmEncrypt | EntryPoint::Aes256GcmDecrypt => 9,
        };
        if args.len() != arity {
            return Err(SandboxError::Trap(format!(
                "{} expects {arity} arguments, got {}",
                entry_point.symbol(),
                args.len()
            )));
        }

        match entry_point {
            EntryPoint::RandBytes => {
                let out = self.range(args[0], args[1])?;
                self.rng.fill_bytes(&mut self.memory[out]);
                Ok(1)
            },
            EntryPoint::Sha256Digest => {
                let digest = Sha256::digest(self.load(args[0], args[1])?);
                self.store(args[2], &digest)?;
                Ok(1)
            },
            EntryPoint::Sha512Digest => {
                let digest = Sha512::digest(self.load(args[0], args[1])?);
                self.store(args[2], &digest)?;
                Ok(1)
            },
            EntryPoint::Pbkdf2HmacSha256 | EntryPoint::Pbkdf2HmacSha512 => self.pbkdf2(entry_point, args),
            EntryPoint::Aes256GcmEncrypt => self.encrypt(args),
            EntryPoint::Aes256GcmDecrypt => self.decrypt(args),
        }
    }

    fn pbkdf2(&mut self, entry_point: EntryPoint, args: &[i32]) -> Result<i32, SandboxError> {
        let (iterations, out_len) = (args[4], args[6]);
        if iterations <= 0 || out_len <= 0 {
            return Ok(0);
        }

        let password = self.load(args[0], args[1])?;
        let salt = self.load(args[2], args[3])?;
        let mut out = vec![0u8; out_len as usize];
        let rounds = iterations as u32;

        let derived = if entry_point == EntryPoint::Pbkdf2HmacSha256 {
            pbkdf2::pbkdf2::<Hmac<Sha256>>(&password, &salt, rounds, &mut out)
        } else {
            pbkdf2::pbkdf2::<Hmac<Sha512>>(&password, &salt, rounds, &mut out)
        };
        if derived.is_err() {
            return Ok(0);
        }

        self.store(args[5], &out)?;
        Ok(1)
    }

    fn encrypt(&mut self, args: &[i32]) -> Result<i32, SandboxError> {
        let key = self.load(args[0], AEAD_KEY_LEN as i32)?;
        let iv = self.load(args[1], args[2])?;
        let aad = self.load(args[3], args[4])?;
        let mut buffer = self.load(args[5], args[6])?;

        // The reference cipher is fixed to 96-bit nonces
        if iv.len() != AEAD_RECOMMENDED_IV_LEN {
            return Ok(-1);
        }
        let Ok(cipher) = Aes256Gcm::new_from_slice(&key) else {
            return Ok(-1);
        };
        let Ok(tag) =
            cipher.encrypt_in_place_detached(GenericArray::from_slice(&iv), &aad, &mut buffer)
        else {
            return Ok(-1);
        };

        self.store(args[7], &buffer)?;
        self.store(args[8], &tag)?;
        Ok(args[6])
    }

    fn decrypt(&mut self, args: &[i32]) -> Result<i32, SandboxError> {
        let key = self.load(args[0], AEAD_KEY_LEN as i32)?;
        let iv = self.load(args[1], args[2])?;
        let aad = self.load(args[3], args[4])?;
        let mut buffer = self.load(args[5], args[6])?;
        let tag = self.load(args[7], AEAD_TAG_LEN as i32)?;

        if iv.len() != AEAD_RECOMMENDED_IV_LEN {
            return Ok(-1);
        }
        let Ok(cipher) = Aes256Gcm::new_from_slice(&key) else {
            return Ok(-1);
        };
        if cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                &aad,
                &mut buffer,
                GenericArray::from_slice(&tag),
            )
            .is_err()
        {
            return Ok(-1);
        }

        self.store(args[8], &buffer)?;
        Ok(args[6])
    }
}

impl Sandbox for SimSandbox {
    type Export = EntryPoint;

    fn bind(&mut self, symbol: &str, arity: usize) -> Option<EntryPoint> {
        self.exports.get(symbol).copied().filter(|entry| entry.arity() == arity)
    }

    fn allocate(&mut self, len: usize) -> Result<u32, SandboxError> {
        let size = len.max(1);
        let offset = self.find_free(size).ok_or(SandboxError::AllocationFailed { len })?;

        self.live.insert(offset as u32, size);
        self.stats.allocations += 1;
        Ok(offset as u32)
    }

    fn release(&mut self, offset: u32) -> Result<(), SandboxError> {
        if self.live.remove(&offset).is_none() {
            self.stats.invalid_releases += 1;
            tracing::warn!(offset, "release of an offset that is not allocated");
            return Err(SandboxError::Trap(format!("invalid free of offset {offset}")));
        }
        self.stats.releases += 1;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), SandboxError> {
        let start = offset as usize;
        let dest = self
            .memory
            .get_mut(start..start + bytes.len())
            .ok_or(SandboxError::OutOfBounds { offset, len: bytes.len() })?;
        dest.copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, offset: u32, dest: &mut [u8]) -> Result<(), SandboxError> {
        let start = offset as usize;
        let src = self
            .memory
            .get(start..start + dest.len())
            .ok_or(SandboxError::OutOfBounds { offset, len: dest.len() })?;
        dest.copy_from_slice(src);
        Ok(())
    }

    fn invoke(&mut self, export: &EntryPoint, args: &[i32]) -> Result<i32, SandboxError> {
        self.stats.calls += 1;
        match self.faults.get(export) {
            Some(Fault::Trap) => Err(SandboxError::Trap(format!("{} trapped", export.symbol()))),
            Some(Fault::Status(status)) => Ok(*status),
            None => self.call(*export, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_reuses_released_space() {
        let mut sandbox = SimModule::new().build();

        let a = sandbox.allocate(16).unwrap();
        let b = sandbox.allocate(16).unwrap();
        sandbox.release(a).unwrap();
        let c = sandbox.allocate(8).unwrap();

        assert_eq!(c, a, "first fit should reuse the hole left by a");
        assert!(b > a);
        assert_eq!(sandbox.live_allocations(), 2);
    }

    #[test]
    fn allocator_never_returns_null() {
        let mut sandbox = SimModule::new().build();
        assert_ne!(sandbox.allocate(1).unwrap(), 0);
    }

    #[test]
    fn memory_limit_is_enforced() {
        let mut sandbox = SimModule::new().with_memory_limit(64).build();

        assert!(sandbox.allocate(32).is_ok());
        assert_eq!(sandbox.allocate(32), Err(SandboxError::AllocationFailed { len: 32 }));
    }

    #[test]
    fn double_release_is_detected() {
        let mut sandbox = SimModule::new().build();
        let offset = sandbox.allocate(4).unwrap();

        sandbox.release(offset).unwrap();
        assert!(sandbox.release(offset).is_err());
        assert_eq!(sandbox.stats().invalid_releases, 1);
    }

    #[test]
    fn prefix_and_exclusion_shape_the_export_table() {
        let mut sandbox =
            SimModule::new().with_prefix("_").without(EntryPoint::Sha512Digest).build();

        assert_eq!(sandbox.bind("_sha256_digest", 3), Some(EntryPoint::Sha256Digest));
        assert_eq!(sandbox.bind("_sha256_digest", 2), None);
        assert_eq!(sandbox.bind("sha256_digest", 3), None);
        assert_eq!(sandbox.bind("_sha512_digest", 3), None);
    }

    #[test]
    fn wrong_arity_traps() {
        let mut sandbox = SimModule::new().build();
        assert!(matches!(
            sandbox.invoke(&EntryPoint::Sha256Digest, &[8, 0]),
            Err(SandboxError::Trap(_))
        ));
    }

    #[test]
    fn pbkdf2_rejects_non_positive_parameters() {
        let mut sandbox = SimModule::new().build();
        let out = sandbox.allocate(32).unwrap() as i32;

        let status = sandbox.invoke(&EntryPoint::Pbkdf2HmacSha256, &[out, 0, out, 0, 0, out, 32]);
        assert_eq!(status, Ok(0));
        let status = sandbox.invoke(&EntryPoint::Pbkdf2HmacSha256, &[out, 0, out, 0, 1, out, -1]);
        assert_eq!(status, Ok(0));
    }

    #[test]
    fn non_standard_iv_length_fails_encrypt() {
        let mut sandbox = SimModule::new().build();
        let buf = sandbox.allocate(64).unwrap() as i32;

        let status =
            sandbox.invoke(&EntryPoint::Aes256GcmEncrypt, &[buf, buf, 16, buf, 0, buf, 4, buf, buf]);
        assert_eq!(status, Ok(-1));
    }

    #[test]
    fn failing_instantiation_reports_error() {
        let module = SimModule::new().failing_instantiation();
        assert!(matches!(module.instantiate(), Err(SandboxError::Instantiation(_))));
    }
}
