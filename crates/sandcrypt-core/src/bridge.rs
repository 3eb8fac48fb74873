//! Linear-memory bridge.
//!
//! Moves byte buffers into and out of a sandboxed module's linear memory.
//! [`Sandbox`] is the seam a runtime implements (wasmtime in production, a
//! simulated module in tests); [`Scratch`] is the only code that sequences
//! allocate → write → invoke → read → release against it.
//!
//! # Invariants
//!
//! - Every region allocated through a [`Scratch`] is released exactly once,
//!   either explicitly via [`Scratch::release`] or when the scratch is
//!   dropped. This holds on early returns, `?` propagation and unwinding.
//! - Every region is zero-filled before release, so operands never linger
//!   in sandbox memory after an operation.
//! - A [`Region`] cannot be cloned and is consumed by release, so
//!   use-after-release is a type error.
//! - A scratch borrows the sandbox mutably for its whole lifetime, so two
//!   operations can never interleave on the same memory.

use crate::error::SandboxError;

/// A sandboxed module instance with linear memory.
///
/// Offsets are 32-bit guest pointers. Implementations never hand out
/// offset `0` for a successful allocation.
pub trait Sandbox: Send {
    /// Resolved, callable entry point.
    type Export: Send + Sync + 'static;

    /// Resolve an exported function by symbol. `None` if absent or if its
    /// signature is not exactly `arity` `i32` parameters returning one
    /// `i32`.
    fn bind(&mut self, symbol: &str, arity: usize) -> Option<Self::Export>;

    /// Allocate `len` bytes, returning the guest offset.
    fn allocate(&mut self, len: usize) -> Result<u32, SandboxError>;

    /// Return an allocation to the guest allocator.
    fn release(&mut self, offset: u32) -> Result<(), SandboxError>;

    /// Copy `bytes` into guest memory at `offset`.
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), SandboxError>;

    /// Copy guest memory at `offset` into `dest`.
    fn read(&self, offset: u32, dest: &mut [u8]) -> Result<(), SandboxError>;

    /// Call `export` with 32-bit integer arguments, returning its status.
    fn invoke(&mut self, export: &Self::Export, args: &[i32]) -> Result<i32, SandboxError>;

    /// Overwrite `len` bytes at `offset` with zeros.
    fn zero(&mut self, offset: u32, len: usize) -> Result<(), SandboxError> {
        self.write(offset, &vec![0u8; len])
    }
}

/// A live allocation inside sandbox memory.
///
/// Only a [`Scratch`] creates regions, and only a [`Scratch`] consumes them.
#[derive(Debug, PartialEq, Eq)]
pub struct Region {
    offset: u32,
    len: usize,
}

impl Region {
    /// Guest pointer, as passed across the native calling convention.
    pub fn ptr(&self) -> i32 {
        self.offset as i32
    }

    /// Usable length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length operands (still backed by a valid pointer).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length as a native `int`. Callers check lengths against `i32::MAX`
    /// before staging, so this never truncates.
    pub fn len_arg(&self) -> i32 {
        self.len as i32
    }
}

/// Scoped acquisition of sandbox memory for one operation.
///
/// Dropping a scratch releases (and zeroes) every region still held.
pub struct Scratch<'s, S: Sandbox> {
    sandbox: &'s mut S,
    /// (offset, backing size) of every region not yet released
    live: Vec<(u32, usize)>,
}

impl<'s, S: Sandbox> Scratch<'s, S> {
    /// Begin an operation against `sandbox`.
    pub fn new(sandbox: &'s mut S) -> Self {
        Self { sandbox, live: Vec::with_capacity(8) }
    }

    /// Allocate a region and copy `bytes` into it.
    pub fn stage(&mut self, bytes: &[u8]) -> Result<Region, SandboxError> {
        let region = self.allocate(bytes.len())?;
        if !bytes.is_empty() {
            self.sandbox.write(region.offset, bytes)?;
        }
        Ok(region)
    }

    /// Allocate a zero-filled output region of `len` bytes.
    pub fn reserve(&mut self, len: usize) -> Result<Region, SandboxError> {
        let region = self.allocate(len)?;
        self.sandbox.zero(region.offset, backing_len(len))?;
        Ok(region)
    }

    /// Call a native entry point.
    pub fn invoke(&mut self, export: &S::Export, args: &[i32]) -> Result<i32, SandboxError> {
        self.sandbox.invoke(export, args)
    }

    /// Copy the first `len` bytes of `region` out of the sandbox.
    pub fn read(&self, region: &Region, len: usize) -> Result<Vec<u8>, SandboxError> {
        if len > region.len {
            return Err(SandboxError::OutOfBounds { offset: region.offset, len });
        }

        let mut out = vec![0u8; len];
        if len > 0 {
            self.sandbox.read(region.offset, &mut out)?;
        }
        Ok(out)
    }

    /// Copy exactly `N` bytes of `region` out of the sandbox.
    pub fn read_array<const N: usize>(&self, region: &Region) -> Result<[u8; N], SandboxError> {
        if N > region.len {
            return Err(SandboxError::OutOfBounds { offset: region.offset, len: N });
        }

        let mut out = [0u8; N];
        self.sandbox.read(region.offset, &mut out)?;
        Ok(out)
    }

    /// Zero and release `region` now rather than at the end of the scope.
    pub fn release(&mut self, region: Region) {
        if let Some(index) = self.live.iter().position(|(offset, _)| *offset == region.offset) {
            let (offset, size) = self.live.swap_remove(index);
            self.free(offset, size);
        }
    }

    /// Number of regions currently held.
    pub fn held(&self) -> usize {
        self.live.len()
    }

    fn allocate(&mut self, len: usize) -> Result<Region, SandboxError> {
        let size = backing_len(len);
        let offset = self.sandbox.allocate(size)?;
        if offset == 0 {
            return Err(SandboxError::AllocationFailed { len: size });
        }

        self.live.push((offset, size));
        Ok(Region { offset, len })
    }

    fn free(&mut self, offset: u32, size: usize) {
        if let Err(e) = self.sandbox.zero(offset, size) {
            tracing::warn!(offset, size, error = %e, "failed to scrub sandbox region");
        }
        if let Err(e) = self.sandbox.release(offset) {
            tracing::warn!(offset, size, error = %e, "failed to release sandbox region");
        }
    }
}

impl<S: Sandbox> Drop for Scratch<'_, S> {
    fn drop(&mut self) {
        for (offset, size) in std::mem::take(&mut self.live) {
            self.free(offset, size);
        }
    }
}

/// Zero-length operands still get one byte so the guest sees a valid pointer.
fn backing_len(len: usize) -> usize {
    len.max(1)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;

    /// Minimal bump-allocated sandbox that records every release.
    #[derive(Default)]
    struct Recording {
        memory: Vec<u8>,
        live: BTreeMap<u32, usize>,
        released: Vec<u32>,
        next: u32,
        capacity: usize,
    }

    impl Recording {
        fn with_capacity(capacity: usize) -> Self {
            Self { memory: vec![0xEE; capacity], next: 8, capacity, ..Self::default() }
        }
    }

    impl Sandbox for Recording {
        type Export = ();

        fn bind(&mut self, _symbol: &str, _arity: usize) -> Option<()> {
            Some(())
        }

        fn allocate(&mut self, len: usize) -> Result<u32, SandboxError> {
            let offset = self.next;
            if offset as usize + len > self.capacity {
                return Err(SandboxError::AllocationFailed { len });
            }
            self.next += len as u32;
            self.live.insert(offset, len);
            Ok(offset)
        }

        fn release(&mut self, offset: u32) -> Result<(), SandboxError> {
            self.live.remove(&offset);
            self.released.push(offset);
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), SandboxError> {
            let start = offset as usize;
            self.memory[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }

        fn read(&self, offset: u32, dest: &mut [u8]) -> Result<(), SandboxError> {
            let start = offset as usize;
            dest.copy_from_slice(&self.memory[start..start + dest.len()]);
            Ok(())
        }

        fn invoke(&mut self, _export: &(), args: &[i32]) -> Result<i32, SandboxError> {
            // Copy args[1] bytes from args[0] to args[2]
            let (src, len, dst) = (args[0] as usize, args[1] as usize, args[2] as usize);
            self.memory.copy_within(src..src + len, dst);
            Ok(1)
        }
    }

    #[test]
    fn stage_invoke_read_roundtrip() {
        let mut sandbox = Recording::with_capacity(256);
        {
            let mut scratch = Scratch::new(&mut sandbox);
            let input = scratch.stage(b"hello").unwrap();
            let output = scratch.reserve(5).unwrap();

            let status = scratch.invoke(&(), &[input.ptr(), input.len_arg(), output.ptr()]).unwrap();
            assert_eq!(status, 1);
            assert_eq!(scratch.read(&output, 5).unwrap(), b"hello");
        }
        assert!(sandbox.live.is_empty(), "scratch drop must release every region");
        assert_eq!(sandbox.released.len(), 2);
    }

    #[test]
    fn explicit_release_is_not_repeated_on_drop() {
        let mut sandbox = Recording::with_capacity(256);
        {
            let mut scratch = Scratch::new(&mut sandbox);
            let input = scratch.stage(b"key").unwrap();
            let _output = scratch.reserve(4).unwrap();

            scratch.release(input);
            assert_eq!(scratch.held(), 1);
        }
        assert_eq!(sandbox.released.len(), 2, "each region released exactly once");
        assert!(sandbox.live.is_empty());
    }

    #[test]
    fn regions_are_scrubbed_before_release() {
        let mut sandbox = Recording::with_capacity(64);
        let offset;
        {
            let mut scratch = Scratch::new(&mut sandbox);
            let secret = scratch.stage(&[0xAB; 16]).unwrap();
            offset = secret.ptr() as usize;
        }
        assert_eq!(&sandbox.memory[offset..offset + 16], &[0u8; 16]);
    }

    #[test]
    fn reserved_output_is_zero_filled() {
        let mut sandbox = Recording::with_capacity(64);
        let mut scratch = Scratch::new(&mut sandbox);

        let output = scratch.reserve(8).unwrap();
        assert_eq!(scratch.read(&output, 8).unwrap(), vec![0u8; 8]);
    }

    #[test]
    fn empty_operand_gets_valid_pointer() {
        let mut sandbox = Recording::with_capacity(64);
        let mut scratch = Scratch::new(&mut sandbox);

        let aad = scratch.stage(&[]).unwrap();
        assert!(aad.is_empty());
        assert_ne!(aad.ptr(), 0);
        assert_eq!(aad.len_arg(), 0);
    }

    #[test]
    fn allocation_failure_releases_earlier_regions() {
        let mut sandbox = Recording::with_capacity(32);
        {
            let mut scratch = Scratch::new(&mut sandbox);
            let _first = scratch.stage(&[1; 16]).unwrap();
            let second = scratch.reserve(64);
            assert_eq!(second, Err(SandboxError::AllocationFailed { len: 64 }));
        }
        assert!(sandbox.live.is_empty());
    }

    #[test]
    fn read_beyond_region_is_rejected() {
        let mut sandbox = Recording::with_capacity(64);
        let mut scratch = Scratch::new(&mut sandbox);

        let region = scratch.reserve(4).unwrap();
        assert!(matches!(scratch.read(&region, 5), Err(SandboxError::OutOfBounds { .. })));
        assert!(matches!(scratch.read_array::<16>(&region), Err(SandboxError::OutOfBounds { .. })));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Stage(usize),
        Reserve(usize),
        ReleaseOldest,
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => (0usize..48).prop_map(Step::Stage),
            3 => (0usize..48).prop_map(Step::Reserve),
            1 => Just(Step::ReleaseOldest),
        ]
    }

    proptest! {
        /// Every allocation is released exactly once, however the scope
        /// ends and however many allocations fail.
        #[test]
        fn prop_scratch_releases_every_region(steps in prop::collection::vec(step_strategy(), 0..40)) {
            let mut sandbox = Recording::with_capacity(512);
            let mut allocated = 0usize;
            {
                let mut scratch = Scratch::new(&mut sandbox);
                let mut held = std::collections::VecDeque::new();
                for step in steps {
                    let region = match step {
                        Step::Stage(len) => scratch.stage(&vec![0x5C; len]),
                        Step::Reserve(len) => scratch.reserve(len),
                        Step::ReleaseOldest => {
                            if let Some(region) = held.pop_front() {
                                scratch.release(region);
                            }
                            continue;
                        },
                    };
                    if let Ok(region) = region {
                        allocated += 1;
                        held.push_back(region);
                    }
                }
            }

            prop_assert!(sandbox.live.is_empty());
            prop_assert_eq!(sandbox.released.len(), allocated);
            prop_assert!(sandbox.memory[8..].iter().all(|b| *b == 0 || *b == 0xEE));
        }
    }
}
