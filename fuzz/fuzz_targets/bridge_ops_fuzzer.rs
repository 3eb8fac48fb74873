//! Fuzz target for the native backend bridge
//!
//! Drives the facade over a simulated native module with arbitrary
//! operation sequences, memory ceilings and injected entry-point faults.
//!
//! # Strategy
//!
//! - Arbitrary lengths: Zero, tiny and larger-than-memory operands
//! - Memory pressure: Ceilings small enough that staging fails midway
//! - Faults: Traps and bogus statuses on any entry point
//! - Round trips: Seal followed by open of the same message
//!
//! # Invariants
//!
//! - Every region is released exactly once after every operation
//! - Seal then open returns the plaintext whenever both succeed unfaulted
//! - NEVER panic on any input

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sandcrypt_core::EntryPoint;
use sandcrypt_harness::{Fault, SimModule, check_regions, native_crypto};

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    memory_kib: u8,
    faults: Vec<(u8, FaultKind)>,
    ops: Vec<Op>,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum FaultKind {
    Trap,
    Status(i32),
}

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Random(u16),
    Sha256(Vec<u8>),
    Sha512(Vec<u8>),
    Kdf { sha512: bool, password: Vec<u8>, salt: Vec<u8>, iterations: u8, key_len: u16 },
    RoundTrip { key: [u8; 32], iv: Vec<u8>, aad: Vec<u8>, plaintext: Vec<u8> },
    Open { key: Vec<u8>, iv: Vec<u8>, ciphertext: Vec<u8>, tag: Vec<u8> },
}

fuzz_target!(|scenario: Scenario| {
    let mut module =
        SimModule::new().with_memory_limit((usize::from(scenario.memory_kib) + 1) * 1024);
    let faulted = !scenario.faults.is_empty();
    for (index, kind) in scenario.faults.iter().take(4) {
        let entry_point = EntryPoint::ALL[usize::from(*index) % EntryPoint::ALL.len()];
        let fault = match kind {
            FaultKind::Trap => Fault::Trap,
            FaultKind::Status(status) => Fault::Status(*status),
        };
        module = module.with_fault(entry_point, fault);
    }

    let Ok((crypto, backend)) = native_crypto(&module) else {
        return;
    };

    for op in scenario.ops.into_iter().take(32) {
        match op {
            Op::Random(len) => {
                if let Ok(bytes) = crypto.random_bytes(usize::from(len)) {
                    assert_eq!(bytes.len(), usize::from(len));
                }
            }
            Op::Sha256(data) => {
                let _ = crypto.digest_sha256(&data);
            }
            Op::Sha512(data) => {
                let _ = crypto.digest_sha512(&data);
            }
            Op::Kdf { sha512, password, salt, iterations, key_len } => {
                let iterations = u32::from(iterations % 4);
                let key_len = usize::from(key_len % 512);
                let result = if sha512 {
                    crypto.kdf_hmac_sha512(&password, &salt, iterations, key_len)
                } else {
                    crypto.kdf_hmac_sha256(&password, &salt, iterations, key_len)
                };
                if let Ok(key) = result {
                    assert_eq!(key.len(), key_len);
                }
            }
            Op::RoundTrip { key, iv, aad, plaintext } => {
                if let Ok(sealed) = crypto.aead_seal(&key, &iv, &aad, &plaintext) {
                    assert_eq!(sealed.ciphertext.len(), plaintext.len());
                    let opened = crypto.aead_open(&key, &iv, &aad, &sealed.ciphertext, &sealed.tag);
                    if !faulted {
                        if let Ok(opened) = opened {
                            assert_eq!(&*opened, &plaintext);
                        }
                    }
                }
            }
            Op::Open { key, iv, ciphertext, tag } => {
                let _ = crypto.aead_open(&key, &iv, &[], &ciphertext, &tag);
            }
        }

        if let Err(violation) = check_regions(&backend) {
            panic!("region invariant violated: {violation}");
        }
    }
});
