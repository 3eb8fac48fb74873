//! Fuzz target for module descriptor parsing
//!
//! # Invariants
//!
//! - Arbitrary text parses or fails cleanly
//! - NEVER panic on malformed TOML

#![no_main]

use libfuzzer_sys::fuzz_target;
use sandcrypt_wasm::ModuleDescriptor;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = ModuleDescriptor::parse(text);
    }
});
