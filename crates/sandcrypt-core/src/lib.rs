//! Sandcrypt core
//!
//! Secure random bytes, SHA-256/512, PBKDF2-HMAC-SHA256/512 and AES-256-GCM
//! behind one facade, with the computation supplied by an interchangeable
//! provider: the host's secure random source, or a cryptographic module
//! running inside a sandbox.
//!
//! # Architecture
//!
//! ```text
//! Crypto ──► ProviderRegistry ──► PlatformRandom
//!                      ▲     └──► NativeBackend ──► Scratch ──► Sandbox
//!                      │
//!              ModuleLoader ──► ModuleFetcher ──► ModuleFactory
//! ```
//!
//! # Components
//!
//! - [`Crypto`]: Argument validation, capability checks, dispatch
//! - [`ProviderRegistry`]: The single active provider
//! - [`Provider`]: Capability bundle contract
//! - [`PlatformRandom`]: Random-only provider over the host CSPRNG
//! - [`NativeBackend`]: Provider over a sandboxed native module
//! - [`Sandbox`] / [`Scratch`]: Linear-memory bridge
//! - [`ModuleLoader`]: Best-effort module discovery and installation
//!
//! The crate never touches a concrete sandbox runtime. `sandcrypt-wasm`
//! implements [`Sandbox`] and [`ModuleFetcher`] on wasmtime.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod bridge;
pub mod capability;
pub mod error;
mod facade;
pub mod loader;
pub mod native;
pub mod platform;
pub mod provider;
mod registry;

pub use bridge::{Region, Sandbox, Scratch};
pub use capability::{Capability, CapabilitySet, DigestKind, KdfKind};
pub use error::{CryptoError, SandboxError};
pub use facade::Crypto;
pub use loader::{FetchError, LoaderConfig, ModuleFactory, ModuleFetcher, ModuleLoader, ModuleLocation};
pub use native::{EntryPoint, NativeBackend};
pub use platform::{EntropyError, EntropySource, OsEntropy, PlatformRandom};
pub use provider::{
    AEAD_KEY_LEN, AEAD_RECOMMENDED_IV_LEN, AEAD_TAG_LEN, AeadKey, AeadSealed, AeadTag, MAX_RANDOM_LEN, Provider,
};
pub use registry::ProviderRegistry;
pub use zeroize::Zeroizing;
