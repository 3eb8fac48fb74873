//! wasmtime runtime for Sandcrypt's native backend.
//!
//! Implements the core crate's sandbox and loader seams on wasmtime:
//!
//! - [`WasmSandbox`]: One instance with a memory ceiling, behind
//!   [`sandcrypt_core::Sandbox`]
//! - [`WasmModuleFactory`]: A compiled module, behind
//!   [`sandcrypt_core::ModuleFactory`]
//! - [`WasmFetcher`]: Reads a descriptor and its `.wasm` companion from disk
//! - [`ModuleDescriptor`]: TOML export names and limits
//!
//! ```no_run
//! # async fn run() -> Result<(), sandcrypt_core::CryptoError> {
//! use sandcrypt_core::{Crypto, ModuleLoader};
//! use sandcrypt_wasm::WasmFetcher;
//!
//! let crypto = Crypto::new()?;
//! let loader = ModuleLoader::new(WasmFetcher::new());
//! if crypto.load_native_backend(&loader, None).await? {
//!     let _digest = crypto.digest_sha256(b"abc")?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod descriptor;
mod fetcher;
mod sandbox;

pub use descriptor::{ExportNames, ModuleDescriptor, ModuleLimits};
pub use fetcher::{WasmFetcher, WasmModuleFactory};
pub use sandbox::WasmSandbox;
