//! Filesystem fetcher and compiled-module factory.

use std::{future::Future, io, path::Path};

use sandcrypt_core::{FetchError, ModuleFactory, ModuleFetcher, ModuleLocation, SandboxError};
use wasmtime::{Engine, Module};

use crate::{descriptor::ModuleDescriptor, sandbox::WasmSandbox};

/// A compiled module plus the descriptor it was loaded with.
///
/// Cheap to clone; every instantiation gets its own store and memory.
#[derive(Clone)]
pub struct WasmModuleFactory {
    engine: Engine,
    module: Module,
    descriptor: ModuleDescriptor,
}

impl WasmModuleFactory {
    /// Compile `bytes` (binary or, with wasmtime's `wat` feature, text).
    pub fn compile(
        engine: &Engine,
        bytes: &[u8],
        descriptor: ModuleDescriptor,
    ) -> Result<Self, wasmtime::Error> {
        let module = Module::new(engine, bytes)?;
        Ok(Self { engine: engine.clone(), module, descriptor })
    }

    /// Descriptor the module was loaded with.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }
}

impl ModuleFactory for WasmModuleFactory {
    type Sandbox = WasmSandbox;

    fn instantiate(&self) -> Result<WasmSandbox, SandboxError> {
        WasmSandbox::instantiate(&self.engine, &self.module, &self.descriptor)
    }
}

impl std::fmt::Debug for WasmModuleFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmModuleFactory").field("descriptor", &self.descriptor).finish_non_exhaustive()
    }
}

/// Reads the descriptor and module binary from disk and compiles the module.
///
/// Compilation runs on tokio's blocking pool.
#[derive(Clone, Default)]
pub struct WasmFetcher {
    engine: Engine,
}

impl WasmFetcher {
    /// Fetcher with a default engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetcher compiling with an existing engine.
    pub fn with_engine(engine: Engine) -> Self {
        Self { engine }
    }
}

impl ModuleFetcher for WasmFetcher {
    type Factory = WasmModuleFactory;

    fn fetch(
        &self,
        location: &ModuleLocation,
    ) -> impl Future<Output = Result<WasmModuleFactory, FetchError>> + Send {
        let engine = self.engine.clone();
        let location = location.clone();

        async move {
            let text = tokio::fs::read_to_string(&location.descriptor)
                .await
                .map_err(|e| read_error(&location.descriptor, e))?;
            let descriptor = ModuleDescriptor::parse(&text).map_err(|e| FetchError::Descriptor {
                path: location.descriptor.clone(),
                reason: e.to_string(),
            })?;

            let bytes =
                tokio::fs::read(&location.binary).await.map_err(|e| read_error(&location.binary, e))?;
            tracing::debug!(
                module = %descriptor.name,
                binary = %location.binary.display(),
                size = bytes.len(),
                "compiling wasm module"
            );

            let binary = location.binary.clone();
            tokio::task::spawn_blocking(move || WasmModuleFactory::compile(&engine, &bytes, descriptor))
                .await
                .map_err(|e| FetchError::Compile { path: binary.clone(), reason: e.to_string() })?
                .map_err(|e| FetchError::Compile { path: binary, reason: format!("{e:#}") })
        }
    }
}

impl std::fmt::Debug for WasmFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmFetcher").finish_non_exhaustive()
    }
}

fn read_error(path: &Path, source: io::Error) -> FetchError {
    match source.kind() {
        io::ErrorKind::NotFound => FetchError::NotFound { path: path.to_path_buf() },
        _ => FetchError::Io { path: path.to_path_buf(), source },
    }
}
