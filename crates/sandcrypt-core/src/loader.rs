//! Module loader.
//!
//! Best-effort discovery of the sandboxed native module. A loader owns a
//! factory slot: once a fetched module has instantiated (or a factory was
//! preinstalled) later loads reuse it instead of touching the filesystem
//! again. A module that fails to instantiate is not cached, so a later load
//! can fetch a different one.
//!
//! Loading never fails loudly for a missing or broken module. The registry
//! keeps its current provider and [`ModuleLoader::load`] returns
//! `Ok(false)`. Only a module that instantiates but cannot back a provider
//! (e.g. [`CryptoError::MissingCapability`]) is reported as an error.
//!
//! The provider swap is the last step of a load, so dropping the future at
//! any await point leaves the registry untouched.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use thiserror::Error;

use crate::{
    bridge::Sandbox,
    error::{CryptoError, SandboxError},
    native::NativeBackend,
    provider::Provider,
    registry::ProviderRegistry,
};

/// Conventional descriptor location, relative to the working directory.
pub const DEFAULT_DESCRIPTOR_LOCATION: &str = "native/crypto_module.toml";

/// Extension of the compiled module next to its descriptor.
pub const MODULE_BINARY_EXTENSION: &str = "wasm";

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Descriptor location used when `load` gets no hint
    pub descriptor: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { descriptor: PathBuf::from(DEFAULT_DESCRIPTOR_LOCATION) }
    }
}

/// Where a module lives: its descriptor and the companion binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLocation {
    /// Module descriptor
    pub descriptor: PathBuf,
    /// Compiled module, the descriptor path with its extension substituted
    pub binary: PathBuf,
}

impl ModuleLocation {
    /// Derive a location from a descriptor path.
    pub fn from_descriptor(descriptor: impl Into<PathBuf>) -> Self {
        let descriptor = descriptor.into();
        let binary = descriptor.with_extension(MODULE_BINARY_EXTENSION);
        Self { descriptor, binary }
    }
}

/// Why a module factory could not be obtained.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Nothing exists at the location.
    #[error("module not found at {}", path.display())]
    NotFound {
        /// Missing file
        path: PathBuf,
    },

    /// The location exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The descriptor is malformed.
    #[error("invalid module descriptor {}: {reason}", path.display())]
    Descriptor {
        /// Descriptor file
        path: PathBuf,
        /// Parser diagnostic
        reason: String,
    },

    /// The module binary could not be compiled.
    #[error("failed to compile module {}: {reason}", path.display())]
    Compile {
        /// Module binary
        path: PathBuf,
        /// Compiler diagnostic
        reason: String,
    },
}

/// A compiled module that can be instantiated into sandboxes.
pub trait ModuleFactory: Send + Sync + 'static {
    /// Sandbox produced by instantiation.
    type Sandbox: Sandbox + 'static;

    /// Create a fresh instance with its own linear memory.
    fn instantiate(&self) -> Result<Self::Sandbox, SandboxError>;
}

/// Obtains module factories from a location.
pub trait ModuleFetcher: Send + Sync {
    /// Factory produced by a successful fetch.
    type Factory: ModuleFactory;

    /// Fetch and compile the module at `location`.
    fn fetch(
        &self,
        location: &ModuleLocation,
    ) -> impl Future<Output = Result<Self::Factory, FetchError>> + Send;
}

/// Installs the native backend into a registry.
pub struct ModuleLoader<F: ModuleFetcher> {
    fetcher: F,
    config: LoaderConfig,
    factory: OnceLock<Arc<F::Factory>>,
}

impl<F: ModuleFetcher> ModuleLoader<F> {
    /// Loader with the default configuration.
    pub fn new(fetcher: F) -> Self {
        Self::with_config(fetcher, LoaderConfig::default())
    }

    /// Loader with an explicit configuration.
    pub fn with_config(fetcher: F, config: LoaderConfig) -> Self {
        Self { fetcher, config, factory: OnceLock::new() }
    }

    /// Populate the factory slot so the next load skips fetching.
    ///
    /// Returns `false` if the slot was already populated.
    pub fn preinstall(&self, factory: F::Factory) -> bool {
        self.factory.set(Arc::new(factory)).is_ok()
    }

    /// True once a fetched factory has instantiated or one was preinstalled.
    pub fn has_factory(&self) -> bool {
        self.factory.get().is_some()
    }

    /// Loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load the native module and make it the active provider.
    ///
    /// `hint` overrides the configured descriptor location. Returns
    /// `Ok(true)` once the native backend is active and `Ok(false)` if no
    /// module could be obtained or instantiated, in which case `registry`
    /// is unchanged.
    ///
    /// # Errors
    ///
    /// Errors from binding an instantiated module, such as
    /// [`CryptoError::MissingCapability`].
    pub async fn load(
        &self,
        registry: &ProviderRegistry,
        hint: Option<&Path>,
    ) -> Result<bool, CryptoError> {
        let factory = match self.factory.get() {
            Some(factory) => Arc::clone(factory),
            None => {
                let descriptor = hint.map_or_else(|| self.config.descriptor.clone(), Path::to_path_buf);
                let location = ModuleLocation::from_descriptor(descriptor);

                match self.fetcher.fetch(&location).await {
                    Ok(factory) => Arc::new(factory),
                    Err(e) => {
                        tracing::warn!(
                            descriptor = %location.descriptor.display(),
                            error = %e,
                            "native module unavailable, keeping current provider"
                        );
                        return Ok(false);
                    },
                }
            },
        };

        let sandbox = match factory.instantiate() {
            Ok(sandbox) => sandbox,
            Err(e) => {
                tracing::warn!(error = %e, "native module instantiation failed, keeping current provider");
                return Ok(false);
            },
        };
        self.factory.get_or_init(|| Arc::clone(&factory));

        let backend = NativeBackend::bind(sandbox)?;
        let capabilities = backend.capabilities();
        registry.set_provider(Arc::new(backend))?;

        tracing::info!(?capabilities, "native backend installed");
        Ok(true)
    }
}

impl<F: ModuleFetcher> std::fmt::Debug for ModuleLoader<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("config", &self.config)
            .field("has_factory", &self.has_factory())
            .finish_non_exhaustive()
    }
}
