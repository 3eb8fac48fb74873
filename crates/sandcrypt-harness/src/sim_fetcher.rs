//! In-memory module fetcher.
//!
//! Serves [`SimModule`]s keyed by descriptor path, with optional latency so
//! loader cancellation can be tested under `tokio::time::pause`.

use std::{
    collections::HashMap,
    future::Future,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use sandcrypt_core::{FetchError, ModuleFetcher, ModuleLocation};

use crate::sim_module::SimModule;

/// Fetcher backed by a map of descriptor paths to modules.
#[derive(Debug, Clone, Default)]
pub struct SimFetcher {
    modules: HashMap<PathBuf, SimModule>,
    latency: Option<Duration>,
    fetches: Arc<AtomicUsize>,
}

impl SimFetcher {
    /// Fetcher that finds nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `module` for `descriptor`.
    #[must_use]
    pub fn serve(mut self, descriptor: impl Into<PathBuf>, module: SimModule) -> Self {
        self.modules.insert(descriptor.into(), module);
        self
    }

    /// Delay every fetch by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of fetches started so far, shared across clones.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl ModuleFetcher for SimFetcher {
    type Factory = SimModule;

    fn fetch(
        &self,
        location: &ModuleLocation,
    ) -> impl Future<Output = Result<SimModule, FetchError>> + Send {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let module = self.modules.get(&location.descriptor).cloned();
        let path = location.descriptor.clone();
        let latency = self.latency;

        async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            module.ok_or(FetchError::NotFound { path })
        }
    }
}
