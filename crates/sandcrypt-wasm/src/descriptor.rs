//! Module descriptor.
//!
//! A small TOML file next to the compiled module naming the exports the
//! sandbox needs besides the crypto entry points, and the store limits the
//! instance runs under. Every field has a default, so an empty file
//! describes a conventional C toolchain build:
//!
//! ```toml
//! name = "openssl-crypto"
//!
//! [exports]
//! memory = "memory"
//! malloc = "malloc"
//! free = "free"
//! initialize = "_initialize"
//!
//! [limits]
//! max_memory_bytes = 67108864
//! ```

use serde::{Deserialize, Serialize};

/// Default ceiling on the guest's linear memory (64 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 64 * 1024 * 1024;

/// Parsed module descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Label used in logs
    #[serde(default = "default_name")]
    pub name: String,
    /// Names of the support exports
    #[serde(default)]
    pub exports: ExportNames,
    /// Store limits
    #[serde(default)]
    pub limits: ModuleLimits,
}

/// Export names of the guest's memory, allocator and initializer.
///
/// Allocator names are also tried with a leading underscore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportNames {
    /// Linear memory
    #[serde(default = "default_memory")]
    pub memory: String,
    /// `int malloc(int len)`
    #[serde(default = "default_malloc")]
    pub malloc: String,
    /// `void free(int ptr)`
    #[serde(default = "default_free")]
    pub free: String,
    /// Reactor initializer, called once after instantiation if exported
    #[serde(default = "default_initialize")]
    pub initialize: String,
}

/// Resource limits applied to each instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLimits {
    /// Maximum linear memory in bytes
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,
}

impl ModuleDescriptor {
    /// Parse a descriptor from TOML text.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<Self>(text)
    }
}

impl Default for ModuleDescriptor {
    fn default() -> Self {
        Self { name: default_name(), exports: ExportNames::default(), limits: ModuleLimits::default() }
    }
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            malloc: default_malloc(),
            free: default_free(),
            initialize: default_initialize(),
        }
    }
}

impl Default for ModuleLimits {
    fn default() -> Self {
        Self { max_memory_bytes: default_max_memory_bytes() }
    }
}

fn default_name() -> String {
    "crypto-module".to_string()
}

fn default_memory() -> String {
    "memory".to_string()
}

fn default_malloc() -> String {
    "malloc".to_string()
}

fn default_free() -> String {
    "free".to_string()
}

fn default_initialize() -> String {
    "_initialize".to_string()
}

fn default_max_memory_bytes() -> usize {
    DEFAULT_MAX_MEMORY_BYTES
}
