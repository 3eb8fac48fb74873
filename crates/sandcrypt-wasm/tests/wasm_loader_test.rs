//! Loading a module from disk through the filesystem fetcher.

use std::path::PathBuf;

use sandcrypt_core::{
    Capability, Crypto, CryptoError, FetchError, ModuleFetcher, ModuleLoader, ModuleLocation,
};
use sandcrypt_wasm::WasmFetcher;
use tempfile::TempDir;

const MODULE: &str = r#"
(module
  (memory (export "memory") 1)
  (global $next (mut i32) (i32.const 1024))
  (func (export "malloc") (param $len i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $next))
    (global.set $next (i32.add (local.get $ptr) (i32.add (local.get $len) (i32.const 8))))
    (local.get $ptr))
  (func (export "free") (param i32))
  (func (export "openssl_rand_bytes") (param $ptr i32) (param $len i32) (result i32)
    (memory.fill (local.get $ptr) (i32.const 0x5A) (local.get $len))
    (i32.const 1))
  (func (export "sha256_digest") (param $data i32) (param $len i32) (param $out i32) (result i32)
    (memory.fill (local.get $out) (i32.const 0x11) (i32.const 32))
    (i32.const 1))
)
"#;

const DIGEST_ONLY_MODULE: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "malloc") (param i32) (result i32) (i32.const 1024))
  (func (export "free") (param i32))
  (func (export "sha256_digest") (param i32 i32 i32) (result i32) (i32.const 1))
)
"#;

/// Write `descriptor` and the compiled `wat` side by side, returning the
/// descriptor path.
fn install(dir: &TempDir, descriptor: &str, wat: &str) -> PathBuf {
    let path = dir.path().join("crypto_module.toml");
    std::fs::write(&path, descriptor).unwrap();
    std::fs::write(path.with_extension("wasm"), wat::parse_str(wat).unwrap()).unwrap();
    path
}

#[tokio::test]
async fn module_on_disk_becomes_active_provider() {
    let dir = TempDir::new().unwrap();
    let descriptor = install(&dir, "name = \"test-module\"\n", MODULE);
    let crypto = Crypto::new().unwrap();
    let loader = ModuleLoader::new(WasmFetcher::new());

    let loaded = crypto.load_native_backend(&loader, Some(descriptor.as_path())).await.unwrap();

    assert!(loaded);
    assert_eq!(crypto.active_provider_name(), "native");
    assert!(crypto.capabilities().contains(Capability::DigestSha256));
    assert_eq!(crypto.random_bytes(4).unwrap(), vec![0x5A; 4]);
    assert_eq!(crypto.digest_sha256(b"abc").unwrap(), [0x11; 32]);
    assert_eq!(
        crypto.digest_sha512(b"abc"),
        Err(CryptoError::CapabilityUnavailable { capability: Capability::DigestSha512 })
    );
}

#[tokio::test]
async fn missing_files_keep_platform_provider() {
    let dir = TempDir::new().unwrap();
    let crypto = Crypto::new().unwrap();
    let loader = ModuleLoader::new(WasmFetcher::new());

    let descriptor = dir.path().join("absent.toml");
    assert!(!crypto.load_native_backend(&loader, Some(descriptor.as_path())).await.unwrap());

    std::fs::write(&descriptor, "").unwrap();
    assert!(!crypto.load_native_backend(&loader, Some(descriptor.as_path())).await.unwrap());

    assert_eq!(crypto.active_provider_name(), "platform");
}

#[tokio::test]
async fn fetch_errors_name_the_failing_file() {
    let dir = TempDir::new().unwrap();
    let fetcher = WasmFetcher::new();

    let missing = ModuleLocation::from_descriptor(dir.path().join("absent.toml"));
    assert!(matches!(
        fetcher.fetch(&missing).await,
        Err(FetchError::NotFound { path }) if path == missing.descriptor
    ));

    let malformed = dir.path().join("malformed.toml");
    std::fs::write(&malformed, "[limits]\nmax_memory_bytes = \"lots\"\n").unwrap();
    assert!(matches!(
        fetcher.fetch(&ModuleLocation::from_descriptor(&malformed)).await,
        Err(FetchError::Descriptor { .. })
    ));

    let garbage = dir.path().join("garbage.toml");
    std::fs::write(&garbage, "").unwrap();
    std::fs::write(garbage.with_extension("wasm"), b"\0asm not really").unwrap();
    assert!(matches!(
        fetcher.fetch(&ModuleLocation::from_descriptor(&garbage)).await,
        Err(FetchError::Compile { path, .. }) if path == garbage.with_extension("wasm")
    ));
}

#[tokio::test]
async fn descriptor_limit_failure_keeps_platform_provider() {
    let dir = TempDir::new().unwrap();
    let descriptor = install(&dir, "[limits]\nmax_memory_bytes = 1024\n", MODULE);
    let crypto = Crypto::new().unwrap();
    let loader = ModuleLoader::new(WasmFetcher::new());

    assert!(!crypto.load_native_backend(&loader, Some(descriptor.as_path())).await.unwrap());
    assert!(!loader.has_factory(), "module that failed to instantiate is not cached");
    assert_eq!(crypto.active_provider_name(), "platform");
}

#[tokio::test]
async fn reload_after_limit_failure_picks_up_fixed_descriptor() {
    let dir = TempDir::new().unwrap();
    let descriptor = install(&dir, "[limits]\nmax_memory_bytes = 1024\n", MODULE);
    let crypto = Crypto::new().unwrap();
    let loader = ModuleLoader::new(WasmFetcher::new());
    assert!(!crypto.load_native_backend(&loader, Some(descriptor.as_path())).await.unwrap());

    std::fs::write(&descriptor, "name = \"test-module\"\n").unwrap();
    assert!(crypto.load_native_backend(&loader, Some(descriptor.as_path())).await.unwrap());
    assert!(loader.has_factory());
    assert_eq!(crypto.active_provider_name(), "native");
}

#[tokio::test]
async fn module_without_random_fill_is_rejected() {
    let dir = TempDir::new().unwrap();
    let descriptor = install(&dir, "", DIGEST_ONLY_MODULE);
    let crypto = Crypto::new().unwrap();
    let loader = ModuleLoader::new(WasmFetcher::new());

    let result = crypto.load_native_backend(&loader, Some(descriptor.as_path())).await;

    assert_eq!(result, Err(CryptoError::MissingCapability { entry_point: "openssl_rand_bytes" }));
    assert_eq!(crypto.active_provider_name(), "platform");
}
