//! Sandcrypt command-line tool.
//!
//! # Usage
//!
//! ```bash
//! # Random bytes from the host
//! sandcrypt random 32
//!
//! # Digest through the sandboxed module
//! sandcrypt --module native/crypto_module.toml sha256 "hello"
//!
//! # Seal, then open
//! sandcrypt -m native/crypto_module.toml seal --key $KEY --iv $IV "secret"
//! sandcrypt -m native/crypto_module.toml open --key $KEY --iv $IV --tag $TAG $CT
//! ```

use std::io;

use clap::Parser;
use sandcrypt_cli::{Cli, execute};
use sandcrypt_core::{Crypto, ModuleLoader};
use sandcrypt_wasm::WasmFetcher;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let crypto = Crypto::new()?;
    if let Some(descriptor) = &cli.module {
        let loader = ModuleLoader::new(WasmFetcher::new());
        if !crypto.load_native_backend(&loader, Some(descriptor)).await? {
            tracing::warn!(
                descriptor = %descriptor.display(),
                "native module not loaded, continuing with platform provider"
            );
        }
    }

    execute(&crypto, &cli.command, &mut io::stdin().lock(), &mut io::stdout().lock())?;
    Ok(())
}
