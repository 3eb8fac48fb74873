//! Sandcrypt command-line front end.
//!
//! Argument parsing and command execution live here so they can be tested
//! against any provider; `main.rs` only installs logging, loads the native
//! module and wires stdin/stdout.
//!
//! Binary arguments (keys, IVs, salts, ciphertext) are hex. Message
//! arguments are UTF-8 text unless `--hex` is given, and are read from stdin
//! when omitted.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

use std::{
    io::{self, Read, Write},
    path::PathBuf,
};

use clap::{Parser, Subcommand, ValueEnum};
use sandcrypt_core::{Crypto, CryptoError, Zeroizing};
use thiserror::Error;

/// Sandcrypt command line
#[derive(Parser, Debug)]
#[command(name = "sandcrypt")]
#[command(about = "Random bytes, digests, PBKDF2 and AES-256-GCM from a sandboxed crypto module")]
#[command(version)]
pub struct Cli {
    /// Module descriptor to load as the native backend
    ///
    /// Without it only random bytes (from the host) are available.
    #[arg(short, long, global = true)]
    pub module: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Operation to run
    #[command(subcommand)]
    pub command: Command,
}

/// Operations.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the active provider and its capabilities
    Info,

    /// Print random bytes
    Random {
        /// Number of bytes
        len: usize,
    },

    /// SHA-256 of a message
    Sha256(MessageArgs),

    /// SHA-512 of a message
    Sha512(MessageArgs),

    /// Derive a key with PBKDF2
    Pbkdf2 {
        /// Underlying HMAC hash
        #[arg(long, value_enum, default_value_t = KdfHash::Sha256)]
        hash: KdfHash,
        /// Password (UTF-8)
        #[arg(long)]
        password: String,
        /// Salt (hex)
        #[arg(long)]
        salt: String,
        /// Iteration count
        #[arg(long, default_value_t = 600_000)]
        iterations: u32,
        /// Derived key length in bytes
        #[arg(long, default_value_t = 32)]
        length: usize,
    },

    /// Encrypt with AES-256-GCM
    Seal {
        /// 32-byte key (hex)
        #[arg(long)]
        key: String,
        /// IV (hex), 12 bytes recommended
        #[arg(long)]
        iv: String,
        /// Additional authenticated data (hex)
        #[arg(long, default_value = "")]
        aad: String,
        /// Plaintext
        #[command(flatten)]
        message: MessageArgs,
    },

    /// Decrypt and verify with AES-256-GCM
    Open {
        /// 32-byte key (hex)
        #[arg(long)]
        key: String,
        /// IV (hex)
        #[arg(long)]
        iv: String,
        /// Additional authenticated data (hex)
        #[arg(long, default_value = "")]
        aad: String,
        /// 16-byte tag (hex)
        #[arg(long)]
        tag: String,
        /// Ciphertext (hex)
        ciphertext: String,
    },
}

/// A message given inline or on stdin.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct MessageArgs {
    /// Message; read from stdin when omitted
    pub message: Option<String>,
    /// Treat the message as hex
    #[arg(long)]
    pub hex: bool,
}

/// PBKDF2 hash selection.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfHash {
    /// HMAC-SHA256
    Sha256,
    /// HMAC-SHA512
    Sha512,
}

/// Command failures.
#[derive(Error, Debug)]
pub enum CliError {
    /// The operation itself failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A hex argument did not decode.
    #[error("{what} is not valid hex: {source}")]
    Hex {
        /// Argument name
        what: &'static str,
        /// Decoder error
        #[source]
        source: hex::FromHexError,
    },

    /// Reading input or writing output failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Run `command` against `crypto`, reading omitted messages from `input` and
/// writing results to `out`.
pub fn execute(
    crypto: &Crypto,
    command: &Command,
    input: &mut dyn Read,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        Command::Info => {
            writeln!(out, "provider: {}", crypto.active_provider_name())?;
            for capability in crypto.capabilities().iter() {
                writeln!(out, "  {capability}")?;
            }
        },
        Command::Random { len } => {
            writeln!(out, "{}", hex::encode(crypto.random_bytes(*len)?))?;
        },
        Command::Sha256(message) => {
            let data = message.resolve(input)?;
            writeln!(out, "{}", hex::encode(crypto.digest_sha256(&data)?))?;
        },
        Command::Sha512(message) => {
            let data = message.resolve(input)?;
            writeln!(out, "{}", hex::encode(crypto.digest_sha512(&data)?))?;
        },
        Command::Pbkdf2 { hash, password, salt, iterations, length } => {
            let salt = decode("salt", salt)?;
            let key = match hash {
                KdfHash::Sha256 => crypto.kdf_hmac_sha256(password.as_bytes(), &salt, *iterations, *length)?,
                KdfHash::Sha512 => crypto.kdf_hmac_sha512(password.as_bytes(), &salt, *iterations, *length)?,
            };
            writeln!(out, "{}", hex::encode(&*key))?;
        },
        Command::Seal { key, iv, aad, message } => {
            let key = decode_key(key)?;
            let plaintext = message.resolve(input)?;
            let sealed = crypto.aead_seal(&key, &decode("iv", iv)?, &decode("aad", aad)?, &plaintext)?;
            writeln!(out, "ciphertext: {}", hex::encode(&sealed.ciphertext))?;
            writeln!(out, "tag: {}", hex::encode(sealed.tag))?;
        },
        Command::Open { key, iv, aad, tag, ciphertext } => {
            let key = decode_key(key)?;
            let plaintext = crypto.aead_open(
                &key,
                &decode("iv", iv)?,
                &decode("aad", aad)?,
                &decode("ciphertext", ciphertext)?,
                &decode("tag", tag)?,
            )?;
            writeln!(out, "{}", hex::encode(&*plaintext))?;
        },
    }
    Ok(())
}

impl MessageArgs {
    fn resolve(&self, input: &mut dyn Read) -> Result<Vec<u8>, CliError> {
        let raw = match &self.message {
            Some(text) => text.clone().into_bytes(),
            None => {
                let mut buf = Vec::new();
                input.read_to_end(&mut buf)?;
                buf
            },
        };

        if self.hex {
            let text = String::from_utf8_lossy(&raw);
            decode("message", text.trim())
        } else {
            Ok(raw)
        }
    }
}

fn decode(what: &'static str, text: &str) -> Result<Vec<u8>, CliError> {
    hex::decode(text).map_err(|source| CliError::Hex { what, source })
}

/// Length is checked by the facade.
fn decode_key(text: &str) -> Result<Zeroizing<Vec<u8>>, CliError> {
    decode("key", text).map(Zeroizing::new)
}
