//! Capability identifiers and sets.
//!
//! A provider advertises a [`CapabilitySet`] fixed at construction. The
//! facade consults it before dispatching, so a missing capability is a
//! first-class, inspectable property rather than a runtime check.

use std::fmt;

/// One operation a provider may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Cryptographically secure random bytes (mandatory)
    RandomBytes,
    /// SHA-256 digest
    DigestSha256,
    /// SHA-512 digest
    DigestSha512,
    /// PBKDF2-HMAC-SHA256
    KdfHmacSha256,
    /// PBKDF2-HMAC-SHA512
    KdfHmacSha512,
    /// AES-256-GCM encryption
    AeadSeal,
    /// AES-256-GCM decryption
    AeadOpen,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::RandomBytes,
        Self::DigestSha256,
        Self::DigestSha512,
        Self::KdfHmacSha256,
        Self::KdfHmacSha512,
        Self::AeadSeal,
        Self::AeadOpen,
    ];

    /// Canonical name, used in error messages and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Self::RandomBytes => "random-bytes",
            Self::DigestSha256 => "digest-sha256",
            Self::DigestSha512 => "digest-sha512",
            Self::KdfHmacSha256 => "kdf-hmac-sha256",
            Self::KdfHmacSha512 => "kdf-hmac-sha512",
            Self::AeadSeal => "aead-seal",
            Self::AeadOpen => "aead-open",
        }
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable set of capabilities.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// No capabilities at all. Not a valid provider.
    pub const EMPTY: Self = Self(0);

    /// Random bytes only (the platform backend).
    pub const RANDOM_ONLY: Self = Self(Capability::RandomBytes.bit());

    /// Every capability.
    pub const FULL: Self = {
        let mut bits = 0;
        let mut i = 0;
        while i < Capability::ALL.len() {
            bits |= Capability::ALL[i].bit();
            i += 1;
        }
        Self(bits)
    };

    /// Set with `capability` added.
    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Set with `capability` removed.
    #[must_use]
    pub const fn without(self, capability: Capability) -> Self {
        Self(self.0 & !capability.bit())
    }

    /// Check membership.
    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Number of capabilities in the set.
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// True if the set is empty.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate members in declaration order.
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestKind {
    /// SHA-256, 32-byte output
    Sha256,
    /// SHA-512, 64-byte output
    Sha512,
}

impl DigestKind {
    /// Fixed output length in bytes.
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Capability a provider needs to serve this digest.
    pub const fn capability(self) -> Capability {
        match self {
            Self::Sha256 => Capability::DigestSha256,
            Self::Sha512 => Capability::DigestSha512,
        }
    }
}

impl fmt::Display for DigestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        })
    }
}

/// PBKDF2 pseudo-random function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KdfKind {
    /// PBKDF2 with HMAC-SHA256
    HmacSha256,
    /// PBKDF2 with HMAC-SHA512
    HmacSha512,
}

impl KdfKind {
    /// Capability a provider needs to serve this KDF.
    pub const fn capability(self) -> Capability {
        match self {
            Self::HmacSha256 => Capability::KdfHmacSha256,
            Self::HmacSha512 => Capability::KdfHmacSha512,
        }
    }
}

impl fmt::Display for KdfKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HmacSha256 => "HMAC-SHA256",
            Self::HmacSha512 => "HMAC-SHA512",
        })
    }
}
