/*!
Cryptographic algorithm configuration for the PQ-DTLS protocol.

This module names the key exchange, AEAD and hash algorithms a cipher suite
combines, the protocol versions, and the security levels a context can ask for.
*/

use std::fmt;
use std::str::FromStr;

use crate::core::error::{Error, Result};

#[cfg(feature = "serde-support")]
use serde::{Deserialize, Serialize};

/// Supported key exchange mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum KeyExchangeAlgorithm {
    /// Classical X25519 Diffie-Hellman, used as a KEM
    X25519,
    /// CRYSTALS-Kyber KEM (Kyber512) - for resource-constrained environments
    Kyber512,
    /// CRYSTALS-Kyber KEM (Kyber768)
    Kyber768,
    /// CRYSTALS-Kyber KEM (Kyber1024) - highest security level
    Kyber1024,
    /// X25519 combined with Kyber768
    X25519Kyber768,
}

impl KeyExchangeAlgorithm {
    /// Whether the algorithm resists a quantum adversary
    pub fn is_post_quantum(self) -> bool {
        !matches!(self, KeyExchangeAlgorithm::X25519)
    }

    /// Whether the algorithm combines a classical and a PQ component
    pub fn is_hybrid(self) -> bool {
        matches!(self, KeyExchangeAlgorithm::X25519Kyber768)
    }
}

impl Default for KeyExchangeAlgorithm {
    fn default() -> Self {
        KeyExchangeAlgorithm::X25519Kyber768
    }
}

impl fmt::Display for KeyExchangeAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyExchangeAlgorithm::X25519 => write!(f, "X25519"),
            KeyExchangeAlgorithm::Kyber512 => write!(f, "KYBER512"),
            KeyExchangeAlgorithm::Kyber768 => write!(f, "KYBER768"),
            KeyExchangeAlgorithm::Kyber1024 => write!(f, "KYBER1024"),
            KeyExchangeAlgorithm::X25519Kyber768 => write!(f, "X25519_KYBER768"),
        }
    }
}

/// Supported AEAD algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum SymmetricAlgorithm {
    /// AES-128-GCM
    Aes128Gcm,
    /// AES-256-GCM - hardware acceleration on many platforms
    Aes256Gcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl SymmetricAlgorithm {
    /// Write key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            SymmetricAlgorithm::Aes128Gcm => 16,
            SymmetricAlgorithm::Aes256Gcm | SymmetricAlgorithm::ChaCha20Poly1305 => 32,
        }
    }
}

impl fmt::Display for SymmetricAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymmetricAlgorithm::Aes128Gcm => write!(f, "AES_128_GCM"),
            SymmetricAlgorithm::Aes256Gcm => write!(f, "AES_256_GCM"),
            SymmetricAlgorithm::ChaCha20Poly1305 => write!(f, "CHACHA20_POLY1305"),
        }
    }
}

/// Hash algorithms used for Finished MACs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Digest size in bytes
    pub fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "SHA256"),
            HashAlgorithm::Sha384 => write!(f, "SHA384"),
            HashAlgorithm::Sha512 => write!(f, "SHA512"),
        }
    }
}

/// Security level a context requests; maps to an ordered list of suites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum SecurityLevel {
    /// Classical suites only
    #[default]
    Standard,
    /// Kyber512
    PostQuantumMedium,
    /// Kyber768 and Kyber1024
    PostQuantumHigh,
    /// X25519 + Kyber, falling back to pure Kyber
    Hybrid,
}

impl FromStr for SecurityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "standard" => Ok(SecurityLevel::Standard),
            "pq-medium" => Ok(SecurityLevel::PostQuantumMedium),
            "pq-high" => Ok(SecurityLevel::PostQuantumHigh),
            "hybrid" => Ok(SecurityLevel::Hybrid),
            other => Err(Error::Config(format!("unknown security level '{}'", other))),
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::Standard => write!(f, "standard"),
            SecurityLevel::PostQuantumMedium => write!(f, "pq-medium"),
            SecurityLevel::PostQuantumHigh => write!(f, "pq-high"),
            SecurityLevel::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Protocol versions, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum ProtocolVersion {
    Dtls10,
    Dtls12,
    Dtls13,
}

impl ProtocolVersion {
    /// All versions, strongest first
    pub const ALL: [ProtocolVersion; 3] =
        [ProtocolVersion::Dtls13, ProtocolVersion::Dtls12, ProtocolVersion::Dtls10];

    /// Wire encoding
    pub fn wire(self) -> u16 {
        match self {
            ProtocolVersion::Dtls10 => 0xfeff,
            ProtocolVersion::Dtls12 => 0xfefd,
            ProtocolVersion::Dtls13 => 0xfefc,
        }
    }

    /// Parse a wire encoding
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            0xfeff => Some(ProtocolVersion::Dtls10),
            0xfefd => Some(ProtocolVersion::Dtls12),
            0xfefc => Some(ProtocolVersion::Dtls13),
            _ => None,
        }
    }

    /// Versions between `min` and `max` inclusive, strongest first
    pub fn range(min: ProtocolVersion, max: ProtocolVersion) -> Vec<ProtocolVersion> {
        Self::ALL.iter().copied().filter(|v| *v >= min && *v <= max).collect()
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_start_matches("DTLS ") {
            "1.0" => Ok(ProtocolVersion::Dtls10),
            "1.2" => Ok(ProtocolVersion::Dtls12),
            "1.3" => Ok(ProtocolVersion::Dtls13),
            other => Err(Error::Config(format!("unknown protocol version '{}'", other))),
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Dtls10 => write!(f, "1.0"),
            ProtocolVersion::Dtls12 => write!(f, "1.2"),
            ProtocolVersion::Dtls13 => write!(f, "1.3"),
        }
    }
}
