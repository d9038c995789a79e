/*!
Cipher suite registry for the PQ-DTLS protocol.

Enumerates the classical and post-quantum suites, maps a security level to
an ordered candidate list, derives key material sizes, negotiates suites and
versions, and detects version downgrades.
*/

use std::fmt;

use crate::core::{
    constants::{sizes, DOWNGRADE_SENTINEL},
    crypto::config::{
        HashAlgorithm, KeyExchangeAlgorithm, ProtocolVersion, SecurityLevel, SymmetricAlgorithm,
    },
    error::{Error, Result},
};

/// A cipher suite: key exchange + AEAD + hash, identified by a 16-bit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite {
    pub code: u16,
    pub name: &'static str,
    pub key_exchange: KeyExchangeAlgorithm,
    pub symmetric: SymmetricAlgorithm,
    pub hash: HashAlgorithm,
}

impl CipherSuite {
    pub const X25519_AES_128_GCM_SHA256: CipherSuite = CipherSuite {
        code: 0xC02B,
        name: "TLS_ECDHE_X25519_WITH_AES_128_GCM_SHA256",
        key_exchange: KeyExchangeAlgorithm::X25519,
        symmetric: SymmetricAlgorithm::Aes128Gcm,
        hash: HashAlgorithm::Sha256,
    };

    pub const X25519_AES_256_GCM_SHA384: CipherSuite = CipherSuite {
        code: 0xC02C,
        name: "TLS_ECDHE_X25519_WITH_AES_256_GCM_SHA384",
        key_exchange: KeyExchangeAlgorithm::X25519,
        symmetric: SymmetricAlgorithm::Aes256Gcm,
        hash: HashAlgorithm::Sha384,
    };

    pub const X25519_CHACHA20_POLY1305_SHA256: CipherSuite = CipherSuite {
        code: 0xCCA9,
        name: "TLS_ECDHE_X25519_WITH_CHACHA20_POLY1305_SHA256",
        key_exchange: KeyExchangeAlgorithm::X25519,
        symmetric: SymmetricAlgorithm::ChaCha20Poly1305,
        hash: HashAlgorithm::Sha256,
    };

    pub const KYBER512_AES_128_GCM_SHA256: CipherSuite = CipherSuite {
        code: 0xFE01,
        name: "TLS_KYBER512_WITH_AES_128_GCM_SHA256",
        key_exchange: KeyExchangeAlgorithm::Kyber512,
        symmetric: SymmetricAlgorithm::Aes128Gcm,
        hash: HashAlgorithm::Sha256,
    };

    pub const KYBER768_AES_256_GCM_SHA384: CipherSuite = CipherSuite {
        code: 0xFE02,
        name: "TLS_KYBER768_WITH_AES_256_GCM_SHA384",
        key_exchange: KeyExchangeAlgorithm::Kyber768,
        symmetric: SymmetricAlgorithm::Aes256Gcm,
        hash: HashAlgorithm::Sha384,
    };

    pub const KYBER1024_AES_256_GCM_SHA512: CipherSuite = CipherSuite {
        code: 0xFE03,
        name: "TLS_KYBER1024_WITH_AES_256_GCM_SHA512",
        key_exchange: KeyExchangeAlgorithm::Kyber1024,
        symmetric: SymmetricAlgorithm::Aes256Gcm,
        hash: HashAlgorithm::Sha512,
    };

    pub const X25519_KYBER768_AES_256_GCM_SHA384: CipherSuite = CipherSuite {
        code: 0xFE10,
        name: "TLS_X25519_KYBER768_WITH_AES_256_GCM_SHA384",
        key_exchange: KeyExchangeAlgorithm::X25519Kyber768,
        symmetric: SymmetricAlgorithm::Aes256Gcm,
        hash: HashAlgorithm::Sha384,
    };

    /// Every suite this implementation knows
    pub const ALL: [CipherSuite; 7] = [
        CipherSuite::X25519_KYBER768_AES_256_GCM_SHA384,
        CipherSuite::KYBER1024_AES_256_GCM_SHA512,
        CipherSuite::KYBER768_AES_256_GCM_SHA384,
        CipherSuite::KYBER512_AES_128_GCM_SHA256,
        CipherSuite::X25519_AES_256_GCM_SHA384,
        CipherSuite::X25519_CHACHA20_POLY1305_SHA256,
        CipherSuite::X25519_AES_128_GCM_SHA256,
    ];

    /// Look up a suite by wire code
    pub fn from_code(code: u16) -> Option<CipherSuite> {
        Self::ALL.iter().copied().find(|s| s.code == code)
    }

    /// Look up a suite by name
    pub fn from_name(name: &str) -> Option<CipherSuite> {
        Self::ALL.iter().copied().find(|s| s.name == name)
    }

    /// Whether the suite's key exchange is post-quantum (pure or hybrid)
    pub fn is_post_quantum(&self) -> bool {
        self.key_exchange.is_post_quantum()
    }

    /// Key material sizes for this suite
    pub fn key_material(&self) -> KeyMaterialSizes {
        KeyMaterialSizes {
            key_len: self.symmetric.key_len(),
            iv_len: sizes::aead::NONCE_SIZE,
            mac_key_len: self.hash.output_len(),
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Per-direction key material sizes derived from a suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMaterialSizes {
    /// AEAD write key length
    pub key_len: usize,
    /// Write IV length
    pub iv_len: usize,
    /// Finished MAC key length
    pub mac_key_len: usize,
}

impl KeyMaterialSizes {
    /// Total key block length covering both directions
    pub fn key_block_len(&self) -> usize {
        2 * (self.key_len + self.iv_len + self.mac_key_len)
    }
}

/// Registry of supported cipher suites
pub struct CipherSuiteRegistry;

impl CipherSuiteRegistry {
    /// Ordered candidate suites for a security level
    pub fn suites_for_level(level: SecurityLevel) -> Vec<CipherSuite> {
        match level {
            SecurityLevel::Standard => vec![
                CipherSuite::X25519_AES_256_GCM_SHA384,
                CipherSuite::X25519_CHACHA20_POLY1305_SHA256,
                CipherSuite::X25519_AES_128_GCM_SHA256,
            ],
            SecurityLevel::PostQuantumMedium => vec![CipherSuite::KYBER512_AES_128_GCM_SHA256],
            SecurityLevel::PostQuantumHigh => vec![
                CipherSuite::KYBER768_AES_256_GCM_SHA384,
                CipherSuite::KYBER1024_AES_256_GCM_SHA512,
            ],
            SecurityLevel::Hybrid => vec![
                CipherSuite::X25519_KYBER768_AES_256_GCM_SHA384,
                CipherSuite::KYBER768_AES_256_GCM_SHA384,
                CipherSuite::KYBER512_AES_128_GCM_SHA256,
            ],
        }
    }

    /// Classify a suite name as post-quantum
    ///
    /// Unknown names are classified by the key exchange they spell out.
    pub fn is_post_quantum(name: &str) -> bool {
        match CipherSuite::from_name(name) {
            Some(suite) => suite.is_post_quantum(),
            None => name.to_ascii_uppercase().contains("KYBER")
                || name.to_ascii_uppercase().contains("MLKEM"),
        }
    }

    /// Pick the first suite in `preference` order that the peer offered
    pub fn select(offered: &[u16], preference: &[CipherSuite]) -> Result<CipherSuite> {
        preference
            .iter()
            .copied()
            .find(|suite| offered.contains(&suite.code))
            .ok_or(Error::NoCommonCipherSuite)
    }

    /// Highest version in `offered` that lies within `[min, max]`
    pub fn negotiate_version(
        offered: &[ProtocolVersion],
        min: ProtocolVersion,
        max: ProtocolVersion,
    ) -> Result<ProtocolVersion> {
        offered
            .iter()
            .copied()
            .filter(|v| *v >= min && *v <= max)
            .max()
            .ok_or_else(|| {
                Error::UnsupportedVersion(offered.iter().map(|v| v.wire()).max().unwrap_or(0))
            })
    }

    /// True when the server selected below the highest offered version
    /// and its random does not end with the downgrade sentinel
    pub fn downgrade_detected(
        offered_versions: &[ProtocolVersion],
        selected_version: ProtocolVersion,
        server_random: &[u8],
    ) -> bool {
        let highest = match offered_versions.iter().copied().max() {
            Some(v) => v,
            None => return false,
        };
        if selected_version >= highest {
            return false;
        }
        !has_downgrade_sentinel(server_random)
    }

    /// Stamp the downgrade sentinel into the tail of a server random
    pub fn mark_downgrade(server_random: &mut [u8]) {
        let n = server_random.len();
        if n >= DOWNGRADE_SENTINEL.len() {
            server_random[n - DOWNGRADE_SENTINEL.len()..].copy_from_slice(&DOWNGRADE_SENTINEL);
        }
    }
}

fn has_downgrade_sentinel(server_random: &[u8]) -> bool {
    server_random.len() >= DOWNGRADE_SENTINEL.len()
        && server_random[server_random.len() - DOWNGRADE_SENTINEL.len()..] == DOWNGRADE_SENTINEL
}
