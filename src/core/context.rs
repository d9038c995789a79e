/*!
Per-role configuration for PQ-DTLS sessions.

A `Context` is validated once and never changes afterwards. Sessions share
it through an `Arc`, so one context can drive any number of connections.
*/

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serde-support")]
use serde::{Deserialize, Serialize};

use crate::core::{
    constants::defaults,
    crypto::{
        config::{ProtocolVersion, SecurityLevel},
        registry::{CipherSuite, CipherSuiteRegistry},
    },
    error::{Error, Result},
    record::max_fragment_len,
    security::constant_time::constant_time_eq,
    session::state::Role,
};
use crate::config_err;

/// Peer certificate policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum VerifyMode {
    /// Accept whatever the peer sends, including nothing
    #[default]
    None,
    /// Verify a certificate if the peer presents one
    VerifyPeer,
    /// The peer must present a certificate that verifies
    RequirePeerCert,
}

/// Decides whether a peer certificate is acceptable
///
/// Certificates are opaque bytes; parsing and chain building belong to
/// the implementation.
pub trait CertificateVerifier: Send + Sync + fmt::Debug {
    fn verify(&self, certificate: &[u8]) -> Result<()>;
}

/// Verifier that accepts every certificate
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyCertificate;

impl CertificateVerifier for AcceptAnyCertificate {
    fn verify(&self, _certificate: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Verifier that accepts only certificates from a fixed set
#[derive(Debug, Clone, Default)]
pub struct PinnedCertificates {
    pinned: Vec<Vec<u8>>,
}

impl PinnedCertificates {
    pub fn new(pinned: Vec<Vec<u8>>) -> Self {
        Self { pinned }
    }
}

impl CertificateVerifier for PinnedCertificates {
    fn verify(&self, certificate: &[u8]) -> Result<()> {
        // Check every entry so the match position does not leak
        let matched = self
            .pinned
            .iter()
            .fold(false, |found, pin| constant_time_eq(pin, certificate) | found);
        if matched {
            Ok(())
        } else {
            Err(Error::CertificateRejected("certificate is not pinned".into()))
        }
    }
}

/// Context configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub struct ContextConfig {
    pub role: Role,

    /// Raw certificate bytes from the certificate manager
    pub certificate: Vec<u8>,

    /// Raw private key bytes from the certificate manager
    pub private_key: Vec<u8>,

    pub security_level: SecurityLevel,

    /// Explicit suite codes in preference order; overrides the security level
    pub cipher_suites: Option<Vec<u16>>,

    pub min_version: ProtocolVersion,
    pub max_version: ProtocolVersion,

    pub verify_mode: VerifyMode,

    /// Certificate transparency requested (policy flag only)
    pub cert_transparency: bool,

    /// OCSP stapling requested (policy flag only)
    pub ocsp_stapling: bool,

    pub handshake_timeout: Duration,

    /// First retransmission delay; doubles up to a ceiling
    pub retransmit_interval: Duration,

    /// Datagram size budget
    pub mtu: usize,

    /// Automatic rekey interval, if any
    pub rekey_interval: Option<Duration>,

    /// Bytes sent under one key block before a forced rekey
    pub rekey_data_limit: u64,

    /// Recoverable record failures tolerated before the session closes
    pub failure_budget: u32,

    /// Malformed handshake messages tolerated before the session closes
    pub malformed_handshake_budget: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            certificate: Vec::new(),
            private_key: Vec::new(),
            security_level: SecurityLevel::default(),
            cipher_suites: None,
            min_version: ProtocolVersion::Dtls12,
            max_version: ProtocolVersion::Dtls13,
            verify_mode: VerifyMode::default(),
            cert_transparency: false,
            ocsp_stapling: false,
            handshake_timeout: defaults::HANDSHAKE_TIMEOUT,
            retransmit_interval: defaults::RETRANSMIT_INTERVAL,
            mtu: defaults::MTU,
            rekey_interval: None,
            rekey_data_limit: defaults::REKEY_DATA_LIMIT,
            failure_budget: defaults::FAILURE_BUDGET,
            malformed_handshake_budget: defaults::MALFORMED_HANDSHAKE_BUDGET,
        }
    }
}

impl ContextConfig {
    /// Default configuration for a role
    pub fn for_role(role: Role) -> Self {
        Self { role, ..Self::default() }
    }

    /// Hybrid X25519 + Kyber suites, DTLS 1.2 and 1.3
    pub fn hybrid(role: Role) -> Self {
        Self { security_level: SecurityLevel::Hybrid, ..Self::for_role(role) }
    }

    /// Pure Kyber768/1024 suites with mandatory peer certificates
    pub fn high_security(role: Role) -> Self {
        Self {
            security_level: SecurityLevel::PostQuantumHigh,
            verify_mode: VerifyMode::RequirePeerCert,
            min_version: ProtocolVersion::Dtls13,
            ..Self::for_role(role)
        }
    }

    /// Kyber512 with a small MTU for constrained links
    pub fn lightweight(role: Role) -> Self {
        Self { security_level: SecurityLevel::PostQuantumMedium, mtu: 1200, ..Self::for_role(role) }
    }

    /// Suites this configuration offers or accepts, in preference order
    pub fn resolve_cipher_suites(&self) -> Result<Vec<CipherSuite>> {
        match &self.cipher_suites {
            Some(codes) => codes
                .iter()
                .map(|code| {
                    CipherSuite::from_code(*code)
                        .ok_or_else(|| Error::Config(format!("unknown cipher suite {:#06x}", code)))
                })
                .collect(),
            None => Ok(CipherSuiteRegistry::suites_for_level(self.security_level)),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.certificate.is_empty() {
            return config_err!("certificate is required");
        }
        if self.private_key.is_empty() {
            return config_err!("private key is required");
        }
        if self.min_version > self.max_version {
            return config_err!(
                "minimum version {} is above maximum version {}",
                self.min_version,
                self.max_version
            );
        }
        if self.resolve_cipher_suites()?.is_empty() {
            return config_err!("no cipher suites configured");
        }
        if self.mtu < defaults::MIN_MTU {
            return config_err!("MTU {} is below the minimum of {}", self.mtu, defaults::MIN_MTU);
        }
        max_fragment_len(self.mtu)?;
        if self.handshake_timeout.is_zero() {
            return config_err!("handshake timeout must be positive");
        }
        if self.retransmit_interval.is_zero() {
            return config_err!("retransmit interval must be positive");
        }
        if self.rekey_interval.is_some_and(|i| i.is_zero()) {
            return config_err!("rekey interval must be positive");
        }
        if self.rekey_data_limit == 0 {
            return config_err!("rekey data limit must be positive");
        }
        Ok(())
    }
}

/// Immutable, validated configuration shared by sessions
#[derive(Debug)]
pub struct Context {
    config: ContextConfig,
    cipher_suites: Vec<CipherSuite>,
    versions: Vec<ProtocolVersion>,
    verifier: Arc<dyn CertificateVerifier>,
}

impl Context {
    /// Validate `config` and build a context that accepts any certificate
    /// the verify mode lets through
    pub fn new(config: ContextConfig) -> Result<Self> {
        Self::with_verifier(config, Arc::new(AcceptAnyCertificate))
    }

    /// Validate `config` and build a context with a custom verifier
    pub fn with_verifier(config: ContextConfig, verifier: Arc<dyn CertificateVerifier>) -> Result<Self> {
        config.validate()?;
        let cipher_suites = config.resolve_cipher_suites()?;
        let versions = ProtocolVersion::range(config.min_version, config.max_version);
        Ok(Self { config, cipher_suites, versions, verifier })
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Suites in preference order
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// Enabled versions, strongest first
    pub fn versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    pub fn min_version(&self) -> ProtocolVersion {
        self.config.min_version
    }

    pub fn max_version(&self) -> ProtocolVersion {
        self.config.max_version
    }

    pub fn certificate(&self) -> &[u8] {
        &self.config.certificate
    }

    pub fn mtu(&self) -> usize {
        self.config.mtu
    }

    /// Apply the verify policy to the certificate a peer presented
    pub fn verify_peer_certificate(&self, certificate: &[u8]) -> Result<()> {
        match self.config.verify_mode {
            VerifyMode::None => Ok(()),
            VerifyMode::VerifyPeer if certificate.is_empty() => Ok(()),
            VerifyMode::VerifyPeer => self.verifier.verify(certificate),
            VerifyMode::RequirePeerCert if certificate.is_empty() => {
                Err(Error::CertificateRejected("peer presented no certificate".into()))
            }
            VerifyMode::RequirePeerCert => self.verifier.verify(certificate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(role: Role) -> ContextConfig {
        ContextConfig {
            certificate: b"cert".to_vec(),
            private_key: b"key".to_vec(),
            ..ContextConfig::hybrid(role)
        }
    }

    #[test]
    fn test_missing_certificate_rejected() {
        let config = ContextConfig { certificate: Vec::new(), ..valid(Role::Server) };
        assert!(matches!(Context::new(config), Err(Error::Config(_))));

        let config = ContextConfig { private_key: Vec::new(), ..valid(Role::Server) };
        assert!(matches!(Context::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_version_bounds_checked() {
        let config = ContextConfig {
            min_version: ProtocolVersion::Dtls13,
            max_version: ProtocolVersion::Dtls12,
            ..valid(Role::Client)
        };
        assert!(matches!(Context::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_mtu_and_suites_checked() {
        let config = ContextConfig { mtu: 64, ..valid(Role::Client) };
        assert!(Context::new(config).is_err());

        let config = ContextConfig { cipher_suites: Some(vec![0x1234]), ..valid(Role::Client) };
        assert!(Context::new(config).is_err());

        let config = ContextConfig { cipher_suites: Some(vec![]), ..valid(Role::Client) };
        assert!(Context::new(config).is_err());
    }

    #[test]
    fn test_resolved_context() -> Result<()> {
        let context = Context::new(valid(Role::Client))?;
        assert_eq!(context.cipher_suites()[0], CipherSuite::X25519_KYBER768_AES_256_GCM_SHA384);
        assert_eq!(context.versions(), &[ProtocolVersion::Dtls13, ProtocolVersion::Dtls12]);
        Ok(())
    }

    #[test]
    fn test_verify_modes() -> Result<()> {
        let pinned = Arc::new(PinnedCertificates::new(vec![b"good".to_vec()]));

        let context = Context::with_verifier(valid(Role::Server), pinned.clone())?;
        assert!(context.verify_peer_certificate(b"bad").is_ok());

        let config = ContextConfig { verify_mode: VerifyMode::VerifyPeer, ..valid(Role::Server) };
        let context = Context::with_verifier(config, pinned.clone())?;
        assert!(context.verify_peer_certificate(b"").is_ok());
        assert!(context.verify_peer_certificate(b"good").is_ok());
        assert!(matches!(context.verify_peer_certificate(b"bad"), Err(Error::CertificateRejected(_))));

        let config = ContextConfig { verify_mode: VerifyMode::RequirePeerCert, ..valid(Role::Server) };
        let context = Context::with_verifier(config, pinned)?;
        assert!(context.verify_peer_certificate(b"").is_err());
        assert!(context.verify_peer_certificate(b"good").is_ok());
        Ok(())
    }
}
