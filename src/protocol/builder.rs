/*!
Context builder for the PQ-DTLS protocol.

This module provides a builder pattern for creating a shared [`Context`]
with specific configurations, plus shortcuts that bind a client or server
directly.
*/

use std::sync::Arc;
use std::time::Duration;

use crate::core::{
    context::{CertificateVerifier, Context, ContextConfig, VerifyMode},
    crypto::config::{ProtocolVersion, SecurityLevel},
    error::Result,
    session::state::Role,
};

#[cfg(feature = "async")]
use std::net::SocketAddr;

#[cfg(feature = "async")]
use crate::protocol::transport::{Client, Connection, Server};

/// Builder for PQ-DTLS contexts
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    config: ContextConfig,
    verifier: Option<Arc<dyn CertificateVerifier>>,
}

impl ContextBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self { config: ContextConfig::default(), verifier: None }
    }

    /// Start from an existing configuration
    pub fn from_config(config: ContextConfig) -> Self {
        Self { config, verifier: None }
    }

    /// Set the role (client or server)
    pub fn with_role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Set as client
    pub fn as_client(self) -> Self {
        self.with_role(Role::Client)
    }

    /// Set as server
    pub fn as_server(self) -> Self {
        self.with_role(Role::Server)
    }

    /// Certificate and private key bytes from the certificate manager
    pub fn with_identity(mut self, certificate: impl Into<Vec<u8>>, private_key: impl Into<Vec<u8>>) -> Self {
        self.config.certificate = certificate.into();
        self.config.private_key = private_key.into();
        self
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.config.security_level = level;
        self
    }

    /// Explicit suite codes in preference order
    pub fn with_cipher_suites(mut self, codes: Vec<u16>) -> Self {
        self.config.cipher_suites = Some(codes);
        self
    }

    pub fn with_versions(mut self, min: ProtocolVersion, max: ProtocolVersion) -> Self {
        self.config.min_version = min;
        self.config.max_version = max;
        self
    }

    pub fn with_verify_mode(mut self, mode: VerifyMode) -> Self {
        self.config.verify_mode = mode;
        self
    }

    /// Decide which peer certificates are acceptable
    pub fn with_verifier(mut self, verifier: Arc<dyn CertificateVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_cert_transparency(mut self, enabled: bool) -> Self {
        self.config.cert_transparency = enabled;
        self
    }

    pub fn with_ocsp_stapling(mut self, enabled: bool) -> Self {
        self.config.ocsp_stapling = enabled;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn with_retransmit_interval(mut self, interval: Duration) -> Self {
        self.config.retransmit_interval = interval;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Rekey automatically every `interval` while traffic flows
    pub fn with_rekey_interval(mut self, interval: Duration) -> Self {
        self.config.rekey_interval = Some(interval);
        self
    }

    pub fn with_rekey_data_limit(mut self, bytes: u64) -> Self {
        self.config.rekey_data_limit = bytes;
        self
    }

    pub fn with_failure_budget(mut self, budget: u32) -> Self {
        self.config.failure_budget = budget;
        self
    }

    pub fn with_malformed_handshake_budget(mut self, budget: u32) -> Self {
        self.config.malformed_handshake_budget = budget;
        self
    }

    /// Use the hybrid preset
    pub fn hybrid(self) -> Self {
        self.preset(ContextConfig::hybrid)
    }

    /// Use a preset configuration for high security
    pub fn high_security(self) -> Self {
        self.preset(ContextConfig::high_security)
    }

    /// Use a preset configuration for lightweight environments
    pub fn lightweight(self) -> Self {
        self.preset(ContextConfig::lightweight)
    }

    // Presets replace algorithm policy but keep role and identity
    fn preset(mut self, preset: fn(Role) -> ContextConfig) -> Self {
        let mut config = preset(self.config.role);
        config.certificate = std::mem::take(&mut self.config.certificate);
        config.private_key = std::mem::take(&mut self.config.private_key);
        self.config = config;
        self
    }

    /// The configuration built so far
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Validate and build a shared context
    pub fn build(self) -> Result<Arc<Context>> {
        let context = match self.verifier {
            Some(verifier) => Context::with_verifier(self.config, verifier)?,
            None => Context::new(self.config)?,
        };
        Ok(Arc::new(context))
    }

    /// Build a client context and connect to `addr`
    #[cfg(feature = "async")]
    pub async fn connect(self, addr: SocketAddr) -> Result<Connection> {
        let context = self.as_client().build()?;
        Client::connect(context, addr).await
    }

    /// Build a server context and listen on `addr`
    #[cfg(feature = "async")]
    pub async fn listen(self, addr: SocketAddr) -> Result<Server> {
        let context = self.as_server().build()?;
        Server::listen(context, addr).await
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// Convenience functions

/// Client context with default settings
pub fn client(certificate: impl Into<Vec<u8>>, private_key: impl Into<Vec<u8>>) -> Result<Arc<Context>> {
    ContextBuilder::new().as_client().with_identity(certificate, private_key).build()
}

/// Server context with default settings
pub fn server(certificate: impl Into<Vec<u8>>, private_key: impl Into<Vec<u8>>) -> Result<Arc<Context>> {
    ContextBuilder::new().as_server().with_identity(certificate, private_key).build()
}
