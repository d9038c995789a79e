/*!
# PQ-DTLS

A datagram transport security protocol with hybrid post-quantum key
exchange, modelled on DTLS.

## Overview

This library provides a DTLS-style secure transport over UDP with:

- CRYSTALS-Kyber (512/768/1024) and X25519 key exchange, alone or combined
- AES-GCM and ChaCha20-Poly1305 record protection
- An HKDF-SHA256 key schedule with epoch-based rekeying
- Handshake fragmentation, reassembly and flight retransmission
- A sliding replay window per epoch
- Downgrade protection through a server random sentinel
- A sans-IO [`Session`] plus an async tokio transport binding

## Example

```no_run
use pq_dtls::{ContextBuilder, SecurityLevel};

# async fn run() -> pq_dtls::Result<()> {
let mut server = ContextBuilder::new()
    .with_identity(b"server certificate".to_vec(), b"server key".to_vec())
    .with_security_level(SecurityLevel::Hybrid)
    .listen("127.0.0.1:4433".parse().map_err(|_| pq_dtls::Error::Config("address".into()))?)
    .await?;

let mut client = ContextBuilder::new()
    .with_identity(b"client certificate".to_vec(), b"client key".to_vec())
    .with_security_level(SecurityLevel::Hybrid)
    .connect(server.local_addr())
    .await?;

let mut accepted = server.accept().await?;
client.send(b"ping").await?;
assert_eq!(accepted.recv().await?, b"ping");
# Ok(())
# }
```

## Security Features

- Key material is zeroized on drop and wiped when a session closes
- Finished MACs and tags are compared in constant time
- Sessions never share mutable state; each is owned by one task
*/

// Core protocol components
pub mod core;

// Builder and transport binding
pub mod protocol;

// Re-export commonly used types for convenience
pub use crate::core::error::{Error, ErrorKind, KeyExchangeError, Result};
pub use crate::core::constants::{defaults, sizes};
pub use crate::core::context::{
    AcceptAnyCertificate, CertificateVerifier, Context, ContextConfig, PinnedCertificates, VerifyMode,
};
pub use crate::core::session::{ConnectionState, NegotiatedParameters, Role, Session, SessionEvent, Transmit};

// Re-export crypto configuration and registry
pub use crate::core::crypto::config::{
    HashAlgorithm, KeyExchangeAlgorithm, ProtocolVersion, SecurityLevel, SymmetricAlgorithm,
};
pub use crate::core::crypto::registry::{CipherSuite, CipherSuiteRegistry};
pub use crate::core::crypto::key_exchange::{KeyExchange, KeyPair};

// Re-export protocol builder
pub use crate::protocol::builder::{client, server, ContextBuilder};

#[cfg(feature = "async")]
pub use crate::protocol::transport::{Client, Connection, DatagramSocket, Server, SessionId, SessionTable};
