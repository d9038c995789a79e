/*!
Cryptographic components for the PQ-DTLS protocol.

This module provides the primitives the handshake and record layer use:
KEM-style key exchange, AEAD record protection, the HKDF key schedule and
the cipher suite registry.
*/

// Algorithm enums and protocol versions
pub mod config;

// Cipher suite table and negotiation
pub mod registry;

// Key exchange functionality
pub mod key_exchange;

// Symmetric encryption
pub mod cipher;

// Key schedule
pub mod kdf;

pub use cipher::Cipher;
pub use config::{HashAlgorithm, KeyExchangeAlgorithm, ProtocolVersion, SecurityLevel, SymmetricAlgorithm};
pub use key_exchange::{Encapsulation, KeyExchange, KeyPair, SharedSecret};
pub use registry::{CipherSuite, CipherSuiteRegistry, KeyMaterialSizes};
