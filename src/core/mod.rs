//! Core components for the PQ-DTLS protocol.
//!
//! This module contains the transport-independent building blocks: the
//! cryptographic primitives, wire formats, the record layer, session
//! management and error handling.

// Export cryptographic functionality
pub mod crypto;

// Export message handling
pub mod message;

// Record protection and fragmentation
pub mod record;

// Export session management
pub mod session;

// Export security utilities
pub mod security;

// Shared configuration
pub mod context;

// Protocol constants
pub mod constants;

// Error handling
pub mod error;

// Re-exports for convenience
pub use self::context::{Context, ContextConfig, VerifyMode};
pub use self::error::{Error, ErrorKind, KeyExchangeError, Result};
pub use self::session::{ConnectionState, Role, Session, SessionEvent};
