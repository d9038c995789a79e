//! Protocol endpoints for PQ-DTLS.
//!
//! This module contains the context builder and, with the `async` feature,
//! the UDP transport binding that runs sessions on tokio.

// Builder
pub mod builder;

// UDP transport
#[cfg(feature = "async")]
pub mod transport;

// Re-export for convenience
pub use builder::ContextBuilder;

#[cfg(feature = "async")]
pub use transport::{Client, Connection, DatagramSocket, Server, SessionId, SessionTable};
