/*!
Session management for the PQ-DTLS protocol.

This module provides the handshake state machine, negotiated parameters and
key material, connection states and the sans-IO session that drives them.
*/

// State management
pub mod state;

// Negotiated parameters and key blocks
pub mod params;

// Handshake state machine
pub mod handshake;

// Sans-IO session
pub mod session;

// Re-export main session types
pub use self::handshake::{FlightItem, HandshakeEngine};
pub use self::params::{KeyBlock, NegotiatedParameters, SecurityParameters};
pub use self::session::{Session, SessionEvent, Transmit};
pub use self::state::{ConnectionState, Role, StateManager};
