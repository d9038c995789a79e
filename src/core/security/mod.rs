/*!
Security utilities for the PQ-DTLS protocol.

This module provides constant-time comparison, the per-epoch replay
window and the rekey schedule.
*/

// Constant-time operations to prevent timing attacks
pub mod constant_time;

// Anti-replay sliding window
pub mod replay;

// Rekey scheduling
pub mod rotation;

pub use constant_time::constant_time_eq;
pub use replay::ReplayWindow;
pub use rotation::{RekeyParams, RekeyScheduler, SessionStats};
