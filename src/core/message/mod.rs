/*!
Message handling for the PQ-DTLS protocol.

This module provides record framing, handshake message formats and the
content type and alert codes they carry.
*/

pub mod types;
pub mod record;
pub mod handshake;

// Re-export commonly used items
pub use types::{Alert, AlertDescription, AlertLevel, ContentType, HandshakeType};
pub use record::{OwnedRecord, Record, RecordHeader, Records};
pub use handshake::{HandshakeHeader, HandshakeMessage, Reassembler};
