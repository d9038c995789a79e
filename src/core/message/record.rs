/*!
Record framing for the PQ-DTLS protocol.

A datagram carries one or more records back to back. Each record is a
13-byte header followed by `length` bytes of payload.
*/

use byteorder::{BigEndian, ByteOrder};

use crate::core::{
    constants::sizes::{MAX_SEQUENCE, RECORD_HEADER_SIZE},
    error::Result,
    message::types::ContentType,
};
use crate::malformed_err;

/// Record header (13 bytes)
///
/// The header has the following format:
/// - Content Type (1 byte)
/// - Version (2 bytes, big-endian)
/// - Epoch (2 bytes, big-endian)
/// - Sequence Number (6 bytes, big-endian)
/// - Length (2 bytes, big-endian): Length of the payload in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Content type
    pub content_type: ContentType,
    /// Wire protocol version
    pub version: u16,
    /// Key epoch
    pub epoch: u16,
    /// 48-bit sequence number
    pub sequence: u64,
    /// Payload length
    pub length: u16,
}

impl RecordHeader {
    /// Create a new record header
    pub fn new(content_type: ContentType, version: u16, epoch: u16, sequence: u64, length: u16) -> Self {
        Self { content_type, version, epoch, sequence, length }
    }

    /// Convert the header to bytes (13 bytes)
    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut bytes = [0u8; RECORD_HEADER_SIZE];
        bytes[0] = self.content_type.as_u8();
        BigEndian::write_u16(&mut bytes[1..3], self.version);
        BigEndian::write_u16(&mut bytes[3..5], self.epoch);
        BigEndian::write_u48(&mut bytes[5..11], self.sequence & MAX_SEQUENCE);
        BigEndian::write_u16(&mut bytes[11..13], self.length);
        bytes
    }

    /// Parse a header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return malformed_err!("record header too short");
        }

        let content_type = match ContentType::from_u8(bytes[0]) {
            Some(t) => t,
            None => return malformed_err!("invalid content type: {}", bytes[0]),
        };

        Ok(Self {
            content_type,
            version: BigEndian::read_u16(&bytes[1..3]),
            epoch: BigEndian::read_u16(&bytes[3..5]),
            sequence: BigEndian::read_u48(&bytes[5..11]),
            length: BigEndian::read_u16(&bytes[11..13]),
        })
    }
}

/// A record borrowed from a received datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub header: RecordHeader,
    pub payload: &'a [u8],
}

impl Record<'_> {
    /// Copy into an owned record
    pub fn to_owned_record(&self) -> OwnedRecord {
        OwnedRecord { header: self.header, payload: self.payload.to_vec() }
    }
}

/// A record that outlives its datagram (buffered for a later epoch)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedRecord {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

impl OwnedRecord {
    /// Borrow as a `Record`
    pub fn as_record(&self) -> Record<'_> {
        Record { header: self.header, payload: &self.payload }
    }
}

/// Append an encoded record to `out`
pub fn encode_record(out: &mut Vec<u8>, header: &RecordHeader, payload: &[u8]) {
    debug_assert_eq!(header.length as usize, payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
}

/// Iterator over the records packed into one datagram
///
/// Yields an error and stops at the first malformed record; the
/// remainder of the datagram cannot be framed.
pub struct Records<'a> {
    remaining: &'a [u8],
    failed: bool,
}

impl<'a> Records<'a> {
    pub fn new(datagram: &'a [u8]) -> Self {
        Self { remaining: datagram, failed: false }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining.is_empty() {
            return None;
        }

        let header = match RecordHeader::from_bytes(self.remaining) {
            Ok(header) => header,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };

        let end = RECORD_HEADER_SIZE + header.length as usize;
        if self.remaining.len() < end {
            self.failed = true;
            return Some(malformed_err!(
                "record length {} exceeds datagram ({} bytes left)",
                header.length,
                self.remaining.len() - RECORD_HEADER_SIZE
            ));
        }

        let payload = &self.remaining[RECORD_HEADER_SIZE..end];
        self.remaining = &self.remaining[end..];
        Some(Ok(Record { header, payload }))
    }
}
