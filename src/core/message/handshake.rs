/*!
Handshake messages for the PQ-DTLS protocol.

This module defines the 12-byte handshake header, the message bodies,
fragmentation of a message under a size budget, and reassembly of fragments
that may arrive in any order.
*/

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};

use crate::core::{
    constants::{
        defaults,
        sizes::{HANDSHAKE_HEADER_SIZE, MAX_U24, RANDOM_SIZE},
    },
    error::{Error, Result},
    message::types::HandshakeType,
};
use crate::malformed_err;

/// Handshake header (12 bytes)
///
/// The header has the following format:
/// - Type (1 byte)
/// - Length (3 bytes, big-endian): Length of the whole message body
/// - Message Seq (2 bytes, big-endian)
/// - Fragment Offset (3 bytes, big-endian)
/// - Fragment Length (3 bytes, big-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeHeader {
    pub msg_type: HandshakeType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl HandshakeHeader {
    /// Convert the header to bytes (12 bytes)
    pub fn to_bytes(&self) -> [u8; HANDSHAKE_HEADER_SIZE] {
        let mut bytes = [0u8; HANDSHAKE_HEADER_SIZE];
        bytes[0] = self.msg_type.as_u8();
        BigEndian::write_u24(&mut bytes[1..4], self.length);
        BigEndian::write_u16(&mut bytes[4..6], self.message_seq);
        BigEndian::write_u24(&mut bytes[6..9], self.fragment_offset);
        BigEndian::write_u24(&mut bytes[9..12], self.fragment_length);
        bytes
    }

    /// Parse a header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HANDSHAKE_HEADER_SIZE {
            return malformed_err!("handshake header too short");
        }

        let msg_type = match HandshakeType::from_u8(bytes[0]) {
            Some(t) => t,
            None => return malformed_err!("invalid handshake type: {}", bytes[0]),
        };

        let header = Self {
            msg_type,
            length: BigEndian::read_u24(&bytes[1..4]),
            message_seq: BigEndian::read_u16(&bytes[4..6]),
            fragment_offset: BigEndian::read_u24(&bytes[6..9]),
            fragment_length: BigEndian::read_u24(&bytes[9..12]),
        };

        if header.fragment_offset as u64 + header.fragment_length as u64 > header.length as u64 {
            return malformed_err!(
                "fragment [{}, +{}) exceeds message length {}",
                header.fragment_offset,
                header.fragment_length,
                header.length
            );
        }

        Ok(header)
    }
}

/// A complete (unfragmented) handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub msg_type: HandshakeType,
    pub message_seq: u16,
    pub body: Vec<u8>,
}

impl HandshakeMessage {
    pub fn new(msg_type: HandshakeType, message_seq: u16, body: Vec<u8>) -> Self {
        Self { msg_type, message_seq, body }
    }

    /// Canonical encoding: a single fragment covering the whole body.
    /// This is what the Finished transcript hashes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let header = HandshakeHeader {
            msg_type: self.msg_type,
            length: self.body.len() as u32,
            message_seq: self.message_seq,
            fragment_offset: 0,
            fragment_length: self.body.len() as u32,
        };
        let mut out = Vec::with_capacity(HANDSHAKE_HEADER_SIZE + self.body.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

/// Split a handshake message into encoded fragments of at most
/// `max_fragment` body bytes each
///
/// A message of length L yields `ceil(L / max_fragment)` fragments
/// (one fragment for an empty body).
pub fn fragment_message(message: &HandshakeMessage, max_fragment: usize) -> Result<Vec<Vec<u8>>> {
    if max_fragment == 0 {
        return Err(Error::Internal("handshake fragment budget is zero".into()));
    }
    if message.body.len() > MAX_U24 as usize {
        return Err(Error::Internal("handshake message too large".into()));
    }

    let length = message.body.len() as u32;
    if message.body.is_empty() {
        return Ok(vec![message.canonical_bytes()]);
    }

    let fragments = message
        .body
        .chunks(max_fragment)
        .enumerate()
        .map(|(i, chunk)| {
            let header = HandshakeHeader {
                msg_type: message.msg_type,
                length,
                message_seq: message.message_seq,
                fragment_offset: (i * max_fragment) as u32,
                fragment_length: chunk.len() as u32,
            };
            let mut out = Vec::with_capacity(HANDSHAKE_HEADER_SIZE + chunk.len());
            out.extend_from_slice(&header.to_bytes());
            out.extend_from_slice(chunk);
            out
        })
        .collect();

    Ok(fragments)
}

/// Split a handshake record payload into (header, fragment body) pairs
pub fn parse_fragments(payload: &[u8]) -> Result<Vec<(HandshakeHeader, &[u8])>> {
    let mut fragments = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let header = HandshakeHeader::from_bytes(rest)?;
        let end = HANDSHAKE_HEADER_SIZE + header.fragment_length as usize;
        if rest.len() < end {
            return malformed_err!("handshake fragment truncated");
        }
        fragments.push((header, &rest[HANDSHAKE_HEADER_SIZE..end]));
        rest = &rest[end..];
    }
    Ok(fragments)
}

struct PartialMessage {
    msg_type: HandshakeType,
    body: Vec<u8>,
    /// Covered byte ranges, keyed by start, non-overlapping and merged
    covered: BTreeMap<usize, usize>,
}

impl PartialMessage {
    fn new(msg_type: HandshakeType, length: usize) -> Self {
        Self { msg_type, body: vec![0u8; length], covered: BTreeMap::new() }
    }

    fn insert(&mut self, offset: usize, data: &[u8]) {
        let mut start = offset;
        let mut end = offset + data.len();
        self.body[start..end].copy_from_slice(data);

        // Merge with any range that overlaps or touches [start, end)
        let touching: Vec<(usize, usize)> = self
            .covered
            .range(..=end)
            .filter(|(_, e)| **e >= start)
            .map(|(s, e)| (*s, *e))
            .collect();
        for (s, e) in touching {
            self.covered.remove(&s);
            start = start.min(s);
            end = end.max(e);
        }
        self.covered.insert(start, end);
    }

    fn is_complete(&self) -> bool {
        if self.body.is_empty() {
            return true;
        }
        matches!(self.covered.iter().next(), Some((0, end)) if *end == self.body.len())
    }
}

/// Reassembles handshake fragments keyed by message sequence number
///
/// A message is returned only once every byte in `[0, length)` has
/// arrived; a missing fragment keeps it pending.
pub struct Reassembler {
    pending: BTreeMap<u16, PartialMessage>,
    max_pending: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(defaults::MAX_BUFFERED_HANDSHAKE_MESSAGES)
    }
}

impl Reassembler {
    pub fn new(max_pending: usize) -> Self {
        Self { pending: BTreeMap::new(), max_pending }
    }

    /// Add one fragment; returns the message if it is now complete
    pub fn insert(&mut self, header: &HandshakeHeader, fragment: &[u8]) -> Result<Option<HandshakeMessage>> {
        if fragment.len() != header.fragment_length as usize {
            return malformed_err!("fragment length mismatch");
        }
        let length = header.length as usize;
        if length > defaults::MAX_HANDSHAKE_MESSAGE_SIZE {
            return malformed_err!("handshake message of {} bytes exceeds limit", length);
        }

        if !self.pending.contains_key(&header.message_seq) && self.pending.len() >= self.max_pending {
            return malformed_err!("too many incomplete handshake messages");
        }

        let partial = self
            .pending
            .entry(header.message_seq)
            .or_insert_with(|| PartialMessage::new(header.msg_type, length));

        if partial.msg_type != header.msg_type || partial.body.len() != length {
            return malformed_err!("fragment disagrees with message {}", header.message_seq);
        }

        partial.insert(header.fragment_offset as usize, fragment);

        if partial.is_complete() {
            if let Some(done) = self.pending.remove(&header.message_seq) {
                return Ok(Some(HandshakeMessage::new(done.msg_type, header.message_seq, done.body)));
            }
        }
        Ok(None)
    }

    /// Drop partial state for messages below `seq`
    pub fn discard_before(&mut self, seq: u16) {
        self.pending.retain(|s, _| *s >= seq);
    }

    /// Number of incomplete messages held
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Cursor over a message body
struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return malformed_err!("handshake body truncated");
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    fn u24(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u24(self.take(3)?))
    }

    fn random(&mut self) -> Result<[u8; RANDOM_SIZE]> {
        let mut random = [0u8; RANDOM_SIZE];
        random.copy_from_slice(self.take(RANDOM_SIZE)?);
        Ok(random)
    }

    fn finish(self) -> Result<()> {
        if !self.bytes.is_empty() {
            return malformed_err!("{} trailing bytes in handshake body", self.bytes.len());
        }
        Ok(())
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u24(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes()[1..]);
}

/// ClientHello body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Offered wire versions, strongest first
    pub versions: Vec<u16>,
    pub random: [u8; RANDOM_SIZE],
    pub session_id: Vec<u8>,
    /// Offered cipher suite codes in client preference order
    pub cipher_suites: Vec<u16>,
}

impl ClientHello {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push((self.versions.len() * 2) as u8);
        for v in &self.versions {
            put_u16(&mut out, *v);
        }
        out.extend_from_slice(&self.random);
        out.push(self.session_id.len() as u8);
        out.extend_from_slice(&self.session_id);
        put_u16(&mut out, (self.cipher_suites.len() * 2) as u16);
        for s in &self.cipher_suites {
            put_u16(&mut out, *s);
        }
        out
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);

        let versions_len = r.u8()? as usize;
        if versions_len == 0 || versions_len % 2 != 0 {
            return malformed_err!("bad version list length {}", versions_len);
        }
        let versions = r.take(versions_len)?.chunks(2).map(BigEndian::read_u16).collect();

        let random = r.random()?;
        let sid_len = r.u8()? as usize;
        let session_id = r.take(sid_len)?.to_vec();

        let suites_len = r.u16()? as usize;
        if suites_len == 0 || suites_len % 2 != 0 {
            return malformed_err!("bad cipher suite list length {}", suites_len);
        }
        let cipher_suites = r.take(suites_len)?.chunks(2).map(BigEndian::read_u16).collect();
        r.finish()?;

        Ok(Self { versions, random, session_id, cipher_suites })
    }
}

/// ServerHello body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub version: u16,
    pub random: [u8; RANDOM_SIZE],
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
}

impl ServerHello {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u16(&mut out, self.version);
        out.extend_from_slice(&self.random);
        out.push(self.session_id.len() as u8);
        out.extend_from_slice(&self.session_id);
        put_u16(&mut out, self.cipher_suite);
        out
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let version = r.u16()?;
        let random = r.random()?;
        let sid_len = r.u8()? as usize;
        let session_id = r.take(sid_len)?.to_vec();
        let cipher_suite = r.u16()?;
        r.finish()?;
        Ok(Self { version, random, session_id, cipher_suite })
    }
}

/// Certificate body: opaque certificate bytes, possibly empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub certificate: Vec<u8>,
}

impl Certificate {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.certificate.len());
        put_u24(&mut out, self.certificate.len() as u32);
        out.extend_from_slice(&self.certificate);
        out
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let len = r.u24()? as usize;
        let certificate = r.take(len)?.to_vec();
        r.finish()?;
        Ok(Self { certificate })
    }
}

/// ServerKeyExchange body: the server's KEM public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub public_key: Vec<u8>,
}

impl ServerKeyExchange {
    pub fn encode(&self) -> Vec<u8> {
        encode_opaque16(&self.public_key)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(Self { public_key: decode_opaque16(body)? })
    }
}

/// ClientKeyExchange body: the KEM ciphertext
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeyExchange {
    pub ciphertext: Vec<u8>,
}

impl ClientKeyExchange {
    pub fn encode(&self) -> Vec<u8> {
        encode_opaque16(&self.ciphertext)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(Self { ciphertext: decode_opaque16(body)? })
    }
}

/// Finished body: verify data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Finished {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.verify_data.len());
        out.push(self.verify_data.len() as u8);
        out.extend_from_slice(&self.verify_data);
        out
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let len = r.u8()? as usize;
        let verify_data = r.take(len)?.to_vec();
        r.finish()?;
        Ok(Self { verify_data })
    }
}

fn encode_opaque16(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + bytes.len());
    put_u16(&mut out, bytes.len() as u16);
    out.extend_from_slice(bytes);
    out
}

fn decode_opaque16(body: &[u8]) -> Result<Vec<u8>> {
    let mut r = Reader::new(body);
    let len = r.u16()? as usize;
    let bytes = r.take(len)?.to_vec();
    r.finish()?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(len: usize) -> HandshakeMessage {
        let body = (0..len).map(|i| (i % 251) as u8).collect();
        HandshakeMessage::new(HandshakeType::ServerKeyExchange, 2, body)
    }

    #[test]
    fn test_header_serialization() -> Result<()> {
        let header = HandshakeHeader {
            msg_type: HandshakeType::ClientKeyExchange,
            length: 1090,
            message_seq: 2,
            fragment_offset: 500,
            fragment_length: 500,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes, [16, 0, 0x04, 0x42, 0, 2, 0, 0x01, 0xf4, 0, 0x01, 0xf4]);
        assert_eq!(HandshakeHeader::from_bytes(&bytes)?, header);
        Ok(())
    }

    #[test]
    fn test_header_rejects_overflowing_fragment() {
        let header = HandshakeHeader {
            msg_type: HandshakeType::Finished,
            length: 10,
            message_seq: 3,
            fragment_offset: 8,
            fragment_length: 5,
        };
        assert!(HandshakeHeader::from_bytes(&header.to_bytes()).is_err());
    }

    #[test]
    fn test_fragment_count() -> Result<()> {
        let message = sample_message(1184);
        assert_eq!(fragment_message(&message, 500)?.len(), 3);
        assert_eq!(fragment_message(&message, 1184)?.len(), 1);
        assert_eq!(fragment_message(&sample_message(0), 100)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_reassembly_out_of_order() -> Result<()> {
        let message = sample_message(2000);
        let mut fragments = fragment_message(&message, 300)?;
        fragments.reverse();

        let mut reassembler = Reassembler::default();
        let mut completed = None;
        for fragment in &fragments {
            for (header, body) in parse_fragments(fragment)? {
                if let Some(m) = reassembler.insert(&header, body)? {
                    completed = Some(m);
                }
            }
        }
        assert_eq!(completed, Some(message));
        assert_eq!(reassembler.pending(), 0);
        Ok(())
    }

    #[test]
    fn test_missing_fragment_never_completes() -> Result<()> {
        let message = sample_message(1000);
        let fragments = fragment_message(&message, 200)?;

        let mut reassembler = Reassembler::default();
        for (i, fragment) in fragments.iter().enumerate() {
            if i == 2 {
                continue;
            }
            for (header, body) in parse_fragments(fragment)? {
                assert!(reassembler.insert(&header, body)?.is_none());
            }
        }
        assert_eq!(reassembler.pending(), 1);
        Ok(())
    }

    #[test]
    fn test_discard_before_drops_older_partials() -> Result<()> {
        let mut reassembler = Reassembler::default();
        for seq in 1..4u16 {
            let message = HandshakeMessage::new(HandshakeType::Certificate, seq, vec![seq as u8; 100]);
            let fragments = fragment_message(&message, 40)?;
            let (header, body) = parse_fragments(&fragments[0])?[0];
            assert!(reassembler.insert(&header, body)?.is_none());
        }
        assert_eq!(reassembler.pending(), 3);

        reassembler.discard_before(3);
        assert_eq!(reassembler.pending(), 1);
        Ok(())
    }

    #[test]
    fn test_duplicate_fragments_are_harmless() -> Result<()> {
        let message = sample_message(600);
        let fragments = fragment_message(&message, 250)?;
        let mut reassembler = Reassembler::default();

        let (h0, b0) = parse_fragments(&fragments[0])?[0];
        assert!(reassembler.insert(&h0, b0)?.is_none());
        assert!(reassembler.insert(&h0, b0)?.is_none());

        let mut result = None;
        for fragment in &fragments[1..] {
            let (h, b) = parse_fragments(fragment)?[0];
            result = reassembler.insert(&h, b)?;
        }
        assert_eq!(result, Some(message));
        Ok(())
    }

    #[test]
    fn test_body_codecs() -> Result<()> {
        let hello = ClientHello {
            versions: vec![0xfefc, 0xfefd],
            random: [7u8; RANDOM_SIZE],
            session_id: vec![1, 2, 3],
            cipher_suites: vec![0xFE10, 0xFE02],
        };
        assert_eq!(ClientHello::decode(&hello.encode())?, hello);

        let server_hello = ServerHello {
            version: 0xfefd,
            random: [9u8; RANDOM_SIZE],
            session_id: vec![],
            cipher_suite: 0xFE02,
        };
        assert_eq!(ServerHello::decode(&server_hello.encode())?, server_hello);

        let cert = Certificate { certificate: vec![0xAB; 70_000] };
        assert_eq!(Certificate::decode(&cert.encode())?, cert);

        assert!(ClientHello::decode(&[0]).is_err());
        assert!(Finished::decode(&[4, 1, 2]).is_err());
        Ok(())
    }
}
