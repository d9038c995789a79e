/*!
Record layer for the PQ-DTLS protocol.

The record layer owns the per-epoch write and read state of one session:
sequence counters, AEAD keys and replay windows. Epoch 0 carries plaintext
handshake records; every later epoch is AEAD protected.

Application payloads are split into fragments under the MTU budget. Each
fragment starts with a 6-byte header (`message_id | index | count`) inside
the protected plaintext, and the receiver hands a message up only once all
of its fragments have arrived.
*/

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

use crate::core::{
    constants::{
        defaults,
        sizes::{self, APP_FRAGMENT_HEADER_SIZE, MAX_SEQUENCE, RECORD_HEADER_SIZE},
        RECORD_OVERHEAD,
    },
    crypto::{cipher::Cipher, config::SymmetricAlgorithm},
    error::{Error, Result},
    message::{
        record::{encode_record, Record, RecordHeader},
        types::ContentType,
    },
    security::replay::ReplayWindow,
    session::params::DirectionKeys,
};
use crate::malformed_err;

/// AEAD key and IV for one direction of one epoch
pub struct RecordKeys {
    cipher: Cipher,
    iv: [u8; sizes::aead::NONCE_SIZE],
}

impl RecordKeys {
    pub fn new(algorithm: SymmetricAlgorithm, key: &[u8], iv: &[u8]) -> Result<Self> {
        let iv: [u8; sizes::aead::NONCE_SIZE] = iv
            .try_into()
            .map_err(|_| Error::Internal("write IV must be 12 bytes".into()))?;
        Ok(Self { cipher: Cipher::new(algorithm, key)?, iv })
    }

    pub fn from_direction(algorithm: SymmetricAlgorithm, keys: &DirectionKeys) -> Result<Self> {
        Self::new(algorithm, &keys.write_key, &keys.write_iv)
    }
}

impl Drop for RecordKeys {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.iv.zeroize();
    }
}

/// AAD for a protected record: the header with the ciphertext length
fn additional_data(
    content_type: ContentType,
    version: u16,
    epoch: u16,
    sequence: u64,
    ciphertext_len: usize,
) -> Result<[u8; RECORD_HEADER_SIZE]> {
    let length = u16::try_from(ciphertext_len)
        .map_err(|_| Error::Internal(format!("record of {} bytes too large", ciphertext_len)))?;
    Ok(RecordHeader::new(content_type, version, epoch, sequence, length).to_bytes())
}

/// Seal a record payload, returning ciphertext‖tag
pub fn seal(
    content_type: ContentType,
    version: u16,
    plaintext: &[u8],
    epoch: u16,
    sequence: u64,
    keys: &RecordKeys,
) -> Result<Vec<u8>> {
    let nonce = Cipher::record_nonce(&keys.iv, sequence);
    let aad = additional_data(
        content_type,
        version,
        epoch,
        sequence,
        plaintext.len() + sizes::aead::TAG_SIZE,
    )?;
    keys.cipher.seal(&nonce, &aad, plaintext)
}

/// Open a sealed record payload
///
/// Fails with `AuthenticationFailed` when the tag does not verify.
pub fn open(header: &RecordHeader, sealed: &[u8], keys: &RecordKeys) -> Result<Vec<u8>> {
    let nonce = Cipher::record_nonce(&keys.iv, header.sequence);
    let aad = additional_data(header.content_type, header.version, header.epoch, header.sequence, sealed.len())?;
    keys.cipher.open(&nonce, &aad, sealed)
}

/// Split `payload` into chunks that fit one record each under `mtu`
///
/// Returns a single chunk when the payload already fits.
pub fn fragment(payload: &[u8], mtu: usize) -> Result<Vec<&[u8]>> {
    let max = max_fragment_len(mtu)?;
    if payload.len() <= max {
        return Ok(vec![payload]);
    }
    Ok(payload.chunks(max).collect())
}

/// Largest application fragment that fits in one record under `mtu`
pub fn max_fragment_len(mtu: usize) -> Result<usize> {
    match mtu.checked_sub(RECORD_OVERHEAD) {
        Some(max) if max > 0 => Ok(max),
        _ => Err(Error::Config(format!("MTU {} leaves no room for payload", mtu))),
    }
}

struct WriteState {
    keys: Option<RecordKeys>,
    next_sequence: u64,
}

struct ReadState {
    keys: Option<RecordKeys>,
    window: ReplayWindow,
}

struct PendingMessage {
    count: u16,
    fragments: BTreeMap<u16, Vec<u8>>,
}

/// Result of processing one received record
#[derive(Debug, PartialEq, Eq)]
pub enum Opened {
    /// Record authenticated (or was plaintext at epoch 0)
    Plaintext(Vec<u8>),
    /// Keys for this epoch are not installed yet
    FutureEpoch(u16),
    /// Epoch is older than any read state still held
    StaleEpoch(u16),
}

/// Per-session record layer
pub struct RecordLayer {
    version: u16,
    write: BTreeMap<u16, WriteState>,
    read: BTreeMap<u16, ReadState>,
    next_message_id: u16,
    pending: BTreeMap<u16, PendingMessage>,
}

impl RecordLayer {
    /// Create a record layer with plaintext epoch 0 installed
    pub fn new(version: u16) -> Self {
        let mut write = BTreeMap::new();
        write.insert(0, WriteState { keys: None, next_sequence: 0 });
        let mut read = BTreeMap::new();
        read.insert(0, ReadState { keys: None, window: ReplayWindow::new() });
        Self { version, write, read, next_message_id: 0, pending: BTreeMap::new() }
    }

    /// Wire version stamped on outgoing records
    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn set_version(&mut self, version: u16) {
        self.version = version;
    }

    /// Current write epoch
    pub fn write_epoch(&self) -> u16 {
        self.write.keys().next_back().copied().unwrap_or(0)
    }

    /// Highest epoch we can read
    pub fn read_epoch(&self) -> u16 {
        self.read.keys().next_back().copied().unwrap_or(0)
    }

    /// Next sequence number the given write epoch will use
    pub fn next_sequence(&self, epoch: u16) -> Option<u64> {
        self.write.get(&epoch).map(|w| w.next_sequence)
    }

    /// Install write keys for `epoch`; its sequence counter starts at 0
    ///
    /// Only the newest two write epochs are kept.
    pub fn install_write_keys(&mut self, epoch: u16, keys: RecordKeys) -> Result<()> {
        if epoch <= self.write_epoch() && self.write_epoch() != 0 {
            return Err(Error::Internal(format!("write epoch {} already installed", epoch)));
        }
        self.write.insert(epoch, WriteState { keys: Some(keys), next_sequence: 0 });
        while self.write.len() > 2 {
            self.write.pop_first();
        }
        Ok(())
    }

    /// Install read keys for `epoch`
    ///
    /// The previous epoch stays readable so records in flight across a
    /// rekey still open; anything older is dropped.
    pub fn install_read_keys(&mut self, epoch: u16, keys: RecordKeys) {
        self.read.insert(epoch, ReadState { keys: Some(keys), window: ReplayWindow::new() });
        while self.read.len() > 2 {
            self.read.pop_first();
        }
    }

    /// Forget every key; subsequent seal/open calls fail
    pub fn clear_keys(&mut self) {
        self.write.clear();
        self.read.clear();
        self.pending.clear();
    }

    /// Encode a record at the current write epoch and append it to `out`
    pub fn write_record(&mut self, content_type: ContentType, plaintext: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let epoch = self.write_epoch();
        self.write_record_at(epoch, content_type, plaintext, out)
    }

    /// Encode a record at a specific write epoch (used for retransmitting
    /// a flight that straddles the cipher change)
    pub fn write_record_at(
        &mut self,
        epoch: u16,
        content_type: ContentType,
        plaintext: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let version = self.version;
        let state = self
            .write
            .get_mut(&epoch)
            .ok_or_else(|| Error::Internal(format!("no write keys for epoch {}", epoch)))?;

        let sequence = state.next_sequence;
        if sequence > MAX_SEQUENCE {
            return Err(Error::Internal(format!("sequence space exhausted in epoch {}", epoch)));
        }

        let payload = match &state.keys {
            Some(keys) => seal(content_type, version, plaintext, epoch, sequence, keys)?,
            None => plaintext.to_vec(),
        };
        let length = u16::try_from(payload.len())
            .map_err(|_| Error::Internal(format!("record of {} bytes too large", payload.len())))?;

        state.next_sequence += 1;
        encode_record(out, &RecordHeader::new(content_type, version, epoch, sequence, length), &payload);
        trace!(epoch, sequence, %content_type, "record sealed");
        Ok(())
    }

    /// Authenticate and decrypt one received record
    pub fn read_record(&mut self, record: &Record<'_>) -> Result<Opened> {
        let header = &record.header;
        let epoch = header.epoch;
        let newest = self.read_epoch();

        let Some(state) = self.read.get_mut(&epoch) else {
            return Ok(if epoch > newest {
                Opened::FutureEpoch(epoch)
            } else {
                Opened::StaleEpoch(epoch)
            });
        };

        if !state.window.check(header.sequence) {
            return Err(Error::ReplayedRecord { epoch, sequence: header.sequence });
        }

        let plaintext = match &state.keys {
            Some(keys) => open(header, record.payload, keys)?,
            None => {
                if header.content_type == ContentType::ApplicationData {
                    return malformed_err!("plaintext application data");
                }
                record.payload.to_vec()
            }
        };

        state.window.mark(header.sequence);
        Ok(Opened::Plaintext(plaintext))
    }

    /// Open a record for an epoch not installed yet using candidate keys
    ///
    /// The keys become the epoch's read state only if the record
    /// authenticates.
    pub fn read_record_with(&mut self, record: &Record<'_>, keys: RecordKeys) -> Result<Vec<u8>> {
        let header = &record.header;
        let plaintext = open(header, record.payload, &keys)?;
        self.install_read_keys(header.epoch, keys);
        if let Some(state) = self.read.get_mut(&header.epoch) {
            state.window.mark(header.sequence);
        }
        Ok(plaintext)
    }

    /// Split an application payload into framed record plaintexts
    pub fn frame_application_data(&mut self, payload: &[u8], mtu: usize) -> Result<Vec<Vec<u8>>> {
        let chunks = fragment(payload, mtu)?;
        let count = u16::try_from(chunks.len())
            .map_err(|_| Error::Config(format!("payload of {} bytes needs too many fragments", payload.len())))?;

        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        Ok(chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                let mut framed = Vec::with_capacity(APP_FRAGMENT_HEADER_SIZE + chunk.len());
                framed.extend_from_slice(&message_id.to_be_bytes());
                framed.extend_from_slice(&(index as u16).to_be_bytes());
                framed.extend_from_slice(&count.to_be_bytes());
                framed.extend_from_slice(chunk);
                framed
            })
            .collect())
    }

    /// Accept one application fragment; returns a message once complete
    pub fn accept_application_fragment(&mut self, plaintext: &[u8]) -> Result<Option<Vec<u8>>> {
        if plaintext.len() < APP_FRAGMENT_HEADER_SIZE {
            return malformed_err!("application fragment header truncated");
        }
        let message_id = BigEndian::read_u16(&plaintext[0..2]);
        let index = BigEndian::read_u16(&plaintext[2..4]);
        let count = BigEndian::read_u16(&plaintext[4..6]);
        let body = &plaintext[APP_FRAGMENT_HEADER_SIZE..];

        if count == 0 || index >= count {
            return malformed_err!("application fragment {}/{} out of range", index, count);
        }
        if count == 1 {
            return Ok(Some(body.to_vec()));
        }

        if !self.pending.contains_key(&message_id) && self.pending.len() >= defaults::MAX_PENDING_APP_MESSAGES {
            // Evict the oldest incomplete message
            self.pending.pop_first();
        }

        let pending = self
            .pending
            .entry(message_id)
            .or_insert_with(|| PendingMessage { count, fragments: BTreeMap::new() });
        if pending.count != count {
            return malformed_err!("fragment count changed for message {}", message_id);
        }
        pending.fragments.entry(index).or_insert_with(|| body.to_vec());

        if pending.fragments.len() == count as usize {
            if let Some(done) = self.pending.remove(&message_id) {
                return Ok(Some(done.fragments.into_values().flatten().collect()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::record::Records;

    fn keys() -> Result<RecordKeys> {
        RecordKeys::new(SymmetricAlgorithm::Aes256Gcm, &[0x11; 32], &[0x22; 12])
    }

    fn protected_pair() -> Result<(RecordLayer, RecordLayer)> {
        let mut sender = RecordLayer::new(0xfefd);
        let mut receiver = RecordLayer::new(0xfefd);
        sender.install_write_keys(1, keys()?)?;
        receiver.install_read_keys(1, keys()?);
        Ok((sender, receiver))
    }

    #[test]
    fn test_seal_open_round_trip() -> Result<()> {
        let k = keys()?;
        let sealed = seal(ContentType::ApplicationData, 0xfefd, b"hello", 1, 7, &k)?;
        let header = RecordHeader::new(ContentType::ApplicationData, 0xfefd, 1, 7, sealed.len() as u16);
        assert_eq!(open(&header, &sealed, &k)?, b"hello");

        let wrong_seq = RecordHeader { sequence: 8, ..header };
        assert!(matches!(open(&wrong_seq, &sealed, &k), Err(Error::AuthenticationFailed)));
        Ok(())
    }

    #[test]
    fn test_fragment_fast_path() -> Result<()> {
        assert_eq!(fragment(b"small", 1400)?.len(), 1);
        let payload = vec![0u8; 3000];
        let max = max_fragment_len(1400)?;
        assert_eq!(max, 1400 - RECORD_OVERHEAD);
        assert_eq!(fragment(&payload, 1400)?.len(), 3000usize.div_ceil(max));
        assert!(fragment(&payload, 10).is_err());
        Ok(())
    }

    #[test]
    fn test_sequence_numbers_monotonic_and_reset() -> Result<()> {
        let (mut sender, _) = protected_pair()?;
        let mut datagram = Vec::new();
        for _ in 0..5 {
            sender.write_record(ContentType::ApplicationData, b"x", &mut datagram)?;
        }
        let sequences: Vec<u64> = Records::new(&datagram)
            .map(|r| r.map(|r| r.header.sequence))
            .collect::<Result<_>>()?;
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);

        sender.install_write_keys(2, keys()?)?;
        assert_eq!(sender.write_epoch(), 2);
        assert_eq!(sender.next_sequence(2), Some(0));
        Ok(())
    }

    #[test]
    fn test_replay_rejected() -> Result<()> {
        let (mut sender, mut receiver) = protected_pair()?;
        let mut first = Vec::new();
        sender.write_record(ContentType::ApplicationData, b"one", &mut first)?;
        let mut second = Vec::new();
        sender.write_record(ContentType::ApplicationData, b"two", &mut second)?;

        for datagram in [&first, &second] {
            for record in Records::new(datagram) {
                assert!(matches!(receiver.read_record(&record?)?, Opened::Plaintext(_)));
            }
        }

        let replayed = Records::new(&first).next().ok_or(Error::Internal("empty".into()))??;
        assert!(matches!(receiver.read_record(&replayed), Err(Error::ReplayedRecord { epoch: 1, sequence: 0 })));
        Ok(())
    }

    #[test]
    fn test_tampered_record_does_not_advance_window() -> Result<()> {
        let (mut sender, mut receiver) = protected_pair()?;
        let mut datagram = Vec::new();
        sender.write_record(ContentType::ApplicationData, b"payload", &mut datagram)?;

        let mut tampered = datagram.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;

        let record = Records::new(&tampered).next().ok_or(Error::Internal("empty".into()))??;
        assert!(matches!(receiver.read_record(&record), Err(Error::AuthenticationFailed)));

        let record = Records::new(&datagram).next().ok_or(Error::Internal("empty".into()))??;
        assert_eq!(receiver.read_record(&record)?, Opened::Plaintext(b"payload".to_vec()));
        Ok(())
    }

    #[test]
    fn test_epoch_classification() -> Result<()> {
        let (mut sender, mut receiver) = protected_pair()?;
        sender.install_write_keys(3, keys()?)?;
        let mut datagram = Vec::new();
        sender.write_record(ContentType::ApplicationData, b"later", &mut datagram)?;
        let record = Records::new(&datagram).next().ok_or(Error::Internal("empty".into()))??;
        assert_eq!(receiver.read_record(&record)?, Opened::FutureEpoch(3));

        receiver.install_read_keys(2, keys()?);
        receiver.install_read_keys(3, keys()?);
        // Epochs 0 and 1 were dropped; only 2 and 3 remain
        let mut old = Vec::new();
        sender.write_record_at(3, ContentType::ApplicationData, b"x", &mut old)?;
        let stale = RecordHeader { epoch: 1, ..RecordHeader::from_bytes(&old)? };
        let record = Record { header: stale, payload: &old[RECORD_HEADER_SIZE..] };
        assert_eq!(receiver.read_record(&record)?, Opened::StaleEpoch(1));
        Ok(())
    }

    #[test]
    fn test_application_reassembly_any_order() -> Result<()> {
        let (mut sender, mut receiver) = protected_pair()?;
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
        let mut frames = sender.frame_application_data(&payload, 1400)?;
        assert_eq!(frames.len(), 5000usize.div_ceil(max_fragment_len(1400)?));

        frames.swap(0, 2);
        let last = frames.pop().ok_or(Error::Internal("no frames".into()))?;
        for frame in &frames {
            assert!(receiver.accept_application_fragment(frame)?.is_none());
        }
        assert_eq!(receiver.accept_application_fragment(&last)?, Some(payload));
        Ok(())
    }
}
