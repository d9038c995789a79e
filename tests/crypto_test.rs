use pq_dtls::{
    core::{
        crypto::{cipher::Cipher, kdf, registry::CipherSuite},
        message::{ContentType, RecordHeader, Records},
        record::{self, Opened, RecordKeys, RecordLayer},
        security::ReplayWindow,
    },
    Error, HashAlgorithm, Result, SymmetricAlgorithm,
};

use proptest::prelude::*;

const VERSION: u16 = 0xfefd;

fn keys(algorithm: SymmetricAlgorithm) -> Result<RecordKeys> {
    RecordKeys::new(algorithm, &vec![0x42; algorithm.key_len()], &[0x07; 12])
}

// ----- AEAD Tests -----

#[test]
fn test_aead_round_trip_all_algorithms() -> Result<()> {
    for algorithm in [
        SymmetricAlgorithm::Aes128Gcm,
        SymmetricAlgorithm::Aes256Gcm,
        SymmetricAlgorithm::ChaCha20Poly1305,
    ] {
        let k = keys(algorithm)?;
        for size in [0usize, 1, 100, 1300] {
            let plaintext = vec![0xab; size];
            let sealed = record::seal(ContentType::ApplicationData, VERSION, &plaintext, 1, 3, &k)?;
            assert_eq!(sealed.len(), size + 16);

            let header = RecordHeader::new(ContentType::ApplicationData, VERSION, 1, 3, sealed.len() as u16);
            assert_eq!(record::open(&header, &sealed, &k)?, plaintext, "{} size {}", algorithm, size);
        }
    }
    Ok(())
}

fn algorithms() -> impl Strategy<Value = SymmetricAlgorithm> {
    prop_oneof![
        Just(SymmetricAlgorithm::Aes128Gcm),
        Just(SymmetricAlgorithm::Aes256Gcm),
        Just(SymmetricAlgorithm::ChaCha20Poly1305),
    ]
}

proptest! {
    #[test]
    fn test_any_flipped_byte_fails_open(
        algorithm in algorithms(),
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        index in any::<prop::sample::Index>(),
        flip in 1..=255u8,
    ) {
        let k = keys(algorithm).unwrap();
        let mut sealed = record::seal(ContentType::ApplicationData, VERSION, &plaintext, 1, 0, &k).unwrap();
        let header = RecordHeader::new(ContentType::ApplicationData, VERSION, 1, 0, sealed.len() as u16);

        // Covers both ciphertext and tag bytes
        let position = index.index(sealed.len());
        sealed[position] ^= flip;
        prop_assert!(matches!(record::open(&header, &sealed, &k), Err(Error::AuthenticationFailed)));
    }
}

#[test]
fn test_every_byte_position_is_protected() -> Result<()> {
    for algorithm in [
        SymmetricAlgorithm::Aes128Gcm,
        SymmetricAlgorithm::Aes256Gcm,
        SymmetricAlgorithm::ChaCha20Poly1305,
    ] {
        let k = keys(algorithm)?;
        let sealed = record::seal(ContentType::ApplicationData, VERSION, b"secret payload", 1, 0, &k)?;
        let header = RecordHeader::new(ContentType::ApplicationData, VERSION, 1, 0, sealed.len() as u16);

        for position in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[position] ^= 0x01;
            assert!(
                matches!(record::open(&header, &tampered, &k), Err(Error::AuthenticationFailed)),
                "{} accepted a flip at byte {}",
                algorithm,
                position
            );
        }
    }
    Ok(())
}

#[test]
fn test_header_is_authenticated() -> Result<()> {
    let k = keys(SymmetricAlgorithm::Aes256Gcm)?;
    let sealed = record::seal(ContentType::ApplicationData, VERSION, b"secret", 2, 9, &k)?;
    let header = RecordHeader::new(ContentType::ApplicationData, VERSION, 2, 9, sealed.len() as u16);

    let other_epoch = RecordHeader { epoch: 3, ..header };
    assert!(record::open(&other_epoch, &sealed, &k).is_err());

    let other_type = RecordHeader { content_type: ContentType::Handshake, ..header };
    assert!(record::open(&other_type, &sealed, &k).is_err());
    Ok(())
}

#[test]
fn test_wrong_key_fails() -> Result<()> {
    let sealer = keys(SymmetricAlgorithm::Aes128Gcm)?;
    let opener = RecordKeys::new(SymmetricAlgorithm::Aes128Gcm, &[0x43; 16], &[0x07; 12])?;
    let sealed = record::seal(ContentType::ApplicationData, VERSION, b"data", 1, 0, &sealer)?;
    let header = RecordHeader::new(ContentType::ApplicationData, VERSION, 1, 0, sealed.len() as u16);
    assert!(matches!(record::open(&header, &sealed, &opener), Err(Error::AuthenticationFailed)));
    Ok(())
}

#[test]
fn test_record_nonce_varies_with_sequence() {
    let iv = [0x11u8; 12];
    let a = Cipher::record_nonce(&iv, 0);
    let b = Cipher::record_nonce(&iv, 1);
    assert_eq!(a, iv);
    assert_ne!(a, b);
    assert_eq!(a[..4], b[..4]);
}

// ----- Record Layer Tests -----

#[test]
fn test_sequence_monotonic_and_reset_on_epoch() -> Result<()> {
    let mut layer = RecordLayer::new(VERSION);
    layer.install_write_keys(1, keys(SymmetricAlgorithm::Aes256Gcm)?)?;

    let mut datagram = Vec::new();
    for _ in 0..4 {
        layer.write_record(ContentType::ApplicationData, b"x", &mut datagram)?;
    }
    layer.install_write_keys(2, keys(SymmetricAlgorithm::Aes256Gcm)?)?;
    layer.write_record(ContentType::ApplicationData, b"y", &mut datagram)?;

    let headers: Vec<(u16, u64)> = Records::new(&datagram)
        .map(|r| r.map(|r| (r.header.epoch, r.header.sequence)))
        .collect::<Result<_>>()?;
    assert_eq!(headers, vec![(1, 0), (1, 1), (1, 2), (1, 3), (2, 0)]);
    Ok(())
}

#[test]
fn test_replayed_record_rejected() -> Result<()> {
    let mut sender = RecordLayer::new(VERSION);
    let mut receiver = RecordLayer::new(VERSION);
    sender.install_write_keys(1, keys(SymmetricAlgorithm::Aes256Gcm)?)?;
    receiver.install_read_keys(1, keys(SymmetricAlgorithm::Aes256Gcm)?);

    let mut datagram = Vec::new();
    sender.write_record(ContentType::ApplicationData, b"once", &mut datagram)?;
    let record = Records::new(&datagram).next().ok_or(Error::SessionClosed)??;

    assert_eq!(receiver.read_record(&record)?, Opened::Plaintext(b"once".to_vec()));
    assert!(matches!(
        receiver.read_record(&record),
        Err(Error::ReplayedRecord { epoch: 1, sequence: 0 })
    ));
    Ok(())
}

#[test]
fn test_forged_record_does_not_advance_window() -> Result<()> {
    let mut sender = RecordLayer::new(VERSION);
    let mut receiver = RecordLayer::new(VERSION);
    sender.install_write_keys(1, keys(SymmetricAlgorithm::Aes256Gcm)?)?;
    receiver.install_read_keys(1, keys(SymmetricAlgorithm::Aes256Gcm)?);

    let mut datagram = Vec::new();
    sender.write_record(ContentType::ApplicationData, b"real", &mut datagram)?;
    let mut forged = datagram.clone();
    let last = forged.len() - 1;
    forged[last] ^= 0xff;

    let record = Records::new(&forged).next().ok_or(Error::SessionClosed)??;
    assert!(matches!(receiver.read_record(&record), Err(Error::AuthenticationFailed)));

    // The genuine record with the same sequence number still opens
    let record = Records::new(&datagram).next().ok_or(Error::SessionClosed)??;
    assert_eq!(receiver.read_record(&record)?, Opened::Plaintext(b"real".to_vec()));
    Ok(())
}

#[test]
fn test_future_epoch_reported() -> Result<()> {
    let mut sender = RecordLayer::new(VERSION);
    let mut receiver = RecordLayer::new(VERSION);
    sender.install_write_keys(1, keys(SymmetricAlgorithm::Aes256Gcm)?)?;

    let mut datagram = Vec::new();
    sender.write_record(ContentType::ApplicationData, b"early", &mut datagram)?;
    let record = Records::new(&datagram).next().ok_or(Error::SessionClosed)??;
    assert_eq!(receiver.read_record(&record)?, Opened::FutureEpoch(1));
    Ok(())
}

#[test]
fn test_replay_window_edges() {
    let mut window = ReplayWindow::new();
    window.mark(100);
    assert!(!window.check(100));
    assert!(window.check(99));
    assert!(window.check(37));
    assert!(!window.check(36));
    assert!(window.check(101));

    window.mark(200);
    assert!(!window.check(100));
    assert_eq!(window.highest(), Some(200));
}

// ----- Key Schedule Tests -----

#[test]
fn test_key_block_matches_suite_layout() -> Result<()> {
    let client_random = [1u8; 32];
    let server_random = [2u8; 32];
    let master = kdf::master_secret(&[9u8; 32], &client_random, &server_random)?;

    for suite in CipherSuite::ALL {
        let len = suite.key_material().key_block_len();
        let block = kdf::key_block(&master, &client_random, &server_random, len)?;
        assert_eq!(block.len(), len);

        let rekeyed = kdf::rekey_block(&master, &client_random, &server_random, 2, len)?;
        assert_ne!(*block, *rekeyed);
    }
    Ok(())
}

#[test]
fn test_finished_verify_data_depends_on_label_and_transcript() -> Result<()> {
    let key = [5u8; 32];
    let client = kdf::finished_verify_data(HashAlgorithm::Sha256, &key, b"client finished", b"transcript")?;
    let server = kdf::finished_verify_data(HashAlgorithm::Sha256, &key, b"server finished", b"transcript")?;
    let other = kdf::finished_verify_data(HashAlgorithm::Sha256, &key, b"client finished", b"transcripT")?;

    assert_eq!(client.len(), 32);
    assert_ne!(client, server);
    assert_ne!(client, other);

    let long = kdf::finished_verify_data(HashAlgorithm::Sha384, &[5u8; 48], b"client finished", b"transcript")?;
    assert_eq!(long.len(), 48);
    Ok(())
}
