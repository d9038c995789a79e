/*!
Constants for the PQ-DTLS protocol.

This module contains all protocol constants including header sizes,
key sizes, KDF labels and configurable defaults.
*/

/// Size constants for the protocol
pub mod sizes {
    /// Size of the record header in bytes
    pub const RECORD_HEADER_SIZE: usize = 13;

    /// Size of the handshake message header in bytes
    pub const HANDSHAKE_HEADER_SIZE: usize = 12;

    /// Size of the application data fragment header in bytes
    pub const APP_FRAGMENT_HEADER_SIZE: usize = 6;

    /// Size of the client and server randoms
    pub const RANDOM_SIZE: usize = 32;

    /// Size of the session identifier
    pub const SESSION_ID_SIZE: usize = 32;

    /// Size of the master secret
    pub const MASTER_SECRET_SIZE: usize = 48;

    /// Largest sequence number representable in 48 bits
    pub const MAX_SEQUENCE: u64 = (1 << 48) - 1;

    /// Largest value representable in 24 bits
    pub const MAX_U24: u32 = (1 << 24) - 1;

    /// CRYSTALS-Kyber constants
    pub mod kyber {
        /// Size of Kyber512 public key in bytes
        pub const PUBLIC_KEY_BYTES_512: usize = 800;

        /// Size of Kyber512 ciphertext in bytes
        pub const CIPHERTEXT_BYTES_512: usize = 768;

        /// Size of Kyber768 public key in bytes
        pub const PUBLIC_KEY_BYTES_768: usize = 1184;

        /// Size of Kyber768 ciphertext in bytes
        pub const CIPHERTEXT_BYTES_768: usize = 1088;

        /// Size of Kyber1024 public key in bytes
        pub const PUBLIC_KEY_BYTES_1024: usize = 1568;

        /// Size of Kyber1024 ciphertext in bytes
        pub const CIPHERTEXT_BYTES_1024: usize = 1568;

        /// Size of Kyber shared secret in bytes
        pub const SHARED_SECRET_BYTES: usize = 32;
    }

    /// X25519 constants
    pub mod x25519 {
        /// Public key size
        pub const PUBLIC_KEY_BYTES: usize = 32;

        /// Secret scalar size
        pub const SECRET_KEY_BYTES: usize = 32;

        /// Shared secret size
        pub const SHARED_SECRET_BYTES: usize = 32;
    }

    /// AEAD constants shared by AES-GCM and ChaCha20-Poly1305
    pub mod aead {
        /// Size of the authentication tag in bytes
        pub const TAG_SIZE: usize = 16;

        /// Size of the nonce (and write IV) in bytes
        pub const NONCE_SIZE: usize = 12;
    }
}

/// Per-record expansion of an application data fragment: header, tag and fragment header
pub const RECORD_OVERHEAD: usize =
    sizes::RECORD_HEADER_SIZE + sizes::aead::TAG_SIZE + sizes::APP_FRAGMENT_HEADER_SIZE;

/// Per-record expansion of a sealed handshake fragment
pub const HANDSHAKE_RECORD_OVERHEAD: usize =
    sizes::RECORD_HEADER_SIZE + sizes::aead::TAG_SIZE + sizes::HANDSHAKE_HEADER_SIZE;

/// Last 8 bytes of a server random when a server deliberately negotiates below its maximum
pub const DOWNGRADE_SENTINEL: [u8; 8] = *b"DOWNGRD\0";

/// KDF labels
pub mod labels {
    /// Master secret derivation
    pub const MASTER_SECRET: &[u8] = b"master secret";

    /// Initial key block expansion
    pub const KEY_EXPANSION: &[u8] = b"key expansion";

    /// Key block rederivation on rekey
    pub const KEY_UPDATE: &[u8] = b"key update";

    /// Client Finished
    pub const CLIENT_FINISHED: &[u8] = b"client finished";

    /// Server Finished
    pub const SERVER_FINISHED: &[u8] = b"server finished";
}

/// Configuration defaults
pub mod defaults {
    use std::time::Duration;

    /// Default path MTU budget for a datagram
    pub const MTU: usize = 1400;

    /// Smallest MTU a context accepts
    pub const MIN_MTU: usize = 256;

    /// Default handshake timeout
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Initial flight retransmission interval
    pub const RETRANSMIT_INTERVAL: Duration = Duration::from_secs(1);

    /// Upper bound for the retransmission backoff
    pub const MAX_RETRANSMIT_INTERVAL: Duration = Duration::from_secs(8);

    /// Recoverable record failures tolerated before the session closes
    pub const FAILURE_BUDGET: u32 = 32;

    /// Malformed handshake messages tolerated before the session closes
    pub const MALFORMED_HANDSHAKE_BUDGET: u32 = 8;

    /// Default rekey data limit (100 MB)
    pub const REKEY_DATA_LIMIT: u64 = 100 * 1024 * 1024;

    /// Handshake messages held ahead of the next expected sequence number
    pub const MAX_BUFFERED_HANDSHAKE_MESSAGES: usize = 8;

    /// Records held while waiting for keys of a later epoch
    pub const MAX_BUFFERED_RECORDS: usize = 16;

    /// Incomplete application messages held for reassembly
    pub const MAX_PENDING_APP_MESSAGES: usize = 32;

    /// Largest handshake message accepted for reassembly
    pub const MAX_HANDSHAKE_MESSAGE_SIZE: usize = 64 * 1024;

    /// Width of the replay window in records
    pub const REPLAY_WINDOW_SIZE: u64 = 64;

    /// How far past its newest read epoch a session follows the peer
    pub const MAX_EPOCH_CATCH_UP: u16 = 4;
}
