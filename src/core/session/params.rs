/*!
Negotiated parameters and key material for a PQ-DTLS session.

`NegotiatedParameters` is an immutable snapshot produced once the handshake
completes. Secrets live in separately owned structs that are wiped on drop,
and a rekey replaces the whole `KeyBlock` rather than editing it in place.
*/

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::core::{
    constants::sizes::RANDOM_SIZE,
    crypto::{
        config::ProtocolVersion,
        kdf,
        registry::{CipherSuite, KeyMaterialSizes},
    },
    error::{Error, Result},
    session::state::Role,
};

/// Parameters both peers agreed on during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedParameters {
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub client_random: [u8; RANDOM_SIZE],
    pub server_random: [u8; RANDOM_SIZE],
    pub session_id: Vec<u8>,
    /// Raw certificate the peer presented (may be empty)
    pub peer_certificate: Vec<u8>,
}

/// Secret inputs to the key schedule that outlive the handshake
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecurityParameters {
    pub client_random: [u8; RANDOM_SIZE],
    pub server_random: [u8; RANDOM_SIZE],
    master_secret: Vec<u8>,
}

impl SecurityParameters {
    /// Extract the master secret from the key exchange output
    pub fn derive(
        shared_secret: &[u8],
        client_random: [u8; RANDOM_SIZE],
        server_random: [u8; RANDOM_SIZE],
    ) -> Result<Self> {
        let master = kdf::master_secret(shared_secret, &client_random, &server_random)?;
        Ok(Self { client_random, server_random, master_secret: master.to_vec() })
    }

    /// Key block for the first protected epoch
    pub fn initial_key_block(&self, sizes: KeyMaterialSizes) -> Result<KeyBlock> {
        let bytes = kdf::key_block(
            &self.master_secret,
            &self.client_random,
            &self.server_random,
            sizes.key_block_len(),
        )?;
        KeyBlock::from_bytes(&bytes, sizes)
    }

    /// Key block for a rekeyed epoch
    pub fn rekey_block(&self, epoch: u16, sizes: KeyMaterialSizes) -> Result<KeyBlock> {
        let bytes = kdf::rekey_block(
            &self.master_secret,
            &self.client_random,
            &self.server_random,
            epoch,
            sizes.key_block_len(),
        )?;
        KeyBlock::from_bytes(&bytes, sizes)
    }
}

impl fmt::Debug for SecurityParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityParameters").finish_non_exhaustive()
    }
}

/// Key material for one direction
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DirectionKeys {
    pub mac_key: Vec<u8>,
    pub write_key: Vec<u8>,
    pub write_iv: Vec<u8>,
}

/// Keys for both directions of one epoch
///
/// Split in the order: client MAC key, server MAC key, client write key,
/// server write key, client write IV, server write IV.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyBlock {
    pub client: DirectionKeys,
    pub server: DirectionKeys,
}

impl KeyBlock {
    pub fn from_bytes(bytes: &[u8], sizes: KeyMaterialSizes) -> Result<Self> {
        if bytes.len() != sizes.key_block_len() {
            return Err(Error::Internal("key block length mismatch".into()));
        }
        let bytes = Zeroizing::new(bytes.to_vec());
        let (client_mac, rest) = bytes.split_at(sizes.mac_key_len);
        let (server_mac, rest) = rest.split_at(sizes.mac_key_len);
        let (client_key, rest) = rest.split_at(sizes.key_len);
        let (server_key, rest) = rest.split_at(sizes.key_len);
        let (client_iv, server_iv) = rest.split_at(sizes.iv_len);

        Ok(Self {
            client: DirectionKeys {
                mac_key: client_mac.to_vec(),
                write_key: client_key.to_vec(),
                write_iv: client_iv.to_vec(),
            },
            server: DirectionKeys {
                mac_key: server_mac.to_vec(),
                write_key: server_key.to_vec(),
                write_iv: server_iv.to_vec(),
            },
        })
    }

    /// Keys this endpoint writes with
    pub fn local(&self, role: Role) -> &DirectionKeys {
        match role {
            Role::Client => &self.client,
            Role::Server => &self.server,
        }
    }

    /// Keys the peer writes with
    pub fn remote(&self, role: Role) -> &DirectionKeys {
        match role {
            Role::Client => &self.server,
            Role::Server => &self.client,
        }
    }
}

impl fmt::Debug for KeyBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyBlock(<redacted>)")
    }
}
