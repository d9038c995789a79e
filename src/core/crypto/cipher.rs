/*!
AEAD record protection for the PQ-DTLS protocol.

A `Cipher` wraps one of the supported AEAD algorithms keyed with a write key.
Nonces are built per record from the write IV and the record sequence number.
*/

use std::fmt;

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::{
    ChaCha20Poly1305,
    aead::{Aead, KeyInit, Payload},
};

use crate::core::{
    constants::sizes,
    crypto::config::SymmetricAlgorithm,
    error::{Error, Result},
};

enum Inner {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

/// Cipher seals and opens record payloads
pub struct Cipher {
    algorithm: SymmetricAlgorithm,
    inner: Inner,
}

impl Cipher {
    /// Create a new Cipher for `algorithm` keyed with `key`
    pub fn new(algorithm: SymmetricAlgorithm, key: &[u8]) -> Result<Self> {
        if key.len() != algorithm.key_len() {
            return Err(Error::Internal(format!(
                "{} requires a {}-byte key",
                algorithm,
                algorithm.key_len()
            )));
        }

        let inner = match algorithm {
            SymmetricAlgorithm::Aes128Gcm => {
                Inner::Aes128(Box::new(Aes128Gcm::new_from_slice(key).map_err(invalid_key)?))
            }
            SymmetricAlgorithm::Aes256Gcm => {
                Inner::Aes256(Box::new(Aes256Gcm::new_from_slice(key).map_err(invalid_key)?))
            }
            SymmetricAlgorithm::ChaCha20Poly1305 => {
                Inner::ChaCha(Box::new(ChaCha20Poly1305::new_from_slice(key).map_err(invalid_key)?))
            }
        };

        Ok(Self { algorithm, inner })
    }

    /// Algorithm in use
    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    /// Encrypt `plaintext`, returning ciphertext followed by the tag
    pub fn seal(&self, nonce: &[u8; sizes::aead::NONCE_SIZE], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload { msg: plaintext, aad };
        let sealed = match &self.inner {
            Inner::Aes128(c) => c.encrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            Inner::Aes256(c) => c.encrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            Inner::ChaCha(c) => c.encrypt(chacha20poly1305::Nonce::from_slice(nonce), payload),
        };
        sealed.map_err(|_| Error::Internal("AEAD seal failed".into()))
    }

    /// Decrypt and authenticate ciphertext‖tag
    pub fn open(&self, nonce: &[u8; sizes::aead::NONCE_SIZE], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < sizes::aead::TAG_SIZE {
            return Err(Error::AuthenticationFailed);
        }
        let payload = Payload { msg: sealed, aad };
        let opened = match &self.inner {
            Inner::Aes128(c) => c.decrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            Inner::Aes256(c) => c.decrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            Inner::ChaCha(c) => c.decrypt(chacha20poly1305::Nonce::from_slice(nonce), payload),
        };
        opened.map_err(|_| Error::AuthenticationFailed)
    }

    /// Per-record nonce: the write IV XORed with the sequence number,
    /// big-endian in the low 8 bytes
    pub fn record_nonce(iv: &[u8], sequence: u64) -> [u8; sizes::aead::NONCE_SIZE] {
        let mut nonce = [0u8; sizes::aead::NONCE_SIZE];
        let n = iv.len().min(sizes::aead::NONCE_SIZE);
        nonce[..n].copy_from_slice(&iv[..n]);

        let seq = sequence.to_be_bytes();
        for (byte, s) in nonce[4..].iter_mut().zip(seq.iter()) {
            *byte ^= s;
        }
        nonce
    }
}

fn invalid_key<E>(_: E) -> Error {
    Error::Internal("invalid AEAD key".into())
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").field("algorithm", &self.algorithm).finish_non_exhaustive()
    }
}
