/*!
Key exchange functionality for the PQ-DTLS protocol.

Every supported key exchange is driven through the same KEM interface:
the responder publishes a public key, the initiator encapsulates against it,
and the responder decapsulates the ciphertext. X25519 fits this shape by
treating a fresh ephemeral public key as the ciphertext. The hybrid
algorithm concatenates the classical and post-quantum parts (classical first)
in the public key, the ciphertext and the shared secret.
*/

use std::fmt;

use pqcrypto_kyber::{kyber1024, kyber512, kyber768};
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::core::{
    constants::sizes,
    crypto::config::KeyExchangeAlgorithm,
    error::{KeyExchangeError, Result},
};
use crate::key_exchange_err;

/// Shared secret bytes, wiped when dropped
pub type SharedSecret = Zeroizing<Vec<u8>>;

/// A public/private key pair for one key exchange algorithm
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    algorithm: KeyExchangeAlgorithm,
    public_key: Vec<u8>,
    private_key: Vec<u8>,
}

impl KeyPair {
    /// Algorithm this key pair belongs to
    pub fn algorithm(&self) -> KeyExchangeAlgorithm {
        self.algorithm
    }

    /// Public key bytes
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Private key bytes
    ///
    /// Only the handshake engine should touch these.
    pub(crate) fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm)
            .field("public_key_len", &self.public_key.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Result of encapsulating against a peer public key
pub struct Encapsulation {
    /// Ciphertext sent to the key owner
    pub ciphertext: Vec<u8>,
    /// Shared secret kept locally
    pub shared_secret: SharedSecret,
}

impl fmt::Debug for Encapsulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encapsulation")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}

/// Generates Kyber helpers for one parameter set
macro_rules! kyber_kem {
    ($name:ident, $module:ident) => {
        mod $name {
            use super::*;

            pub(super) fn keypair() -> (Vec<u8>, Vec<u8>) {
                let (pk, sk) = $module::keypair();
                (pk.as_bytes().to_vec(), sk.as_bytes().to_vec())
            }

            pub(super) fn encapsulate(public_key: &[u8]) -> Result<Encapsulation> {
                let pk = $module::PublicKey::from_bytes(public_key)
                    .map_err(|_| KeyExchangeError::EncapsulationError)?;
                let (ss, ct) = $module::encapsulate(&pk);
                Ok(Encapsulation {
                    ciphertext: ct.as_bytes().to_vec(),
                    shared_secret: Zeroizing::new(ss.as_bytes().to_vec()),
                })
            }

            pub(super) fn decapsulate(ciphertext: &[u8], private_key: &[u8]) -> Result<SharedSecret> {
                let ct = $module::Ciphertext::from_bytes(ciphertext)
                    .map_err(|_| KeyExchangeError::DecapsulationError)?;
                let sk = $module::SecretKey::from_bytes(private_key)
                    .map_err(|_| KeyExchangeError::DecapsulationError)?;
                let ss = $module::decapsulate(&ct, &sk);
                Ok(Zeroizing::new(ss.as_bytes().to_vec()))
            }
        }
    };
}

kyber_kem!(k512, kyber512);
kyber_kem!(k768, kyber768);
kyber_kem!(k1024, kyber1024);

mod x25519 {
    use super::*;

    fn secret_from_bytes(bytes: &[u8]) -> Option<StaticSecret> {
        let array: [u8; sizes::x25519::SECRET_KEY_BYTES] = bytes.try_into().ok()?;
        Some(StaticSecret::from(array))
    }

    fn public_from_bytes(bytes: &[u8]) -> Option<X25519PublicKey> {
        let array: [u8; sizes::x25519::PUBLIC_KEY_BYTES] = bytes.try_into().ok()?;
        Some(X25519PublicKey::from(array))
    }

    fn fresh_secret() -> StaticSecret {
        let mut seed: [u8; sizes::x25519::SECRET_KEY_BYTES] = rand::random();
        let secret = StaticSecret::from(seed);
        seed.zeroize();
        secret
    }

    pub(super) fn keypair() -> (Vec<u8>, Vec<u8>) {
        let secret = fresh_secret();
        let public = X25519PublicKey::from(&secret);
        (public.as_bytes().to_vec(), secret.to_bytes().to_vec())
    }

    pub(super) fn encapsulate(public_key: &[u8]) -> Result<Encapsulation> {
        let peer = public_from_bytes(public_key).ok_or(KeyExchangeError::EncapsulationError)?;
        let ephemeral = fresh_secret();
        let shared = ephemeral.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return key_exchange_err!(KeyExchangeError::EncapsulationError);
        }
        Ok(Encapsulation {
            ciphertext: X25519PublicKey::from(&ephemeral).as_bytes().to_vec(),
            shared_secret: Zeroizing::new(shared.as_bytes().to_vec()),
        })
    }

    pub(super) fn decapsulate(ciphertext: &[u8], private_key: &[u8]) -> Result<SharedSecret> {
        let ephemeral = public_from_bytes(ciphertext).ok_or(KeyExchangeError::DecapsulationError)?;
        let secret = secret_from_bytes(private_key).ok_or(KeyExchangeError::DecapsulationError)?;
        let shared = secret.diffie_hellman(&ephemeral);
        if !shared.was_contributory() {
            return key_exchange_err!(KeyExchangeError::DecapsulationError);
        }
        Ok(Zeroizing::new(shared.as_bytes().to_vec()))
    }
}

/// KeyExchange runs the KEM operations for one algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyExchange {
    algorithm: KeyExchangeAlgorithm,
}

impl KeyExchange {
    /// Create a new KeyExchange with the specified algorithm
    pub fn new(algorithm: KeyExchangeAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Get the current algorithm
    pub fn algorithm(&self) -> KeyExchangeAlgorithm {
        self.algorithm
    }

    /// Public key length in bytes
    pub fn public_key_len(&self) -> usize {
        match self.algorithm {
            KeyExchangeAlgorithm::X25519 => sizes::x25519::PUBLIC_KEY_BYTES,
            KeyExchangeAlgorithm::Kyber512 => sizes::kyber::PUBLIC_KEY_BYTES_512,
            KeyExchangeAlgorithm::Kyber768 => sizes::kyber::PUBLIC_KEY_BYTES_768,
            KeyExchangeAlgorithm::Kyber1024 => sizes::kyber::PUBLIC_KEY_BYTES_1024,
            KeyExchangeAlgorithm::X25519Kyber768 => {
                sizes::x25519::PUBLIC_KEY_BYTES + sizes::kyber::PUBLIC_KEY_BYTES_768
            }
        }
    }

    /// Ciphertext length in bytes
    pub fn ciphertext_len(&self) -> usize {
        match self.algorithm {
            KeyExchangeAlgorithm::X25519 => sizes::x25519::PUBLIC_KEY_BYTES,
            KeyExchangeAlgorithm::Kyber512 => sizes::kyber::CIPHERTEXT_BYTES_512,
            KeyExchangeAlgorithm::Kyber768 => sizes::kyber::CIPHERTEXT_BYTES_768,
            KeyExchangeAlgorithm::Kyber1024 => sizes::kyber::CIPHERTEXT_BYTES_1024,
            KeyExchangeAlgorithm::X25519Kyber768 => {
                sizes::x25519::PUBLIC_KEY_BYTES + sizes::kyber::CIPHERTEXT_BYTES_768
            }
        }
    }

    /// Shared secret length in bytes
    pub fn shared_secret_len(&self) -> usize {
        match self.algorithm {
            KeyExchangeAlgorithm::X25519 => sizes::x25519::SHARED_SECRET_BYTES,
            KeyExchangeAlgorithm::X25519Kyber768 => {
                sizes::x25519::SHARED_SECRET_BYTES + sizes::kyber::SHARED_SECRET_BYTES
            }
            _ => sizes::kyber::SHARED_SECRET_BYTES,
        }
    }

    /// Generate a new key pair
    pub fn generate_keypair(&self) -> Result<KeyPair> {
        let (public_key, private_key) = match self.algorithm {
            KeyExchangeAlgorithm::X25519 => x25519::keypair(),
            KeyExchangeAlgorithm::Kyber512 => k512::keypair(),
            KeyExchangeAlgorithm::Kyber768 => k768::keypair(),
            KeyExchangeAlgorithm::Kyber1024 => k1024::keypair(),
            KeyExchangeAlgorithm::X25519Kyber768 => {
                let (classical_pk, mut classical_sk) = x25519::keypair();
                let (pq_pk, mut pq_sk) = k768::keypair();
                let public_key = [classical_pk, pq_pk].concat();
                let private_key = [classical_sk.as_slice(), pq_sk.as_slice()].concat();
                classical_sk.zeroize();
                pq_sk.zeroize();
                (public_key, private_key)
            }
        };

        if public_key.len() != self.public_key_len() {
            return key_exchange_err!(KeyExchangeError::KeyGenError);
        }

        Ok(KeyPair { algorithm: self.algorithm, public_key, private_key })
    }

    /// Encapsulate a shared secret against the peer's public key
    pub fn encapsulate(&self, peer_public_key: &[u8]) -> Result<Encapsulation> {
        if peer_public_key.len() != self.public_key_len() {
            return key_exchange_err!(KeyExchangeError::EncapsulationError);
        }

        match self.algorithm {
            KeyExchangeAlgorithm::X25519 => x25519::encapsulate(peer_public_key),
            KeyExchangeAlgorithm::Kyber512 => k512::encapsulate(peer_public_key),
            KeyExchangeAlgorithm::Kyber768 => k768::encapsulate(peer_public_key),
            KeyExchangeAlgorithm::Kyber1024 => k1024::encapsulate(peer_public_key),
            KeyExchangeAlgorithm::X25519Kyber768 => {
                let (classical_pk, pq_pk) =
                    peer_public_key.split_at(sizes::x25519::PUBLIC_KEY_BYTES);
                let classical = x25519::encapsulate(classical_pk)?;
                let pq = k768::encapsulate(pq_pk)?;

                let mut shared_secret = Zeroizing::new(Vec::with_capacity(self.shared_secret_len()));
                shared_secret.extend_from_slice(&classical.shared_secret);
                shared_secret.extend_from_slice(&pq.shared_secret);

                Ok(Encapsulation {
                    ciphertext: [classical.ciphertext.as_slice(), pq.ciphertext.as_slice()].concat(),
                    shared_secret,
                })
            }
        }
    }

    /// Recover the shared secret from a ciphertext using our private key
    pub fn decapsulate(&self, ciphertext: &[u8], private_key: &[u8]) -> Result<SharedSecret> {
        if ciphertext.len() != self.ciphertext_len() {
            return key_exchange_err!(KeyExchangeError::DecapsulationError);
        }

        match self.algorithm {
            KeyExchangeAlgorithm::X25519 => x25519::decapsulate(ciphertext, private_key),
            KeyExchangeAlgorithm::Kyber512 => k512::decapsulate(ciphertext, private_key),
            KeyExchangeAlgorithm::Kyber768 => k768::decapsulate(ciphertext, private_key),
            KeyExchangeAlgorithm::Kyber1024 => k1024::decapsulate(ciphertext, private_key),
            KeyExchangeAlgorithm::X25519Kyber768 => {
                if private_key.len() <= sizes::x25519::SECRET_KEY_BYTES {
                    return key_exchange_err!(KeyExchangeError::DecapsulationError);
                }
                let (classical_ct, pq_ct) = ciphertext.split_at(sizes::x25519::PUBLIC_KEY_BYTES);
                let (classical_sk, pq_sk) = private_key.split_at(sizes::x25519::SECRET_KEY_BYTES);

                let classical = x25519::decapsulate(classical_ct, classical_sk)?;
                let pq = k768::decapsulate(pq_ct, pq_sk)?;

                let mut shared_secret = Zeroizing::new(Vec::with_capacity(self.shared_secret_len()));
                shared_secret.extend_from_slice(&classical);
                shared_secret.extend_from_slice(&pq);
                Ok(shared_secret)
            }
        }
    }

    /// Decapsulate with a key pair produced by this KeyExchange
    pub fn decapsulate_with(&self, ciphertext: &[u8], keypair: &KeyPair) -> Result<SharedSecret> {
        if keypair.algorithm != self.algorithm {
            return key_exchange_err!(KeyExchangeError::DecapsulationError);
        }
        self.decapsulate(ciphertext, keypair.private_key())
    }
}
