/*!
Key schedule for the PQ-DTLS protocol.

The master secret is extracted with HKDF-SHA256 from the key exchange shared
secret, salted with both randoms. Key blocks for each epoch are expanded from
the master secret, and Finished verify data is an HMAC over the transcript
hash under the sender's MAC key.
*/

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::core::{
    constants::{labels, sizes},
    crypto::config::HashAlgorithm,
    error::{Error, Result},
};

/// Derive the 48-byte master secret
pub fn master_secret(
    shared_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let salt = [client_random, server_random].concat();
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);

    let mut master = Zeroizing::new(vec![0u8; sizes::MASTER_SECRET_SIZE]);
    hk.expand(labels::MASTER_SECRET, &mut master)
        .map_err(|_| Error::Internal("master secret expansion failed".into()))?;
    Ok(master)
}

/// Expand the epoch 1 key block
pub fn key_block(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let info = [labels::KEY_EXPANSION, client_random, server_random].concat();
    expand(master_secret, &info, len)
}

/// Expand the key block for a rekeyed epoch
///
/// Both peers compute this independently from state they already share.
pub fn rekey_block(
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    epoch: u16,
    len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let info = [
        labels::KEY_UPDATE,
        client_random,
        server_random,
        &epoch.to_be_bytes(),
    ]
    .concat();
    expand(master_secret, &info, len)
}

fn expand(prk: &[u8], info: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::from_prk(prk)
        .map_err(|_| Error::Internal("master secret too short for HKDF".into()))?;
    let mut okm = Zeroizing::new(vec![0u8; len]);
    hk.expand(info, &mut okm)
        .map_err(|_| Error::Internal("key block expansion failed".into()))?;
    Ok(okm)
}

/// Hash the canonical handshake transcript
pub fn transcript_hash(hash: HashAlgorithm, transcript: &[u8]) -> Vec<u8> {
    match hash {
        HashAlgorithm::Sha256 => Sha256::digest(transcript).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(transcript).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(transcript).to_vec(),
    }
}

/// Compute Finished verify data
///
/// `label` separates the client and server Finished messages.
pub fn finished_verify_data(
    hash: HashAlgorithm,
    mac_key: &[u8],
    label: &[u8],
    transcript: &[u8],
) -> Result<Vec<u8>> {
    let digest = transcript_hash(hash, transcript);
    match hash {
        HashAlgorithm::Sha256 => hmac_tag::<Hmac<Sha256>>(mac_key, label, &digest),
        HashAlgorithm::Sha384 => hmac_tag::<Hmac<Sha384>>(mac_key, label, &digest),
        HashAlgorithm::Sha512 => hmac_tag::<Hmac<Sha512>>(mac_key, label, &digest),
    }
}

fn hmac_tag<M: Mac + hmac::digest::KeyInit>(key: &[u8], label: &[u8], digest: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <M as hmac::digest::KeyInit>::new_from_slice(key)
        .map_err(|_| Error::Internal("invalid MAC key".into()))?;
    mac.update(label);
    mac.update(digest);
    Ok(mac.finalize().into_bytes().to_vec())
}
