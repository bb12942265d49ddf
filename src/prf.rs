//! Keyed pseudorandom function used to derive session keys and IVs.
//!
//! `prf(input, seq, key)`: `d = SHA-384(le32(seq) || input)`; the first 16 bytes of `d` are
//! an IV and the remaining 32 bytes are encrypted with AES-CBC under `key`. The output is the
//! second ciphertext block, so it is always exactly [`PRF_OUTPUT_SIZE`] bytes and can serve
//! both as an AES-128 key and as a CTR IV.
use crate::common::{MasterKey, SessionKey, CIPHER_BLOCK_SIZE, DIGEST_SIZE, SESSION_KEY_SIZE};
use crate::errors::Error;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha384};

type CbcEncryptor<C> = cbc::Encryptor<C>;

/// Output size of [`keyed_prf`].
pub const PRF_OUTPUT_SIZE: usize = SESSION_KEY_SIZE;

/// Evaluate the keyed PRF.
///
/// # Errors
/// Fails with `InvalidKeyLength` if `key` is not an AES key.
pub fn keyed_prf(input: &[u8], sequence_no: u32, key: &[u8]) -> Result<[u8; PRF_OUTPUT_SIZE], Error> {
    let mut h = Sha384::new();
    h.update(sequence_no.to_le_bytes());
    h.update(input);
    let digest = h.finalize();

    let iv = &digest[..CIPHER_BLOCK_SIZE];
    let mut buf = [0u8; DIGEST_SIZE - CIPHER_BLOCK_SIZE];
    buf.copy_from_slice(&digest[CIPHER_BLOCK_SIZE..]);

    let msg_len = buf.len();
    with_aes!(CbcEncryptor, key, iv, |cipher| {
        cipher
            .encrypt_padded_mut::<NoPadding>(&mut buf, msg_len)
            .map_err(|_| Error::InvalidBlockLength(msg_len))?;
    });

    let mut out = [0u8; PRF_OUTPUT_SIZE];
    out.copy_from_slice(&buf[CIPHER_BLOCK_SIZE..]);
    Ok(out)
}

/// Derive the session key a cache uses for one request of one client:
/// `keyed_prf(client_public_key, sequence_no, master_key)`.
pub fn session_key(
    client_public_key: &[u8],
    sequence_no: u32,
    master_key: &MasterKey,
) -> Result<SessionKey, Error> {
    keyed_prf(client_public_key, sequence_no, master_key.as_bytes()).map(SessionKey)
}
