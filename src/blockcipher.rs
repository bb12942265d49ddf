//! AES-CTR helpers: single cipher-block encryption at an explicit counter, and whole-buffer
//! encryption under a session key with a PRF-derived IV.
//!
//! Every key size AES supports is accepted; the session keys produced by the keyed PRF are
//! always AES-128 keys.
use crate::common::{u64_to_le, MasterKey, SessionKey, CIPHER_BLOCK_SIZE};
use crate::errors::Error;
use crate::prf::{keyed_prf, session_key};
use aes::cipher::{KeyIvInit, StreamCipher};

type Ctr<C> = ctr::Ctr128BE<C>;

/// Instantiate `$mode` over the AES variant matching the length of `$key`, bind it to
/// `$cipher` and evaluate `$body`. Returns `InvalidKeyLength` from the enclosing function for
/// any other key length.
macro_rules! with_aes {
    ($mode:ident, $key:expr, $iv:expr, |$cipher:ident| $body:expr) => {{
        let key: &[u8] = $key;
        let iv: &[u8] = $iv;
        match key.len() {
            16 => {
                let mut $cipher = $mode::<aes::Aes128>::new_from_slices(key, iv)
                    .map_err(|_| $crate::errors::Error::InvalidIvLength(iv.len()))?;
                $body
            }
            24 => {
                let mut $cipher = $mode::<aes::Aes192>::new_from_slices(key, iv)
                    .map_err(|_| $crate::errors::Error::InvalidIvLength(iv.len()))?;
                $body
            }
            32 => {
                let mut $cipher = $mode::<aes::Aes256>::new_from_slices(key, iv)
                    .map_err(|_| $crate::errors::Error::InvalidIvLength(iv.len()))?;
                $body
            }
            n => return Err($crate::errors::Error::InvalidKeyLength(n)),
        }
    }};
}

/// XOR the AES-CTR keystream for (`key`, `iv`) into `buf`. The IV is the initial 128-bit
/// big-endian counter block.
pub(crate) fn apply_keystream(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), Error> {
    if iv.len() != CIPHER_BLOCK_SIZE {
        return Err(Error::InvalidIvLength(iv.len()));
    }
    with_aes!(Ctr, key, iv, |cipher| cipher.apply_keystream(buf));
    Ok(())
}

/// Add `counter` to a 128-bit big-endian IV, wrapping on overflow exactly as repeated CTR
/// increments would.
fn increment_iv(iv: &[u8; CIPHER_BLOCK_SIZE], counter: u32) -> [u8; CIPHER_BLOCK_SIZE] {
    u128::from_be_bytes(*iv)
        .wrapping_add(u128::from(counter))
        .to_be_bytes()
}

/// Encrypt a single cipher block with AES-CTR, starting the counter `counter` blocks after
/// `iv`. The result equals block `counter` of the CTR encryption of a whole buffer under the
/// same key and IV.
///
/// # Errors
/// * `InvalidBlockLength` if `plaintext` is not exactly one cipher block
/// * `InvalidIvLength` if `iv` is not exactly one cipher block
/// * `InvalidKeyLength` if `key` is not an AES key
pub fn encrypt_single_block(
    plaintext: &[u8],
    key: &[u8],
    iv: &[u8],
    counter: u32,
) -> Result<[u8; CIPHER_BLOCK_SIZE], Error> {
    if plaintext.len() != CIPHER_BLOCK_SIZE {
        return Err(Error::InvalidBlockLength(plaintext.len()));
    }
    if iv.len() != CIPHER_BLOCK_SIZE {
        return Err(Error::InvalidIvLength(iv.len()));
    }
    let mut base = [0u8; CIPHER_BLOCK_SIZE];
    base.copy_from_slice(iv);
    let iv_ctr = increment_iv(&base, counter);

    let mut out = [0u8; CIPHER_BLOCK_SIZE];
    out.copy_from_slice(plaintext);
    apply_keystream(key, &iv_ctr, &mut out)?;
    Ok(out)
}

/// Encrypt (or decrypt, CTR being its own inverse) a whole data block under `session_key`.
/// The IV is `keyed_prf(le64(block_index), sequence_no, session_key)`.
pub fn encrypt_buffer(
    block_index: u64,
    sequence_no: u32,
    session_key: &[u8],
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    let iv = keyed_prf(&u64_to_le(block_index), sequence_no, session_key)?;
    let mut out = data.to_vec();
    apply_keystream(session_key, &iv, &mut out)?;
    Ok(out)
}

/// Apply the inner then the outer layer of encryption a cache puts on a data block. Each
/// layer uses the session key derived from the corresponding master key for this client and
/// request.
pub fn encrypt_layers(
    block_index: u64,
    sequence_no: u32,
    client_public_key: &[u8],
    inner_master_key: &MasterKey,
    outer_master_key: &MasterKey,
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut out = data.to_vec();
    for master_key in [inner_master_key, outer_master_key] {
        let key = session_key(client_public_key, sequence_no, master_key)?;
        out = encrypt_buffer(block_index, sequence_no, key.as_bytes(), &out)?;
    }
    Ok(out)
}

/// Client side inverse of [`encrypt_layers`]: strip the outer layer, then the inner one.
pub fn decrypt_layers(
    block_index: u64,
    sequence_no: u32,
    outer_key: &SessionKey,
    inner_key: &SessionKey,
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    let peeled = encrypt_buffer(block_index, sequence_no, outer_key.as_bytes(), data)?;
    encrypt_buffer(block_index, sequence_no, inner_key.as_bytes(), &peeled)
}
