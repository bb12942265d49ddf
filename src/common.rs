//! Structures and hashing helpers shared by every part of the ticket protocol
use crate::errors::Error;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha384};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// SHA-384 output size.
pub const DIGEST_SIZE: usize = 48;
/// AES block size. Data blocks are split into sub-blocks of this size.
pub const CIPHER_BLOCK_SIZE: usize = 16;
/// ED25519 public key size
pub const PUBLIC_KEY_SIZE: usize = 32;
/// ED25519 signature size
pub const SIGMA_SIZE: usize = 64;
/// Size of an escrow identifier.
pub const ESCROW_ID_SIZE: usize = 16;
/// Size of a session key, which is the output of the keyed PRF.
pub const SESSION_KEY_SIZE: usize = 16;

/// A SHA-384 digest.
pub type Digest = [u8; DIGEST_SIZE];

/// Hash the concatenation of `parts` with SHA-384.
pub fn digest_of(parts: &[&[u8]]) -> Digest {
    let mut h = Sha384::new();
    for part in parts {
        h.update(part);
    }
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&h.finalize());
    out
}

/// Interior node of a batch-signature tree: `H(left || right)`.
pub fn node_digest(left: &[u8], right: &[u8]) -> Digest {
    digest_of(&[left, right])
}

/// Interpret `bytes` as a digest.
///
/// # Errors
/// Fails with `InvalidDigestLength` if `bytes.len() != DIGEST_SIZE`.
pub fn try_parse_digest(bytes: &[u8]) -> Result<Digest, Error> {
    if bytes.len() != DIGEST_SIZE {
        return Err(Error::InvalidDigestLength(bytes.len()));
    }
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Ed25519 public key of a client, cache or bundle signer, kept as raw bytes so it can be
/// hashed into digests without decompressing the point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub(crate) [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Wrap an ed25519 verifying key.
    pub fn from_verifying_key(public: &VerifyingKey) -> Self {
        PublicKey(public.to_bytes())
    }

    pub(crate) fn to_verifying_key(self) -> Result<VerifyingKey, Error> {
        VerifyingKey::from_bytes(&self.0).or(Err(Error::Ed25519InvalidCompressedFormat))
    }

    /// Return `Self` as its byte representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Tries to convert a slice of `bytes` as `Self`.
    ///
    /// # Errors
    /// This function returns an error if the length of `bytes` is not equal to
    /// `PUBLIC_KEY_SIZE`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() == PUBLIC_KEY_SIZE {
            let mut v = [0u8; PUBLIC_KEY_SIZE];
            v.copy_from_slice(bytes);
            Ok(PublicKey(v))
        } else {
            Err(Error::InvalidPublicKeySize(bytes.len()))
        }
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<VerifyingKey> for PublicKey {
    fn from(public: VerifyingKey) -> Self {
        PublicKey::from_verifying_key(&public)
    }
}

/// Opaque identifier of an escrow.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EscrowId(pub [u8; ESCROW_ID_SIZE]);

impl EscrowId {
    /// Tries to convert a slice of `bytes` as `Self`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != ESCROW_ID_SIZE {
            return Err(Error::InvalidParameters("bad size for escrow ID"));
        }
        let mut id = [0u8; ESCROW_ID_SIZE];
        id.copy_from_slice(bytes);
        Ok(EscrowId(id))
    }

    /// Return `Self` as its byte representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EscrowId({})", self)
    }
}

/// Long-lived symmetric key shared between a publisher and one cache for one escrow. It is
/// only ever used as the key of the keyed PRF.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(Vec<u8>);

impl MasterKey {
    /// Wrap raw key bytes.
    ///
    /// # Errors
    /// Fails with `InvalidKeyLength` unless the key is 16, 24 or 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        match bytes.len() {
            16 | 24 | 32 => Ok(MasterKey(bytes.to_vec())),
            n => Err(Error::InvalidKeyLength(n)),
        }
    }

    /// Return the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Per-request key derived from a [`MasterKey`].
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey(pub(crate) [u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Tries to convert a slice of `bytes` as `Self`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != SESSION_KEY_SIZE {
            return Err(Error::InvalidKeyLength(bytes.len()));
        }
        let mut key = [0u8; SESSION_KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(SessionKey(key))
    }

    /// Return the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Little-endian encoding of a block index, used as PRF input when deriving IVs.
pub(crate) fn u64_to_le(x: u64) -> [u8; 8] {
    x.to_le_bytes()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn node_digest_is_ordered() {
        let a = [1u8; DIGEST_SIZE];
        let b = [2u8; DIGEST_SIZE];
        assert_ne!(node_digest(&a, &b), node_digest(&b, &a));
        assert_eq!(node_digest(&a, &b), digest_of(&[&a, &b]));
    }

    #[test]
    fn escrow_id_display() {
        let mut raw = [0u8; ESCROW_ID_SIZE];
        raw[0] = 0xab;
        raw[15] = 0x01;
        let id = EscrowId(raw);
        assert_eq!(id.to_string(), "ab000000000000000000000000000001");
        assert_eq!(id.to_string(), hex::encode(raw));
    }

    #[test]
    fn master_key_lengths() {
        assert!(MasterKey::from_bytes(&[0u8; 16]).is_ok());
        assert!(MasterKey::from_bytes(&[0u8; 32]).is_ok());
        assert!(matches!(
            MasterKey::from_bytes(&[0u8; 15]),
            Err(Error::InvalidKeyLength(15))
        ));
        assert_eq!(format!("{:?}", MasterKey::from_bytes(&[7u8; 16]).unwrap()), "MasterKey(..)");
    }

    #[test]
    fn public_key_size() {
        assert!(PublicKey::from_bytes(&[0u8; 31]).is_err());
        assert!(PublicKey::from_bytes(&[0u8; 32]).is_ok());
    }
}
