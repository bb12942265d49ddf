//! Tickets and ticket bundles, with the canonical digests the batch signature covers.
//!
//! A bundle carries one ticket request and one L1 ticket per cache, a single encrypted L2
//! ticket and a remainder describing the request itself. Its canonical digest is a digest of
//! four subdigests, so a cache can check that one ticket belongs to a signed bundle without
//! seeing the other tickets.
use crate::batchsignature::BatchSignature;
use crate::blockcipher::apply_keystream;
use crate::cache::ClientCacheRequest;
use crate::common::{
    digest_of, try_parse_digest, u64_to_le, Digest, EscrowId, PublicKey, SessionKey,
};
use crate::errors::Error;
use crate::puzzle::{secret_iv, secret_key, Puzzle};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Asks one cache for one data block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRequest {
    /// Index of the block within the object.
    pub block_idx: u64,
    /// Cache expected to serve the block.
    pub cache_public_key: PublicKey,
}

impl TicketRequest {
    /// `H(le64(block_idx) || cache_public_key)`
    pub fn canonical_digest(&self) -> Digest {
        digest_of(&[&u64_to_le(self.block_idx), self.cache_public_key.as_bytes()])
    }
}

/// First lottery ticket, handed to a cache once its block has been received. Redeeming it
/// releases the outer session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketL1 {
    /// Lottery ticket number.
    pub ticket_no: u64,
    /// Cache the ticket pays.
    pub cache_public_key: PublicKey,
}

impl TicketL1 {
    /// `H(le64(ticket_no) || cache_public_key)`
    pub fn canonical_digest(&self) -> Digest {
        digest_of(&[&u64_to_le(self.ticket_no), self.cache_public_key.as_bytes()])
    }
}

/// Second lottery ticket. Travels encrypted under the colocation puzzle secret and carries
/// the inner session keys of every cache in the bundle.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TicketL2 {
    /// Random nonce that makes every L2 ticket distinct.
    #[serde_as(as = "Bytes")]
    pub nonce: Vec<u8>,
    /// Inner session keys, in bundle order.
    #[serde_as(as = "Vec<Bytes>")]
    pub inner_session_keys: Vec<Vec<u8>>,
}

impl TicketL2 {
    /// The inner session keys as keys.
    pub fn inner_session_keys(&self) -> Result<Vec<SessionKey>, Error> {
        self.inner_session_keys
            .iter()
            .map(|k| SessionKey::from_bytes(k))
            .collect()
    }
}

impl fmt::Debug for TicketL2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketL2")
            .field("nonce", &self.nonce)
            .field("inner_session_keys", &self.inner_session_keys.len())
            .finish()
    }
}

/// Serialize `ticket` and encrypt it with the key and IV sliced from the puzzle secret.
pub fn encrypt_ticket_l2(puzzle: &Puzzle, ticket: &TicketL2) -> Result<Vec<u8>, Error> {
    let mut buf = serde_cbor::to_vec(ticket)?;
    apply_keystream(puzzle.key(), puzzle.iv(), &mut buf)?;
    Ok(buf)
}

/// Inverse of [`encrypt_ticket_l2`] for a client that recovered `secret` by solving the
/// puzzle.
pub fn decrypt_ticket_l2(secret: &[u8], ciphertext: &[u8]) -> Result<TicketL2, Error> {
    let mut secret = try_parse_digest(secret)?;
    let mut buf = ciphertext.to_vec();
    let res = apply_keystream(secret_key(&secret), secret_iv(&secret), &mut buf);
    secret.zeroize();
    res?;
    let ticket = serde_cbor::from_slice(&buf);
    buf.zeroize();
    Ok(ticket?)
}

/// What a client presents to claim the L2 ticket: the encrypted ticket as it appears in the
/// bundle, and the puzzle secret proving the blocks were received.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketL2Info {
    /// Encrypted L2 ticket, byte for byte as issued.
    #[serde_as(as = "Bytes")]
    pub encrypted_ticket_l2: Vec<u8>,
    /// Secret recovered by solving the colocation puzzle.
    #[serde_as(as = "Bytes")]
    pub puzzle_secret: Vec<u8>,
}

impl TicketL2Info {
    /// `H(encrypted_ticket_l2)`
    pub fn encrypted_ticket_l2_digest(&self) -> Digest {
        digest_of(&[&self.encrypted_ticket_l2])
    }
}

/// One ticket of a bundle, as presented to a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ticket {
    /// Data phase: serve a block.
    Request(TicketRequest),
    /// L1 phase: release the outer session key.
    L1(TicketL1),
    /// L2 phase: acknowledge the puzzle solution.
    L2(TicketL2Info),
}

/// Public part of a colocation puzzle.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColocationPuzzleInfo {
    /// Terminal digest of the puzzle chain.
    #[serde_as(as = "Bytes")]
    pub goal: Digest,
    /// Rounds over the blocks.
    pub rounds: u32,
    /// Unused by the puzzle yet, covered by the digest.
    pub start_offset: u64,
    /// Unused by the puzzle yet, covered by the digest.
    pub start_range: u64,
}

/// Everything in a bundle that is not a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBundleRemainder {
    /// Client-chosen sequence number of the request. The full value is echoed in responses
    /// and covered by the digest, but key and IV derivation only see its low 32 bits (see
    /// [`TicketBundleRemainder::sequence_no`]): numbers that differ by a multiple of 2^32
    /// derive the same session keys.
    pub request_sequence_no: u64,
    /// Escrow paying for the transfer.
    pub escrow_id: EscrowId,
    /// Object within the escrow.
    pub object_id: u64,
    /// Client the blocks are encrypted for.
    pub client_public_key: PublicKey,
    /// Puzzle the client solves to unlock the L2 ticket.
    pub puzzle_info: ColocationPuzzleInfo,
}

impl TicketBundleRemainder {
    /// Sequence number as fed to the keyed PRF, which takes 32 bits. The high half of
    /// `request_sequence_no` is dropped.
    pub fn sequence_no(&self) -> u32 {
        self.request_sequence_no as u32
    }

    /// Digest of every field, integers little-endian.
    pub fn canonical_digest(&self) -> Digest {
        let p = &self.puzzle_info;
        digest_of(&[
            &u64_to_le(self.request_sequence_no),
            self.escrow_id.as_bytes(),
            &u64_to_le(self.object_id),
            self.client_public_key.as_bytes(),
            &p.goal,
            &p.rounds.to_le_bytes(),
            &u64_to_le(p.start_offset),
            &u64_to_le(p.start_range),
        ])
    }
}

/// The four subdigests of a bundle. Their combined digest is what gets batch-signed.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBundleSubdigests {
    /// One digest per ticket request.
    #[serde_as(as = "Vec<Bytes>")]
    pub ticket_request_digest: Vec<Digest>,
    /// One digest per L1 ticket.
    #[serde_as(as = "Vec<Bytes>")]
    pub ticket_l1_digest: Vec<Digest>,
    /// Digest of the encrypted L2 ticket.
    #[serde_as(as = "Bytes")]
    pub encrypted_ticket_l2_digest: Digest,
    /// Digest of the remainder.
    #[serde_as(as = "Bytes")]
    pub remainder_digest: Digest,
}

impl TicketBundleSubdigests {
    fn from_parts(
        ticket_requests: &[TicketRequest],
        ticket_l1s: &[TicketL1],
        encrypted_ticket_l2: &[u8],
        remainder: &TicketBundleRemainder,
    ) -> Self {
        TicketBundleSubdigests {
            ticket_request_digest: ticket_requests
                .iter()
                .map(TicketRequest::canonical_digest)
                .collect(),
            ticket_l1_digest: ticket_l1s.iter().map(TicketL1::canonical_digest).collect(),
            encrypted_ticket_l2_digest: digest_of(&[encrypted_ticket_l2]),
            remainder_digest: remainder.canonical_digest(),
        }
    }

    fn fold(digests: &[Digest]) -> Digest {
        let parts: Vec<&[u8]> = digests.iter().map(|d| &d[..]).collect();
        digest_of(&parts)
    }

    /// `H(H(request digests) || H(L1 digests) || encrypted L2 digest || remainder digest)`
    pub fn canonical_digest(&self) -> Digest {
        digest_of(&[
            &Self::fold(&self.ticket_request_digest),
            &Self::fold(&self.ticket_l1_digest),
            &self.encrypted_ticket_l2_digest,
            &self.remainder_digest,
        ])
    }

    /// Whether `d` is one of the ticket request digests.
    pub fn contains_ticket_request_digest(&self, d: &Digest) -> bool {
        self.ticket_request_digest.iter().any(|x| x == d)
    }

    /// Whether `d` is one of the L1 ticket digests.
    pub fn contains_ticket_l1_digest(&self, d: &Digest) -> bool {
        self.ticket_l1_digest.iter().any(|x| x == d)
    }
}

pub(crate) fn bundle_digest(
    ticket_requests: &[TicketRequest],
    ticket_l1s: &[TicketL1],
    encrypted_ticket_l2: &[u8],
    remainder: &TicketBundleRemainder,
) -> Digest {
    TicketBundleSubdigests::from_parts(ticket_requests, ticket_l1s, encrypted_ticket_l2, remainder)
        .canonical_digest()
}

/// A signed ticket bundle, as handed by a publisher to a client.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBundle {
    /// One per cache, in bundle order.
    pub ticket_requests: Vec<TicketRequest>,
    /// One per cache, in bundle order.
    pub ticket_l1s: Vec<TicketL1>,
    /// CBOR-encoded [`TicketL2`], encrypted under the puzzle secret.
    #[serde_as(as = "Bytes")]
    pub encrypted_ticket_l2: Vec<u8>,
    /// Request description and puzzle.
    pub remainder: TicketBundleRemainder,
    /// Signature over [`TicketBundle::canonical_digest`].
    pub batch_signature: BatchSignature,
}

impl TicketBundle {
    /// Compute the subdigests of the bundle.
    pub fn subdigests(&self) -> TicketBundleSubdigests {
        TicketBundleSubdigests::from_parts(
            &self.ticket_requests,
            &self.ticket_l1s,
            &self.encrypted_ticket_l2,
            &self.remainder,
        )
    }

    /// The digest covered by the batch signature.
    pub fn canonical_digest(&self) -> Digest {
        self.subdigests().canonical_digest()
    }

    /// The L2 claim a client presents after recovering `puzzle_secret`.
    pub fn ticket_l2_info(&self, puzzle_secret: &[u8]) -> TicketL2Info {
        TicketL2Info {
            encrypted_ticket_l2: self.encrypted_ticket_l2.clone(),
            puzzle_secret: puzzle_secret.to_vec(),
        }
    }

    /// Wrap one ticket of this bundle into a request for a cache. The request carries the
    /// subdigests rather than the other tickets.
    pub fn build_client_cache_request(&self, ticket: Ticket) -> ClientCacheRequest {
        ClientCacheRequest {
            ticket: Some(ticket),
            bundle_remainder: self.remainder.clone(),
            ticket_bundle_subdigests: self.subdigests(),
            bundle_sig: self.batch_signature.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::PUBLIC_KEY_SIZE;

    fn remainder() -> TicketBundleRemainder {
        TicketBundleRemainder {
            request_sequence_no: 12,
            escrow_id: EscrowId([1u8; 16]),
            object_id: 3,
            client_public_key: PublicKey([2u8; PUBLIC_KEY_SIZE]),
            puzzle_info: ColocationPuzzleInfo {
                goal: [4u8; 48],
                rounds: 2,
                start_offset: 0,
                start_range: 0,
            },
        }
    }

    #[test]
    fn ticket_digests_cover_every_field() {
        let pk = PublicKey([7u8; PUBLIC_KEY_SIZE]);
        let t = TicketRequest {
            block_idx: 5,
            cache_public_key: pk,
        };
        let mut expected = Vec::new();
        expected.extend_from_slice(&5u64.to_le_bytes());
        expected.extend_from_slice(&[7u8; PUBLIC_KEY_SIZE]);
        assert_eq!(t.canonical_digest(), digest_of(&[&expected]));

        let l1 = TicketL1 {
            ticket_no: 5,
            cache_public_key: pk,
        };
        // Same bytes, same digest: the two lists are kept apart by the subdigests.
        assert_eq!(l1.canonical_digest(), t.canonical_digest());
        let l1b = TicketL1 {
            ticket_no: 6,
            ..l1.clone()
        };
        assert_ne!(l1.canonical_digest(), l1b.canonical_digest());
    }

    #[test]
    fn sequence_no_wraps_at_32_bits() {
        let r = remainder();
        let mut wrapped = r.clone();
        wrapped.request_sequence_no += 1 << 32;
        assert_eq!(r.sequence_no(), 12);
        assert_eq!(wrapped.sequence_no(), 12);
        // Still two distinct requests as far as the signature is concerned.
        assert_ne!(r.canonical_digest(), wrapped.canonical_digest());
    }

    #[test]
    fn remainder_digest_covers_puzzle() {
        let r = remainder();
        let mut other = r.clone();
        other.puzzle_info.rounds = 3;
        assert_ne!(r.canonical_digest(), other.canonical_digest());
        let mut other = r.clone();
        other.object_id = 4;
        assert_ne!(r.canonical_digest(), other.canonical_digest());
    }

    #[test]
    fn subdigests_membership() {
        let reqs: Vec<TicketRequest> = (0..3)
            .map(|i| TicketRequest {
                block_idx: i,
                cache_public_key: PublicKey([i as u8; PUBLIC_KEY_SIZE]),
            })
            .collect();
        let sub = TicketBundleSubdigests::from_parts(&reqs, &[], b"l2", &remainder());
        assert!(sub.contains_ticket_request_digest(&reqs[1].canonical_digest()));
        assert!(!sub.contains_ticket_l1_digest(&reqs[1].canonical_digest()));

        let mut tampered = sub.clone();
        tampered.ticket_request_digest.swap(0, 1);
        assert_ne!(sub.canonical_digest(), tampered.canonical_digest());
    }

    #[test]
    fn ticket_l2_debug_hides_keys() {
        let t = TicketL2 {
            nonce: vec![1, 2],
            inner_session_keys: vec![vec![9u8; 16]],
        };
        let s = format!("{:?}", t);
        assert!(!s.contains("9, 9"));
        assert_eq!(t.inner_session_keys().unwrap().len(), 1);
    }

    #[test]
    fn decrypt_rejects_short_secret() {
        assert!(matches!(
            decrypt_ticket_l2(&[0u8; 16], b"whatever"),
            Err(Error::InvalidDigestLength(16))
        ));
    }
}
