//! Batch signatures: one ed25519 signature over the root of a digest tree authenticates every
//! leaf of the tree. Each leaf travels with its own authentication path (its residue), so a
//! single message can be verified without the rest of the batch.
//!
//! The tree is built by a doubling sweep rather than as a complete binary tree. For subtree
//! sizes `s = 2, 4, 8, ...` (while `s / 2 < n`) the leaves are cut into windows of `s`; in
//! every window whose right half is populated (possibly partially), each leaf of the left half
//! records `(right, root of right half)` and each leaf of the right half records
//! `(left, root of left half)`. Both halves then share the window root `H(left || right)`.
//! Every party derives the same root from the same leaf list.
use crate::common::{node_digest, PublicKey, SIGMA_SIZE};
use crate::errors::Error;
use crate::traits::BatchSigner;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};

/// Authentication path of one leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResidue {
    /// If true, the matching path digest is the right child; otherwise it is the left child.
    path_directions: Vec<bool>,
    path_digests: Vec<Vec<u8>>,
    leaf_digest: Vec<u8>,
}

impl BatchResidue {
    fn new(leaf_digest: Vec<u8>) -> Self {
        BatchResidue {
            path_directions: Vec::new(),
            path_digests: Vec::new(),
            leaf_digest,
        }
    }

    /// Rebuild a residue from the path carried by a [`BatchSignature`] and the leaf it covers.
    ///
    /// # Errors
    /// Fails with `MismatchedPath` if the two path arrays differ in length.
    pub fn from_path(
        path_directions: Vec<bool>,
        path_digests: Vec<Vec<u8>>,
        leaf_digest: &[u8],
    ) -> Result<Self, Error> {
        if path_directions.len() != path_digests.len() {
            return Err(Error::MismatchedPath {
                directions: path_directions.len(),
                digests: path_digests.len(),
            });
        }
        Ok(BatchResidue {
            path_directions,
            path_digests,
            leaf_digest: leaf_digest.to_vec(),
        })
    }

    fn add_path_segment(&mut self, direction: bool, digest: Vec<u8>) {
        self.path_directions.push(direction);
        self.path_digests.push(digest);
    }

    /// Fold the path from the leaf up to the root.
    pub fn root_digest(&self) -> Vec<u8> {
        let mut d = self.leaf_digest.clone();
        for (&is_right, sibling) in self.path_directions.iter().zip(self.path_digests.iter()) {
            d = if is_right {
                node_digest(&d, sibling).to_vec()
            } else {
                node_digest(sibling, &d).to_vec()
            };
        }
        d
    }

    /// Direction flags of the path, leaf first.
    pub fn path_directions(&self) -> &[bool] {
        &self.path_directions
    }

    /// Sibling digests of the path, leaf first.
    pub fn path_digests(&self) -> &[Vec<u8>] {
        &self.path_digests
    }

    /// The value this residue authenticates.
    pub fn leaf_digest(&self) -> &[u8] {
        &self.leaf_digest
    }
}

/// Build the digest tree over `leaves`, returning the root and one residue per leaf, in leaf
/// order. An empty leaf list yields no root and no residues; a single leaf is its own root.
pub fn build<L: AsRef<[u8]>>(leaves: &[L]) -> (Option<Vec<u8>>, Vec<BatchResidue>) {
    let n = leaves.len();
    let mut residues: Vec<BatchResidue> = leaves
        .iter()
        .map(|leaf| BatchResidue::new(leaf.as_ref().to_vec()))
        .collect();
    // Root of the subtree each leaf currently belongs to.
    let mut subtree_roots: Vec<Vec<u8>> = leaves.iter().map(|l| l.as_ref().to_vec()).collect();

    let mut half = 1;
    while half < n {
        let size = half * 2;
        let mut j = 0;
        while j + half < n {
            let left = subtree_roots[j].clone();
            let right = subtree_roots[j + half].clone();
            for residue in &mut residues[j..j + half] {
                residue.add_path_segment(true, right.clone());
            }
            for residue in &mut residues[j + half..(j + size).min(n)] {
                residue.add_path_segment(false, left.clone());
            }

            let d = node_digest(&left, &right).to_vec();
            subtree_roots[j + half] = d.clone();
            subtree_roots[j] = d;
            j += size;
        }
        half = size;
    }

    (subtree_roots.into_iter().next(), residues)
}

/// A leaf's authentication path plus the signature over the shared root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSignature {
    /// Parallel to `path_digest`; true when the digest is the right sibling.
    pub path_direction: Vec<bool>,
    /// Sibling digests, leaf first.
    pub path_digest: Vec<Vec<u8>>,
    /// Ed25519 signature over the root digest.
    pub root_signature: Vec<u8>,
    /// Key that produced `root_signature`.
    pub signing_key: PublicKey,
}

impl BatchSignature {
    fn from_residue(residue: BatchResidue, signature: &Signature, signing_key: PublicKey) -> Self {
        BatchSignature {
            path_direction: residue.path_directions,
            path_digest: residue.path_digests,
            root_signature: signature.to_bytes().to_vec(),
            signing_key,
        }
    }
}

/// Sign a single message as a batch of one.
pub fn sign(message: &[u8], signer: &SigningKey) -> BatchSignature {
    let (root, mut residues) = build(&[message]);
    // One leaf always yields a root (the leaf itself) and one residue.
    let root = root.unwrap_or_else(|| message.to_vec());
    let signature = signer.sign(&root);
    let residue = residues.pop().unwrap_or_else(|| BatchResidue::new(message.to_vec()));
    BatchSignature::from_residue(residue, &signature, signer.verifying_key().into())
}

/// Sign every message of `messages` with a single signature over their common root. The
/// returned signatures are in message order.
///
/// # Errors
/// Fails with `EmptyBatch` when `messages` is empty.
pub fn sign_batch<M: AsRef<[u8]>>(
    messages: &[M],
    signer: &SigningKey,
) -> Result<Vec<BatchSignature>, Error> {
    let (root, residues) = build(messages);
    let root = root.ok_or(Error::EmptyBatch)?;
    let signature = signer.sign(&root);
    let signing_key: PublicKey = signer.verifying_key().into();
    Ok(residues
        .into_iter()
        .map(|residue| BatchSignature::from_residue(residue, &signature, signing_key))
        .collect())
}

/// Check that `sig` authenticates `message`.
///
/// A signature that simply does not match yields `Ok(false)`.
///
/// # Errors
/// The function fails only on malformed input:
/// * the path arrays differ in length
/// * the signature is not `SIGMA_SIZE` bytes
/// * the signing key is not a valid ed25519 point
pub fn verify(message: &[u8], sig: &BatchSignature) -> Result<bool, Error> {
    let residue =
        BatchResidue::from_path(sig.path_direction.clone(), sig.path_digest.clone(), message)?;
    if sig.root_signature.len() != SIGMA_SIZE {
        return Err(Error::InvalidSignatureSize(sig.root_signature.len()));
    }
    let mut sig_bytes = [0u8; SIGMA_SIZE];
    sig_bytes.copy_from_slice(&sig.root_signature);
    let signature = Signature::from_bytes(&sig_bytes);
    let public = sig.signing_key.to_verifying_key()?;

    Ok(public.verify(&residue.root_digest(), &signature).is_ok())
}

/// [`BatchSigner`] that never waits to gather a batch: every message is signed as a batch
/// of one.
#[derive(Debug)]
pub struct TrivialBatchSigner {
    signer: SigningKey,
}

impl TrivialBatchSigner {
    /// Create a signer around `signer`.
    pub fn new(signer: SigningKey) -> Self {
        TrivialBatchSigner { signer }
    }

    /// Public half of the signing key.
    pub fn public_key(&self) -> PublicKey {
        self.signer.verifying_key().into()
    }
}

impl BatchSigner for TrivialBatchSigner {
    fn batch_sign(&self, message: &[u8]) -> Result<BatchSignature, Error> {
        Ok(sign(message, &self.signer))
    }
}
