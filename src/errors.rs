//! Errors specific to ticket verification, puzzles and the primitives beneath them
use crate::common::EscrowId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of an [`Error`], used to decide how a failure is logged and what
/// the client gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Badly shaped input (wrong lengths, zero rounds, empty sets).
    InvalidInput,
    /// A digest, signature or puzzle check failed. May indicate an adversarial peer.
    Integrity,
    /// Unknown escrow, object or block.
    NotFound,
    /// The request carries something this cache does not handle.
    Unsupported,
    /// A block store or ticket store failed.
    Collaborator,
}

/// Failures reported by the external block and ticket stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store has no such object for the escrow.
    #[error("object not found")]
    ObjectNotFound,
    /// The object exists but has no block at the requested index.
    #[error("block not found")]
    BlockNotFound,
    /// The ticket has already been stored once.
    #[error("ticket already stored")]
    DuplicateTicket,
    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Error)]
/// Enum of errors raised by this crate
pub enum Error {
    /// The key is not a valid AES key (16, 24 or 32 bytes).
    #[error("invalid key length: {0}")]
    InvalidKeyLength(usize),
    /// The IV is not exactly one cipher block.
    #[error("invalid IV length: {0}")]
    InvalidIvLength(usize),
    /// A buffer that must be exactly one cipher block, or a whole number of them, is not.
    #[error("invalid block length: {0}")]
    InvalidBlockLength(usize),
    /// A value that must be a SHA-384 digest has the wrong size.
    #[error("invalid digest length: {0}")]
    InvalidDigestLength(usize),
    /// Error occurs when the size of the signature is not the expected.
    #[error("invalid signature size: {0}")]
    InvalidSignatureSize(usize),
    /// Error occurs when the size of the public key is not the expected.
    #[error("invalid public key size: {0}")]
    InvalidPublicKeySize(usize),
    /// This error occurs when a slice of bytes is converted into a compressed
    /// point format, and it fails.
    #[error("public key is not a valid compressed ed25519 point")]
    Ed25519InvalidCompressedFormat,
    /// The direction and digest arrays of a batch signature differ in length.
    #[error("batch signature path has {directions} directions but {digests} digests")]
    MismatchedPath {
        /// Number of direction flags.
        directions: usize,
        /// Number of sibling digests.
        digests: usize,
    },
    /// Parameters or inputs that cannot be used together.
    #[error("invalid parameters: {0}")]
    InvalidParameters(&'static str),
    /// The puzzle would have a single step; increase the rounds or the number of blocks.
    #[error("puzzle too small: {rounds} round(s) over {blocks} block(s)")]
    PuzzleTooSmall {
        /// Requested rounds.
        rounds: u32,
        /// Number of blocks in the puzzle.
        blocks: usize,
    },
    /// No starting offset reproduces the goal digest.
    #[error("no puzzle solution found")]
    NoSolutionFound,
    /// Signing was requested for zero messages.
    #[error("cannot sign an empty batch")]
    EmptyBatch,
    /// A digest recomputed from the request does not match the one that was signed.
    #[error("digest mismatch: {0}")]
    DigestMismatch(&'static str),
    /// The batch signature does not verify against the bundle digest.
    #[error("batch signature invalid")]
    InvalidBatchSignature,
    /// This cache does not know the escrow.
    #[error("escrow {0} not found")]
    EscrowNotFound(EscrowId),
    /// This cache is no longer serving the escrow.
    #[error("escrow {0} is not active")]
    EscrowInactive(EscrowId),
    /// No such object in the escrow.
    #[error("object {0} not found")]
    ObjectNotFound(u64),
    /// No such block in the object.
    #[error("block {0} not found")]
    BlockNotFound(u64),
    /// The request carries no ticket this cache can handle.
    #[error("unsupported ticket type in client request")]
    UnsupportedTicketType,
    /// The ticket has already been redeemed at this cache.
    #[error("ticket already redeemed")]
    DuplicateTicket,
    /// A collaborator failed while serving the request.
    #[error("{context}: {source}")]
    Collaborator {
        /// What the handler was doing.
        context: &'static str,
        /// What the store reported.
        #[source]
        source: StoreError,
    },
    /// CBOR encoding or decoding of a ticket failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_cbor::Error),
    /// The configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),
    /// I/O failure while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DigestMismatch(_)
            | Error::InvalidBatchSignature
            | Error::NoSolutionFound
            | Error::DuplicateTicket => ErrorKind::Integrity,
            Error::EscrowNotFound(_)
            | Error::EscrowInactive(_)
            | Error::ObjectNotFound(_)
            | Error::BlockNotFound(_) => ErrorKind::NotFound,
            Error::UnsupportedTicketType => ErrorKind::Unsupported,
            Error::Collaborator { .. } | Error::Io(_) => ErrorKind::Collaborator,
            _ => ErrorKind::InvalidInput,
        }
    }

    /// Translate a store failure. Lookup misses and replays keep their own variants; anything
    /// else is wrapped with `context`.
    pub(crate) fn from_store(
        err: StoreError,
        context: &'static str,
        object_id: u64,
        block_idx: u64,
    ) -> Self {
        match err {
            StoreError::ObjectNotFound => Error::ObjectNotFound(object_id),
            StoreError::BlockNotFound => Error::BlockNotFound(block_idx),
            StoreError::DuplicateTicket => Error::DuplicateTicket,
            source @ StoreError::Backend(_) => Error::Collaborator { context, source },
        }
    }
}
