//! Traits at the seams between the protocol core and the parties around it: the content a
//! publisher encrypts, the batch signer, and the stores a cache consults while handling a
//! request.
use crate::batchsignature::BatchSignature;
use crate::cache::Escrow;
use crate::common::EscrowId;
use crate::errors::{Error, StoreError};
use crate::ticket::{TicketL1, TicketL2Info};
use std::sync::Arc;

/// An ordered sequence of data blocks, each made of whole cipher blocks.
pub trait ContentObject {
    /// Number of data blocks.
    fn block_count(&self) -> usize;
    /// Size in bytes of data block `block_idx`.
    fn block_size(&self, block_idx: u64) -> Result<usize, Error>;
    /// The whole of data block `block_idx`.
    fn get_block(&self, block_idx: u64) -> Result<&[u8], Error>;
    /// Cipher block `cipher_block_idx` of data block `block_idx`. The cipher-block index is
    /// taken modulo the number of cipher blocks in the data block.
    fn get_cipher_block(&self, block_idx: u64, cipher_block_idx: u32) -> Result<&[u8], Error>;
}

/// Source of the cipher blocks walked by the colocation puzzle.
///
/// Position `i` names the `i`-th block of the puzzle, not a block index of the content object.
pub trait BlockAccessor {
    /// Number of blocks in the puzzle.
    fn block_qty(&self) -> usize;
    /// Number of whole cipher blocks in block `i`.
    fn cipher_block_qty(&self, i: usize) -> usize;
    /// Fetch the cipher block at `offset` (reduced modulo the block's cipher-block count) of
    /// block `i`.
    fn fetch(&self, i: usize, offset: u32) -> Result<[u8; 16], Error>;
}

/// Signs ticket bundle digests, possibly batching several of them under one signature.
pub trait BatchSigner {
    /// Produce the batch signature covering `message`.
    fn batch_sign(&self, message: &[u8]) -> Result<BatchSignature, Error>;
}

/// Escrows this cache participates in.
pub trait EscrowRegistry {
    /// Look an escrow up by id.
    fn get_escrow(&self, id: &EscrowId) -> Option<Arc<Escrow>>;
}

/// Raw data blocks held by a cache.
pub trait BlockStore {
    /// Fetch one data block of an object.
    fn get_block(
        &self,
        escrow_id: &EscrowId,
        object_id: u64,
        block_idx: u64,
    ) -> Result<Vec<u8>, StoreError>;
}

/// Persistence of the tickets a cache has been handed, to be redeemed later.
pub trait TicketStore {
    /// Record an L1 ticket. Storing the same ticket twice fails with `DuplicateTicket`.
    fn put_ticket_l1(&self, escrow_id: &EscrowId, ticket: &TicketL1) -> Result<(), StoreError>;
    /// Record an L2 ticket. Storing the same ticket twice fails with `DuplicateTicket`.
    fn put_ticket_l2(&self, escrow_id: &EscrowId, ticket: &TicketL2Info)
        -> Result<(), StoreError>;
}
