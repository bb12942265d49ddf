//! In-memory escrow registry, block store and ticket store.
use crate::cache::Escrow;
use crate::common::{Digest, EscrowId};
use crate::content::ContentBuffer;
use crate::errors::StoreError;
use crate::ticket::{TicketL1, TicketL2Info};
use crate::traits::{BlockStore, ContentObject, EscrowRegistry, TicketStore};
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    escrows: RwLock<HashMap<EscrowId, Arc<Escrow>>>,
    objects: RwLock<HashMap<(EscrowId, u64), ContentBuffer>>,
    tickets_l1: Mutex<HashMap<(EscrowId, u64), TicketL1>>,
    tickets_l2: Mutex<HashMap<(EscrowId, Digest), TicketL2Info>>,
}

/// Store keeping everything in memory. Clones share the same contents.
///
/// An L1 ticket is identified by its escrow and ticket number, an L2 ticket by its escrow and
/// the digest of the encrypted ticket. Storing either a second time fails with
/// `DuplicateTicket`.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an escrow, replacing any escrow with the same id.
    pub fn add_escrow(&self, escrow: Escrow) {
        self.inner.escrows.write().insert(escrow.id, Arc::new(escrow));
    }

    /// Make the blocks of `content` available as object `object_id` of the escrow.
    pub fn put_object(&self, escrow_id: EscrowId, object_id: u64, content: ContentBuffer) {
        self.inner
            .objects
            .write()
            .insert((escrow_id, object_id), content);
    }

    /// A stored L1 ticket.
    pub fn ticket_l1(&self, escrow_id: &EscrowId, ticket_no: u64) -> Option<TicketL1> {
        self.inner
            .tickets_l1
            .lock()
            .get(&(*escrow_id, ticket_no))
            .cloned()
    }

    /// A stored L2 ticket, by the digest of the encrypted ticket.
    pub fn ticket_l2(&self, escrow_id: &EscrowId, digest: &Digest) -> Option<TicketL2Info> {
        self.inner
            .tickets_l2
            .lock()
            .get(&(*escrow_id, *digest))
            .cloned()
    }
}

impl EscrowRegistry for MemoryStore {
    fn get_escrow(&self, id: &EscrowId) -> Option<Arc<Escrow>> {
        self.inner.escrows.read().get(id).cloned()
    }
}

impl BlockStore for MemoryStore {
    fn get_block(
        &self,
        escrow_id: &EscrowId,
        object_id: u64,
        block_idx: u64,
    ) -> Result<Vec<u8>, StoreError> {
        let objects = self.inner.objects.read();
        let content = objects
            .get(&(*escrow_id, object_id))
            .ok_or(StoreError::ObjectNotFound)?;
        content
            .get_block(block_idx)
            .map(<[u8]>::to_vec)
            .map_err(|_| StoreError::BlockNotFound)
    }
}

impl TicketStore for MemoryStore {
    fn put_ticket_l1(&self, escrow_id: &EscrowId, ticket: &TicketL1) -> Result<(), StoreError> {
        match self.inner.tickets_l1.lock().entry((*escrow_id, ticket.ticket_no)) {
            Entry::Occupied(_) => Err(StoreError::DuplicateTicket),
            Entry::Vacant(v) => {
                v.insert(ticket.clone());
                Ok(())
            }
        }
    }

    fn put_ticket_l2(
        &self,
        escrow_id: &EscrowId,
        ticket: &TicketL2Info,
    ) -> Result<(), StoreError> {
        let key = (*escrow_id, ticket.encrypted_ticket_l2_digest());
        match self.inner.tickets_l2.lock().entry(key) {
            Entry::Occupied(_) => Err(StoreError::DuplicateTicket),
            Entry::Vacant(v) => {
                v.insert(ticket.clone());
                Ok(())
            }
        }
    }
}
