//! Cache-side request handling.
//!
//! A request goes through the same checks whatever ticket it carries: the escrow must be one
//! this cache serves, the ticket must be listed in the bundle subdigests, the remainder must
//! hash to the recorded remainder digest and the subdigests must carry a valid batch
//! signature. Only then is the ticket acted upon:
//! * a ticket request gets the block, encrypted under the inner then the outer session key
//! * an L1 ticket is stored and answered with the outer session key
//! * an L2 ticket is stored and acknowledged
//!
//! Rejections are final for the request. Integrity failures are logged under the
//! `bandwidth_proof::integrity` target so they can be told apart from ordinary misses.
use crate::batchsignature::{self, BatchSignature};
use crate::blockcipher::encrypt_layers;
use crate::common::{EscrowId, MasterKey, PublicKey, DIGEST_SIZE};
use crate::errors::{Error, ErrorKind};
use crate::prf::session_key;
use crate::ticket::{
    Ticket, TicketBundleRemainder, TicketBundleSubdigests, TicketL1, TicketL2Info, TicketRequest,
};
use crate::traits::{BlockStore, EscrowRegistry, TicketStore};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use tracing::{debug, debug_span, error, info, warn};

/// An escrow as seen by one cache: the master keys it shares with the publisher.
#[derive(Debug)]
pub struct Escrow {
    /// Escrow identifier.
    pub id: EscrowId,
    inner_master_key: MasterKey,
    outer_master_key: MasterKey,
    active: bool,
}

impl Escrow {
    /// An active escrow.
    pub fn new(id: EscrowId, inner_master_key: MasterKey, outer_master_key: MasterKey) -> Self {
        Escrow {
            id,
            inner_master_key,
            outer_master_key,
            active: true,
        }
    }

    /// Same escrow, no longer served.
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// Whether the cache still serves this escrow.
    pub fn active(&self) -> bool {
        self.active
    }

    /// Key of the inner encryption layer.
    pub fn inner_master_key(&self) -> &MasterKey {
        &self.inner_master_key
    }

    /// Key of the outer encryption layer.
    pub fn outer_master_key(&self) -> &MasterKey {
        &self.outer_master_key
    }
}

/// One ticket of a bundle, together with what a cache needs to check it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCacheRequest {
    /// The ticket being presented. `None` when the client sent a kind this cache cannot read.
    pub ticket: Option<Ticket>,
    /// Request fields of the bundle.
    pub bundle_remainder: TicketBundleRemainder,
    /// Subdigests of the bundle.
    pub ticket_bundle_subdigests: TicketBundleSubdigests,
    /// Batch signature over the subdigests' canonical digest.
    pub bundle_sig: BatchSignature,
}

/// Outcome of a request.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseMsg {
    /// The requested block, encrypted twice.
    Data(#[serde_as(as = "Bytes")] Vec<u8>),
    /// The outer session key, released for an L1 ticket.
    L1 {
        /// Session key of the outer encryption layer.
        #[serde_as(as = "Bytes")]
        outer_session_key: Vec<u8>,
    },
    /// The L2 ticket was accepted.
    L2Ack,
    /// The request was rejected.
    Error {
        /// Class of the failure.
        kind: ErrorKind,
        /// Human readable description.
        message: String,
    },
}

/// Response to a [`ClientCacheRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCacheResponse {
    /// Echoes the request's sequence number.
    pub request_sequence_no: u64,
    /// Outcome.
    pub msg: ResponseMsg,
}

/// Check that the ticket in `req` belongs to a bundle covered by a valid batch signature.
///
/// # Errors
/// * `UnsupportedTicketType` if the request carries no ticket
/// * `DigestMismatch` if the ticket or the remainder is not the one the subdigests record
/// * `InvalidBatchSignature` if the signature does not cover the subdigests
pub fn verify_request(req: &ClientCacheRequest) -> Result<(), Error> {
    let sub = &req.ticket_bundle_subdigests;
    match &req.ticket {
        Some(Ticket::Request(t)) => {
            if !sub.contains_ticket_request_digest(&t.canonical_digest()) {
                return Err(Error::DigestMismatch("ticket request digest not found"));
            }
        }
        Some(Ticket::L1(t)) => {
            if !sub.contains_ticket_l1_digest(&t.canonical_digest()) {
                return Err(Error::DigestMismatch("ticket L1 digest not found"));
            }
        }
        Some(Ticket::L2(t)) => {
            if sub.encrypted_ticket_l2_digest != t.encrypted_ticket_l2_digest() {
                return Err(Error::DigestMismatch("encrypted ticket L2 digest mismatch"));
            }
        }
        None => return Err(Error::UnsupportedTicketType),
    }

    if sub.remainder_digest != req.bundle_remainder.canonical_digest() {
        return Err(Error::DigestMismatch("ticket bundle remainder digest mismatch"));
    }

    if !batchsignature::verify(&sub.canonical_digest(), &req.bundle_sig)? {
        return Err(Error::InvalidBatchSignature);
    }
    Ok(())
}

fn log_rejection(err: &Error) {
    match err.kind() {
        ErrorKind::Integrity => {
            warn!(target: "bandwidth_proof::integrity", error = %err, "rejected request")
        }
        ErrorKind::Collaborator => error!(error = %err, "collaborator failure"),
        ErrorKind::NotFound | ErrorKind::Unsupported => info!(error = %err, "request refused"),
        ErrorKind::InvalidInput => debug!(error = %err, "malformed request"),
    }
}

/// Request handler of a cache.
#[derive(Debug)]
pub struct Cache<R, B, T> {
    registry: R,
    blocks: B,
    tickets: T,
    trusted_signer: Option<PublicKey>,
}

impl<R, B, T> Cache<R, B, T>
where
    R: EscrowRegistry,
    B: BlockStore,
    T: TicketStore,
{
    /// A cache that accepts bundles signed by any key.
    pub fn new(registry: R, blocks: B, tickets: T) -> Self {
        Cache {
            registry,
            blocks,
            tickets,
            trusted_signer: None,
        }
    }

    /// Only accept bundles signed by `signer`.
    pub fn with_trusted_signer(mut self, signer: PublicKey) -> Self {
        self.trusted_signer = Some(signer);
        self
    }

    /// Handle one request. Failures are logged according to their kind and returned.
    pub fn handle_request(&self, req: &ClientCacheRequest) -> Result<ClientCacheResponse, Error> {
        let remainder = &req.bundle_remainder;
        let span = debug_span!(
            "handle_request",
            escrow = %remainder.escrow_id,
            object = remainder.object_id,
            seq = remainder.request_sequence_no
        );
        let _enter = span.enter();

        match self.dispatch(req) {
            Ok(msg) => Ok(ClientCacheResponse {
                request_sequence_no: remainder.request_sequence_no,
                msg,
            }),
            Err(e) => {
                log_rejection(&e);
                Err(e)
            }
        }
    }

    /// Like [`Cache::handle_request`], with failures turned into an error response.
    pub fn respond(&self, req: &ClientCacheRequest) -> ClientCacheResponse {
        self.handle_request(req)
            .unwrap_or_else(|e| ClientCacheResponse {
                request_sequence_no: req.bundle_remainder.request_sequence_no,
                msg: ResponseMsg::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                },
            })
    }

    fn dispatch(&self, req: &ClientCacheRequest) -> Result<ResponseMsg, Error> {
        let escrow_id = req.bundle_remainder.escrow_id;
        let escrow = self
            .registry
            .get_escrow(&escrow_id)
            .ok_or(Error::EscrowNotFound(escrow_id))?;
        if !escrow.active() {
            return Err(Error::EscrowInactive(escrow_id));
        }

        verify_request(req)?;
        if let Some(trusted) = &self.trusted_signer {
            if req.bundle_sig.signing_key != *trusted {
                return Err(Error::InvalidBatchSignature);
            }
        }
        debug!("request verified");

        match &req.ticket {
            Some(Ticket::Request(t)) => self.handle_data_request(&escrow, req, t),
            Some(Ticket::L1(t)) => self.handle_ticket_l1(&escrow, req, t),
            Some(Ticket::L2(t)) => self.handle_ticket_l2(&escrow, req, t),
            None => Err(Error::UnsupportedTicketType),
        }
    }

    fn handle_data_request(
        &self,
        escrow: &Escrow,
        req: &ClientCacheRequest,
        ticket: &TicketRequest,
    ) -> Result<ResponseMsg, Error> {
        let remainder = &req.bundle_remainder;
        let block = self
            .blocks
            .get_block(&escrow.id, remainder.object_id, ticket.block_idx)
            .map_err(|e| {
                Error::from_store(e, "failed to get block", remainder.object_id, ticket.block_idx)
            })?;

        let data = encrypt_layers(
            ticket.block_idx,
            remainder.sequence_no(),
            remainder.client_public_key.as_bytes(),
            escrow.inner_master_key(),
            escrow.outer_master_key(),
            &block,
        )?;
        info!(block_idx = ticket.block_idx, len = data.len(), "served data block");
        Ok(ResponseMsg::Data(data))
    }

    fn handle_ticket_l1(
        &self,
        escrow: &Escrow,
        req: &ClientCacheRequest,
        ticket: &TicketL1,
    ) -> Result<ResponseMsg, Error> {
        let remainder = &req.bundle_remainder;
        self.tickets
            .put_ticket_l1(&escrow.id, ticket)
            .map_err(|e| Error::from_store(e, "failed to store ticket L1", remainder.object_id, 0))?;

        let key = session_key(
            remainder.client_public_key.as_bytes(),
            remainder.sequence_no(),
            escrow.outer_master_key(),
        )?;
        info!(ticket_no = ticket.ticket_no, "accepted ticket L1");
        Ok(ResponseMsg::L1 {
            outer_session_key: key.as_bytes().to_vec(),
        })
    }

    fn handle_ticket_l2(
        &self,
        escrow: &Escrow,
        req: &ClientCacheRequest,
        ticket: &TicketL2Info,
    ) -> Result<ResponseMsg, Error> {
        if ticket.puzzle_secret.len() != DIGEST_SIZE {
            return Err(Error::InvalidDigestLength(ticket.puzzle_secret.len()));
        }
        self.tickets
            .put_ticket_l2(&escrow.id, ticket)
            .map_err(|e| {
                Error::from_store(e, "failed to store ticket L2", req.bundle_remainder.object_id, 0)
            })?;
        info!("accepted ticket L2");
        Ok(ResponseMsg::L2Ack)
    }
}
