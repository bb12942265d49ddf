//! Publisher side: building signed ticket bundles.
use crate::common::{u64_to_le, EscrowId, MasterKey, PublicKey, SessionKey};
use crate::config::Config;
use crate::errors::Error;
use crate::prf::{keyed_prf, session_key};
use crate::puzzle::{self, Parameters, IV_SIZE};
use crate::ticket::{
    bundle_digest, encrypt_ticket_l2, ColocationPuzzleInfo, TicketBundle, TicketBundleRemainder,
    TicketL1, TicketL2, TicketRequest,
};
use crate::traits::{BatchSigner, ContentObject};
use rand::Rng;
use tracing::{debug, info};

/// Size of the nonce of an L2 ticket.
pub const TICKET_L2_NONCE_SIZE: usize = 16;

/// A cache taking part in an escrow, as known to the publisher.
#[derive(Debug, Clone)]
pub struct ParticipatingCache {
    /// Identity of the cache.
    pub public_key: PublicKey,
    /// Inner master key shared with the cache.
    pub inner_master_key: MasterKey,
}

/// One block to be served by one cache.
#[derive(Debug, Clone, Copy)]
pub struct BundleEntryParams<'a> {
    /// Lottery ticket number reserved for this entry.
    pub ticket_no: u64,
    /// Block of the object to serve.
    pub block_idx: u64,
    /// Cache serving it.
    pub cache: &'a ParticipatingCache,
}

/// Everything needed to build one ticket bundle.
#[derive(Debug)]
pub struct BundleParams<'a, C: ?Sized> {
    /// Escrow paying for the transfer.
    pub escrow_id: EscrowId,
    /// Object within the escrow.
    pub object_id: u64,
    /// Plaintext of the object.
    pub object: &'a C,
    /// Client-chosen sequence number.
    pub request_sequence_no: u64,
    /// Client the blocks are encrypted for.
    pub client_public_key: PublicKey,
    /// Blocks to serve, in bundle order.
    pub entries: Vec<BundleEntryParams<'a>>,
}

/// Builds and signs ticket bundles.
#[derive(Debug)]
pub struct BundleGenerator<S> {
    signer: S,
    puzzle_params: Parameters,
}

impl<S: BatchSigner> BundleGenerator<S> {
    /// Generator using the default puzzle parameters.
    pub fn new(signer: S) -> Self {
        BundleGenerator {
            signer,
            puzzle_params: Parameters::default(),
        }
    }

    /// Generator using the puzzle parameters of `config`.
    pub fn from_config(signer: S, config: &Config) -> Self {
        BundleGenerator {
            signer,
            puzzle_params: config.puzzle,
        }
    }

    /// Parameters of the puzzles this generator builds.
    pub fn puzzle_params(&self) -> &Parameters {
        &self.puzzle_params
    }

    /// Build the bundle for `bp`.
    ///
    /// For every entry the cache's inner session key is derived for this client and
    /// request, and a ticket request and an L1 ticket are issued. The colocation puzzle runs
    /// over the entries' blocks as the caches will encrypt them. The L2 ticket carries every
    /// inner session key and is encrypted under the puzzle secret. Finally the bundle digest
    /// is batch-signed.
    ///
    /// # Errors
    /// Fails if `bp` has no entries, if the puzzle cannot be generated over the blocks, or if
    /// signing fails.
    pub fn generate_ticket_bundle<C, R>(
        &self,
        bp: &BundleParams<'_, C>,
        rng: &mut R,
    ) -> Result<TicketBundle, Error>
    where
        C: ContentObject + ?Sized,
        R: Rng + ?Sized,
    {
        if bp.entries.is_empty() {
            return Err(Error::InvalidParameters("must serve client at least one block"));
        }
        let seq = bp.request_sequence_no as u32;

        let mut inner_keys: Vec<SessionKey> = Vec::with_capacity(bp.entries.len());
        let mut inner_ivs: Vec<[u8; IV_SIZE]> = Vec::with_capacity(bp.entries.len());
        for entry in &bp.entries {
            let key = session_key(
                bp.client_public_key.as_bytes(),
                seq,
                &entry.cache.inner_master_key,
            )?;
            // The IV is keyed by the session key, not by the master key.
            inner_ivs.push(keyed_prf(&u64_to_le(entry.block_idx), seq, key.as_bytes())?);
            inner_keys.push(key);
        }

        let block_indices: Vec<u64> = bp.entries.iter().map(|e| e.block_idx).collect();
        let ticket_requests: Vec<TicketRequest> = bp
            .entries
            .iter()
            .map(|e| TicketRequest {
                block_idx: e.block_idx,
                cache_public_key: e.cache.public_key,
            })
            .collect();
        let ticket_l1s: Vec<TicketL1> = bp
            .entries
            .iter()
            .map(|e| TicketL1 {
                ticket_no: e.ticket_no,
                cache_public_key: e.cache.public_key,
            })
            .collect();

        debug!(blocks = ?block_indices, "generating colocation puzzle");
        let puzzle = puzzle::generate(
            &self.puzzle_params,
            bp.object,
            &block_indices,
            &inner_keys,
            &inner_ivs,
            &mut *rng,
        )?;

        let mut nonce = vec![0u8; TICKET_L2_NONCE_SIZE];
        rng.fill(&mut nonce[..]);
        let ticket_l2 = TicketL2 {
            nonce,
            inner_session_keys: inner_keys.iter().map(|k| k.as_bytes().to_vec()).collect(),
        };
        let encrypted_ticket_l2 = encrypt_ticket_l2(&puzzle, &ticket_l2)?;

        let remainder = TicketBundleRemainder {
            request_sequence_no: bp.request_sequence_no,
            escrow_id: bp.escrow_id,
            object_id: bp.object_id,
            client_public_key: bp.client_public_key,
            puzzle_info: ColocationPuzzleInfo {
                goal: *puzzle.goal(),
                rounds: self.puzzle_params.rounds,
                start_offset: u64::from(self.puzzle_params.start_offset),
                start_range: u64::from(self.puzzle_params.start_range),
            },
        };

        let digest = bundle_digest(&ticket_requests, &ticket_l1s, &encrypted_ticket_l2, &remainder);
        let batch_signature = self.signer.batch_sign(&digest)?;
        info!(
            escrow = %bp.escrow_id,
            object = bp.object_id,
            entries = bp.entries.len(),
            "generated ticket bundle"
        );

        Ok(TicketBundle {
            ticket_requests,
            ticket_l1s,
            encrypted_ticket_l2,
            remainder,
            batch_signature,
        })
    }
}
