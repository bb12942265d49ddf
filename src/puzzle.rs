//! Colocation puzzle: a hash chain over the cipher blocks handed out for one ticket bundle.
//!
//! Starting from an all-zero digest, every step hashes the running digest together with one
//! cipher block and reads the offset of the next cipher block from the last four bytes of the
//! new digest. Steps visit the puzzle's blocks in turn, `rounds` times over. Whoever holds the
//! encrypted blocks can replay the chain; nobody else can. The publisher runs the chain over
//! the plaintext, encrypting each visited cipher block on the fly with the inner key it
//! issued, and discloses only the terminal digest (the goal). The client, holding the
//! ciphertext, tries every start offset in the first block until it reaches the goal. The
//! digest one step before the goal is the secret that keys the L2 ticket.
use crate::blockcipher::encrypt_single_block;
use crate::common::{
    digest_of, try_parse_digest, Digest, SessionKey, CIPHER_BLOCK_SIZE, DIGEST_SIZE,
};
use crate::errors::Error;
use crate::traits::{BlockAccessor, ContentObject};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use zeroize::Zeroize;

/// Size of the IV sliced from a puzzle secret.
pub const IV_SIZE: usize = CIPHER_BLOCK_SIZE;
/// Size of the key sliced from a puzzle secret.
pub const KEY_SIZE: usize = 16;

/// Shape of a puzzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    /// How many times the chain walks over every block.
    pub rounds: u32,
    /// Carried into the bundle digest; not interpreted yet.
    pub start_offset: u32,
    /// Carried into the bundle digest; not interpreted yet.
    pub start_range: u32,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            rounds: 2,
            start_offset: 0,
            start_range: 0,
        }
    }
}

impl Parameters {
    /// Check the parameters on their own.
    pub fn validate(&self) -> Result<(), Error> {
        if self.rounds < 1 {
            return Err(Error::InvalidParameters("puzzle must have at least one round"));
        }
        Ok(())
    }

    /// Check the parameters against the number of blocks the puzzle covers. The chain runs
    /// `rounds * blocks - 1` steps, so a single step overall is rejected.
    fn validate_for(&self, blocks: usize) -> Result<(), Error> {
        self.validate()?;
        if blocks == 0 {
            return Err(Error::InvalidParameters("puzzle must cover at least one block"));
        }
        if u64::from(self.rounds) * blocks as u64 <= 1 {
            return Err(Error::PuzzleTooSmall {
                rounds: self.rounds,
                blocks,
            });
        }
        Ok(())
    }
}

/// A generated puzzle. Only the goal is meant to leave the publisher.
pub struct Puzzle {
    secret: Digest,
    goal: Digest,
    offset: u32,
    params: Parameters,
}

impl Puzzle {
    /// Secret unlocked by solving the puzzle.
    pub fn secret(&self) -> &Digest {
        &self.secret
    }

    /// Digest the solver has to reach.
    pub fn goal(&self) -> &Digest {
        &self.goal
    }

    /// Cipher-block offset the chain started at.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Parameters the puzzle was generated with.
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Key sliced from the secret.
    pub fn key(&self) -> &[u8] {
        secret_key(&self.secret)
    }

    /// IV sliced from the secret.
    pub fn iv(&self) -> &[u8] {
        secret_iv(&self.secret)
    }
}

impl Drop for Puzzle {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.offset.zeroize();
    }
}

impl fmt::Debug for Puzzle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Puzzle")
            .field("goal", &self.goal)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

pub(crate) fn secret_key(secret: &Digest) -> &[u8] {
    &secret[IV_SIZE..IV_SIZE + KEY_SIZE]
}

pub(crate) fn secret_iv(secret: &Digest) -> &[u8] {
    &secret[..IV_SIZE]
}

fn cipher_block_qty(len: usize) -> Result<usize, Error> {
    if len == 0 || len % CIPHER_BLOCK_SIZE != 0 {
        return Err(Error::InvalidBlockLength(len));
    }
    Ok(len / CIPHER_BLOCK_SIZE)
}

fn reduce(offset: u32, qty: usize) -> usize {
    offset as usize % qty
}

/// Publisher-side accessor: reads plaintext from a content object and encrypts each visited
/// cipher block with the inner key and IV issued for that block.
pub struct ContentAccessor<'a, C: ContentObject + ?Sized> {
    content: &'a C,
    block_indices: &'a [u64],
    inner_keys: &'a [SessionKey],
    inner_ivs: &'a [[u8; IV_SIZE]],
    qty: Vec<usize>,
}

impl<'a, C: ContentObject + ?Sized> ContentAccessor<'a, C> {
    /// Position `i` of the puzzle maps to block `block_indices[i]` of `content`, encrypted
    /// under `inner_keys[i]` and `inner_ivs[i]`.
    pub fn new(
        content: &'a C,
        block_indices: &'a [u64],
        inner_keys: &'a [SessionKey],
        inner_ivs: &'a [[u8; IV_SIZE]],
    ) -> Result<Self, Error> {
        if block_indices.len() != inner_keys.len() || block_indices.len() != inner_ivs.len() {
            return Err(Error::InvalidParameters(
                "need as many inner keys and IVs as blocks",
            ));
        }
        let qty = block_indices
            .iter()
            .map(|&idx| content.block_size(idx).and_then(cipher_block_qty))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ContentAccessor {
            content,
            block_indices,
            inner_keys,
            inner_ivs,
            qty,
        })
    }
}

impl<'a, C: ContentObject + ?Sized> BlockAccessor for ContentAccessor<'a, C> {
    fn block_qty(&self) -> usize {
        self.block_indices.len()
    }

    fn cipher_block_qty(&self, i: usize) -> usize {
        self.qty[i]
    }

    fn fetch(&self, i: usize, offset: u32) -> Result<[u8; CIPHER_BLOCK_SIZE], Error> {
        // Block sizes are checked on construction, so the reduced offset fits in a u32.
        let offset = reduce(offset, self.qty[i]) as u32;
        let plaintext = self.content.get_cipher_block(self.block_indices[i], offset)?;
        encrypt_single_block(
            plaintext,
            self.inner_keys[i].as_bytes(),
            &self.inner_ivs[i],
            offset,
        )
    }
}

/// Solver-side accessor over blocks that are already encrypted.
pub struct CiphertextAccessor<'a, B: AsRef<[u8]>> {
    blocks: &'a [B],
    qty: Vec<usize>,
}

impl<'a, B: AsRef<[u8]>> CiphertextAccessor<'a, B> {
    /// Wrap the encrypted blocks, in puzzle order.
    pub fn new(blocks: &'a [B]) -> Result<Self, Error> {
        let qty = blocks
            .iter()
            .map(|b| cipher_block_qty(b.as_ref().len()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CiphertextAccessor { blocks, qty })
    }
}

impl<'a, B: AsRef<[u8]>> BlockAccessor for CiphertextAccessor<'a, B> {
    fn block_qty(&self) -> usize {
        self.blocks.len()
    }

    fn cipher_block_qty(&self, i: usize) -> usize {
        self.qty[i]
    }

    fn fetch(&self, i: usize, offset: u32) -> Result<[u8; CIPHER_BLOCK_SIZE], Error> {
        let start = reduce(offset, self.qty[i]) * CIPHER_BLOCK_SIZE;
        let mut out = [0u8; CIPHER_BLOCK_SIZE];
        out.copy_from_slice(&self.blocks[i].as_ref()[start..start + CIPHER_BLOCK_SIZE]);
        Ok(out)
    }
}

/// Run the hash chain for `rounds` rounds from `start_offset`, returning the terminal digest
/// and the digest one step before it.
///
/// # Errors
/// `PuzzleTooSmall` if the chain would have fewer than one step; any failure of the accessor.
pub fn run_puzzle<A: BlockAccessor + ?Sized>(
    rounds: u32,
    start_offset: u32,
    accessor: &A,
) -> Result<(Digest, Digest), Error> {
    let block_qty = accessor.block_qty();
    let total = u64::from(rounds) * block_qty as u64;
    if total <= 1 {
        return Err(Error::PuzzleTooSmall {
            rounds,
            blocks: block_qty,
        });
    }

    let mut offset = start_offset;
    let mut cur = [0u8; DIGEST_SIZE];
    let mut prev = cur;
    for step in 0..total - 1 {
        let piece = accessor.fetch((step % block_qty as u64) as usize, offset)?;
        prev = cur;
        cur = digest_of(&[&cur, &piece]);
        let mut tail = [0u8; 4];
        tail.copy_from_slice(&cur[DIGEST_SIZE - 4..]);
        offset = u32::from_le_bytes(tail);
    }

    Ok((cur, prev))
}

/// Generate a puzzle over blocks `block_indices` of `content`, as encrypted under
/// `inner_keys`/`inner_ivs`. The start offset is drawn uniformly from the cipher blocks of
/// the first block.
pub fn generate<C, R>(
    params: &Parameters,
    content: &C,
    block_indices: &[u64],
    inner_keys: &[SessionKey],
    inner_ivs: &[[u8; IV_SIZE]],
    rng: &mut R,
) -> Result<Puzzle, Error>
where
    C: ContentObject + ?Sized,
    R: Rng + ?Sized,
{
    params.validate_for(block_indices.len())?;
    let accessor = ContentAccessor::new(content, block_indices, inner_keys, inner_ivs)?;

    let first_qty = u32::try_from(accessor.cipher_block_qty(0)).unwrap_or(u32::MAX);
    let offset = rng.gen_range(0..first_qty);

    let (goal, secret) = run_puzzle(params.rounds, offset, &accessor)?;
    debug!(
        rounds = params.rounds,
        blocks = block_indices.len(),
        "generated colocation puzzle"
    );

    Ok(Puzzle {
        secret,
        goal,
        offset,
        params: *params,
    })
}

fn solver_setup<'a, B: AsRef<[u8]>>(
    params: &Parameters,
    ciphertext_blocks: &'a [B],
    goal: &[u8],
) -> Result<(CiphertextAccessor<'a, B>, Digest), Error> {
    params.validate_for(ciphertext_blocks.len())?;
    let goal = try_parse_digest(goal)?;
    Ok((CiphertextAccessor::new(ciphertext_blocks)?, goal))
}

/// Search every start offset of the first block for the one whose chain ends at `goal`.
/// Returns the secret and the offset.
///
/// # Errors
/// `NoSolutionFound` if no offset reaches the goal, which means the blocks are not the ones
/// the puzzle was generated over.
pub fn solve<B: AsRef<[u8]>>(
    params: &Parameters,
    ciphertext_blocks: &[B],
    goal: &[u8],
) -> Result<(Digest, u32), Error> {
    let (accessor, goal) = solver_setup(params, ciphertext_blocks, goal)?;

    let first_qty = u32::try_from(accessor.cipher_block_qty(0)).unwrap_or(u32::MAX);
    for offset in 0..first_qty {
        let (terminal, secret) = run_puzzle(params.rounds, offset, &accessor)?;
        if terminal == goal {
            return Ok((secret, offset));
        }
    }
    Err(Error::NoSolutionFound)
}

/// Check a claimed start offset without searching.
pub fn verify_solution<B: AsRef<[u8]>>(
    params: &Parameters,
    ciphertext_blocks: &[B],
    goal: &[u8],
    offset: u32,
) -> Result<(Digest, u32), Error> {
    let (accessor, goal) = solver_setup(params, ciphertext_blocks, goal)?;

    let (terminal, secret) = run_puzzle(params.rounds, offset, &accessor)?;
    if terminal != goal {
        return Err(Error::NoSolutionFound);
    }
    Ok((secret, offset))
}
