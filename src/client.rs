//! Client side of the exchange: recovering the L2 ticket and the plaintext blocks.
use crate::common::{Digest, SessionKey};
use crate::errors::Error;
use crate::puzzle::{solve, Parameters};
use crate::ticket::{decrypt_ticket_l2, TicketBundle, TicketL2};

pub use crate::blockcipher::decrypt_layers;
pub use crate::prf::session_key;

/// Result of solving the colocation puzzle of a bundle.
#[derive(Debug)]
pub struct PuzzleSolution {
    /// Secret keying the L2 ticket.
    pub secret: Digest,
    /// Start offset that reaches the goal.
    pub offset: u32,
    /// The decrypted L2 ticket.
    pub ticket_l2: TicketL2,
}

impl PuzzleSolution {
    /// Inner session keys carried by the L2 ticket, in bundle order.
    pub fn inner_session_keys(&self) -> Result<Vec<SessionKey>, Error> {
        self.ticket_l2.inner_session_keys()
    }
}

/// Solve the puzzle of `bundle` over `blocks`, the bundle's blocks in bundle order with only
/// the inner encryption layer left on, then decrypt the L2 ticket with the secret found.
pub fn solve_bundle_puzzle<B: AsRef<[u8]>>(
    bundle: &TicketBundle,
    blocks: &[B],
) -> Result<PuzzleSolution, Error> {
    let info = &bundle.remainder.puzzle_info;
    let params = Parameters {
        rounds: info.rounds,
        // The puzzle does not interpret the start offset or range yet.
        ..Parameters::default()
    };
    let (secret, offset) = solve(&params, blocks, &info.goal)?;
    let ticket_l2 = decrypt_ticket_l2(&secret, &bundle.encrypted_ticket_l2)?;
    Ok(PuzzleSolution {
        secret,
        offset,
        ticket_l2,
    })
}
