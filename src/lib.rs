//! Verifiable bandwidth proofs for a pay-per-delivery content network.
//!
//! A publisher pays untrusted caches for serving blocks to clients without watching the
//! transfers. Each client request comes with a ticket bundle: one ticket request and one L1
//! lottery ticket per cache, and a single L2 ticket encrypted under the secret of a
//! colocation puzzle. The bundle is covered by a batch signature. Caches encrypt every block
//! twice with keys derived from their master keys, so a client can only read the data after
//! handing over the L1 tickets, and can only unlock the L2 ticket after receiving every
//! block of the bundle.
//!
//! # Example
//! ```
//! use bandwidth_proof::batchsignature::{sign, verify};
//! use ed25519_dalek::SigningKey;
//!
//! let signer = SigningKey::from_bytes(&[7u8; 32]);
//! let sig = sign(b"bundle digest", &signer);
//! assert!(verify(b"bundle digest", &sig).unwrap());
//! assert!(!verify(b"another digest", &sig).unwrap());
//! ```
#![warn(missing_docs, rust_2018_idioms)]

mod common;
#[macro_use]
pub mod blockcipher;
mod errors;
pub mod batchsignature;
pub mod bundle;
pub mod cache;
pub mod client;
pub mod config;
pub mod content;
pub mod prf;
pub mod puzzle;
pub mod storage;
pub mod ticket;
pub mod traits;

pub use common::{
    digest_of, node_digest, try_parse_digest, Digest, EscrowId, MasterKey, PublicKey,
    SessionKey, CIPHER_BLOCK_SIZE, DIGEST_SIZE, ESCROW_ID_SIZE, PUBLIC_KEY_SIZE,
    SESSION_KEY_SIZE, SIGMA_SIZE,
};
pub use errors::{Error, ErrorKind, StoreError};
