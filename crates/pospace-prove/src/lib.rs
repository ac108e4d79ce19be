//! pospace-prove — answering challenges.
//!
//! [`prover::Prover`] walks a finished plot: checkpoint tables locate the
//! table-7 entries for a challenge, then line-point parks are followed down
//! to the `x` preimages for qualities and full proofs.
//!
//! [`verifier`] is the stateless counterpart: it rebuilds the matched
//! subtree from a proof's 64 preimages with nothing but `(k, id)` and
//! rejects anything malformed. The two agree bit-for-bit on qualities.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::doc_markdown
)]

/// Plot-backed prover.
pub mod prover;
/// Stateless proof validation.
pub mod verifier;

pub use prover::Prover;
pub use verifier::validate_proof;

use pospace_core::bits::{byte_align, put_bits};
use pospace_core::Result;
use sha2::{Digest, Sha256};

/// Quality string for a challenge and one table-1 preimage pair:
/// `SHA-256(challenge ‖ x_a ‖ x_b)` over the byte-aligned `2k`-bit pair,
/// in stored (min, max) order.
pub(crate) fn quality_hash(k: u8, challenge: &[u8; 32], x_a: u64, x_b: u64) -> Result<[u8; 32]> {
    let mut pair = [0u8; 16];
    put_bits(&mut pair, 0, x_a, u32::from(k))?;
    put_bits(&mut pair, u64::from(k), x_b, u32::from(k))?;

    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(&pair[..byte_align(2 * u64::from(k))]);
    Ok(hasher.finalize().into())
}
