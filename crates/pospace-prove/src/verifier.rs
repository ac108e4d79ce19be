//! Stateless proof validation.
//!
//! A proof is 64 table-1 preimages in DFS order. Validation recomputes F1
//! for every leaf and folds pairs upward: at each level the pair is
//! oriented by the bucket rule (a match fixes which side is left), hashed
//! with Fx, and collapsed into the next level's entry. The proof is
//! accepted only if every fold is a valid match and the surviving `f7`
//! equals the challenge's top `k` bits.
//!
//! This function is total: malformed input of any kind is a reject, never
//! a panic or an error.

use pospace_core::bits::{extract_u64, Meta};
use pospace_core::hashing::{F1Calculator, FxCalculator};
use pospace_core::matching::is_match;
use pospace_core::params::{EXTRA_BITS, ID_LEN, K_MAX, K_MIN};
use pospace_core::Result;

use crate::quality_hash;

struct Node {
    y: u64,
    meta: Meta,
}

/// Validate `proof` against `(k, id, challenge)`.
///
/// Returns the quality string of the pair selected by the challenge's
/// bottom five bits on success, `None` on any failure.
#[must_use]
pub fn validate_proof(
    id: &[u8; ID_LEN],
    k: u8,
    challenge: &[u8; 32],
    proof: &[u8],
) -> Option<[u8; 32]> {
    validate_inner(id, k, challenge, proof).ok().flatten()
}

fn validate_inner(
    id: &[u8; ID_LEN],
    k: u8,
    challenge: &[u8; 32],
    proof: &[u8],
) -> Result<Option<[u8; 32]>> {
    if !(K_MIN..=K_MAX).contains(&k) || proof.len() != 8 * k as usize {
        return Ok(None);
    }

    // Unpack the leaves and recompute their table-1 entries.
    let mut xs = Vec::with_capacity(64);
    for i in 0..64u64 {
        xs.push(extract_u64(proof, i * u64::from(k), u32::from(k))?);
    }
    let mut f1 = F1Calculator::new(k, id);
    let mut level: Vec<Node> = Vec::with_capacity(64);
    for &x in &xs {
        level.push(Node { y: f1.calculate_f(x)?, meta: Meta::from_u64(x, u32::from(k))? });
    }

    // Fold 64 → 1, orienting each pair by the bucket rule.
    for table in 2u8..=7 {
        let mut fx = FxCalculator::new(k, table);
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks_exact(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let (l, r) = if is_match(a.y, b.y) {
                (a, b)
            } else if is_match(b.y, a.y) {
                (b, a)
            } else {
                return Ok(None);
            };
            let (f, meta) = fx.calculate(l.y, &l.meta, &r.meta)?;
            let y = if table == 7 { f >> EXTRA_BITS } else { f };
            next.push(Node { y, meta });
        }
        level = next;
    }

    // The surviving f7 must equal the challenge's top k bits.
    if level[0].y != extract_u64(challenge, 0, u32::from(k))? {
        return Ok(None);
    }

    // Quality pair: the leaf pair indexed by the bottom five challenge bits.
    let selector = (challenge[31] & 0x1f) as usize;
    Ok(Some(quality_hash(k, challenge, xs[2 * selector], xs[2 * selector + 1])?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_sizes_and_wrong_k() {
        let id = [1u8; ID_LEN];
        let challenge = [0u8; 32];
        assert!(validate_proof(&id, 17, &challenge, &[]).is_none());
        assert!(validate_proof(&id, 17, &challenge, &vec![0u8; 64]).is_none());
        assert!(validate_proof(&id, 3, &challenge, &vec![0u8; 24]).is_none());
        // Right length but junk content: the folds cannot all match.
        assert!(validate_proof(&id, 17, &challenge, &vec![0xabu8; 8 * 17]).is_none());
    }
}
