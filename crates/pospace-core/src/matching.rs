//! Adjacent-bucket match engine.
//!
//! Two entries match when their `y` values land in consecutive buckets of
//! size `BC = 119·127` and the right residue hits one of 64 targets derived
//! from the left residue. The target table depends only on the bucket
//! parity, so it is computed once per process and shared.

use std::sync::OnceLock;

use crate::bits::Meta;
use crate::params::{bucket_id, EXTRA_BITS_POW, PARAM_B, PARAM_BC, PARAM_C};

const BC: usize = PARAM_BC as usize;
const M: usize = EXTRA_BITS_POW as usize;

/// `targets[parity][r][m]`: the right residue matched by left residue `r`
/// with candidate index `m`, flattened to one allocation.
struct MatchingTargets(Vec<u16>);

impl MatchingTargets {
    fn build() -> Self {
        let mut t = vec![0u16; 2 * BC * M];
        for parity in 0..2u64 {
            for r in 0..BC as u64 {
                let ind_j = r / u64::from(PARAM_C);
                for m in 0..M as u64 {
                    let quad = (2 * m + parity) * (2 * m + parity);
                    let target = ((ind_j + m) % u64::from(PARAM_B)) * u64::from(PARAM_C)
                        + (quad + r) % u64::from(PARAM_C);
                    t[(parity as usize * BC + r as usize) * M + m as usize] = target as u16;
                }
            }
        }
        Self(t)
    }

    #[inline]
    fn row(&self, parity: u64, r: u64) -> &[u16] {
        let base = (parity as usize * BC + r as usize) * M;
        &self.0[base..base + M]
    }
}

fn targets() -> &'static MatchingTargets {
    static CELL: OnceLock<MatchingTargets> = OnceLock::new();
    CELL.get_or_init(MatchingTargets::build)
}

/// One decoded entry inside a match bucket.
#[derive(Debug, Clone, Copy)]
pub struct BucketEntry {
    /// Full-width sort key.
    pub y: u64,
    /// Position of the entry in its (sorted) table.
    pub pos: u64,
    /// Metadata payload, fed into Fx on a match.
    pub meta: Meta,
}

/// Reusable match scratch: a residue map over the right bucket.
#[derive(Debug)]
pub struct Matcher {
    counts: Vec<u16>,
    positions: Vec<u16>,
    dirty: Vec<u16>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    /// Fresh scratch; reuse across bucket pairs to avoid reallocation.
    #[must_use]
    pub fn new() -> Self {
        Self { counts: vec![0; BC], positions: vec![0; BC], dirty: Vec::new() }
    }

    /// Emit `(left_index, right_index)` pairs for every match between the
    /// two adjacent buckets. Right entries sharing a residue are emitted in
    /// position order, mirroring the construction the verifier re-runs.
    pub fn find_matches(
        &mut self,
        left: &[BucketEntry],
        right: &[BucketEntry],
        out: &mut Vec<(u16, u16)>,
    ) {
        out.clear();
        if left.is_empty() || right.is_empty() {
            return;
        }
        debug_assert_eq!(bucket_id(left[0].y) + 1, bucket_id(right[0].y));

        for &r in &self.dirty {
            self.counts[r as usize] = 0;
        }
        self.dirty.clear();

        let remove_r = bucket_id(right[0].y) * u64::from(PARAM_BC);
        for (i, e) in right.iter().enumerate() {
            let residue = (e.y - remove_r) as usize;
            if self.counts[residue] == 0 {
                self.positions[residue] = i as u16;
            }
            self.counts[residue] += 1;
            self.dirty.push(residue as u16);
        }

        let parity = bucket_id(left[0].y) % 2;
        let remove_l = remove_r - u64::from(PARAM_BC);
        let t = targets();
        for (i, e) in left.iter().enumerate() {
            let row = t.row(parity, e.y - remove_l);
            for &target in row {
                let count = self.counts[target as usize];
                for j in 0..count {
                    out.push((i as u16, self.positions[target as usize] + j));
                }
            }
        }
    }
}

/// Stateless single-pair test used by the verifier: does `(y_l, y_r)`
/// satisfy the bucket-adjacency and residue-target rule?
#[must_use]
pub fn is_match(y_l: u64, y_r: u64) -> bool {
    if bucket_id(y_l) + 1 != bucket_id(y_r) {
        return false;
    }
    let parity = bucket_id(y_l) % 2;
    let r = y_l % u64::from(PARAM_BC);
    let target = (y_r % u64::from(PARAM_BC)) as u16;
    targets().row(parity, r).contains(&target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(y: u64, pos: u64) -> BucketEntry {
        BucketEntry { y, pos, meta: Meta::empty() }
    }

    #[test]
    fn matcher_agrees_with_stateless_test() {
        let base = 3 * u64::from(PARAM_BC);
        let left: Vec<_> = (0..200).map(|i| entry(base + i * 71 % u64::from(PARAM_BC), i)).collect();
        let right: Vec<_> =
            (0..180).map(|i| entry(base + u64::from(PARAM_BC) + i * 53 % u64::from(PARAM_BC), i)).collect();

        let mut m = Matcher::new();
        let mut out = Vec::new();
        m.find_matches(&left, &right, &mut out);

        let mut naive = Vec::new();
        for (i, l) in left.iter().enumerate() {
            for (j, r) in right.iter().enumerate() {
                if is_match(l.y, r.y) {
                    naive.push((i as u16, j as u16));
                }
            }
        }
        let mut got = out.clone();
        got.sort_unstable();
        naive.sort_unstable();
        assert_eq!(got, naive);
    }

    #[test]
    fn non_adjacent_buckets_never_match() {
        assert!(!is_match(0, 2 * u64::from(PARAM_BC)));
        assert!(!is_match(u64::from(PARAM_BC), 0));
        assert!(!is_match(5, 7)); // same bucket
    }

    #[test]
    fn matcher_scratch_is_reusable() {
        let mut m = Matcher::new();
        let mut out = Vec::new();
        let l1 = [entry(1, 0)];
        let r1 = [entry(u64::from(PARAM_BC) + 1, 0)];
        m.find_matches(&l1, &r1, &mut out);
        let first = out.len();

        // Different parity bucket pair with the same residues.
        let l2 = [entry(u64::from(PARAM_BC) + 1, 0)];
        let r2 = [entry(2 * u64::from(PARAM_BC) + 1, 0)];
        m.find_matches(&l2, &r2, &mut out);
        m.find_matches(&l1, &r1, &mut out);
        assert_eq!(out.len(), first, "stale residue map leaked between calls");
    }
}
