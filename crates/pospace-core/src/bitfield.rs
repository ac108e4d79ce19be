//! Dense boolean index over entry positions.
//!
//! Back-propagation marks live entries here, then queries `index(i)` — the
//! rank of `i` among set bits — to renumber surviving entries contiguously.
//! Ranks are answered from a per-word prefix sum built once by
//! [`Bitfield::finalize`]; marking after finalization is rejected so the
//! prefix sum can never go stale.

use crate::error::{PosError, Result};

/// Fixed-length bit array with popcount ranks.
#[derive(Debug, Default, Clone)]
pub struct Bitfield {
    words: Vec<u64>,
    len: u64,
    /// `ranks[w]` = number of set bits in words `[0, w)`; built by `finalize`.
    ranks: Vec<u64>,
    finalized: bool,
}

impl Bitfield {
    /// All-zero bitfield over `len` positions.
    #[must_use]
    pub fn new(len: u64) -> Self {
        let mut bf = Self::default();
        bf.reset(len);
        bf
    }

    /// Number of positions tracked.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// `true` if the bitfield tracks no positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Clear and resize without releasing the allocation.
    pub fn reset(&mut self, len: u64) {
        let words = (len as usize).div_ceil(64);
        self.words.clear();
        self.words.resize(words, 0);
        self.len = len;
        self.ranks.clear();
        self.finalized = false;
    }

    /// Mark position `i`.
    pub fn set(&mut self, i: u64) -> Result<()> {
        if self.finalized {
            return Err(PosError::InvalidState("bitfield set after finalize"));
        }
        if i >= self.len {
            return Err(PosError::invalid(format!(
                "bitfield set out of range: {i} >= {}",
                self.len
            )));
        }
        self.words[(i / 64) as usize] |= 1u64 << (i % 64);
        Ok(())
    }

    /// Whether position `i` is marked.
    #[must_use]
    pub fn get(&self, i: u64) -> bool {
        if i >= self.len {
            return false;
        }
        self.words[(i / 64) as usize] >> (i % 64) & 1 == 1
    }

    /// Popcount over positions `[start, end)`.
    #[must_use]
    pub fn count(&self, start: u64, end: u64) -> u64 {
        let end = end.min(self.len);
        if start >= end {
            return 0;
        }
        let (first_w, last_w) = ((start / 64) as usize, ((end - 1) / 64) as usize);
        let lo_mask = !0u64 << (start % 64);
        let hi_mask = !0u64 >> (63 - (end - 1) % 64);
        if first_w == last_w {
            return (self.words[first_w] & lo_mask & hi_mask).count_ones() as u64;
        }
        let mut n = (self.words[first_w] & lo_mask).count_ones() as u64;
        for w in &self.words[first_w + 1..last_w] {
            n += w.count_ones() as u64;
        }
        n + (self.words[last_w] & hi_mask).count_ones() as u64
    }

    /// Build the rank accelerator. Call once marking is complete.
    pub fn finalize(&mut self) {
        let mut acc = 0u64;
        self.ranks.clear();
        self.ranks.reserve(self.words.len());
        for w in &self.words {
            self.ranks.push(acc);
            acc += w.count_ones() as u64;
        }
        self.finalized = true;
    }

    /// Rank of `i`: the number of set bits in `[0, i)`.
    ///
    /// Requires [`Bitfield::finalize`]; this is the renumbering map of
    /// back-propagation and is called once per surviving pointer.
    pub fn index(&self, i: u64) -> Result<u64> {
        if !self.finalized {
            return Err(PosError::InvalidState("bitfield index before finalize"));
        }
        if i > self.len {
            return Err(PosError::invalid(format!(
                "bitfield rank out of range: {i} > {}",
                self.len
            )));
        }
        let w = (i / 64) as usize;
        if w >= self.words.len() {
            // i == len on a word boundary: the total popcount.
            return Ok(self.ranks.last().copied().unwrap_or(0)
                + self.words.last().map_or(0, |w| w.count_ones() as u64));
        }
        let below = (self.words[w] & !(!0u64 << (i % 64))).count_ones() as u64;
        Ok(self.ranks[w] + below)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_matches_naive_count() {
        let mut bf = Bitfield::new(1000);
        for i in (0..1000).filter(|i| i % 3 == 0 || i % 7 == 0) {
            bf.set(i).unwrap();
        }
        bf.finalize();
        for i in 0..=1000 {
            assert_eq!(bf.index(i).unwrap(), bf.count(0, i), "rank mismatch at {i}");
        }
    }

    #[test]
    fn count_handles_partial_words() {
        let mut bf = Bitfield::new(200);
        for i in 60..70 {
            bf.set(i).unwrap();
        }
        assert_eq!(bf.count(0, 200), 10);
        assert_eq!(bf.count(61, 69), 8);
        assert_eq!(bf.count(70, 200), 0);
    }

    #[test]
    fn reset_reuses_storage_and_clears_marks() {
        let mut bf = Bitfield::new(128);
        bf.set(5).unwrap();
        bf.finalize();
        bf.reset(64);
        assert!(!bf.get(5));
        assert!(bf.set(5).is_ok());
    }

    #[test]
    fn set_after_finalize_is_rejected() {
        let mut bf = Bitfield::new(8);
        bf.finalize();
        assert!(matches!(bf.set(1), Err(PosError::InvalidState(_))));
    }
}
