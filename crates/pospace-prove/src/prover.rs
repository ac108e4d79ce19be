//! Plot-backed prover.
//!
//! Construction parses the header and caches the (tiny) C2 table; every
//! query then costs a few checkpoint reads, one C3 park scan and six
//! line-point park walks per proof.

use pospace_core::bits::{byte_align, extract_u64, BitWriter};
use pospace_core::encoding::{
    c3_park_size_bytes, decode_c3_park, line_point_to_square, park_size_bytes, read_park_entry,
};
use pospace_core::params::{
    pos_size_bits, y_size_bits, CHECKPOINT_1_INTERVAL, CHECKPOINT_2_INTERVAL, ENTRIES_PER_PARK,
    FORMAT_DESCRIPTION, ID_LEN, K_MAX, K_MIN, NUM_TABLE_POINTERS, PLOT_MAGIC,
};
use pospace_core::{PosError, Result};
use tracing::debug;

/// A parsed plot, ready to answer challenges.
#[derive(Debug)]
pub struct Prover<'a> {
    plot: &'a [u8],
    k: u8,
    id: [u8; ID_LEN],
    /// Offsets of tables 1..7, C1, C2, C3.
    pointers: [u64; NUM_TABLE_POINTERS],
    /// C2 checkpoints, cached at construction.
    c2: Vec<u64>,
}

impl<'a> Prover<'a> {
    /// Parse `plot` and validate its header.
    pub fn new(plot: &'a [u8]) -> Result<Self> {
        let header_err = || PosError::invalid("malformed plot header");
        if plot.len() < PLOT_MAGIC.len() + ID_LEN + 3 {
            return Err(header_err());
        }
        if &plot[..PLOT_MAGIC.len()] != PLOT_MAGIC {
            return Err(PosError::invalid("plot magic mismatch"));
        }
        let mut off = PLOT_MAGIC.len();
        let mut id = [0u8; ID_LEN];
        id.copy_from_slice(&plot[off..off + ID_LEN]);
        off += ID_LEN;
        let k = plot[off];
        off += 1;
        if !(K_MIN..=K_MAX).contains(&k) {
            return Err(PosError::invalid(format!("plot k={k} out of range")));
        }
        let desc_len = u16::from_be_bytes([plot[off], plot[off + 1]]) as usize;
        off += 2;
        if desc_len != FORMAT_DESCRIPTION.len()
            || plot.len() < off + desc_len + NUM_TABLE_POINTERS * 8
            || &plot[off..off + desc_len] != FORMAT_DESCRIPTION.as_bytes()
        {
            return Err(PosError::invalid("unsupported plot format"));
        }
        off += desc_len;

        let mut pointers = [0u64; NUM_TABLE_POINTERS];
        for (i, p) in pointers.iter_mut().enumerate() {
            let s = off + i * 8;
            *p = u64::from_be_bytes(plot[s..s + 8].try_into().map_err(|_| header_err())?);
        }
        let header_size = (off + NUM_TABLE_POINTERS * 8) as u64;
        // Pointers must climb strictly through the artifact.
        let mut last = header_size - 1;
        for &p in &pointers {
            if p <= last || p > plot.len() as u64 {
                return Err(PosError::invalid("plot table pointers not monotonic"));
            }
            last = p;
        }

        let mut prover = Self { plot, k, id, pointers, c2: Vec::new() };
        prover.c2 = prover.read_checkpoint_region(8)?;
        Ok(prover)
    }

    /// The plot's space parameter.
    #[must_use]
    pub fn k(&self) -> u8 {
        self.k
    }

    /// The plot's seed.
    #[must_use]
    pub fn id(&self) -> &[u8; ID_LEN] {
        &self.id
    }

    /// All qualities whose `f7` equals the challenge's top `k` bits.
    pub fn get_qualities_for_challenge(&self, challenge: &[u8; 32]) -> Result<Vec<[u8; 32]>> {
        let f7 = extract_u64(challenge, 0, u32::from(self.k))?;
        let positions = self.find_f7_positions(f7)?;
        debug!(f7, hits = positions.len(), "challenge looked up");
        positions
            .into_iter()
            .map(|p7| {
                let (x_max, x_min) = self.quality_pair(p7, challenge)?;
                crate::quality_hash(self.k, challenge, x_min, x_max)
            })
            .collect()
    }

    /// Full proof for the `index`-th quality of this challenge: all 64
    /// preimages in DFS order (min subtree first), `k` bits each.
    pub fn get_full_proof(&self, challenge: &[u8; 32], index: usize) -> Result<Vec<u8>> {
        let f7 = extract_u64(challenge, 0, u32::from(self.k))?;
        let positions = self.find_f7_positions(f7)?;
        let p7 = *positions
            .get(index)
            .ok_or_else(|| PosError::invalid("no proof at this quality index"))?;

        let mut xs = Vec::with_capacity(64);
        self.gather_inputs(self.read_p7_entry(p7)?, 6, &mut xs)?;
        if xs.len() != 64 {
            return Err(PosError::Unreachable("proof tree did not yield 64 leaves"));
        }
        let mut w = BitWriter::with_capacity(byte_align(64 * u64::from(self.k)));
        for x in xs {
            w.push(x, u32::from(self.k))?;
        }
        Ok(w.into_bytes())
    }

    /* ------------------------------ plot reads ------------------------------ */

    /// Bounds-checked slice of `[start, start+len)`, also capped by the next
    /// region pointer so a corrupt pointer cannot bleed across regions.
    fn region(&self, slot: usize, start: u64, len: u64) -> Result<&'a [u8]> {
        let base = self.pointers[slot];
        let end_cap = if slot + 1 < NUM_TABLE_POINTERS {
            self.pointers[slot + 1]
        } else {
            self.plot.len() as u64
        };
        let begin = base + start;
        if begin + len > end_cap {
            return Err(PosError::invalid("plot read out of region"));
        }
        Ok(&self.plot[begin as usize..(begin + len) as usize])
    }

    /// Line point at `position` of `table`'s park stream (tables 1..6).
    fn read_line_point(&self, table: u8, position: u64) -> Result<u128> {
        let park_size = park_size_bytes(self.k, table) as u64;
        let park = position / u64::from(ENTRIES_PER_PARK);
        let bytes = self.region(table as usize - 1, park * park_size, park_size)?;
        read_park_entry(self.k, table, bytes, (position % u64::from(ENTRIES_PER_PARK)) as u32)
    }

    /// Table-6 park position stored in P7 for table-7 entry `position`.
    fn read_p7_entry(&self, position: u64) -> Result<u64> {
        let pbits = pos_size_bits(self.k);
        let park_size = byte_align(u64::from(pbits) * u64::from(ENTRIES_PER_PARK)) as u64;
        let park = position / u64::from(ENTRIES_PER_PARK);
        let bytes = self.region(6, park * park_size, park_size)?;
        extract_u64(bytes, (position % u64::from(ENTRIES_PER_PARK)) * u64::from(pbits), pbits)
    }

    /// All byte-aligned checkpoints of region `slot` (C1 or C2).
    fn read_checkpoint_region(&self, slot: usize) -> Result<Vec<u64>> {
        let entry = byte_align(u64::from(self.k)) as u64;
        let next = if slot + 1 < NUM_TABLE_POINTERS {
            self.pointers[slot + 1]
        } else {
            self.plot.len() as u64
        };
        let count = (next - self.pointers[slot]) / entry;
        (0..count)
            .map(|i| {
                let bytes = self.region(slot, i * entry, entry)?;
                extract_u64(bytes, 0, y_size_bits(self.k, 7))
            })
            .collect()
    }

    /// C1 checkpoint `index`.
    fn read_c1(&self, index: u64) -> Result<u64> {
        let entry = byte_align(u64::from(self.k)) as u64;
        let bytes = self.region(7, index * entry, entry)?;
        extract_u64(bytes, 0, y_size_bits(self.k, 7))
    }

    fn c1_count(&self) -> u64 {
        let entry = byte_align(u64::from(self.k)) as u64;
        (self.pointers[8] - self.pointers[7]) / entry
    }

    /// Table-7 positions whose `f7` equals `target`.
    fn find_f7_positions(&self, target: u64) -> Result<Vec<u64>> {
        let c1_count = self.c1_count();
        if c1_count == 0 {
            return Ok(Vec::new());
        }

        // C2 narrows the C1 range, then binary search for the last C1
        // checkpoint that does not exceed the target.
        let c2_idx = match self.c2.partition_point(|&v| v <= target) {
            0 => return Ok(Vec::new()), // target below the first checkpoint's run start
            n => (n - 1) as u64,
        };
        let (mut lo, mut hi) = (
            c2_idx * u64::from(CHECKPOINT_2_INTERVAL),
            ((c2_idx + 1) * u64::from(CHECKPOINT_2_INTERVAL)).min(c1_count - 1),
        );
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.read_c1(mid)? <= target {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        if self.read_c1(lo)? > target {
            return Ok(Vec::new());
        }

        // Runs of the target may start in earlier parks when checkpoints
        // themselves equal the target.
        let mut first = lo;
        while first > 0 && self.read_c1(first)? == target {
            first -= 1;
        }

        let mut positions = Vec::new();
        for c1_idx in first..=lo {
            let base_f7 = self.read_c1(c1_idx)?;
            let park_size = c3_park_size_bytes() as u64;
            let deltas = decode_c3_park(self.region(9, c1_idx * park_size, park_size)?)?;
            let mut f7 = base_f7;
            let base_pos = c1_idx * u64::from(CHECKPOINT_1_INTERVAL);
            if f7 == target {
                positions.push(base_pos);
            }
            for (i, &d) in deltas.iter().enumerate() {
                f7 += d;
                if f7 == target {
                    positions.push(base_pos + 1 + i as u64);
                } else if f7 > target {
                    break;
                }
            }
        }
        Ok(positions)
    }

    /* ----------------------------- proof walks ------------------------------ */

    /// Follow the quality path for `challenge` from table-7 entry `p7`;
    /// returns the table-1 pair as `(max, min)`.
    fn quality_pair(&self, p7: u64, challenge: &[u8; 32]) -> Result<(u64, u64)> {
        let selector = challenge[31] & 0x1f;
        let mut position = self.read_p7_entry(p7)?;
        for table in (2u8..=6).rev() {
            let (max, min) = line_point_to_square(self.read_line_point(table, position)?);
            position = if (selector >> (table - 2)) & 1 == 1 { max } else { min };
        }
        Ok(line_point_to_square(self.read_line_point(1, position)?))
    }

    /// DFS over the stored subtree: min child first, so leaves come out in
    /// the plot's canonical proof order.
    fn gather_inputs(&self, position: u64, table: u8, out: &mut Vec<u64>) -> Result<()> {
        let (max, min) = line_point_to_square(self.read_line_point(table, position)?);
        if table == 1 {
            out.push(min);
            out.push(max);
            return Ok(());
        }
        self.gather_inputs(min, table - 1, out)?;
        self.gather_inputs(max, table - 1, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_is_not_a_plot() {
        assert!(Prover::new(&[]).is_err());
        assert!(Prover::new(&[0u8; 200]).is_err());
        let mut near = Vec::new();
        near.extend_from_slice(PLOT_MAGIC);
        near.extend_from_slice(&[0u8; 200]);
        assert!(Prover::new(&near).is_err());
    }
}
