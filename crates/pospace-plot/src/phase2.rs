//! Phase 2 — back-propagation.
//!
//! Walking from table 7 down, mark every parent position a live entry
//! references, then rewrite each table keeping only its live entries with
//! pointers renumbered to the parents' live ranks. Table 7 is fully live.
//! Table 1 is never rewritten: its bitfield travels to phase 3, where a
//! filtered disk view skips the dead entries in place.

use pospace_core::entries::{
    decode_p1, encode_p2, phase1_entry_size, phase2_entry_size, MAX_ENTRY_BYTES,
};
use pospace_core::{Bitfield, PosError, Result};
use tracing::info;

use crate::phase1::Phase1Output;

/// Compacted tables and the table-1 liveness index.
#[derive(Debug)]
pub struct Phase2Output {
    /// Raw phase-1 table 1 (y-sorted, never compacted).
    pub table1: Vec<u8>,
    /// Liveness over table 1, finalized; rank = phase-3 position.
    pub bitfield1: Bitfield,
    /// `tables[t]` for `t` in 2..=7: phase-2 format, live entries only.
    pub tables: Vec<Vec<u8>>,
    /// Live entry counts; `table_sizes[1]` counts table 1's live entries.
    pub table_sizes: [u64; 8],
}

/// Run back-propagation over the phase-1 tables.
pub fn run_phase2(k: u8, p1: Phase1Output) -> Result<Phase2Output> {
    let started = std::time::Instant::now();
    let Phase1Output { mut tables, table_sizes: p1_sizes } = p1;

    let mut out_tables: Vec<Vec<u8>> = vec![Vec::new(); 8];
    let mut table_sizes = [0u64; 8];
    table_sizes[7] = p1_sizes[7];

    // `current` marks liveness of the table being rewritten (empty for
    // table 7, which is fully live); `next` collects the parents' marks.
    let mut current = Bitfield::new(0);
    let mut next = Bitfield::new(0);
    let mut scratch = [0u8; MAX_ENTRY_BYTES];

    for table in (2u8..=7).rev() {
        let prev = table - 1;
        let src_size = phase1_entry_size(k, table);
        let src = std::mem::take(&mut tables[table as usize]);
        if src.len() as u64 % src_size as u64 != 0 {
            return Err(PosError::Unreachable("phase-1 table length misaligned"));
        }

        // Pass 1: mark the parents referenced by live entries.
        next.reset(p1_sizes[prev as usize]);
        for (idx, chunk) in src.chunks_exact(src_size).enumerate() {
            if table != 7 && !current.get(idx as u64) {
                continue;
            }
            let e = decode_p1(k, table, chunk, false)?;
            next.set(e.pos_l)?;
            next.set(e.pos_r)?;
        }
        next.finalize();

        // Pass 2: compact and renumber pointers to live ranks.
        let dst_size = phase2_entry_size(k, table);
        let mut dst = Vec::with_capacity(dst_size * src.len() / src_size);
        let mut live = 0u64;
        for (idx, chunk) in src.chunks_exact(src_size).enumerate() {
            if table != 7 && !current.get(idx as u64) {
                continue;
            }
            let e = decode_p1(k, table, chunk, false)?;
            scratch[..dst_size].fill(0);
            encode_p2(
                k,
                table,
                e.y,
                next.index(e.pos_l)?,
                next.index(e.pos_r)?,
                &mut scratch[..dst_size],
            )?;
            dst.extend_from_slice(&scratch[..dst_size]);
            live += 1;
        }
        out_tables[table as usize] = dst;
        if table != 7 {
            table_sizes[table as usize] = live;
        }
        drop(src);

        std::mem::swap(&mut current, &mut next);
    }

    // `current` now marks table 1's live entries.
    table_sizes[1] = current.count(0, current.len());
    info!(
        elapsed = ?started.elapsed(),
        live_t1 = table_sizes[1],
        live_t6 = table_sizes[6],
        "back-propagation complete"
    );

    Ok(Phase2Output {
        table1: std::mem::take(&mut tables[1]),
        bitfield1: current,
        tables: out_tables,
        table_sizes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pospace_core::entries::decode_p2;
    use pospace_core::params::ID_LEN;

    use crate::phase1::run_phase1;

    #[test]
    fn pruning_preserves_reachability_and_ranks() {
        let id = [11u8; ID_LEN];
        let k = 17u8;
        let p1 = run_phase1(k, &id, 4 << 20, 16, 4, 4000).unwrap();
        let p1_sizes = p1.table_sizes;
        let p2 = run_phase2(k, p1).unwrap();

        // Table 7 survives whole.
        assert_eq!(p2.table_sizes[7], p1_sizes[7]);
        // Pruning only ever removes entries.
        for t in 1..7 {
            assert!(p2.table_sizes[t] <= p1_sizes[t], "table {t} grew");
            assert!(p2.table_sizes[t] > 0, "table {t} emptied");
        }

        // Every table-7 pointer must land inside the compacted table 6.
        let es7 = phase2_entry_size(k, 7);
        for chunk in p2.tables[7].chunks_exact(es7) {
            let (_, pos_l, pos_r) = decode_p2(k, 7, chunk).unwrap();
            assert!(pos_l < p2.table_sizes[6]);
            assert!(pos_r < p2.table_sizes[6]);
        }

        // Bitfield popcount equals the live count reported for table 1.
        assert_eq!(p2.bitfield1.count(0, p2.bitfield1.len()), p2.table_sizes[1]);
        assert_eq!(p2.bitfield1.len(), p1_sizes[1]);
    }
}
