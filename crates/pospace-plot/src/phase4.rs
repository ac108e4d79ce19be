//! Phase 4 — checkpoint tables.
//!
//! Table 7 is served by position through fixed parks of raw `(k+1)`-bit
//! entries (P7), and by `f7` through three checkpoint tables: C1 holds
//! every 10 000th `f7`, C2 every 10 000th C1 entry, and C3 one delta park
//! per C1 interval so a prover can recover every `f7` in between.

use pospace_core::bits::{byte_align, extract_u64, put_bits};
use pospace_core::encoding::encode_c3_park;
use pospace_core::entries::phase2_entry_size;
use pospace_core::params::{
    pos_size_bits, y_size_bits, CHECKPOINT_1_INTERVAL, CHECKPOINT_2_INTERVAL, ENTRIES_PER_PARK,
};
use pospace_core::{PosError, Result};
use tracing::info;

use crate::disk::{BufferedDisk, Disk};
use crate::phase3::Phase3Output;
use crate::sort_manager::SortedCursor;

/// Byte size of one P7 park.
#[must_use]
pub fn p7_park_size_bytes(k: u8) -> usize {
    byte_align(u64::from(pos_size_bits(k)) * u64::from(ENTRIES_PER_PARK))
}

/// Byte size of one C1/C2 checkpoint entry.
#[must_use]
pub fn checkpoint_entry_size_bytes(k: u8) -> usize {
    byte_align(u64::from(k))
}

/// Final header pointers: offsets of tables 1..7, C1, C2, C3, plus the
/// total artifact size.
#[derive(Debug, Clone, Copy)]
pub struct FinalPointers {
    /// Offsets for header slots 1..=10.
    pub pointers: [u64; 10],
    /// One past the last artifact byte.
    pub end: u64,
}

/// Write P7 and the checkpoint tables; returns the header pointer block.
pub fn run_phase4(k: u8, out: &mut BufferedDisk, p3: Phase3Output) -> Result<FinalPointers> {
    let started = std::time::Instant::now();
    let Phase3Output { stream_pointers, end_offset, mut p7_map, table7, n7 } = p3;
    if p7_map.entry_count() != n7 {
        return Err(PosError::Unreachable("table-7 map and f7 column disagree"));
    }

    let pbits = pos_size_bits(k);
    let f7_bits = y_size_bits(k, 7);
    let t7_es = phase2_entry_size(k, 7);
    let p7_park_size = p7_park_size_bytes(k);

    let mut write_offset = end_offset;
    let p7_start = write_offset;

    // Single pass in f7 order: P7 parks stream out as they fill, while the
    // checkpoint material accumulates (it is tiny next to the parks).
    let mut c1_f7s: Vec<u64> = Vec::new();
    let mut c3_parks: Vec<u8> = Vec::new();
    let mut interval_deltas: Vec<u64> = Vec::new();
    let mut prev_f7 = 0u64;

    let mut park = vec![0u8; p7_park_size];
    let mut park_fill = 0u32;
    let mut park_used = false;

    let mut cursor = SortedCursor::new(&mut p7_map);
    for idx in 0..n7 {
        let map_entry = cursor.next_entry()?;
        let sort_key = extract_u64(map_entry, 0, pbits)?;
        let park_pos = extract_u64(map_entry, u64::from(pbits), pbits)?
            .checked_sub(1)
            .ok_or(PosError::Unreachable("unbiased P7 position underflowed"))?;
        if sort_key != idx {
            return Err(PosError::Unreachable("table-7 map not keyed by sort order"));
        }
        let t7_off = idx as usize * t7_es;
        let f7 = extract_u64(&table7[t7_off..t7_off + t7_es], 0, f7_bits)?;

        // P7: raw bit-packed positions.
        put_bits(&mut park, u64::from(park_fill) * u64::from(pbits), park_pos, pbits)?;
        park_fill += 1;
        park_used = true;
        if park_fill == ENTRIES_PER_PARK {
            out.write(write_offset, &park)?;
            write_offset += p7_park_size as u64;
            park.fill(0);
            park_fill = 0;
            park_used = false;
        }

        // Checkpoints: a C1 entry opens each interval, deltas fill it.
        if idx % u64::from(CHECKPOINT_1_INTERVAL) == 0 {
            if idx != 0 {
                encode_c3_park(&interval_deltas, &mut c3_parks)?;
                interval_deltas.clear();
            }
            c1_f7s.push(f7);
        } else {
            if f7 < prev_f7 {
                return Err(PosError::Unreachable("f7 column not sorted"));
            }
            interval_deltas.push(f7 - prev_f7);
        }
        prev_f7 = f7;
    }
    if park_used {
        out.write(write_offset, &park)?;
        write_offset += p7_park_size as u64;
    }
    encode_c3_park(&interval_deltas, &mut c3_parks)?;

    // C1, then C2, then the C3 parks.
    let cp_size = checkpoint_entry_size_bytes(k);
    let c1_start = write_offset;
    let mut cp_buf = vec![0u8; cp_size];
    for &f7 in &c1_f7s {
        cp_buf.fill(0);
        put_bits(&mut cp_buf, 0, f7, f7_bits)?;
        out.write(write_offset, &cp_buf)?;
        write_offset += cp_size as u64;
    }

    let c2_start = write_offset;
    for &f7 in c1_f7s.iter().step_by(CHECKPOINT_2_INTERVAL as usize) {
        cp_buf.fill(0);
        put_bits(&mut cp_buf, 0, f7, f7_bits)?;
        out.write(write_offset, &cp_buf)?;
        write_offset += cp_size as u64;
    }

    let c3_start = write_offset;
    out.write(write_offset, &c3_parks)?;
    write_offset += c3_parks.len() as u64;

    info!(
        p7_parks = n7.div_ceil(u64::from(ENTRIES_PER_PARK)),
        c1_entries = c1_f7s.len(),
        elapsed = ?started.elapsed(),
        "checkpoint tables written"
    );

    let mut pointers = [0u64; 10];
    pointers[..6].copy_from_slice(&stream_pointers);
    pointers[6] = p7_start;
    pointers[7] = c1_start;
    pointers[8] = c2_start;
    pointers[9] = c3_start;
    Ok(FinalPointers { pointers, end: write_offset })
}
