//! Phase 3 — compression.
//!
//! For each table pair `(t, t+1)`, the dependent table's pointers are
//! translated to the positions its parents will occupy in table `t`'s
//! park stream, folded into line points, sorted by line point and emitted
//! as parks. The resulting rank of every entry, keyed by its y-order sort
//! key, becomes the translation map for the next pair.
//!
//! Translation is a single streaming pass: the dependent table is sorted by
//! `pos_L`, and a ring of the most recent [`CACHED_POSITIONS`] new
//! positions covers both pointers of every entry, because a match never
//! spans more positions than that.

use pospace_core::bits::{extract_u64, put_bits, put_bits_u128};
use pospace_core::encoding::{encode_park, line_point_size_bits, park_size_bytes, square_to_line_point};
use pospace_core::entries::{
    decode_p2, phase1_entry_size, phase2_entry_size, phase3_lp_entry_size, phase3_map_entry_size,
    phase3_pos_entry_size, MAX_ENTRY_BYTES,
};
use pospace_core::params::{pos_size_bits, y_size_bits, CACHED_POSITIONS, ENTRIES_PER_PARK};
use pospace_core::{PosError, Result};
use tracing::info;

use crate::disk::{BufferedDisk, Disk, FilteredDisk};
use crate::phase2::Phase2Output;
use crate::sort_manager::{SortManager, SortedCursor};

/// Park streams written; inputs phase 4 still needs.
#[derive(Debug)]
pub struct Phase3Output {
    /// Start offsets of the park streams for tables 1..6.
    pub stream_pointers: [u64; 6],
    /// First free offset after stream 6 (where P7 begins).
    pub end_offset: u64,
    /// `(sort_key, park_position + 1)` for table 7, sorted by sort key.
    pub p7_map: SortManager,
    /// Phase-2 table 7, still indexed by sort key, for its `f7` column.
    pub table7: Vec<u8>,
    /// Table 7 entry count.
    pub n7: u64,
}

/// Source of the old-position → new-position map consumed in order.
enum MapSource {
    /// Table 1: live entries through the filtered disk; the "new position"
    /// of a live entry is its `x` preimage.
    Table1 { disk: FilteredDisk, entry_size: u64, offset: u64, remaining: u64 },
    /// Tables 2..6: `(sort_key, new_pos + 1)` records from the previous
    /// iteration, drained in sort-key order.
    Sorted { sm: SortManager, position: u64, remaining: u64 },
}

impl MapSource {
    fn next(&mut self, k: u8) -> Result<u64> {
        match self {
            Self::Table1 { disk, entry_size, offset, remaining } => {
                if *remaining == 0 {
                    return Err(PosError::invalid("translation map exhausted"));
                }
                let bytes = disk.read(*offset, *entry_size)?;
                let x = extract_u64(bytes, u64::from(y_size_bits(k, 1)), u32::from(k))?;
                *offset += *entry_size;
                *remaining -= 1;
                Ok(x)
            }
            Self::Sorted { sm, position, remaining } => {
                if *remaining == 0 {
                    return Err(PosError::invalid("translation map exhausted"));
                }
                let es = sm.entry_size() as u64;
                let pbits = pos_size_bits(k);
                let e = sm.read_entry(*position)?;
                let new_pos = extract_u64(e, u64::from(pbits), pbits)?;
                *position += es;
                *remaining -= 1;
                // Undo the +1 sentinel bias.
                new_pos
                    .checked_sub(1)
                    .ok_or(PosError::Unreachable("unbiased map position underflowed"))
            }
        }
    }
}

/// Ring of the most recent new positions, indexed by old position.
struct PosWindow {
    buf: Vec<u64>,
    next_old: u64,
}

impl PosWindow {
    fn new() -> Self {
        Self { buf: vec![0; CACHED_POSITIONS as usize], next_old: 0 }
    }

    fn fill_to(&mut self, old_pos: u64, src: &mut MapSource, k: u8) -> Result<()> {
        while self.next_old <= old_pos {
            self.buf[(self.next_old % CACHED_POSITIONS) as usize] = src.next(k)?;
            self.next_old += 1;
        }
        Ok(())
    }

    fn get(&self, old_pos: u64) -> Result<u64> {
        if old_pos >= self.next_old || old_pos + CACHED_POSITIONS < self.next_old {
            return Err(PosError::invalid(format!(
                "pointer {old_pos} outside the translation window ending at {}",
                self.next_old
            )));
        }
        Ok(self.buf[(old_pos % CACHED_POSITIONS) as usize])
    }
}

/// Rewrite tables 1..6 as park streams, starting at `header_size`.
#[allow(clippy::too_many_arguments)]
pub fn run_phase3(
    k: u8,
    out: &mut BufferedDisk,
    p2: Phase2Output,
    header_size: u64,
    memory_size: u64,
    num_buckets: u32,
    log_num_buckets: u32,
    stripe_size: u64,
) -> Result<Phase3Output> {
    let Phase2Output { table1, bitfield1, mut tables, table_sizes } = p2;
    let pbits = pos_size_bits(k);
    let lp_bits = line_point_size_bits(k);

    let mut map_src = MapSource::Table1 {
        entry_size: phase1_entry_size(k, 1) as u64,
        remaining: table_sizes[1],
        offset: 0,
        disk: FilteredDisk::new(
            BufferedDisk::new(table1),
            bitfield1,
            phase1_entry_size(k, 1) as u64,
        )?,
    };

    let mut stream_pointers = [0u64; 6];
    let mut write_offset = header_size;
    let mut table7: Vec<u8> = Vec::new();
    let mut scratch = [0u8; MAX_ENTRY_BYTES];
    let mut p7_map: Option<SortManager> = None;

    for table in 1u8..=6 {
        let started = std::time::Instant::now();
        let r_table = table + 1;
        let n_r = table_sizes[r_table as usize];
        if n_r == 0 {
            return Err(PosError::invalid(format!("table {r_table} has no live entries")));
        }

        // Dependent entries keyed by pos_L for the translation pass.
        let pos_es = phase3_pos_entry_size(k);
        let mut sm_pos =
            SortManager::new(memory_size, num_buckets, log_num_buckets, pos_es, 0, stripe_size);
        {
            let src = std::mem::take(&mut tables[r_table as usize]);
            let src_es = phase2_entry_size(k, r_table);
            for (sort_key, chunk) in src.chunks_exact(src_es).enumerate() {
                let (_, pos_l, pos_r) = decode_p2(k, r_table, chunk)?;
                scratch[..pos_es].fill(0);
                put_bits(&mut scratch, 0, pos_l, pbits)?;
                put_bits(&mut scratch, u64::from(pbits), pos_r, pbits)?;
                put_bits(&mut scratch, 2 * u64::from(pbits), sort_key as u64, pbits)?;
                sm_pos.add(&scratch[..pos_es])?;
            }
            if r_table == 7 {
                // Phase 4 still needs the f7 column.
                table7 = src;
            }
        }

        // Translate both pointers and fold them into a line point.
        let lp_es = phase3_lp_entry_size(k);
        let mut sm_lp =
            SortManager::new(memory_size, num_buckets, log_num_buckets, lp_es, 0, stripe_size);
        {
            let mut window = PosWindow::new();
            let mut cursor = SortedCursor::new(&mut sm_pos);
            for _ in 0..n_r {
                let e = cursor.next_entry()?;
                let pos_l = extract_u64(e, 0, pbits)?;
                let pos_r = extract_u64(e, u64::from(pbits), pbits)?;
                let sort_key = extract_u64(e, 2 * u64::from(pbits), pbits)?;
                window.fill_to(pos_r, &mut map_src, k)?;
                let lp = square_to_line_point(window.get(pos_l)?, window.get(pos_r)?);
                scratch[..lp_es].fill(0);
                put_bits_u128(&mut scratch, 0, lp, lp_bits)?;
                put_bits(&mut scratch, u64::from(lp_bits), sort_key, pbits)?;
                sm_lp.add(&scratch[..lp_es])?;
            }
        }
        drop(sm_pos);

        // Emit parks in line-point order; record every entry's new rank.
        stream_pointers[table as usize - 1] = write_offset;
        let map_es = phase3_map_entry_size(k);
        let mut sm_map =
            SortManager::new(memory_size, num_buckets, log_num_buckets, map_es, 0, stripe_size);
        let park_size = park_size_bytes(k, table);
        {
            let mut park_lps: Vec<u128> = Vec::with_capacity(ENTRIES_PER_PARK as usize);
            let mut park_bytes: Vec<u8> = Vec::with_capacity(park_size);
            let mut cursor = SortedCursor::new(&mut sm_lp);
            for rank in 0..n_r {
                let e = cursor.next_entry()?;
                let lp = pospace_core::bits::extract_u128(e, 0, lp_bits)?;
                let sort_key = extract_u64(e, u64::from(lp_bits), pbits)?;

                park_lps.push(lp);
                if park_lps.len() == ENTRIES_PER_PARK as usize {
                    park_bytes.clear();
                    encode_park(k, table, &park_lps, &mut park_bytes)?;
                    out.write(write_offset, &park_bytes)?;
                    write_offset += park_size as u64;
                    park_lps.clear();
                }

                scratch[..map_es].fill(0);
                put_bits(&mut scratch, 0, sort_key, pbits)?;
                put_bits(&mut scratch, u64::from(pbits), rank + 1, pbits)?;
                sm_map.add(&scratch[..map_es])?;
            }
            if !park_lps.is_empty() {
                park_bytes.clear();
                encode_park(k, table, &park_lps, &mut park_bytes)?;
                out.write(write_offset, &park_bytes)?;
                write_offset += park_size as u64;
            }
        }
        drop(sm_lp);
        info!(
            table,
            entries = n_r,
            parks = n_r.div_ceil(u64::from(ENTRIES_PER_PARK)),
            elapsed = ?started.elapsed(),
            "park stream written"
        );

        if table == 6 {
            p7_map = Some(sm_map);
        } else {
            map_src = MapSource::Sorted { sm: sm_map, position: 0, remaining: n_r };
        }
    }

    Ok(Phase3Output {
        stream_pointers,
        end_offset: write_offset,
        p7_map: p7_map.ok_or(PosError::Unreachable("table-7 map missing after phase 3"))?,
        table7,
        n7: table_sizes[7],
    })
}
