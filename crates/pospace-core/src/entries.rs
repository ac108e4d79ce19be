//! Bit-packed entry codecs and per-phase entry size tables.
//!
//! Field order is fixed across all layouts: `y, pos_L, pos_R, sort_key,
//! metadata`, with widths from [`crate::params`]. Entries are byte-aligned
//! per entry (not per field) so sort buffers can treat them as fixed-width
//! records.
//!
//! Layouts:
//! - phase 1, table 1: `y(k+6) ‖ x(k)`
//! - phase 1, tables 2–6: `y(k+6) ‖ pos_L(k+1) ‖ pos_R(k+1) ‖ meta`
//! - phase 1, table 7: `y(k) ‖ pos_L(k+1) ‖ pos_R(k+1)`
//! - phase 2, tables 2–6: `pos_L(k+1) ‖ pos_R(k+1)` (sort key is implicit:
//!   the entry's position in the compacted stream)
//! - phase 2, table 7: `y(k) ‖ pos_L(k+1) ‖ pos_R(k+1)`
//! - phase 3 sorts: `pos_L ‖ pos_R ‖ sort_key`, `line_point(2k+3) ‖
//!   sort_key` and `sort_key ‖ new_pos+1` (see `pospace-plot::phase3` for
//!   the +1 sentinel bias)

use crate::bits::{byte_align, extract_u64, put_bits, Meta};
use crate::error::Result;
use crate::params::{meta_size_bits, pos_size_bits, y_size_bits};

/// Largest packed entry across all layouts and `k ≤ K_MAX`.
pub const MAX_ENTRY_BYTES: usize = 64;

/// Bytes per phase-1 entry of `table`.
#[must_use]
pub fn phase1_entry_size(k: u8, table: u8) -> usize {
    let bits = match table {
        1 => y_size_bits(k, 1) + u32::from(k),
        7 => y_size_bits(k, 7) + 2 * pos_size_bits(k),
        t => y_size_bits(k, t) + 2 * pos_size_bits(k) + meta_size_bits(k, t),
    };
    byte_align(u64::from(bits))
}

/// Bytes per phase-2 (compacted) entry of `table`.
#[must_use]
pub fn phase2_entry_size(k: u8, table: u8) -> usize {
    let bits = match table {
        7 => y_size_bits(k, 7) + 2 * pos_size_bits(k),
        _ => 2 * pos_size_bits(k),
    };
    byte_align(u64::from(bits))
}

/// Bytes per phase-3 `(pos_L, pos_R, sort_key)` record.
#[must_use]
pub fn phase3_pos_entry_size(k: u8) -> usize {
    byte_align(u64::from(3 * pos_size_bits(k)))
}

/// Bytes per phase-3 `(line_point, sort_key)` record.
#[must_use]
pub fn phase3_lp_entry_size(k: u8) -> usize {
    byte_align(u64::from(crate::encoding::line_point_size_bits(k) + pos_size_bits(k)))
}

/// Bytes per phase-3 `(sort_key, new_pos)` record.
#[must_use]
pub fn phase3_map_entry_size(k: u8) -> usize {
    byte_align(u64::from(2 * pos_size_bits(k)))
}

/// The widest phase-1 entry across tables; sizes the plotter's memory floor.
#[must_use]
pub fn max_phase1_entry_size(k: u8) -> usize {
    (1..=7).map(|t| phase1_entry_size(k, t)).max().unwrap_or(0)
}

/* --------------------------------- Codecs ---------------------------------- */

/// A decoded forward-propagation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct P1Entry {
    /// Sort key; `k+6` bits (`k` for table 7).
    pub y: u64,
    /// Left parent position in the previous table (absent for table 1).
    pub pos_l: u64,
    /// Right parent position in the previous table (absent for table 1).
    pub pos_r: u64,
    /// Collated metadata carried into the next table's hash.
    pub meta: Meta,
}

/// Pack a phase-1 entry into `out`; returns the entry size in bytes.
///
/// `out` must be zeroed and at least `phase1_entry_size` long.
pub fn encode_p1(k: u8, table: u8, e: &P1Entry, out: &mut [u8]) -> Result<usize> {
    let ybits = y_size_bits(k, table);
    let mut at = u64::from(ybits);
    put_bits(out, 0, e.y, ybits)?;
    if table != 1 {
        let pbits = pos_size_bits(k);
        put_bits(out, at, e.pos_l, pbits)?;
        put_bits(out, at + u64::from(pbits), e.pos_r, pbits)?;
        at += 2 * u64::from(pbits);
    }
    e.meta.copy_into(out, at)?;
    Ok(phase1_entry_size(k, table))
}

/// Decode a phase-1 entry. `want_meta` skips the metadata copy for phases
/// that only chase pointers.
pub fn decode_p1(k: u8, table: u8, bytes: &[u8], want_meta: bool) -> Result<P1Entry> {
    let ybits = y_size_bits(k, table);
    let y = extract_u64(bytes, 0, ybits)?;
    let mut at = u64::from(ybits);
    let (mut pos_l, mut pos_r) = (0, 0);
    if table != 1 {
        let pbits = pos_size_bits(k);
        pos_l = extract_u64(bytes, at, pbits)?;
        pos_r = extract_u64(bytes, at + u64::from(pbits), pbits)?;
        at += 2 * u64::from(pbits);
    }
    let mbits = if table == 1 { u32::from(k) } else { meta_size_bits(k, table) };
    let meta = if want_meta && mbits > 0 {
        Meta::from_bit_range(bytes, at, mbits)?
    } else {
        Meta::empty()
    };
    Ok(P1Entry { y, pos_l, pos_r, meta })
}

/// Pack a phase-2 entry (`y` ignored except for table 7).
pub fn encode_p2(k: u8, table: u8, y: u64, pos_l: u64, pos_r: u64, out: &mut [u8]) -> Result<usize> {
    let pbits = pos_size_bits(k);
    let mut at = 0u64;
    if table == 7 {
        put_bits(out, 0, y, y_size_bits(k, 7))?;
        at = u64::from(y_size_bits(k, 7));
    }
    put_bits(out, at, pos_l, pbits)?;
    put_bits(out, at + u64::from(pbits), pos_r, pbits)?;
    Ok(phase2_entry_size(k, table))
}

/// Decode a phase-2 entry as `(y, pos_l, pos_r)`; `y` is zero for tables 2–6.
pub fn decode_p2(k: u8, table: u8, bytes: &[u8]) -> Result<(u64, u64, u64)> {
    let pbits = pos_size_bits(k);
    let (y, at) = if table == 7 {
        (extract_u64(bytes, 0, y_size_bits(k, 7))?, u64::from(y_size_bits(k, 7)))
    } else {
        (0, 0)
    };
    let pos_l = extract_u64(bytes, at, pbits)?;
    let pos_r = extract_u64(bytes, at + u64::from(pbits), pbits)?;
    Ok((y, pos_l, pos_r))
}
