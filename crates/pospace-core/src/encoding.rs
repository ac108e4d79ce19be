//! Line points, Rice-coded delta tails and fixed-size parks.
//!
//! A line point folds an unordered position pair into one scalar via the
//! symmetric pairing `lp = s(s+1)/2 + max` with `s = x + y`. Consecutive
//! line points in a sorted column sit close together, so a park stores the
//! first one verbatim and the rest as `stub ‖ small` deltas: the low
//! `k - 3` bits raw, the remainder through a per-table static Rice code.
//!
//! Parks are fixed-size so random access needs no index: entry `i` of table
//! `t` lives in park `i / 2048` at byte `park_offset(t) + park *
//! park_size_bytes(k, t)`.

use crate::bits::{byte_align, BitReader, BitWriter};
use crate::error::{PosError, Result};
use crate::params::{
    pos_size_bits, C3_BITS_PER_ENTRY, C3_DELTA_RICE_ORDER, ENTRIES_PER_PARK,
    MAX_AVERAGE_DELTA_BITS, MAX_AVERAGE_DELTA_BITS_TABLE_1, PARK_DELTA_RICE_ORDER,
    STUB_MINUS_BITS,
};

/* ------------------------------- Line points ------------------------------- */

/// Width of a stored line point: positions are `k+1` bits, the pairing of
/// two of them needs one more.
#[inline]
#[must_use]
pub fn line_point_size_bits(k: u8) -> u32 {
    2 * pos_size_bits(k) + 1
}

/// Fold the unordered pair `{x, y}` into a single scalar.
#[must_use]
pub fn square_to_line_point(x: u64, y: u64) -> u128 {
    let (hi, lo) = if x >= y { (x, y) } else { (y, x) };
    let s = u128::from(hi) + u128::from(lo);
    s * (s + 1) / 2 + u128::from(hi)
}

/// Invert [`square_to_line_point`]; returns `(max, min)`.
#[must_use]
pub fn line_point_to_square(lp: u128) -> (u64, u64) {
    // Largest s with s(s+1)/2 <= lp, by binary search; s < 2^53 for k ≤ 50.
    let (mut lo, mut hi) = (0u128, 1u128 << 53);
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if mid * (mid + 1) / 2 <= lp {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    let s = lo;
    let max = lp - s * (s + 1) / 2;
    (max as u64, (s - max) as u64)
}

/* ----------------------------- Rice delta code ----------------------------- */

/// Append `v` as `⌊v/2^order⌋` in unary, then `order` remainder bits.
pub fn encode_delta(w: &mut BitWriter, v: u64, order: u32) -> Result<()> {
    let q = v >> order;
    for _ in 0..q {
        w.push(1, 1)?;
    }
    w.push(0, 1)?;
    w.push(v, order)
}

/// Inverse of [`encode_delta`]; the reader's range bounds corrupt input.
pub fn decode_delta(r: &mut BitReader<'_>, order: u32) -> Result<u64> {
    let mut q = 0u64;
    while r.read(1)? == 1 {
        q += 1;
    }
    Ok((q << order) | r.read(order)?)
}

/* ---------------------------------- Parks ---------------------------------- */

/// Stub width for park deltas.
#[inline]
#[must_use]
pub fn stub_size_bits(k: u8) -> u32 {
    u32::from(k) - STUB_MINUS_BITS
}

/// Byte budget of the variable delta tail of one park.
#[must_use]
pub fn park_deltas_size_bytes(table: u8) -> usize {
    let avg = if table == 1 { MAX_AVERAGE_DELTA_BITS_TABLE_1 } else { MAX_AVERAGE_DELTA_BITS };
    let bits = (f64::from(ENTRIES_PER_PARK - 1) * avg).ceil() as u64;
    byte_align(bits)
}

/// Total byte size of one park of `table` (1..=6).
#[must_use]
pub fn park_size_bytes(k: u8, table: u8) -> usize {
    byte_align(u64::from(line_point_size_bits(k)))
        + byte_align(u64::from(ENTRIES_PER_PARK - 1) * u64::from(stub_size_bits(k)))
        + park_deltas_size_bytes(table)
}

/// Encode up to [`ENTRIES_PER_PARK`] sorted line points as one park.
///
/// `out` receives exactly `park_size_bytes(k, table)` bytes. Fails with
/// `InvalidValue` when the points are unsorted or the delta tail overflows
/// its budget.
pub fn encode_park(k: u8, table: u8, line_points: &[u128], out: &mut Vec<u8>) -> Result<()> {
    if line_points.is_empty() || line_points.len() > ENTRIES_PER_PARK as usize {
        return Err(PosError::invalid("park entry count out of range"));
    }
    let lp_bytes = byte_align(u64::from(line_point_size_bits(k)));
    let stub_bytes = byte_align(u64::from(ENTRIES_PER_PARK - 1) * u64::from(stub_size_bits(k)));
    let delta_bytes = park_deltas_size_bytes(table);

    let stub_bits = stub_size_bits(k);
    let stub_mask = (1u128 << stub_bits) - 1;

    let mut deltas = Vec::with_capacity(line_points.len().saturating_sub(1));
    for pair in line_points.windows(2) {
        let delta = pair[1]
            .checked_sub(pair[0])
            .ok_or_else(|| PosError::invalid("park line points not sorted"))?;
        let small = delta >> stub_bits;
        if small >> 56 != 0 {
            return Err(PosError::invalid("park delta too large"));
        }
        deltas.push(((delta & stub_mask) as u64, small as u64));
    }

    let mut head = BitWriter::with_capacity(lp_bytes + stub_bytes);
    head.push_u128(line_points[0], line_point_size_bits(k))?;
    let mut bytes = head.into_bytes();
    bytes.resize(lp_bytes, 0);

    let mut stubs = BitWriter::with_capacity(stub_bytes);
    for &(stub, _) in &deltas {
        stubs.push(stub, stub_bits)?;
    }
    let mut stub_img = stubs.into_bytes();
    stub_img.resize(stub_bytes, 0);
    bytes.extend_from_slice(&stub_img);

    let mut tail = BitWriter::with_capacity(delta_bytes);
    for &(_, small) in &deltas {
        encode_delta(&mut tail, small, PARK_DELTA_RICE_ORDER)?;
    }
    if tail.bit_len() > delta_bytes as u64 * 8 {
        return Err(PosError::invalid(format!(
            "park delta tail overflows budget: {} > {} bits",
            tail.bit_len(),
            delta_bytes * 8
        )));
    }
    let mut tail_img = tail.into_bytes();
    tail_img.resize(delta_bytes, 0);
    bytes.extend_from_slice(&tail_img);

    debug_assert_eq!(bytes.len(), park_size_bytes(k, table));
    out.extend_from_slice(&bytes);
    Ok(())
}

/// Decode entry `idx` of a park (sequential delta scan up to `idx`).
pub fn read_park_entry(k: u8, table: u8, park: &[u8], idx: u32) -> Result<u128> {
    if park.len() < park_size_bytes(k, table) {
        return Err(PosError::invalid("park truncated"));
    }
    if idx >= ENTRIES_PER_PARK {
        return Err(PosError::invalid("park entry index out of range"));
    }
    let lp_bits = line_point_size_bits(k);
    let mut lp = BitReader::new(park).read_u128(lp_bits)?;
    if idx == 0 {
        return Ok(lp);
    }

    let stub_bits = stub_size_bits(k);
    let stub_base = byte_align(u64::from(lp_bits)) as u64 * 8;
    let stub_bytes = byte_align(u64::from(ENTRIES_PER_PARK - 1) * u64::from(stub_bits));
    let delta_base = stub_base + stub_bytes as u64 * 8;
    let delta_end = delta_base + park_deltas_size_bytes(table) as u64 * 8;

    let mut stubs = BitReader::with_range(park, stub_base, delta_base);
    let mut tail = BitReader::with_range(park, delta_base, delta_end);
    for _ in 0..idx {
        let stub = stubs.read(stub_bits)?;
        let small = decode_delta(&mut tail, PARK_DELTA_RICE_ORDER)?;
        lp += (u128::from(small) << stub_bits) | u128::from(stub);
    }
    Ok(lp)
}

/* ----------------------------- Checkpoint parks ---------------------------- */

/// Byte size of one C3 park: a 2-byte BE delta count, then the Rice tail.
#[must_use]
pub fn c3_park_size_bytes() -> usize {
    2 + byte_align((f64::from(crate::params::CHECKPOINT_1_INTERVAL - 1) * C3_BITS_PER_ENTRY).ceil() as u64)
}

/// Encode one C1 interval's `f7` deltas as a C3 park.
pub fn encode_c3_park(deltas: &[u64], out: &mut Vec<u8>) -> Result<()> {
    if deltas.len() >= usize::from(u16::MAX) {
        return Err(PosError::invalid("too many deltas for a C3 park"));
    }
    let size = c3_park_size_bytes();
    let mut w = BitWriter::with_capacity(size - 2);
    for &d in deltas {
        encode_delta(&mut w, d, C3_DELTA_RICE_ORDER)?;
    }
    if w.bit_len() > (size as u64 - 2) * 8 {
        return Err(PosError::invalid("C3 park overflows budget"));
    }
    out.extend_from_slice(&(deltas.len() as u16).to_be_bytes());
    let mut img = w.into_bytes();
    img.resize(size - 2, 0);
    out.extend_from_slice(&img);
    Ok(())
}

/// Decode a C3 park into its delta run.
pub fn decode_c3_park(park: &[u8]) -> Result<Vec<u64>> {
    if park.len() < c3_park_size_bytes() {
        return Err(PosError::invalid("C3 park truncated"));
    }
    let count = u16::from_be_bytes([park[0], park[1]]) as usize;
    let mut r = BitReader::with_range(park, 16, park.len() as u64 * 8);
    let mut deltas = Vec::with_capacity(count);
    for _ in 0..count {
        deltas.push(decode_delta(&mut r, C3_DELTA_RICE_ORDER)?);
    }
    Ok(deltas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn line_point_round_trip_small() {
        for x in 0..40u64 {
            for y in 0..40u64 {
                if x == y {
                    continue;
                }
                let lp = square_to_line_point(x, y);
                let (hi, lo) = line_point_to_square(lp);
                assert_eq!((hi, lo), (x.max(y), x.min(y)));
            }
        }
    }

    #[test]
    fn line_point_is_order_insensitive() {
        assert_eq!(square_to_line_point(5, 9), square_to_line_point(9, 5));
    }

    #[test]
    fn park_round_trips_bit_exact() {
        let k = 17u8;
        let mut lps: Vec<u128> = Vec::new();
        let mut lp = 37u128;
        for i in 0..ENTRIES_PER_PARK as u128 {
            lps.push(lp);
            lp += 1 + (i * 2654435761 % 90000); // uneven but bounded gaps
        }
        let mut park = Vec::new();
        encode_park(k, 2, &lps, &mut park).unwrap();
        assert_eq!(park.len(), park_size_bytes(k, 2));
        for idx in [0u32, 1, 2, 1000, 2047] {
            assert_eq!(read_park_entry(k, 2, &park, idx).unwrap(), lps[idx as usize]);
        }
    }

    #[test]
    fn partial_park_keeps_fixed_size() {
        let k = 17u8;
        let lps = [10u128, 400, 100_000];
        let mut park = Vec::new();
        encode_park(k, 1, &lps, &mut park).unwrap();
        assert_eq!(park.len(), park_size_bytes(k, 1));
        assert_eq!(read_park_entry(k, 1, &park, 2).unwrap(), 100_000);
    }

    #[test]
    fn unsorted_park_is_rejected() {
        let mut park = Vec::new();
        assert!(encode_park(17, 2, &[10u128, 5], &mut park).is_err());
    }

    #[test]
    fn c3_round_trip() {
        let deltas: Vec<u64> = (0..9999).map(|i| (i * 7 + 1) % 5).collect();
        let mut park = Vec::new();
        encode_c3_park(&deltas, &mut park).unwrap();
        assert_eq!(park.len(), c3_park_size_bytes());
        assert_eq!(decode_c3_park(&park).unwrap(), deltas);
    }

    proptest! {
        #[test]
        fn prop_line_point_round_trip(x in 0u64..(1 << 51), y in 0u64..(1 << 51)) {
            let lp = square_to_line_point(x, y);
            let (hi, lo) = line_point_to_square(lp);
            prop_assert_eq!((hi, lo), (x.max(y), x.min(y)));
        }

        #[test]
        fn prop_rice_round_trip(vals in proptest::collection::vec(0u64..5000, 1..200)) {
            let mut w = BitWriter::new();
            for &v in &vals {
                encode_delta(&mut w, v, 3).unwrap();
            }
            let bytes = w.into_bytes();
            let mut r = BitReader::new(&bytes);
            for &v in &vals {
                prop_assert_eq!(decode_delta(&mut r, 3).unwrap(), v);
            }
        }
    }
}
