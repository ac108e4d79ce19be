//! In-memory uniform sort.
//!
//! Entries whose sort key is uniformly distributed land close to their
//! final rank when hashed by key prefix into a table twice their number, so
//! a single insertion pass with local displacement sorts the whole run.
//! The all-zero entry is the empty-slot sentinel; inputs must not contain
//! it past `bits_begin` (see the plotter notes in DESIGN.md).

use pospace_core::bits::extract_u64;
use pospace_core::{PosError, Result};

/// Slack slots appended after the power-of-two table so displacement
/// chains can run past the last bucket.
const SLACK_ENTRIES: u64 = 50;

/// Entry slots a sort of `num_entries` needs: the smallest power of two
/// holding twice the entries, plus probe slack.
#[must_use]
pub fn round_size(num_entries: u64) -> u64 {
    let mut size = 1u64;
    while size < 2 * num_entries {
        size <<= 1;
    }
    size + SLACK_ENTRIES
}

#[inline]
fn is_empty_entry(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

/// Compare entries by the bit suffix starting at `bits_begin`.
#[inline]
fn cmp_bits(a: &[u8], b: &[u8], bits_begin: u32) -> std::cmp::Ordering {
    let start = (bits_begin / 8) as usize;
    let mask = 0xffu8 >> (bits_begin % 8);
    (a[start] & mask)
        .cmp(&(b[start] & mask))
        .then_with(|| a[start + 1..].cmp(&b[start + 1..]))
}

/// Sort `num_entries` fixed-width entries from `input` into the head of
/// `memory`, ordered ascending by the bit suffix at `bits_begin`.
///
/// `memory` must hold at least `round_size(num_entries) * entry_len` bytes;
/// the sorted run occupies the first `num_entries * entry_len` on return.
/// `input` is used as scratch for displaced entries.
pub fn sort_to_memory(
    input: &mut [u8],
    memory: &mut [u8],
    entry_len: usize,
    num_entries: u64,
    bits_begin: u32,
) -> Result<()> {
    if num_entries == 0 {
        return Ok(());
    }
    let memory_len = round_size(num_entries) as usize * entry_len;
    if memory.len() < memory_len {
        return Err(PosError::InsufficientMemory(format!(
            "uniform sort needs {memory_len} bytes, buffer has {}",
            memory.len()
        )));
    }
    // Number of prefix bits that index the displacement table.
    let mut bucket_bits = 0u32;
    while (1u64 << bucket_bits) < 2 * num_entries {
        bucket_bits += 1;
    }
    memory[..memory_len].fill(0);

    let mut swap = vec![0u8; entry_len];
    for i in 0..num_entries as usize {
        let in_off = i * entry_len;
        let mut pos =
            extract_u64(&input[in_off..in_off + entry_len], u64::from(bits_begin), bucket_bits)?
                as usize
                * entry_len;
        loop {
            if pos + entry_len > memory_len {
                return Err(PosError::Unreachable("uniform sort displacement ran off the table"));
            }
            let slot = &memory[pos..pos + entry_len];
            if is_empty_entry(slot) {
                break;
            }
            // Keep the smaller of the two here; push the larger onward.
            if cmp_bits(slot, &input[in_off..in_off + entry_len], bits_begin)
                == std::cmp::Ordering::Greater
            {
                swap.copy_from_slice(slot);
                memory[pos..pos + entry_len].copy_from_slice(&input[in_off..in_off + entry_len]);
                input[in_off..in_off + entry_len].copy_from_slice(&swap);
            }
            pos += entry_len;
        }
        memory[pos..pos + entry_len].copy_from_slice(&input[in_off..in_off + entry_len]);
    }

    // Compact occupied slots to the front.
    let mut written = 0usize;
    let mut pos = 0usize;
    while written < num_entries as usize && pos + entry_len <= memory_len {
        if !is_empty_entry(&memory[pos..pos + entry_len]) {
            if pos != written * entry_len {
                memory.copy_within(pos..pos + entry_len, written * entry_len);
            }
            written += 1;
        }
        pos += entry_len;
    }
    if written != num_entries as usize {
        return Err(PosError::Unreachable("uniform sort lost entries (all-zero input entry?)"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pospace_core::bits::put_bits;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng as _, SeedableRng as _};

    fn pack_entries(values: &[u64], entry_len: usize, width: u32) -> Vec<u8> {
        let mut out = vec![0u8; values.len() * entry_len];
        for (i, &v) in values.iter().enumerate() {
            put_bits(&mut out[i * entry_len..(i + 1) * entry_len], 0, v, width).unwrap();
        }
        out
    }

    fn sorted_values(input: &[u8], entry_len: usize, width: u32, n: usize) -> Vec<u64> {
        (0..n)
            .map(|i| extract_u64(&input[i * entry_len..], 0, width).unwrap())
            .collect()
    }

    #[test]
    fn sorts_random_runs() {
        let mut rng = StdRng::seed_from_u64(0xdead);
        for n in [1usize, 2, 100, 4096] {
            // Nonzero keys keep the sentinel precondition.
            let values: Vec<u64> = (0..n).map(|_| rng.random_range(1..1u64 << 40)).collect();
            let mut input = pack_entries(&values, 6, 40);
            let mut memory = vec![0u8; round_size(n as u64) as usize * 6];
            sort_to_memory(&mut input, &mut memory, 6, n as u64, 0).unwrap();

            let mut expect = values.clone();
            expect.sort_unstable();
            assert_eq!(sorted_values(&memory, 6, 40, n), expect, "n = {n}");
        }
    }

    #[test]
    fn respects_bits_begin() {
        // Keys live in the second byte; first byte is noise that must not
        // affect the order.
        let raw: Vec<(u64, u64)> = vec![(9, 3), (1, 250), (7, 3), (2, 1)];
        let mut input = vec![0u8; raw.len() * 2];
        for (i, &(noise, key)) in raw.iter().enumerate() {
            put_bits(&mut input[i * 2..(i + 1) * 2], 0, noise, 8).unwrap();
            put_bits(&mut input[i * 2..(i + 1) * 2], 8, key, 8).unwrap();
        }
        let mut memory = vec![0u8; round_size(4) as usize * 2];
        sort_to_memory(&mut input, &mut memory, 2, 4, 8).unwrap();
        let keys: Vec<u64> =
            (0..4).map(|i| extract_u64(&memory[i * 2..], 8, 8).unwrap()).collect();
        assert_eq!(keys, vec![1, 3, 3, 250]);
    }

    #[test]
    fn undersized_buffer_is_insufficient_memory() {
        let mut input = pack_entries(&[1, 2, 3], 4, 30);
        let mut memory = vec![0u8; 8];
        assert!(matches!(
            sort_to_memory(&mut input, &mut memory, 4, 3, 0),
            Err(PosError::InsufficientMemory(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_sort_is_an_ordered_permutation(
            values in proptest::collection::vec(1u64..(1 << 35), 1..500)
        ) {
            let n = values.len();
            let mut input = pack_entries(&values, 5, 35);
            let mut memory = vec![0u8; round_size(n as u64) as usize * 5];
            sort_to_memory(&mut input, &mut memory, 5, n as u64, 0).unwrap();

            let got = sorted_values(&memory, 5, 35, n);
            let mut expect = values.clone();
            expect.sort_unstable();
            prop_assert_eq!(got, expect);
        }
    }
}
