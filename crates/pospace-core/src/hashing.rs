//! F1 (ChaCha8 keystream) and Fx (BLAKE3) output functions.
//!
//! F1 reads `k`-bit slices out of a ChaCha8 keystream keyed with
//! `[1] ‖ id[0..31]` — the table index prepended, the last seed byte
//! dropped. `ChaCha8Rng` with its default zero stream and a 64-bit block
//! counter produces exactly that keystream, and `set_word_pos` gives the
//! random block access the bit-offset schedule needs.
//!
//! Fx hashes the MSB-first stream `y ‖ meta_L ‖ meta_R` with BLAKE3 and
//! slices the digest: the top `k+6` bits (big-endian over the first 8 bytes)
//! become the next `y`; tables 4–6 additionally slice their output metadata
//! from bit `k+6` of the digest.

use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};

use crate::bits::{byte_align, extract_u64, put_bits, Meta};
use crate::error::Result;
use crate::params::{meta_size_bits, EXTRA_BITS, ID_LEN};

/// Bits per ChaCha8 block.
const F1_BLOCK_BITS: u64 = 512;

/// Table-1 output function.
#[derive(Debug)]
pub struct F1Calculator {
    k: u8,
    rng: ChaCha8Rng,
    cached_block: u64,
    /// Two consecutive keystream blocks, so any `k ≤ 50`-bit slice that
    /// starts in the cached block is fully covered.
    cache: [u8; 128],
}

impl F1Calculator {
    /// Keystream generator for `id`. `k` must already be validated.
    #[must_use]
    pub fn new(k: u8, id: &[u8; ID_LEN]) -> Self {
        let mut seed = [0u8; 32];
        seed[0] = 1;
        seed[1..].copy_from_slice(&id[..31]);
        Self {
            k,
            rng: ChaCha8Rng::from_seed(seed),
            cached_block: u64::MAX,
            cache: [0; 128],
        }
    }

    /// `y = F1(x)`: `k` keystream bits at bit offset `x·k`, with the top
    /// `EXTRA_BITS` of `x` appended as the low bits.
    pub fn calculate_f(&mut self, x: u64) -> Result<u64> {
        let k = u64::from(self.k);
        let first_bit = x * k;
        let block = first_bit / F1_BLOCK_BITS;
        if block != self.cached_block {
            // 16 u32 words per block; refill two blocks from `block`.
            self.rng.set_word_pos(u128::from(block) * 16);
            self.rng.fill_bytes(&mut self.cache);
            self.cached_block = block;
        }
        let f = extract_u64(&self.cache, first_bit % F1_BLOCK_BITS, u32::from(self.k))?;
        Ok((f << EXTRA_BITS) | (x >> (k - u64::from(EXTRA_BITS))))
    }
}

/// Output function for tables 2..7.
#[derive(Debug)]
pub struct FxCalculator {
    k: u8,
    table: u8,
    input: [u8; 64],
}

impl FxCalculator {
    /// Fx for computing entries of `table` (2..=7).
    #[must_use]
    pub fn new(k: u8, table: u8) -> Self {
        debug_assert!((2..=7).contains(&table));
        Self { k, table, input: [0; 64] }
    }

    /// `(f, collated)` for a matched pair.
    ///
    /// `y` is the left entry's sort key (`k+6` bits); `l`/`r` are the
    /// parents' metadata. `f` is `k+6` bits wide; callers building table 7
    /// keep only the top `k` (`f >> 6`).
    pub fn calculate(&mut self, y: u64, l: &Meta, r: &Meta) -> Result<(u64, Meta)> {
        let k = u32::from(self.k);
        let y_bits = k + EXTRA_BITS;

        self.input.fill(0);
        put_bits(&mut self.input, 0, y, y_bits)?;
        l.copy_into(&mut self.input, u64::from(y_bits))?;
        r.copy_into(&mut self.input, u64::from(y_bits) + u64::from(l.bits()))?;
        let input_bits = u64::from(y_bits) + u64::from(l.bits()) + u64::from(r.bits());

        let hash = blake3::hash(&self.input[..byte_align(input_bits)]);
        let hb = hash.as_bytes();
        let f = u64::from_be_bytes([hb[0], hb[1], hb[2], hb[3], hb[4], hb[5], hb[6], hb[7]])
            >> (64 - y_bits);

        let collated = match self.table {
            2 | 3 => Meta::concat(l, r)?,
            4..=6 => Meta::from_bit_range(hb, u64::from(y_bits), meta_size_bits(self.k, self.table))?,
            _ => Meta::empty(),
        };
        Ok((f, collated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: [u8; 32] = [7u8; 32];

    #[test]
    fn f1_is_deterministic_and_embeds_x_tail() {
        let mut a = F1Calculator::new(17, &ID);
        let mut b = F1Calculator::new(17, &ID);
        for x in [0u64, 1, 500, (1 << 17) - 1] {
            let y = a.calculate_f(x).unwrap();
            assert_eq!(y, b.calculate_f(x).unwrap());
            assert!(y < 1 << 23);
            assert_eq!(y & 0x3f, x >> 11, "low 6 bits carry the top of x");
        }
    }

    #[test]
    fn f1_random_access_matches_sequential() {
        let mut seq = F1Calculator::new(17, &ID);
        let ys: Vec<u64> = (0..2000).map(|x| seq.calculate_f(x).unwrap()).collect();
        let mut rnd = F1Calculator::new(17, &ID);
        for &x in &[1999u64, 3, 1024, 0, 77] {
            assert_eq!(rnd.calculate_f(x).unwrap(), ys[x as usize]);
        }
    }

    #[test]
    fn f1_key_drops_final_seed_byte() {
        let mut id2 = ID;
        id2[31] ^= 0xff;
        let mut a = F1Calculator::new(17, &ID);
        let mut b = F1Calculator::new(17, &id2);
        assert_eq!(a.calculate_f(42).unwrap(), b.calculate_f(42).unwrap());

        let mut id3 = ID;
        id3[0] ^= 1;
        let mut c = F1Calculator::new(17, &id3);
        assert_ne!(a.calculate_f(42).unwrap(), c.calculate_f(42).unwrap());
    }

    #[test]
    fn fx_collation_widths_follow_the_table() {
        let k = 17u8;
        let l = Meta::from_u64(0x1_2345, 17).unwrap();
        let r = Meta::from_u64(0x0_fedc, 17).unwrap();
        let (f2, c2) = FxCalculator::new(k, 2).calculate(0x12_3456, &l, &r).unwrap();
        assert!(f2 < 1 << 23);
        assert_eq!(c2.bits(), 34);

        let l4 = Meta::from_bit_range(&[0x55; 16], 0, 68).unwrap();
        let r4 = Meta::from_bit_range(&[0xaa; 16], 0, 68).unwrap();
        let (_, c5) = FxCalculator::new(k, 5).calculate(0x12_3456, &l4, &r4).unwrap();
        assert_eq!(c5.bits(), 51);

        let l7 = Meta::from_bit_range(&[0x33; 16], 0, 34).unwrap();
        let r7 = Meta::from_bit_range(&[0xcc; 16], 0, 34).unwrap();
        let (_, c7) = FxCalculator::new(k, 7).calculate(0x12_3456, &l7, &r7).unwrap();
        assert_eq!(c7.bits(), 0);
    }

    #[test]
    fn fx_depends_on_operand_order() {
        let k = 17u8;
        let l = Meta::from_u64(1, 17).unwrap();
        let r = Meta::from_u64(2, 17).unwrap();
        let mut fx = FxCalculator::new(k, 2);
        let (f_lr, _) = fx.calculate(99, &l, &r).unwrap();
        let (f_rl, _) = fx.calculate(99, &r, &l).unwrap();
        assert_ne!(f_lr, f_rl);
    }
}
