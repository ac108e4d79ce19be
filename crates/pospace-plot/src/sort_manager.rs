//! Bucketed sort driver.
//!
//! A [`SortManager`] collects fixed-width entries into buckets keyed by the
//! `log_num_buckets` bits at `begin_bits`, then serves them back in sorted
//! order one bucket at a time: the active bucket is uniform-sorted into a
//! bounded buffer, and a configurable tail of it survives each advance so
//! readers may track back a little (the match window of phase 1).
//!
//! Reads are monotonically non-decreasing apart from that window; a read
//! behind the retained tail fails with `ReadOutOfWindow`.

use pospace_core::bits::extract_u64;
use pospace_core::params::{EXTRA_BITS_POW, PARAM_BC};
use pospace_core::{PosError, Result};
use tracing::debug;

use crate::sort::{round_size, sort_to_memory};

/// External-memory sort over one table's entries.
#[derive(Debug)]
pub struct SortManager {
    memory: Vec<u8>,
    memory_size: u64,
    entry_size: usize,
    begin_bits: u32,
    log_num_buckets: u32,
    buckets: Vec<Vec<u8>>,
    total_entries: u64,

    prev_bucket_buf: Vec<u8>,
    prev_bucket_buf_size: u64,
    prev_bucket_position_start: u64,

    done: bool,
    final_position_start: u64,
    final_position_end: u64,
    next_bucket_to_sort: usize,
}

impl SortManager {
    /// New manager for entries of `entry_size` bytes, bucketed by the
    /// `log_num_buckets` bits at `begin_bits`. `stripe_size` (entries)
    /// scales the retained previous-bucket tail.
    #[must_use]
    pub fn new(
        memory_size: u64,
        num_buckets: u32,
        log_num_buckets: u32,
        entry_size: usize,
        begin_bits: u32,
        stripe_size: u64,
    ) -> Self {
        Self {
            memory: Vec::new(),
            memory_size,
            entry_size,
            begin_bits,
            log_num_buckets,
            buckets: (0..num_buckets).map(|_| Vec::new()).collect(),
            total_entries: 0,
            prev_bucket_buf: Vec::new(),
            prev_bucket_buf_size: 2
                * (stripe_size + 10 * u64::from(PARAM_BC) / u64::from(EXTRA_BITS_POW))
                * entry_size as u64,
            prev_bucket_position_start: 0,
            done: false,
            final_position_start: 0,
            final_position_end: 0,
            next_bucket_to_sort: 0,
        }
    }

    /// Entries added so far.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.total_entries
    }

    /// Entry width in bytes.
    #[must_use]
    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    /// Append one packed entry.
    pub fn add(&mut self, entry: &[u8]) -> Result<()> {
        if self.done {
            return Err(PosError::InvalidState("sort manager add after reads started"));
        }
        debug_assert_eq!(entry.len(), self.entry_size);
        let bucket =
            extract_u64(entry, u64::from(self.begin_bits), self.log_num_buckets)? as usize;
        self.buckets[bucket].extend_from_slice(entry);
        self.total_entries += 1;
        Ok(())
    }

    /// Borrow the entry at byte `position`.
    ///
    /// Advancing past the sorted window sorts further buckets on demand;
    /// positions behind the window are served from the retained tail of the
    /// previous bucket when [`SortManager::trigger_new_bucket`] saved one.
    pub fn read_entry(&mut self, position: u64) -> Result<&[u8]> {
        if position < self.final_position_start {
            if position < self.prev_bucket_position_start || self.prev_bucket_buf.is_empty() {
                return Err(PosError::ReadOutOfWindow { position });
            }
            let off = (position - self.prev_bucket_position_start) as usize;
            if off + self.entry_size > self.prev_bucket_buf.len() {
                return Err(PosError::ReadOutOfWindow { position });
            }
            return Ok(&self.prev_bucket_buf[off..off + self.entry_size]);
        }
        while position >= self.final_position_end {
            self.sort_bucket()?;
        }
        let off = (position - self.final_position_start) as usize;
        Ok(&self.memory[off..off + self.entry_size])
    }

    /// Whether a reader at `position` is near the end of the sorted window
    /// (and more buckets remain), i.e. it should trigger the next bucket.
    #[must_use]
    pub fn close_to_new_bucket(&self, position: u64) -> bool {
        if position > self.final_position_end {
            return self.next_bucket_to_sort < self.buckets.len();
        }
        position + self.prev_bucket_buf_size / 2 >= self.final_position_end
            && self.next_bucket_to_sort < self.buckets.len()
    }

    /// Sort the next bucket, retaining the current window's tail from
    /// `position` onward for bounded backward reads.
    pub fn trigger_new_bucket(&mut self, position: u64) -> Result<()> {
        if position > self.final_position_end {
            return Err(PosError::invalid("triggering bucket too late"));
        }
        if position < self.final_position_start {
            return Err(PosError::invalid("triggering bucket too early"));
        }
        if !self.memory.is_empty() {
            let cache = (self.final_position_end - position) as usize;
            self.prev_bucket_buf.clear();
            self.prev_bucket_buf.resize(self.prev_bucket_buf_size as usize, 0);
            let from = (position - self.final_position_start) as usize;
            self.prev_bucket_buf[..cache].copy_from_slice(&self.memory[from..from + cache]);
        }
        self.sort_bucket()?;
        self.prev_bucket_position_start = position;
        Ok(())
    }

    /// Release the sort buffer and retained tail.
    pub fn free_memory(&mut self) {
        self.prev_bucket_buf = Vec::new();
        self.memory = Vec::new();
        self.final_position_end = 0;
    }

    fn sort_bucket(&mut self) -> Result<()> {
        if self.memory.is_empty() {
            // Allocated lazily so write-only managers never pay for it;
            // 7 bytes of headroom for the bit extractor's window.
            self.memory = vec![0u8; self.memory_size as usize + 7];
        }
        self.done = true;
        let Some(bucket) = self.buckets.get_mut(self.next_bucket_to_sort) else {
            return Err(PosError::invalid("sorting a bucket that does not exist"));
        };
        let bucket_bytes = bucket.len() as u64;
        let bucket_entries = bucket_bytes / self.entry_size as u64;
        let entries_fit = self.memory_size / self.entry_size as u64;
        if bucket_entries > entries_fit
            || round_size(bucket_entries) * self.entry_size as u64 > self.memory_size
        {
            return Err(PosError::InsufficientMemory(format!(
                "bucket of {bucket_entries} entries needs {} bytes to sort, budget is {}",
                round_size(bucket_entries) * self.entry_size as u64,
                self.memory_size
            )));
        }
        debug!(
            bucket = self.next_bucket_to_sort,
            entries = bucket_entries,
            "uniform-sorting bucket"
        );
        sort_to_memory(
            bucket,
            &mut self.memory,
            self.entry_size,
            bucket_entries,
            self.begin_bits + self.log_num_buckets,
        )?;
        // The bucket's raw bytes are no longer needed.
        *bucket = Vec::new();

        self.final_position_start = self.final_position_end;
        self.final_position_end += bucket_bytes;
        self.next_bucket_to_sort += 1;
        Ok(())
    }
}

/// Forward cursor over a manager's sorted entries, driving the
/// bucket-advance choreography for its caller.
#[derive(Debug)]
pub struct SortedCursor<'a> {
    sm: &'a mut SortManager,
    position: u64,
    use_window: bool,
}

impl<'a> SortedCursor<'a> {
    /// Cursor that maintains the backward-read window while scanning
    /// (phase-1 matching).
    #[must_use]
    pub fn with_window(sm: &'a mut SortManager) -> Self {
        Self { sm, position: 0, use_window: true }
    }

    /// Plain forward cursor (drains for park emission and translation).
    #[must_use]
    pub fn new(sm: &'a mut SortManager) -> Self {
        Self { sm, position: 0, use_window: false }
    }

    /// Read the next entry.
    pub fn next_entry(&mut self) -> Result<&[u8]> {
        if self.use_window && self.sm.close_to_new_bucket(self.position) {
            self.sm.trigger_new_bucket(self.position)?;
        }
        let entry_size = self.sm.entry_size;
        let e = self.sm.read_entry(self.position)?;
        self.position += entry_size as u64;
        Ok(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pospace_core::bits::put_bits;
    use rand::{rngs::StdRng, Rng as _, SeedableRng as _};

    fn manager(entry_size: usize) -> SortManager {
        SortManager::new(1 << 20, 16, 4, entry_size, 0, 128)
    }

    fn pack(v: u64, entry_size: usize, width: u32) -> Vec<u8> {
        let mut e = vec![0u8; entry_size];
        put_bits(&mut e, 0, v, width).unwrap();
        e
    }

    #[test]
    fn global_order_spans_buckets() {
        let mut sm = manager(4);
        let mut rng = StdRng::seed_from_u64(7);
        let mut values: Vec<u64> = (0..5000).map(|_| rng.random_range(1..1u64 << 30)).collect();
        for &v in &values {
            sm.add(&pack(v, 4, 30)).unwrap();
        }
        values.sort_unstable();

        let mut cursor = SortedCursor::new(&mut sm);
        for (i, &expect) in values.iter().enumerate() {
            let e = cursor.next_entry().unwrap();
            assert_eq!(extract_u64(e, 0, 30).unwrap(), expect, "entry {i}");
        }
    }

    #[test]
    fn add_after_reads_is_invalid_state() {
        let mut sm = manager(4);
        sm.add(&pack(1, 4, 30)).unwrap();
        let _ = sm.read_entry(0).unwrap();
        assert!(matches!(sm.add(&pack(2, 4, 30)), Err(PosError::InvalidState(_))));
    }

    #[test]
    fn windowed_cursor_allows_bounded_backtracking() {
        // Buckets must dwarf the retained tail for the windowed scan, as
        // the plotter's stripe-size check guarantees in real runs.
        let mut sm = SortManager::new(1 << 17, 8, 3, 4, 0, 64);
        let mut rng = StdRng::seed_from_u64(99);
        let mut values: Vec<u64> = (0..32_000).map(|_| rng.random_range(1..1u64 << 30)).collect();
        for &v in &values {
            sm.add(&pack(v, 4, 30)).unwrap();
        }
        values.sort_unstable();

        let mut last = 0u64;
        {
            let mut cursor = SortedCursor::with_window(&mut sm);
            for &expect in &values {
                let e = cursor.next_entry().unwrap();
                assert_eq!(extract_u64(e, 0, 30).unwrap(), expect);
                last = cursor.position - 4;
            }
        }
        // A short step back stays within the current window or retained tail.
        assert!(sm.read_entry(last - 4).is_ok());
        // Far behind the window is rejected.
        assert!(matches!(
            sm.read_entry(0),
            Err(PosError::ReadOutOfWindow { .. })
        ));
    }

    #[test]
    fn oversized_bucket_is_insufficient_memory() {
        // Budget of 64 bytes cannot sort 32 four-byte entries.
        let mut sm = SortManager::new(64, 2, 1, 4, 0, 4);
        for v in 1..=32u64 {
            sm.add(&pack(v << 8, 4, 30)).unwrap();
        }
        assert!(matches!(sm.read_entry(0), Err(PosError::InsufficientMemory(_))));
    }
}
