//! Byte-addressable backing stores.
//!
//! The plot and the intermediate tables live in RAM vectors, but access
//! goes through the same capability surface a file-backed build would use:
//! `read`, `write`, `truncate`, `free_memory`. [`BufferedDisk`] layers a
//! forward-sequential read-ahead and write cache; [`FilteredDisk`] adds the
//! logical-to-physical remap that lets phase 3 consume only the live
//! entries of a table that was never physically compacted.

use pospace_core::{Bitfield, PosError, Result};
use tracing::debug;

/// Read-ahead cache size.
pub const READ_AHEAD: u64 = 1024 * 1024;

/// Sequential write cache size.
pub const WRITE_CACHE: u64 = 1024 * 1024;

/// Capability surface of a backing store.
pub trait Disk {
    /// Borrow `length` bytes at `begin`.
    fn read(&mut self, begin: u64, length: u64) -> Result<&[u8]>;
    /// Write `bytes` at `begin`, growing the store if needed.
    fn write(&mut self, begin: u64, bytes: &[u8]) -> Result<()>;
    /// Flush caches and resize the store.
    fn truncate(&mut self, new_size: u64) -> Result<()>;
    /// Drop caches; the store itself stays valid.
    fn free_memory(&mut self);
}

/* ------------------------------- BufferedDisk ------------------------------ */

/// A RAM-resident store with sequential read-ahead and write caching.
///
/// Reads that regress behind the read buffer are served through a small
/// side buffer without disturbing the cache; the access pattern of every
/// phase is forward-sequential, so this path only covers the bounded
/// backtracking the sort window allows.
#[derive(Debug)]
pub struct BufferedDisk {
    data: Vec<u8>,
    read_buf: Vec<u8>,
    read_start: u64,
    read_len: u64,
    write_buf: Vec<u8>,
    write_start: u64,
    side_buf: [u8; 136],
}

impl Default for BufferedDisk {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl BufferedDisk {
    /// Store over an existing byte vector.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            read_buf: Vec::new(),
            read_start: u64::MAX,
            read_len: 0,
            write_buf: Vec::new(),
            write_start: u64::MAX,
            side_buf: [0; 136],
        }
    }

    /// Flush pending cached writes into the backing vector.
    pub fn flush(&mut self) {
        if self.write_buf.is_empty() {
            return;
        }
        let end = self.write_start as usize + self.write_buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.write_start as usize..end].copy_from_slice(&self.write_buf);
        self.write_buf.clear();
        self.write_start = u64::MAX;
    }

    /// Flush and hand back the backing vector.
    #[must_use]
    pub fn into_inner(mut self) -> Vec<u8> {
        self.flush();
        self.data
    }

    /// Logical size (including unflushed cached writes).
    #[must_use]
    pub fn len(&self) -> u64 {
        let flushed = self.data.len() as u64;
        if self.write_start == u64::MAX {
            flushed
        } else {
            flushed.max(self.write_start + self.write_buf.len() as u64)
        }
    }

    /// `true` when the store holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Disk for BufferedDisk {
    fn read(&mut self, begin: u64, length: u64) -> Result<&[u8]> {
        if length >= READ_AHEAD {
            return Err(PosError::invalid("read larger than the read-ahead window"));
        }
        let end = begin + length;
        if end > self.data.len() as u64 {
            return Err(PosError::invalid(format!(
                "read past end of store: {end} > {}",
                self.data.len()
            )));
        }

        let within = self.read_start != u64::MAX
            && begin >= self.read_start
            && end <= self.read_start + self.read_len;
        if within {
            let off = (begin - self.read_start) as usize;
            return Ok(&self.read_buf[off..off + length as usize]);
        }

        if self.read_start == u64::MAX || begin >= self.read_start {
            // Forward-sequential (or first) read: slide the window here.
            let amount = (self.data.len() as u64 - begin).min(READ_AHEAD);
            self.read_buf.clear();
            self.read_buf.extend_from_slice(&self.data[begin as usize..(begin + amount) as usize]);
            self.read_start = begin;
            self.read_len = amount;
            return Ok(&self.read_buf[..length as usize]);
        }

        // Regressed read; optimized for forward scans, so serve it on the
        // side and keep the window where it is.
        debug!(begin, length, "disk read position regressed");
        if length as usize > self.side_buf.len() {
            return Err(PosError::invalid("regressed read too large"));
        }
        self.side_buf[..length as usize]
            .copy_from_slice(&self.data[begin as usize..end as usize]);
        Ok(&self.side_buf[..length as usize])
    }

    fn write(&mut self, begin: u64, bytes: &[u8]) -> Result<()> {
        // Append to the cache when the write continues the cached run.
        if self.write_start != u64::MAX
            && begin == self.write_start + self.write_buf.len() as u64
        {
            if self.write_buf.len() + bytes.len() <= WRITE_CACHE as usize {
                self.write_buf.extend_from_slice(bytes);
                return Ok(());
            }
            self.flush();
        }
        if self.write_buf.is_empty() && bytes.len() <= WRITE_CACHE as usize {
            self.write_start = begin;
            self.write_buf.extend_from_slice(bytes);
            return Ok(());
        }
        let end = begin as usize + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[begin as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.flush();
        self.data.resize(new_size as usize, 0);
        self.free_memory();
        Ok(())
    }

    fn free_memory(&mut self) {
        self.flush();
        self.read_buf = Vec::new();
        self.read_start = u64::MAX;
        self.read_len = 0;
        self.write_buf = Vec::new();
        self.write_start = u64::MAX;
    }
}

/* ------------------------------- FilteredDisk ------------------------------ */

/// A read-only, forward-only view of a store that skips entries whose
/// liveness bit is clear. Logical offset `i · entry_size` maps to the
/// physical offset of the `i`-th live entry.
#[derive(Debug)]
pub struct FilteredDisk {
    filter: Bitfield,
    underlying: BufferedDisk,
    entry_size: u64,
    last_physical: u64,
    last_logical: u64,
    last_idx: u64,
}

impl FilteredDisk {
    /// Wrap `underlying`; `filter` must be finalized over its entry count.
    pub fn new(underlying: BufferedDisk, filter: Bitfield, entry_size: u64) -> Result<Self> {
        if entry_size == 0 {
            return Err(PosError::invalid("filtered disk needs a nonzero entry size"));
        }
        let mut idx = 0u64;
        while idx < filter.len() && !filter.get(idx) {
            idx += 1;
        }
        if idx == filter.len() {
            return Err(PosError::invalid("filtered disk over an all-dead table"));
        }
        Ok(Self {
            filter,
            underlying,
            entry_size,
            last_physical: idx * entry_size,
            last_logical: 0,
            last_idx: idx,
        })
    }
}

impl Disk for FilteredDisk {
    fn read(&mut self, begin: u64, length: u64) -> Result<&[u8]> {
        if begin < self.last_logical {
            return Err(PosError::InvalidState("filtered disk only reads forward"));
        }
        if begin % self.entry_size != 0 {
            return Err(PosError::invalid("filtered read not entry-aligned"));
        }
        while self.last_logical < begin {
            // Step off the current live entry, then skip dead ones.
            self.last_logical += self.entry_size;
            self.last_physical += self.entry_size;
            self.last_idx += 1;
            while self.last_idx < self.filter.len() && !self.filter.get(self.last_idx) {
                self.last_physical += self.entry_size;
                self.last_idx += 1;
            }
            if self.last_idx >= self.filter.len() {
                return Err(PosError::invalid("filtered read past the last live entry"));
            }
        }
        self.underlying.read(self.last_physical, length)
    }

    fn write(&mut self, _begin: u64, _bytes: &[u8]) -> Result<()> {
        Err(PosError::InvalidState("write on read-only filtered disk"))
    }

    fn truncate(&mut self, new_size: u64) -> Result<()> {
        self.underlying.truncate(new_size)
    }

    fn free_memory(&mut self) {
        self.underlying.free_memory();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_round_trips_sequential_writes() {
        let mut d = BufferedDisk::new(Vec::new());
        d.write(0, b"hello ").unwrap();
        d.write(6, b"world").unwrap();
        assert_eq!(d.len(), 11);
        let out = d.into_inner();
        assert_eq!(&out, b"hello world");
    }

    #[test]
    fn buffered_serves_regressed_reads_from_the_side() {
        let data: Vec<u8> = (0..=255u8).collect();
        let mut d = BufferedDisk::new(data);
        assert_eq!(d.read(200, 4).unwrap(), &[200, 201, 202, 203]);
        assert_eq!(d.read(10, 4).unwrap(), &[10, 11, 12, 13]);
        // Window untouched: forward read within it still served.
        assert_eq!(d.read(204, 2).unwrap(), &[204, 205]);
    }

    #[test]
    fn buffered_rejects_reads_past_the_end() {
        let mut d = BufferedDisk::new(vec![0; 8]);
        assert!(d.read(4, 8).is_err());
    }

    #[test]
    fn nonsequential_write_bypasses_the_cache() {
        let mut d = BufferedDisk::new(vec![0; 16]);
        d.write(12, b"abcd").unwrap();
        d.write(0, b"xy").unwrap();
        let out = d.into_inner();
        assert_eq!(&out[12..], b"abcd");
        assert_eq!(&out[..2], b"xy");
    }

    #[test]
    fn filtered_disk_skips_dead_entries() {
        // Entries of 2 bytes; entries 0, 2, 3 dead.
        let data = vec![0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5];
        let mut bf = Bitfield::new(6);
        for i in [1u64, 4, 5] {
            bf.set(i).unwrap();
        }
        bf.finalize();
        let mut fd = FilteredDisk::new(BufferedDisk::new(data), bf, 2).unwrap();
        assert_eq!(fd.read(0, 2).unwrap(), &[1, 1]);
        assert_eq!(fd.read(2, 2).unwrap(), &[4, 4]);
        assert_eq!(fd.read(4, 2).unwrap(), &[5, 5]);
        assert!(fd.read(6, 2).is_err());
    }

    #[test]
    fn filtered_disk_is_forward_only() {
        let mut bf = Bitfield::new(2);
        bf.set(0).unwrap();
        bf.set(1).unwrap();
        bf.finalize();
        let mut fd = FilteredDisk::new(BufferedDisk::new(vec![9; 4]), bf, 2).unwrap();
        fd.read(2, 2).unwrap();
        assert!(matches!(fd.read(0, 2), Err(PosError::InvalidState(_))));
    }
}
