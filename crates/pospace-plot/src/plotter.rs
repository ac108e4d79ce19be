//! Plot driver: parameter validation, memory budget, header and phases.

use pospace_core::entries::max_phase1_entry_size;
use pospace_core::params::{
    round_pow2, FORMAT_DESCRIPTION, ID_LEN, K_MAX, K_MIN, MAX_BUCKETS, MEM_SORT_PROPORTION,
    MIN_BUCKETS, NUM_TABLE_POINTERS, PLOT_MAGIC,
};
use pospace_core::{PosError, Result};
use tracing::info;

use crate::disk::{BufferedDisk, Disk};
use crate::phase1::run_phase1;
use crate::phase2::run_phase2;
use crate::phase3::run_phase3;
use crate::phase4::run_phase4;

/// Tunables of a plotting run. Zeroes mean "pick the default".
#[derive(Debug, Clone, Copy)]
pub struct PlotterConfig {
    /// Working-memory budget in MiB; at least 10.
    pub buf_megabytes: u32,
    /// Sort bucket count; 0 derives one from the memory budget. Non-zero
    /// values that are not powers of two are silently rounded up.
    pub num_buckets: u32,
    /// Sort stripe size in entries; scales the backward-read window.
    pub stripe_size: u64,
}

impl Default for PlotterConfig {
    fn default() -> Self {
        Self { buf_megabytes: 10, num_buckets: 0, stripe_size: 4000 }
    }
}

/// Builds plots.
#[derive(Debug, Default, Clone, Copy)]
pub struct Plotter;

impl Plotter {
    /// Run phases 1–4 and return the finished artifact.
    pub fn create_plot(self, k: u8, id: &[u8; ID_LEN], cfg: PlotterConfig) -> Result<Vec<u8>> {
        if !(K_MIN..=K_MAX).contains(&k) {
            return Err(PosError::invalid(format!("plot size k={k} is invalid")));
        }
        let stripe_size = if cfg.stripe_size == 0 { 4000 } else { cfg.stripe_size };
        let buf_megabytes = if cfg.buf_megabytes == 0 { 10 } else { cfg.buf_megabytes };
        if buf_megabytes < 10 {
            return Err(PosError::InsufficientMemory(
                "provide at least 10 MiB of working memory".into(),
            ));
        }

        // Reserve headroom for allocations outside the sort buffer: a fixed
        // floor, 5% of the budget (capped), and the match-window stripes.
        let max_entry = max_phase1_entry_size(k) as u64;
        let stripe_memory = 2 * (stripe_size + 5000) * max_entry / (1024 * 1024);
        let sub_mbytes = 5 + (f64::from(buf_megabytes) * 0.05).min(50.0) as u64 + stripe_memory;
        if sub_mbytes > u64::from(buf_megabytes) {
            return Err(PosError::InsufficientMemory(format!(
                "need at least {sub_mbytes} MiB for this configuration"
            )));
        }
        let memory_size = (u64::from(buf_megabytes) - sub_mbytes) * 1024 * 1024;

        let max_table_size = (1u64 << k) as f64 * 1.3 * max_entry as f64;
        let num_buckets = if cfg.num_buckets == 0 {
            2 * round_pow2((max_table_size / (memory_size as f64 * MEM_SORT_PROPORTION)).ceil() as u64)
        } else {
            round_pow2(u64::from(cfg.num_buckets))
        };
        let num_buckets = if num_buckets < u64::from(MIN_BUCKETS) {
            if cfg.num_buckets != 0 {
                return Err(PosError::invalid(format!("minimum bucket count is {MIN_BUCKETS}")));
            }
            u64::from(MIN_BUCKETS)
        } else if num_buckets > u64::from(MAX_BUCKETS) {
            if cfg.num_buckets != 0 {
                return Err(PosError::invalid(format!("maximum bucket count is {MAX_BUCKETS}")));
            }
            let required = max_table_size / f64::from(MAX_BUCKETS) / MEM_SORT_PROPORTION
                / (1024.0 * 1024.0)
                + sub_mbytes as f64;
            return Err(PosError::InsufficientMemory(format!(
                "need roughly {required:.0} MiB for this k"
            )));
        } else {
            num_buckets
        };
        let log_num_buckets = num_buckets.trailing_zeros();
        if max_table_size / (num_buckets as f64) < (stripe_size * 30) as f64 {
            return Err(PosError::invalid("stripe size too large for this bucket count"));
        }

        info!(k, buf_megabytes, num_buckets, stripe_size, "starting plot");
        let total = std::time::Instant::now();

        let p1 = run_phase1(k, id, memory_size, num_buckets as u32, log_num_buckets, stripe_size)?;
        let p2 = run_phase2(k, p1)?;

        let mut out = BufferedDisk::new(Vec::new());
        let header_size = write_header(&mut out, k, id)?;
        let p3 = run_phase3(
            k,
            &mut out,
            p2,
            header_size,
            memory_size,
            num_buckets as u32,
            log_num_buckets,
            stripe_size,
        )?;
        let final_pointers = run_phase4(k, &mut out, p3)?;

        // Backfill the pointer block and trim to the final size.
        let mut block = [0u8; NUM_TABLE_POINTERS * 8];
        for (i, p) in final_pointers.pointers.iter().enumerate() {
            block[i * 8..(i + 1) * 8].copy_from_slice(&p.to_be_bytes());
        }
        out.write(header_size - block.len() as u64, &block)?;
        out.truncate(final_pointers.end)?;

        info!(
            bytes = final_pointers.end,
            elapsed = ?total.elapsed(),
            "plot complete"
        );
        Ok(out.into_inner())
    }
}

/// Write the artifact header; returns its size (the first stream offset).
fn write_header(out: &mut BufferedDisk, k: u8, id: &[u8; ID_LEN]) -> Result<u64> {
    let mut off = 0u64;
    out.write(off, PLOT_MAGIC)?;
    off += PLOT_MAGIC.len() as u64;
    out.write(off, id)?;
    off += ID_LEN as u64;
    out.write(off, &[k])?;
    off += 1;
    let desc = FORMAT_DESCRIPTION.as_bytes();
    out.write(off, &(desc.len() as u16).to_be_bytes())?;
    off += 2;
    out.write(off, desc)?;
    off += desc.len() as u64;
    // Pointer block, backfilled after phase 4.
    out.write(off, &[0u8; NUM_TABLE_POINTERS * 8])?;
    off += (NUM_TABLE_POINTERS * 8) as u64;
    Ok(off)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_k() {
        let err = Plotter.create_plot(9, &[0; ID_LEN], PlotterConfig::default());
        assert!(matches!(err, Err(PosError::InvalidValue(_))));
    }

    #[test]
    fn rejects_small_memory_budget() {
        let cfg = PlotterConfig { buf_megabytes: 9, ..PlotterConfig::default() };
        let err = Plotter.create_plot(17, &[0; ID_LEN], cfg);
        assert!(matches!(err, Err(PosError::InsufficientMemory(_))));
    }

    #[test]
    fn rejects_oversized_stripes() {
        // Large enough that a bucket cannot cover 30 stripes, small enough
        // that the memory floor still passes.
        let cfg = PlotterConfig { stripe_size: 20_000, ..PlotterConfig::default() };
        let err = Plotter.create_plot(17, &[0; ID_LEN], cfg);
        assert!(matches!(err, Err(PosError::InvalidValue(_))));
    }
}
