// crates/pospace-cli/src/main.rs

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pospace_core::params::{ID_LEN, NUM_TABLE_POINTERS, PLOT_MAGIC};
use pospace_plot::{Plotter, PlotterConfig};
use pospace_prove::{validate_proof, Prover};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pospace",
    about = "Proof-of-space reference CLI",
    long_about = "Proof-of-space reference CLI.\n\nBuild in-memory plots, answer challenges and validate proofs.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Build a plot and write the artifact to a file
    Plot {
        /// Space parameter (17..=50); memory and artifact grow as k·2^k
        #[arg(long, default_value_t = 17)]
        k: u8,

        /// 32-byte plot seed, hex encoded
        #[arg(long)]
        seed: String,

        /// Output path for the plot artifact
        #[arg(long, default_value = "plot.bin")]
        out: PathBuf,

        /// Working-memory budget in MiB (>= 10)
        #[arg(long, default_value_t = 10)]
        buf: u32,

        /// Sort bucket count (power of two; 0 = automatic)
        #[arg(long, default_value_t = 0)]
        buckets: u32,

        /// Sort stripe size in entries
        #[arg(long, default_value_t = 4000)]
        stripe: u64,
    },

    /// Look up qualities (and optionally a full proof) for a challenge
    Prove {
        /// Path to a plot artifact
        #[arg(long)]
        plot: PathBuf,

        /// 32-byte challenge, hex encoded
        #[arg(long)]
        challenge: String,

        /// Also print the full proof at this quality index
        #[arg(long)]
        proof_index: Option<usize>,
    },

    /// Validate a proof without a plot
    Verify {
        /// Space parameter the proof was built for
        #[arg(long)]
        k: u8,

        /// 32-byte plot seed, hex encoded
        #[arg(long)]
        seed: String,

        /// 32-byte challenge, hex encoded
        #[arg(long)]
        challenge: String,

        /// Proof bytes (k*8 bytes), hex encoded
        #[arg(long)]
        proof: String,
    },

    /// Print a plot's header fields
    Inspect {
        /// Path to a plot artifact
        #[arg(long)]
        plot: PathBuf,

        /// Emit JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn hex32(label: &str, s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s).with_context(|| format!("{label} is not valid hex"))?;
    let arr: [u8; 32] =
        bytes.try_into().map_err(|_| anyhow::anyhow!("{label} must be 32 bytes"))?;
    Ok(arr)
}

#[derive(Serialize)]
struct PlotInfo {
    k: u8,
    seed: String,
    format: String,
    size_bytes: u64,
    table_pointers: Vec<u64>,
}

fn inspect(plot: &[u8]) -> Result<PlotInfo> {
    let prover = Prover::new(plot).context("not a valid plot")?;
    let mut off = PLOT_MAGIC.len() + ID_LEN + 1;
    let desc_len = u16::from_be_bytes([plot[off], plot[off + 1]]) as usize;
    off += 2;
    let format = String::from_utf8_lossy(&plot[off..off + desc_len]).into_owned();
    off += desc_len;
    let table_pointers = (0..NUM_TABLE_POINTERS)
        .map(|i| u64::from_be_bytes(plot[off + i * 8..off + (i + 1) * 8].try_into().unwrap_or([0; 8])))
        .collect();
    Ok(PlotInfo {
        k: prover.k(),
        seed: hex::encode(prover.id()),
        format,
        size_bytes: plot.len() as u64,
        table_pointers,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().cmd {
        Cmd::Plot { k, seed, out, buf, buckets, stripe } => {
            let id = hex32("seed", &seed)?;
            let cfg = PlotterConfig { buf_megabytes: buf, num_buckets: buckets, stripe_size: stripe };
            let plot = Plotter.create_plot(k, &id, cfg).context("plotting failed")?;
            fs::write(&out, &plot).with_context(|| format!("writing {}", out.display()))?;
            info!(path = %out.display(), bytes = plot.len(), "plot written");
        }
        Cmd::Prove { plot, challenge, proof_index } => {
            let bytes = fs::read(&plot).with_context(|| format!("reading {}", plot.display()))?;
            let prover = Prover::new(&bytes).context("not a valid plot")?;
            let challenge = hex32("challenge", &challenge)?;
            let qualities = prover
                .get_qualities_for_challenge(&challenge)
                .context("quality lookup failed")?;
            if qualities.is_empty() {
                println!("no proofs for this challenge");
            }
            for (i, q) in qualities.iter().enumerate() {
                println!("quality {i}: {}", hex::encode(q));
            }
            if let Some(index) = proof_index {
                let proof = prover
                    .get_full_proof(&challenge, index)
                    .context("proof retrieval failed")?;
                println!("proof {index}: {}", hex::encode(&proof));
            }
        }
        Cmd::Verify { k, seed, challenge, proof } => {
            let id = hex32("seed", &seed)?;
            let challenge = hex32("challenge", &challenge)?;
            let proof = hex::decode(&proof).context("proof is not valid hex")?;
            match validate_proof(&id, k, &challenge, &proof) {
                Some(quality) => println!("valid; quality {}", hex::encode(quality)),
                None => bail!("proof is invalid"),
            }
        }
        Cmd::Inspect { plot, json } => {
            let bytes = fs::read(&plot).with_context(|| format!("reading {}", plot.display()))?;
            let info = inspect(&bytes)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("k:      {}", info.k);
                println!("seed:   {}", info.seed);
                println!("format: {}", info.format);
                println!("size:   {} bytes", info.size_bytes);
                for (i, p) in info.table_pointers.iter().enumerate() {
                    let name = match i {
                        0..=6 => format!("table {}", i + 1),
                        7 => "C1".to_string(),
                        8 => "C2".to_string(),
                        _ => "C3".to_string(),
                    };
                    println!("{name}: offset {p}");
                }
            }
        }
    }
    Ok(())
}
