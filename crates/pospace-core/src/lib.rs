//! pospace-core — primitives shared by the plotter, prover and verifier.
//!
//! This crate defines the **stable boundary** used across the workspace:
//! - plot parameters and derived field widths ([`params`]),
//! - the structured error type ([`error`]),
//! - MSB-first bit packing and extraction ([`bits`]),
//! - the dense liveness index used by back-propagation ([`bitfield`]),
//! - bit-packed entry codecs and size tables ([`entries`]),
//! - the ChaCha8/BLAKE3 hash core ([`hashing`]),
//! - the adjacent-bucket match engine ([`matching`]),
//! - line points and park/delta encoding ([`encoding`]).
//!
//! Everything here is deterministic and allocation-light; the heavy lifting
//! (sorting, phases, artifact assembly) lives in `pospace-plot`.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
// Small, explicit allowlist to keep docs readable and APIs ergonomic.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_lossless,
    clippy::doc_markdown
)]

/// Dense boolean index over entry positions with a rank accelerator.
pub mod bitfield;
/// MSB-first bit packing/extraction over byte buffers.
pub mod bits;
/// Line points, Rice-coded delta tails and fixed-size parks.
pub mod encoding;
/// Bit-packed entry codecs and per-phase entry size tables.
pub mod entries;
/// Structured error type shared by the workspace.
pub mod error;
/// F1 (ChaCha8 keystream) and Fx (BLAKE3) output functions.
pub mod hashing;
/// Adjacent-bucket match engine and the precomputed residue targets.
pub mod matching;
/// Plot parameters and derived field widths.
pub mod params;

pub use bitfield::Bitfield;
pub use bits::{BitReader, BitWriter, Meta};
pub use error::{PosError, Result};
