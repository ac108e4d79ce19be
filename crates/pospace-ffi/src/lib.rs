//! pospace-ffi — the opaque-handle C ABI.
//!
//! Handle lifecycle: `pospace_create_table` builds a plot and returns an
//! owning handle; `pospace_create_prover` borrows it. The table must
//! outlive every prover created from it — freeing the table first is
//! undefined behaviour, exactly as the embedding contract states. Query
//! calls never unwind across the boundary: any internal error (and any
//! panic) surfaces as `false`.
//!
//! Challenges are synthesized from a `u32` index: the index little-endian
//! in the first four bytes, the rest zero.

#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_safety_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::not_unsafe_ptr_arg_deref
)]

use std::panic::{catch_unwind, AssertUnwindSafe};

use pospace_core::params::ID_LEN;
use pospace_plot::{Plotter, PlotterConfig};
use pospace_prove::{validate_proof, Prover};

/// An owning plot handle: just the artifact bytes.
pub struct PlotTable {
    bytes: Vec<u8>,
}

/// A prover handle borrowing a [`PlotTable`].
pub struct PlotProver {
    table: *const PlotTable,
}

fn challenge_from_index(index: u32) -> [u8; 32] {
    let mut challenge = [0u8; 32];
    challenge[..4].copy_from_slice(&index.to_le_bytes());
    challenge
}

/// Build a plot for `(k, seed)`; returns null on failure.
///
/// # Safety
/// `seed` must point at 32 readable bytes.
#[no_mangle]
pub unsafe extern "C" fn pospace_create_table(k: u8, seed: *const u8) -> *mut PlotTable {
    if seed.is_null() {
        return std::ptr::null_mut();
    }
    let mut id = [0u8; ID_LEN];
    // SAFETY: caller guarantees 32 readable bytes.
    id.copy_from_slice(unsafe { std::slice::from_raw_parts(seed, ID_LEN) });

    catch_unwind(|| Plotter.create_plot(k, &id, PlotterConfig::default()))
        .map_or(std::ptr::null_mut(), |r| match r {
            Ok(bytes) => Box::into_raw(Box::new(PlotTable { bytes })),
            Err(_) => std::ptr::null_mut(),
        })
}

/// Free a table created by [`pospace_create_table`].
///
/// # Safety
/// `table` must be a handle from `pospace_create_table`, not yet freed, and
/// no prover over it may still be alive.
#[no_mangle]
pub unsafe extern "C" fn pospace_free_table(table: *mut PlotTable) {
    if !table.is_null() {
        // SAFETY: called exactly once on a pointer we allocated.
        drop(unsafe { Box::from_raw(table) });
    }
}

/// Create a prover over `table`.
///
/// # Safety
/// `table` must be a live handle from `pospace_create_table` and must
/// outlive the returned prover.
#[no_mangle]
pub unsafe extern "C" fn pospace_create_prover(table: *const PlotTable) -> *mut PlotProver {
    if table.is_null() {
        return std::ptr::null_mut();
    }
    Box::into_raw(Box::new(PlotProver { table }))
}

/// Free a prover created by [`pospace_create_prover`].
///
/// # Safety
/// `prover` must be a handle from `pospace_create_prover`, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn pospace_free_prover(prover: *mut PlotProver) {
    if !prover.is_null() {
        // SAFETY: called exactly once on a pointer we allocated.
        drop(unsafe { Box::from_raw(prover) });
    }
}

/// First quality for `challenge_index`, written to `quality_out[32]`.
/// Returns `false` when no proof exists or on any internal error.
///
/// # Safety
/// `prover` must be live (with its table still alive) and `quality_out`
/// must point at 32 writable bytes.
#[no_mangle]
pub unsafe extern "C" fn pospace_find_quality(
    prover: *const PlotProver,
    challenge_index: u32,
    quality_out: *mut u8,
) -> bool {
    if prover.is_null() || quality_out.is_null() {
        return false;
    }
    // SAFETY: caller keeps both handles alive for the duration of the call.
    let table = unsafe { &*(*prover).table };
    let challenge = challenge_from_index(challenge_index);

    catch_unwind(AssertUnwindSafe(|| {
        let p = Prover::new(&table.bytes)?;
        p.get_qualities_for_challenge(&challenge)
    }))
    .map_or(false, |r| match r {
        Ok(qualities) => qualities.first().map_or(false, |q| {
            // SAFETY: caller guarantees 32 writable bytes.
            unsafe { std::ptr::copy_nonoverlapping(q.as_ptr(), quality_out, 32) };
            true
        }),
        Err(_) => false,
    })
}

/// Full proof (`k*8` bytes) for the first quality of `challenge_index`.
///
/// # Safety
/// `prover` must be live (with its table still alive) and `proof_out` must
/// point at `k*8` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn pospace_create_proof(
    prover: *const PlotProver,
    challenge_index: u32,
    proof_out: *mut u8,
) -> bool {
    if prover.is_null() || proof_out.is_null() {
        return false;
    }
    // SAFETY: caller keeps both handles alive for the duration of the call.
    let table = unsafe { &*(*prover).table };
    let challenge = challenge_from_index(challenge_index);

    catch_unwind(AssertUnwindSafe(|| {
        let p = Prover::new(&table.bytes)?;
        p.get_full_proof(&challenge, 0)
    }))
    .map_or(false, |r| match r {
        Ok(proof) => {
            // SAFETY: caller guarantees k*8 writable bytes, which is the
            // exact proof length.
            unsafe { std::ptr::copy_nonoverlapping(proof.as_ptr(), proof_out, proof.len()) };
            true
        }
        Err(_) => false,
    })
}

/// Validate a proof produced by [`pospace_create_proof`], writing the
/// quality to `quality_out[32]` on success.
///
/// Embedding restriction: even a valid proof is reported as `false` when
/// the challenge's bottom-5-bit quality selector is non-zero. Existing
/// callers depend on this wrapper-level policy.
///
/// # Safety
/// `seed` must point at 32 readable bytes, `proof` at `k*8` readable bytes,
/// and `quality_out` at 32 writable bytes (or be null to skip the copy).
#[no_mangle]
pub unsafe extern "C" fn pospace_is_proof_valid(
    k: u8,
    seed: *const u8,
    challenge_index: u32,
    proof: *const u8,
    quality_out: *mut u8,
) -> bool {
    if seed.is_null() || proof.is_null() {
        return false;
    }
    let mut id = [0u8; ID_LEN];
    // SAFETY: caller guarantees 32 readable bytes.
    id.copy_from_slice(unsafe { std::slice::from_raw_parts(seed, ID_LEN) });
    // SAFETY: caller guarantees k*8 readable bytes.
    let proof = unsafe { std::slice::from_raw_parts(proof, 8 * k as usize) };
    let challenge = challenge_from_index(challenge_index);

    let quality =
        catch_unwind(AssertUnwindSafe(|| validate_proof(&id, k, &challenge, proof))).ok().flatten();
    match quality {
        Some(q) if challenge[31] & 0x1f == 0 => {
            if !quality_out.is_null() {
                // SAFETY: caller guarantees 32 writable bytes.
                unsafe { std::ptr::copy_nonoverlapping(q.as_ptr(), quality_out, 32) };
            }
            true
        }
        _ => false,
    }
}
