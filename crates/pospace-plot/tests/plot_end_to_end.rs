//! The k=17 reference harness: build one plot, answer challenges, verify
//! every proof statelessly, and check the artifact's layout invariants.
//!
//! The plot is built once and shared across tests; at k=17 construction
//! sorts a few hundred MiB of entries and dominates the suite's runtime.

use std::sync::OnceLock;

use pospace_core::params::{ID_LEN, NUM_TABLE_POINTERS, PLOT_MAGIC};
use pospace_plot::{Plotter, PlotterConfig};
use pospace_prove::{validate_proof, Prover};
use sha2::{Digest, Sha256};

const K: u8 = 17;

/// Fixed seed of the reference harness.
const PLOT_ID: [u8; ID_LEN] = [
    35, 2, 52, 4, 51, 55, 23, 84, 91, 10, 111, 12, 13, 222, 151, 16, 228, 211, 254, 45, 92, 198,
    204, 10, 9, 10, 11, 129, 139, 171, 15, 23,
];

fn plot() -> &'static [u8] {
    static PLOT: OnceLock<Vec<u8>> = OnceLock::new();
    PLOT.get_or_init(|| {
        let cfg = PlotterConfig { buf_megabytes: 11, num_buckets: 0, stripe_size: 2000 };
        Plotter.create_plot(K, &PLOT_ID, cfg).expect("reference plot must build")
    })
}

/// Challenge schedule of the harness: SHA-256 of the big-endian index.
fn challenge_for(i: u32) -> [u8; 32] {
    Sha256::digest(i.to_be_bytes()).into()
}

#[test]
fn hundred_challenges_yield_the_expected_proofs() {
    let prover = Prover::new(plot()).unwrap();
    assert_eq!(prover.k(), K);
    assert_eq!(prover.id(), &PLOT_ID);

    let mut successes = 0u32;
    for i in 0..100u32 {
        let challenge = challenge_for(i);
        let qualities = prover.get_qualities_for_challenge(&challenge).unwrap();
        for (index, quality) in qualities.iter().enumerate() {
            let proof = prover.get_full_proof(&challenge, index).unwrap();
            assert_eq!(proof.len(), 8 * K as usize);

            // Prover and stateless verifier must agree on the quality.
            let verified =
                validate_proof(&PLOT_ID, K, &challenge, &proof).expect("honest proof rejected");
            assert_eq!(&verified, quality, "quality mismatch for challenge {i}");
            successes += 1;

            // A single flipped byte must be rejected.
            let mut tampered = proof.clone();
            tampered[0] = tampered[0].wrapping_add(1);
            assert!(validate_proof(&PLOT_ID, K, &challenge, &tampered).is_none());
        }
    }

    println!("successes: {successes}/100");
    // Loose distribution bound first, then the pinned reference count.
    assert!(successes > 50 && successes < 150, "proof count wildly off: {successes}");
    assert_eq!(successes, 93);
}

#[test]
fn edge_challenge_with_leading_ones_does_not_crash() {
    let prover = Prover::new(plot()).unwrap();
    let mut edge = [0u8; 32];
    hex::decode_to_slice(
        "fffffa2b647d4651c500076d7df4c6f352936cf293bd79c591a7b08e43d6adfb",
        &mut edge,
    )
    .unwrap();
    // Quality set may be empty; the lookup itself must succeed.
    prover.get_qualities_for_challenge(&edge).unwrap();
}

#[test]
fn header_pointers_are_strictly_increasing_and_in_bounds() {
    let plot = plot();
    assert_eq!(&plot[..PLOT_MAGIC.len()], PLOT_MAGIC);

    let mut off = PLOT_MAGIC.len() + ID_LEN + 1;
    let desc_len = u16::from_be_bytes([plot[off], plot[off + 1]]) as usize;
    off += 2 + desc_len;

    let mut last = (off + NUM_TABLE_POINTERS * 8) as u64 - 1;
    for i in 0..NUM_TABLE_POINTERS {
        let s = off + i * 8;
        let p = u64::from_be_bytes(plot[s..s + 8].try_into().unwrap());
        assert!(p > last, "pointer {i} does not advance: {p} <= {last}");
        assert!(p <= plot.len() as u64, "pointer {i} outside the artifact");
        last = p;
    }
}

#[test]
fn quality_selector_gates_the_embedding_wrapper() {
    let prover = Prover::new(plot()).unwrap();

    // Find a challenge whose bottom-5-bit selector is non-zero and which
    // has at least one proof.
    for i in 0..200u32 {
        let challenge = challenge_for(i);
        if challenge[31] & 0x1f == 0 {
            continue;
        }
        let qualities = prover.get_qualities_for_challenge(&challenge).unwrap();
        if qualities.is_empty() {
            continue;
        }
        let proof = prover.get_full_proof(&challenge, 0).unwrap();
        // The stateless verifier accepts the proof; the FFI wrapper's
        // selector restriction (tested in pospace-ffi) rejects exactly
        // this case at the boundary.
        assert!(validate_proof(&PLOT_ID, K, &challenge, &proof).is_some());
        return;
    }
    panic!("no challenge with a non-zero selector produced a proof");
}

#[test]
fn unrelated_seed_rejects_the_proofs() {
    let prover = Prover::new(plot()).unwrap();
    let mut other_id = PLOT_ID;
    other_id[4] ^= 0x40;
    for i in 0..20u32 {
        let challenge = challenge_for(i);
        for index in 0..prover.get_qualities_for_challenge(&challenge).unwrap().len() {
            let proof = prover.get_full_proof(&challenge, index).unwrap();
            assert!(validate_proof(&other_id, K, &challenge, &proof).is_none());
        }
    }
}
