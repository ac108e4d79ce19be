//! Full opaque-handle lifecycle against a real plot.

use pospace_ffi::{
    pospace_create_proof, pospace_create_prover, pospace_create_table, pospace_find_quality,
    pospace_free_prover, pospace_free_table, pospace_is_proof_valid,
};

const SEED: [u8; 32] = [
    35, 2, 52, 4, 51, 55, 23, 84, 91, 10, 111, 12, 13, 222, 151, 16, 228, 211, 254, 45, 92, 198,
    204, 10, 9, 10, 11, 129, 139, 171, 15, 23,
];
const K: u8 = 17;

#[test]
fn table_prover_proof_cycle() {
    // SAFETY: every pointer passed below is either a live handle created
    // here or a buffer of the documented size; the table outlives the
    // prover and each handle is freed exactly once.
    unsafe {
        let table = pospace_create_table(K, SEED.as_ptr());
        assert!(!table.is_null(), "reference plot failed to build");
        let prover = pospace_create_prover(table);
        assert!(!prover.is_null());

        let mut quality = [0u8; 32];
        let mut proof = vec![0u8; K as usize * 8];
        let mut proven = 0u32;
        for index in 0..16u32 {
            if !pospace_find_quality(prover, index, quality.as_mut_ptr()) {
                // Roughly a third of indices have no proof.
                assert!(!pospace_create_proof(prover, index, proof.as_mut_ptr()));
                continue;
            }
            assert!(pospace_create_proof(prover, index, proof.as_mut_ptr()));

            let mut verified_quality = [0u8; 32];
            assert!(pospace_is_proof_valid(
                K,
                SEED.as_ptr(),
                index,
                proof.as_ptr(),
                verified_quality.as_mut_ptr(),
            ));
            // The wrapper and the prover agree on the quality bytes.
            assert_eq!(verified_quality, quality);

            // Tampering is caught at the wrapper too.
            proof[1] ^= 0x08;
            assert!(!pospace_is_proof_valid(
                K,
                SEED.as_ptr(),
                index,
                proof.as_ptr(),
                std::ptr::null_mut(),
            ));
            proven += 1;
        }
        assert!(proven > 0, "no index out of 16 produced a proof");

        pospace_free_prover(prover);
        pospace_free_table(table);
    }
}

#[test]
fn invalid_k_fails_table_creation() {
    // SAFETY: seed buffer is valid; a null return needs no free.
    unsafe {
        assert!(pospace_create_table(3, SEED.as_ptr()).is_null());
    }
}
