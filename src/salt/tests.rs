use super::*;

use digest::Digest;
use sha2::Sha256;

use crate::hashing::{Hash, SENTINEL, sha256};

fn h(hasher: Sha256) -> Hash {
    crate::hashing::finish(hasher)
}

#[test]
fn test_row_salt_derivation() {
    // rowSalt = SHA256(seed ∥ bigEndian64(N)), per the salted hashing rules.
    let salter = TableSalt::new([0xaa; 32]);
    let expected = h(Sha256::new()
        .chain_update([0xaa; 32])
        .chain_update(1u64.to_be_bytes()));
    let cell0 = h(Sha256::new()
        .chain_update(expected.as_bytes())
        .chain_update(0u32.to_be_bytes()));
    assert_eq!(salter.row_salt(1).cell_salt(0), cell0);
}

#[test]
fn test_salted_single_cell_input_hash() {
    // Scenario: seed of 0xAA bytes, single line "hello".
    let salter = TableSalt::new([0xaa; 32]);
    let cell_salt = salter.row_salt(1).cell_salt(0);
    let expected = h(Sha256::new()
        .chain_update(cell_salt.as_bytes())
        .chain_update(b"hello"));
    assert_eq!(row_input_hash(&[b"hello"], Some(&salter), 1), expected);
}

#[test]
fn test_seed_changes_input_hash() {
    let a = TableSalt::new([0xaa; 32]);
    let mut seed = [0xaa; 32];
    seed[31] ^= 1;
    let b = TableSalt::new(seed);
    assert_ne!(
        row_input_hash(&[b"hello"], Some(&a), 1),
        row_input_hash(&[b"hello"], Some(&b), 1)
    );
    // Determinism: same seed, same bits.
    assert_eq!(
        row_input_hash(&[b"hello"], Some(&a), 1),
        row_input_hash(&[b"hello"], Some(&TableSalt::new([0xaa; 32])), 1)
    );
}

#[test]
fn test_unsalted_input_hashes() {
    // No cells → sentinel.
    assert_eq!(row_input_hash(&[], None, 1), SENTINEL);
    // One cell → direct digest of the cell bytes.
    assert_eq!(row_input_hash(&[b"abc"], None, 1), sha256(b"abc"));
    // Two cells → digest of concatenated cell digests.
    let expected = h(Sha256::new()
        .chain_update(sha256(b"alpha").as_bytes())
        .chain_update(sha256(b"beta").as_bytes()));
    assert_eq!(row_input_hash(&[b"alpha", b"beta"], None, 1), expected);
}

#[test]
fn test_row_number_matters_when_salted() {
    let salter = TableSalt::new([3; 32]);
    assert_ne!(
        row_input_hash(&[b"x"], Some(&salter), 1),
        row_input_hash(&[b"x"], Some(&salter), 2)
    );
    // Unsalted hashing ignores the row number.
    assert_eq!(
        row_input_hash(&[b"x"], None, 1),
        row_input_hash(&[b"x"], None, 2)
    );
}

#[test]
fn test_salted_cells_match_scheme_derivation() {
    let salter = TableSalt::new([9; 32]);
    let row_salt = salter.row_salt(7);
    let cells: Vec<(&[u8], Option<Hash>)> = vec![
        (b"one", Some(row_salt.cell_salt(0))),
        (b"two", Some(row_salt.cell_salt(1))),
    ];
    assert_eq!(
        salted_cells_input_hash(&cells),
        row_input_hash(&[b"one", b"two"], Some(&salter), 7)
    );
}

#[test]
fn test_debug_hides_seed() {
    let salter = TableSalt::new([0x42; 32]);
    assert_eq!(format!("{salter:?}"), "TableSalt(..)");
}
