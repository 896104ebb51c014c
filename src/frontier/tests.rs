use super::*;

use proptest::prelude::*;

use crate::hashing::{Hash, SENTINEL, sha256};

#[test]
fn test_skip_count_small_values() {
    assert_eq!(skip_count(1), 1);
    assert_eq!(skip_count(2), 2);
    assert_eq!(skip_count(3), 1);
    assert_eq!(skip_count(4), 3);
    assert_eq!(skip_count(5), 1);
    assert_eq!(skip_count(6), 2);
    assert_eq!(skip_count(8), 4);
    assert_eq!(skip_count(1 << 40), 41);
}

#[test]
fn test_skip_pointer_rows() {
    assert_eq!(skip_pointer_rows(1).collect::<Vec<_>>(), [0]);
    assert_eq!(skip_pointer_rows(2).collect::<Vec<_>>(), [1, 0]);
    assert_eq!(skip_pointer_rows(3).collect::<Vec<_>>(), [2]);
    assert_eq!(skip_pointer_rows(4).collect::<Vec<_>>(), [3, 2, 0]);
    assert_eq!(skip_pointer_rows(12).collect::<Vec<_>>(), [11, 10, 8]);
}

#[test]
fn test_rows_linked() {
    assert!(rows_linked(0, 1));
    assert!(rows_linked(1, 2));
    assert!(rows_linked(0, 2));
    assert!(!rows_linked(0, 3));
    assert!(rows_linked(2, 3));
    assert!(rows_linked(0, 4));
    assert!(!rows_linked(1, 4)); // delta 3 is not a power of two
    assert!(!rows_linked(1, 5)); // delta 4 exceeds k(5)'s reach
    assert!(!rows_linked(3, 3));
    assert!(!rows_linked(4, 3));
}

#[test]
fn test_skip_path_numbers_simple() {
    assert_eq!(skip_path_numbers(1, 1), [1]);
    assert_eq!(skip_path_numbers(1, 2), [1, 2]);
    // From 4 the largest back-link reaches row 0; the greedy descent stops
    // at the largest step that stays at or above lo.
    assert_eq!(skip_path_numbers(1, 4), [1, 2, 4]);
    assert_eq!(skip_path_numbers(1, 8), [1, 2, 4, 8]);
    assert_eq!(skip_path_numbers(2, 8), [2, 4, 8]);
    assert_eq!(skip_path_numbers(3, 8), [3, 4, 8]);
    assert_eq!(skip_path_numbers(5, 7), [5, 6, 7]);
}

#[test]
fn test_stitch_inserts_connecting_rows() {
    let stitched = stitch(&[1, 8]).unwrap();
    assert_eq!(stitched, [1, 2, 4, 8]);
    // Targets out of order and duplicated are normalized.
    let stitched = stitch(&[8, 1, 8]).unwrap();
    assert_eq!(stitched, [1, 2, 4, 8]);
    // A mid target forces the path through it.
    let with_mid = stitch(&[1, 3, 8]).unwrap();
    assert!(with_mid.contains(&3));
    assert_eq!(with_mid.first(), Some(&1));
    assert_eq!(with_mid.last(), Some(&8));
    assert!(stitch(&[]).is_err());
    assert!(stitch(&[0, 2]).is_err());
}

#[test]
fn test_ref_only_coverage() {
    // stitched [1,2,4,8]: pointers are 0; 1,0; 3,2,0; 7,6,4,0.
    let coverage = ref_only_coverage(&[1, 2, 4, 8]);
    assert_eq!(coverage.into_iter().collect::<Vec<_>>(), [3, 6, 7]);
}

/// Reference implementation: computes R(n) straight from the definition,
/// recursing through memoized earlier rows.
fn naive_row_hash(n: u64, inputs: &dyn Fn(u64) -> Hash, memo: &mut Vec<Option<Hash>>) -> Hash {
    if n == 0 {
        return SENTINEL;
    }
    if let Some(h) = memo[n as usize] {
        return h;
    }
    let mut data = Vec::new();
    data.extend_from_slice(inputs(n).as_bytes());
    for referent in skip_pointer_rows(n) {
        let rh = naive_row_hash(referent, inputs, memo);
        data.extend_from_slice(rh.as_bytes());
    }
    let h = sha256(&data);
    memo[n as usize] = Some(h);
    h
}

fn input_for(n: u64) -> Hash {
    sha256(format!("row input {n}").as_bytes())
}

#[test]
fn test_advance_matches_naive_definition() {
    let rows = 130u64;
    let mut memo = vec![None; rows as usize + 1];
    let mut frontier = HashFrontier::origin();
    assert_eq!(frontier.frontier_hash(), SENTINEL);
    for n in 1..=rows {
        frontier = frontier.advance(&input_for(n));
        assert_eq!(frontier.row_number(), n);
        assert_eq!(
            frontier.frontier_hash(),
            naive_row_hash(n, &input_for, &mut memo),
            "row {n}"
        );
        assert_eq!(frontier.levels().len(), HashFrontier::level_count(n));
    }
}

#[test]
fn test_level_rows_track_cleared_bits() {
    let mut frontier = HashFrontier::origin();
    for n in 1..=6 {
        frontier = frontier.advance(&input_for(n));
    }
    // 6 = 0b110: levels back rows 6 and 4.
    assert_eq!(frontier.level_rows(), [6, 4]);
    frontier = frontier.advance(&input_for(7));
    assert_eq!(frontier.level_rows(), [7, 6, 4]);
    frontier = frontier.advance(&input_for(8));
    assert_eq!(frontier.level_rows(), [8]);
}

#[test]
fn test_next_pointers_feed_advance() {
    let mut memo = vec![None; 20];
    let mut frontier = HashFrontier::origin();
    for n in 1..=11 {
        let pointers = frontier.next_pointers();
        let expected: Vec<u64> = skip_pointer_rows(n).collect();
        assert_eq!(
            pointers.iter().map(|p| p.0).collect::<Vec<_>>(),
            expected,
            "pointer rows of {n}"
        );
        for (row, hash) in &pointers {
            assert_eq!(*hash, naive_row_hash(*row, &input_for, &mut memo));
        }
        frontier = frontier.advance(&input_for(n));
    }
}

#[test]
fn test_serialization_round_trip() {
    let mut frontier = HashFrontier::origin();
    for n in 1..=13 {
        frontier = frontier.advance(&input_for(n));
    }
    let mut buf = Vec::new();
    frontier.write_to(&mut buf).unwrap();
    assert_eq!(buf.len(), frontier.serial_len());
    let read = HashFrontier::read_from(&mut buf.as_slice()).unwrap();
    assert_eq!(read, frontier);
}

#[test]
fn test_new_validates_level_count() {
    assert!(HashFrontier::new(5, vec![SENTINEL]).is_err());
    assert!(HashFrontier::new(5, vec![SENTINEL, SENTINEL]).is_ok());
}

proptest! {
    #[test]
    fn prop_skip_count_law(n in 1u64..u64::MAX) {
        prop_assert_eq!(skip_count(n), 1 + n.trailing_zeros());
    }

    #[test]
    fn prop_skip_path_is_valid(lo in 1u64..5_000, span in 0u64..5_000) {
        let hi = lo + span;
        let path = skip_path_numbers(lo, hi);
        prop_assert_eq!(*path.first().unwrap(), lo);
        prop_assert_eq!(*path.last().unwrap(), hi);
        for pair in path.windows(2) {
            prop_assert!(rows_linked(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn prop_stitch_contains_targets(targets in proptest::collection::vec(1u64..3_000, 1..6)) {
        let stitched = stitch(&targets).unwrap();
        for t in &targets {
            prop_assert!(stitched.contains(t));
        }
        for pair in stitched.windows(2) {
            prop_assert!(pair[0] < pair[1]);
            prop_assert!(rows_linked(pair[0], pair[1]));
        }
    }

    #[test]
    fn prop_coverage_disjoint_from_stitched(targets in proptest::collection::vec(1u64..2_000, 1..5)) {
        let stitched = stitch(&targets).unwrap();
        let coverage = ref_only_coverage(&stitched);
        for row in &coverage {
            prop_assert!(!stitched.contains(row));
        }
        // Every pointer of a stitched row is stitched, covered, or row 0.
        for &row in &stitched {
            for referent in skip_pointer_rows(row) {
                prop_assert!(
                    referent == 0 || stitched.contains(&referent) || coverage.contains(&referent)
                );
            }
        }
    }
}
