use super::*;

use std::io::Cursor;

use crate::common::LedgerError;
use crate::grammar::Grammar;
use crate::hasher::StateHasher;
use crate::hashing::{Hash, SENTINEL};
use crate::lines::LineParser;
use crate::logparse::LogParser;

fn log_of(rows: u64) -> Vec<u8> {
    let mut data = Vec::new();
    for n in 1..=rows {
        data.extend_from_slice(format!("entry-{n} payload-{n}\n").as_bytes());
    }
    data
}

/// Parses the whole log, feeding the gatherer, and returns the final
/// frontier hash.
fn gather(data: &[u8], gatherer: &mut PathGatherer) -> Hash {
    let frontier_hash;
    {
        let mut hasher = StateHasher::new(None);
        hasher.push_listener(gatherer);
        let mut lines = LineParser::new(Cursor::new(data.to_vec()));
        let mut parser = LogParser::new(Grammar::default());
        parser.parse(&mut lines, &mut hasher).unwrap();
        frontier_hash = hasher.frontier().frontier_hash();
    }
    frontier_hash
}

#[test]
fn test_full_path_commits_to_last_row() {
    let data = log_of(100);
    let mut gatherer = PathGatherer::new(&[1, 100]).unwrap();
    let tip = gather(&data, &mut gatherer);
    assert!(gatherer.is_complete());
    let path = gatherer.build().unwrap();
    assert_eq!(path.lo(), 1);
    assert_eq!(path.hi(), 100);
    // Path soundness: re-hashing the path yields the frontier hash.
    assert_eq!(*path.last().row_hash(), tip);
}

#[test]
fn test_path_through_target_row() {
    let data = log_of(64);
    let mut gatherer = PathGatherer::new(&[1, 23, 64]).unwrap();
    let tip = gather(&data, &mut gatherer);
    let path = gatherer.build().unwrap();
    assert!(path.has_row(23));
    assert_eq!(*path.last().row_hash(), tip);
    let row23 = path.row_by_number(23).unwrap();
    assert_eq!(row23.row_number(), 23);
    assert!(path.row_by_number(24).is_none() || path.has_row(24));
}

#[test]
fn test_single_row_path() {
    let data = log_of(9);
    let mut gatherer = PathGatherer::new(&[9]).unwrap();
    gather(&data, &mut gatherer);
    let path = gatherer.build().unwrap();
    assert_eq!(path.lo(), 9);
    assert_eq!(path.hi(), 9);
    assert_eq!(path.rows().len(), 1);
}

#[test]
fn test_min_row_covers_references() {
    // A path over {9} needs R(8): min_row dips below the lowest target.
    let gatherer = PathGatherer::new(&[9]).unwrap();
    assert_eq!(gatherer.min_row(), 8);
    assert_eq!(gatherer.max_row(), 9);
    // {1, 8} stitches to [1,2,4,8]; 8 references 7 and 6.
    let gatherer = PathGatherer::new(&[1, 8]).unwrap();
    assert_eq!(gatherer.stitched_rows(), [1, 2, 4, 8]);
    assert_eq!(gatherer.min_row(), 1);
}

#[test]
fn test_incomplete_gather_fails_build() {
    let data = log_of(10);
    // Ask for a row past the end of the log.
    let mut gatherer = PathGatherer::new(&[1, 12]).unwrap();
    gather(&data, &mut gatherer);
    assert!(!gatherer.is_complete());
    assert!(matches!(
        gatherer.build(),
        Err(LedgerError::IndexOutOfRange(_))
    ));
}

#[test]
fn test_gather_resumed_from_checkpoint_backfills() {
    let data = log_of(40);
    // First pass: hash rows 1..=32 and checkpoint.
    let mut first = StateHasher::new(None);
    {
        let mut lines = LineParser::new(Cursor::new(data.clone()));
        let mut parser = LogParser::new(Grammar::default());
        parser.set_max_row_no(32);
        parser.parse(&mut lines, &mut first).unwrap();
    }
    let ckpt = first.parse_state().unwrap();
    assert_eq!(ckpt.row_number(), 32);

    // Resume at row 32 replay, gathering a path over {33, 40}. Row 33's
    // referent (row 32) is back-filled from the previous frontier.
    let mut gatherer = PathGatherer::new(&[33, 40]).unwrap();
    let tip;
    {
        let mut hasher = StateHasher::from_checkpoint(&ckpt, None);
        hasher.push_listener(&mut gatherer);
        let mut cursor = Cursor::new(data.clone());
        cursor.set_position(ckpt.prev_eol());
        let mut lines = LineParser::with_state(cursor, ckpt.prev_eol(), 31);
        let mut parser = LogParser::new(Grammar::default());
        parser.set_row_no(31);
        parser.parse(&mut lines, &mut hasher).unwrap();
        tip = hasher.frontier().frontier_hash();
    }
    let path = gatherer.build().unwrap();
    assert_eq!(path.lo(), 33);
    assert_eq!(path.hi(), 40);
    assert_eq!(*path.last().row_hash(), tip);

    // The same path gathered in a full pass is identical.
    let mut full = PathGatherer::new(&[33, 40]).unwrap();
    gather(&data, &mut full);
    assert_eq!(full.build().unwrap(), path);
}

#[test]
fn test_path_rejects_tampered_pointer() {
    let data = log_of(16);
    let mut gatherer = PathGatherer::new(&[1, 16]).unwrap();
    gather(&data, &mut gatherer);
    let path = gatherer.build().unwrap();

    // Rebuild the same rows but flip one pointer hash.
    let mut rows: Vec<PathRow> = path.rows().to_vec();
    let victim = rows.len() - 1;
    let mut pointers = rows[victim].pointers().to_vec();
    let mut bytes = *pointers[0].as_bytes();
    bytes[0] ^= 1;
    pointers[0] = Hash::from_bytes(bytes);
    rows[victim] = PathRow::new(rows[victim].row_number(), *rows[victim].input_hash(), pointers)
        .unwrap();
    assert!(matches!(
        Path::new(rows),
        Err(LedgerError::HashConflict { .. })
    ));
}

#[test]
fn test_path_rejects_unlinked_rows() {
    let a = PathRow::new(1, SENTINEL, vec![SENTINEL]).unwrap();
    let c = PathRow::new(3, SENTINEL, vec![SENTINEL]).unwrap();
    assert!(matches!(
        Path::new(vec![a, c]),
        Err(LedgerError::InvalidState(_))
    ));
    assert!(Path::new(vec![]).is_err());
}

#[test]
fn test_path_row_pointer_count_enforced() {
    // k(4) = 3.
    assert!(PathRow::new(4, SENTINEL, vec![SENTINEL; 2]).is_err());
    assert!(PathRow::new(4, SENTINEL, vec![SENTINEL; 3]).is_ok());
    assert!(PathRow::new(0, SENTINEL, vec![]).is_err());
}
