use std::collections::{BTreeMap, BTreeSet};

use digest::Digest;
use sha2::Sha256;

use crate::common::{LedgerError, Result};
use crate::frontier::{self, HashFrontier, skip_count, skip_pointer_rows};
use crate::hasher::FrontierListener;
use crate::hashing::{self, Hash, SENTINEL};

/// One row of a skip path: the row's input hash and all of its skip
/// pointers, exactly the preimage of the row hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathRow {
    row_number: u64,
    input_hash: Hash,
    pointers: Vec<Hash>,
    row_hash: Hash,
}

impl PathRow {
    /// Builds the row and computes its hash. The pointer count must match
    /// the row's skip count, in level order (nearest referent first).
    pub fn new(row_number: u64, input_hash: Hash, pointers: Vec<Hash>) -> Result<Self> {
        if row_number == 0 {
            return Err(LedgerError::out_of_range("path rows start at 1"));
        }
        let skips = skip_count(row_number) as usize;
        if pointers.len() != skips {
            return Err(LedgerError::invalid_state(format!(
                "row {row_number} carries {skips} skip pointers, got {}",
                pointers.len()
            )));
        }
        let mut hasher = Sha256::new();
        hasher.update(input_hash.as_bytes());
        for pointer in &pointers {
            hasher.update(pointer.as_bytes());
        }
        let row_hash = hashing::finish(hasher);
        Ok(PathRow {
            row_number,
            input_hash,
            pointers,
            row_hash,
        })
    }

    pub fn row_number(&self) -> u64 {
        self.row_number
    }

    pub fn input_hash(&self) -> &Hash {
        &self.input_hash
    }

    /// `R(rowNumber)`, computed from the row data at construction.
    pub fn row_hash(&self) -> &Hash {
        &self.row_hash
    }

    pub fn pointers(&self) -> &[Hash] {
        &self.pointers
    }

    /// The hash of referent `rowNumber - 2^level`.
    pub fn pointer(&self, level: u32) -> Option<&Hash> {
        self.pointers.get(level as usize)
    }
}

/// A verified skip path: a strictly ascending run of rows in which each
/// consecutive pair is connected by a skip pointer, so the last row's hash
/// commits to every row on the path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    rows: Vec<PathRow>,
}

impl Path {
    /// Verifies linkage: rows strictly ascend, each hop spans a power of
    /// two within the upper row's reach, and the upper row's pointer at
    /// that level equals the lower row's hash.
    pub fn new(rows: Vec<PathRow>) -> Result<Self> {
        if rows.is_empty() {
            return Err(LedgerError::out_of_range("a path requires at least one row"));
        }
        for pair in rows.windows(2) {
            let (lo, hi) = (&pair[0], &pair[1]);
            if !frontier::rows_linked(lo.row_number(), hi.row_number()) {
                return Err(LedgerError::invalid_state(format!(
                    "path rows {} and {} are not linked",
                    lo.row_number(),
                    hi.row_number()
                )));
            }
            let level = (hi.row_number() - lo.row_number()).trailing_zeros();
            let pointer = hi.pointer(level).expect("level < skip count by linkage");
            if pointer != lo.row_hash() {
                return Err(LedgerError::HashConflict {
                    row: hi.row_number(),
                    detail: format!(
                        "pointer to row {} does not match that row's hash",
                        lo.row_number()
                    ),
                });
            }
        }
        Ok(Path { rows })
    }

    pub fn rows(&self) -> &[PathRow] {
        &self.rows
    }

    pub fn first(&self) -> &PathRow {
        &self.rows[0]
    }

    pub fn last(&self) -> &PathRow {
        &self.rows[self.rows.len() - 1]
    }

    /// Lowest row number on the path.
    pub fn lo(&self) -> u64 {
        self.first().row_number()
    }

    /// Highest row number on the path.
    pub fn hi(&self) -> u64 {
        self.last().row_number()
    }

    pub fn has_row(&self, row_number: u64) -> bool {
        self.row_by_number(row_number).is_some()
    }

    pub fn row_by_number(&self, row_number: u64) -> Option<&PathRow> {
        self.rows
            .binary_search_by_key(&row_number, PathRow::row_number)
            .ok()
            .map(|i| &self.rows[i])
    }
}

/// Collects, from the hasher's row events, exactly the hashes needed to
/// assemble a stitched skip path over the target rows.
///
/// Input hashes are kept for stitched rows; row hashes for stitched rows
/// and for rows they reference. On the first observed row, the previous
/// frontier back-fills the hashes of that row's own referents (the rows
/// before the resume point).
pub struct PathGatherer {
    stitched: Vec<u64>,
    stitched_set: BTreeSet<u64>,
    coverage: BTreeSet<u64>,
    inputs: BTreeMap<u64, Hash>,
    row_hashes: BTreeMap<u64, Hash>,
    saw_first: bool,
}

impl PathGatherer {
    pub fn new(targets: &[u64]) -> Result<Self> {
        let stitched = frontier::stitch(targets)?;
        let stitched_set: BTreeSet<u64> = stitched.iter().copied().collect();
        let coverage = frontier::ref_only_coverage(&stitched);
        Ok(PathGatherer {
            stitched,
            stitched_set,
            coverage,
            inputs: BTreeMap::new(),
            row_hashes: BTreeMap::new(),
            saw_first: false,
        })
    }

    pub fn stitched_rows(&self) -> &[u64] {
        &self.stitched
    }

    /// Lowest row whose hash the path needs; hashing must start at or
    /// below it.
    pub fn min_row(&self) -> u64 {
        let lo = self.stitched[0];
        match self.coverage.first() {
            Some(&c) => c.min(lo),
            None => lo,
        }
    }

    /// Highest row on the path; the parse must reach it.
    pub fn max_row(&self) -> u64 {
        *self.stitched.last().expect("stitch is never empty")
    }

    /// Whether every stitched row has been observed.
    pub fn is_complete(&self) -> bool {
        self.stitched.iter().all(|n| self.inputs.contains_key(n))
    }

    /// Assembles and verifies the path once gathering is complete.
    pub fn build(&self) -> Result<Path> {
        let mut rows = Vec::with_capacity(self.stitched.len());
        for &n in &self.stitched {
            let input = *self.inputs.get(&n).ok_or_else(|| {
                LedgerError::out_of_range(format!("path row {n} was never parsed"))
            })?;
            let mut pointers = Vec::with_capacity(skip_count(n) as usize);
            for referent in skip_pointer_rows(n) {
                let hash = if referent == 0 {
                    SENTINEL
                } else {
                    *self.row_hashes.get(&referent).ok_or_else(|| {
                        LedgerError::out_of_range(format!(
                            "hash of row {referent}, referenced by path row {n}, was never parsed"
                        ))
                    })?
                };
                pointers.push(hash);
            }
            rows.push(PathRow::new(n, input, pointers)?);
        }
        Path::new(rows)
    }
}

impl FrontierListener for PathGatherer {
    fn row_hash_parsed(
        &mut self,
        input_hash: &Hash,
        frontier: &HashFrontier,
        prev_frontier: &HashFrontier,
    ) -> Result<()> {
        let row = frontier.row_number();
        let first = !std::mem::replace(&mut self.saw_first, true);
        if self.stitched_set.contains(&row) {
            if first {
                // The rows this one references were hashed before the
                // resume point; the previous frontier carries them.
                for (referent, hash) in prev_frontier.next_pointers() {
                    if referent > 0 {
                        self.row_hashes.insert(referent, hash);
                    }
                }
            }
            self.inputs.insert(row, *input_hash);
            self.row_hashes.insert(row, frontier.frontier_hash());
        } else if self.coverage.contains(&row) {
            self.row_hashes.insert(row, frontier.frontier_hash());
        }
        Ok(())
    }
}
