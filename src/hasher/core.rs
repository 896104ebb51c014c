use std::collections::BTreeMap;

use tracing::warn;

use crate::common::{LedgerError, Result};
use crate::frontier::HashFrontier;
use crate::hashing::Hash;
use crate::logparse::{LedgeredLine, LogListener};
use crate::salt::{self, TableSalt};

/// Input hash of one ledgered line under the grammar and optional salt
/// scheme of its ledger.
pub fn line_input_hash(line: &LedgeredLine<'_>, salter: Option<&TableSalt>) -> Hash {
    let cells = line.grammar.tokenize(line.line);
    salt::row_input_hash(&cells, salter, line.row_no)
}

/// Consumes row hashes as the hasher produces them. Gatherers are pushed
/// before writers so they observe each row first.
pub trait FrontierListener {
    fn row_hash_parsed(
        &mut self,
        input_hash: &Hash,
        frontier: &HashFrontier,
        prev_frontier: &HashFrontier,
    ) -> Result<()>;
}

/// Public summary of a parse run: the frontier and the end-of-line offset
/// of the last hashed row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogState {
    pub frontier: HashFrontier,
    pub eol: u64,
}

impl LogState {
    pub fn row_number(&self) -> u64 {
        self.frontier.row_number()
    }
}

/// Persisted snapshot enabling resumption at row `N = preFrontier.row + 1`:
/// the frontier *before* row N, row N's input hash, and the end-of-line
/// offsets of rows N and N-1. Re-derivable from the log up to byte `eol`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pre_frontier: HashFrontier,
    input_hash: Hash,
    eol: u64,
    prev_eol: u64,
}

impl Checkpoint {
    pub fn new(pre_frontier: HashFrontier, input_hash: Hash, eol: u64, prev_eol: u64) -> Self {
        Checkpoint {
            pre_frontier,
            input_hash,
            eol,
            prev_eol,
        }
    }

    /// The checkpointed row number.
    pub fn row_number(&self) -> u64 {
        self.pre_frontier.row_number() + 1
    }

    pub fn pre_frontier(&self) -> &HashFrontier {
        &self.pre_frontier
    }

    /// Input hash of the checkpointed row.
    pub fn input_hash(&self) -> &Hash {
        &self.input_hash
    }

    /// End-of-line offset of the checkpointed row.
    pub fn eol(&self) -> u64 {
        self.eol
    }

    /// End-of-line offset of the previous row; the byte position a resuming
    /// parser seeks to (the checkpointed row is then replayed and verified).
    pub fn prev_eol(&self) -> u64 {
        self.prev_eol
    }

    /// The frontier at the checkpointed row, derived by one advance.
    pub fn frontier(&self) -> HashFrontier {
        self.pre_frontier.advance(&self.input_hash)
    }
}

/// Row-count bookkeeping for one hashing run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HasherStats {
    pub rows_hashed: u64,
    /// First and last row advanced in this run; 0 when none were.
    pub first_row: u64,
    pub last_row: u64,
}

/// Advances the hash frontier as the parse progresses and fans each new row
/// hash out to the registered [`FrontierListener`]s.
///
/// Rows below the frontier are ignored (they precede the resume point); the
/// frontier row itself is replayed and verified; a row-number gap is an
/// orchestration bug and fails fast.
pub struct StateHasher<'a> {
    salter: Option<TableSalt>,
    frontier: HashFrontier,
    prev_frontier: Option<HashFrontier>,
    last_input: Option<Hash>,
    eol: Option<u64>,
    prev_eol: Option<u64>,
    stats: HasherStats,
    expected: BTreeMap<u64, Hash>,
    listeners: Vec<&'a mut dyn FrontierListener>,
}

impl<'a> StateHasher<'a> {
    /// Fresh hasher at `F(0)`.
    pub fn new(salter: Option<TableSalt>) -> Self {
        StateHasher {
            salter,
            frontier: HashFrontier::origin(),
            prev_frontier: None,
            last_input: None,
            eol: Some(0),
            prev_eol: None,
            stats: HasherStats::default(),
            expected: BTreeMap::new(),
            listeners: Vec::new(),
        }
    }

    /// Resumes from a saved checkpoint. The parser should be positioned at
    /// `checkpoint.prev_eol()` with its row number at `row_number - 1`, so
    /// the checkpointed row is replayed and verified.
    pub fn from_checkpoint(checkpoint: &Checkpoint, salter: Option<TableSalt>) -> Self {
        StateHasher {
            salter,
            frontier: checkpoint.frontier(),
            prev_frontier: Some(checkpoint.pre_frontier().clone()),
            last_input: Some(*checkpoint.input_hash()),
            eol: Some(checkpoint.eol()),
            prev_eol: Some(checkpoint.prev_eol()),
            stats: HasherStats::default(),
            expected: BTreeMap::new(),
            listeners: Vec::new(),
        }
    }

    /// Resumes from reconstructed state (e.g. rebuilt from the chain file),
    /// where the end-of-line offsets may be unknown.
    pub fn from_state(
        frontier: HashFrontier,
        prev_frontier: Option<HashFrontier>,
        last_input: Option<Hash>,
        eol: Option<u64>,
        prev_eol: Option<u64>,
    ) -> Self {
        StateHasher {
            salter: None,
            frontier,
            prev_frontier,
            last_input,
            eol,
            prev_eol,
            stats: HasherStats::default(),
            expected: BTreeMap::new(),
            listeners: Vec::new(),
        }
    }

    pub fn set_salter(&mut self, salter: Option<TableSalt>) {
        self.salter = salter;
    }

    /// Registers a row-hash consumer. Latest pushed runs last, so push
    /// gatherers before writers.
    pub fn push_listener(&mut self, listener: &'a mut dyn FrontierListener) {
        self.listeners.push(listener);
    }

    /// Registers a frontier hash to verify when the parse advances past
    /// `row`. Mismatch fails the parse with `HashConflict`.
    pub fn expect_frontier(&mut self, row: u64, frontier_hash: Hash) {
        self.expected.insert(row, frontier_hash);
    }

    pub fn frontier(&self) -> &HashFrontier {
        &self.frontier
    }

    pub fn stats(&self) -> HasherStats {
        self.stats
    }

    /// The public summary at this point of the parse.
    pub fn state(&self) -> LogState {
        LogState {
            frontier: self.frontier.clone(),
            eol: self.eol.unwrap_or(0),
        }
    }

    /// The resumable snapshot for the last hashed row, if enough state is
    /// known to write one. `None` at `F(0)` and when the end-of-line
    /// offsets were never observed (state rebuilt from the chain with no
    /// rows replayed or advanced).
    pub fn parse_state(&self) -> Option<Checkpoint> {
        let pre = self.prev_frontier.clone()?;
        let input = self.last_input?;
        Some(Checkpoint::new(pre, input, self.eol?, self.prev_eol?))
    }

    fn advance(&mut self, line: &LedgeredLine<'_>) -> Result<()> {
        let row = line.row_no;
        let input = line_input_hash(line, self.salter.as_ref());
        let next = self.frontier.advance(&input);
        if let Some(expected) = self.expected.get(&row) {
            if *expected != next.frontier_hash() {
                return Err(LedgerError::HashConflict {
                    row,
                    detail: format!(
                        "recomputed frontier hash {} does not match saved checkpoint {}",
                        next.frontier_hash(),
                        expected
                    ),
                });
            }
        }
        self.prev_frontier = Some(std::mem::replace(&mut self.frontier, next));
        self.last_input = Some(input);
        self.prev_eol = self.eol;
        self.eol = Some(line.eol());
        self.stats.rows_hashed += 1;
        if self.stats.first_row == 0 {
            self.stats.first_row = row;
        }
        self.stats.last_row = row;

        let prev = self.prev_frontier.as_ref().expect("set above");
        for listener in self.listeners.iter_mut() {
            listener.row_hash_parsed(&input, &self.frontier, prev)?;
        }
        Ok(())
    }

    /// Replays the row the frontier already covers and verifies it hashes
    /// to the same values.
    fn verify_replay(&mut self, line: &LedgeredLine<'_>) -> Result<()> {
        let row = line.row_no;
        let input = line_input_hash(line, self.salter.as_ref());
        if let Some(last) = &self.last_input {
            if *last != input {
                return Err(LedgerError::HashConflict {
                    row,
                    detail: "replayed input hash differs from resumed state".into(),
                });
            }
        }
        if let Some(pre) = &self.prev_frontier {
            let recomputed = pre.advance(&input).frontier_hash();
            if recomputed != self.frontier.frontier_hash() {
                return Err(LedgerError::HashConflict {
                    row,
                    detail: "replayed row hash differs from resumed state".into(),
                });
            }
        }
        // The stored EOL is authoritative; an observed difference is
        // reported but never applied.
        match self.eol {
            Some(stored) if stored != line.eol() => {
                warn!(
                    row,
                    stored_eol = stored,
                    observed_eol = line.eol(),
                    "replayed row ends at a different offset than recorded"
                );
            }
            Some(_) => {}
            None => self.eol = Some(line.eol()),
        }
        Ok(())
    }
}

impl LogListener for StateHasher<'_> {
    fn observe_ledgered_line(&mut self, line: &LedgeredLine<'_>) -> Result<()> {
        let row = line.row_no;
        let at = self.frontier.row_number();
        if row == at + 1 {
            self.advance(line)
        } else if row == at && at > 0 {
            self.verify_replay(line)
        } else if row <= at {
            // Before the resume point; nothing to do.
            Ok(())
        } else {
            Err(LedgerError::invalid_state(format!(
                "row {row} reached the hasher while the frontier is at {at}; rows were skipped"
            )))
        }
    }
}
