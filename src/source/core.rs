use std::collections::BTreeSet;

use crate::common::{LedgerError, Result};
use crate::grammar::Grammar;
use crate::hashing::Hash;
use crate::logparse::{LedgeredLine, LogListener};
use crate::salt::{self, TableSalt};

/// Cell type tag. Text logs only produce strings; the tag keeps room for
/// typed bindings layered on top.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellType {
    String,
}

/// One tokenized cell, with its salt when the ledger salts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceCell {
    cell_type: CellType,
    value: String,
    salt: Option<Hash>,
}

impl SourceCell {
    pub fn new(value: String, salt: Option<Hash>) -> Self {
        SourceCell {
            cell_type: CellType::String,
            value,
            salt,
        }
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn salt(&self) -> Option<&Hash> {
        self.salt.as_ref()
    }
}

/// A reconstructed row: its number and typed cells. Carries everything
/// needed to recompute the row's input hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRow {
    row_number: u64,
    cells: Vec<SourceCell>,
}

impl SourceRow {
    pub fn new(row_number: u64, cells: Vec<SourceCell>) -> Self {
        SourceRow { row_number, cells }
    }

    /// Tokenizes a ledgered line into a row under the active salt scheme.
    pub fn build(
        row_number: u64,
        grammar: &Grammar,
        salter: Option<&TableSalt>,
        line: &[u8],
    ) -> Self {
        let tokens = grammar.tokenize(line);
        let row_salt = salter.map(|s| s.row_salt(row_number));
        let cells = tokens
            .iter()
            .enumerate()
            .map(|(column, token)| {
                let salt = row_salt.as_ref().map(|rs| rs.cell_salt(column as u32));
                SourceCell::new(String::from_utf8_lossy(token).into_owned(), salt)
            })
            .collect();
        SourceRow { row_number, cells }
    }

    pub fn row_number(&self) -> u64 {
        self.row_number
    }

    pub fn cells(&self) -> &[SourceCell] {
        &self.cells
    }

    /// Recomputes `I(rowNumber)` from the cells and their salts.
    pub fn input_hash(&self) -> Hash {
        let cells: Vec<(&[u8], Option<Hash>)> = self
            .cells
            .iter()
            .map(|c| (c.value().as_bytes(), c.salt))
            .collect();
        salt::salted_cells_input_hash(&cells)
    }
}

/// Which rows a job gathers sources for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowSelection {
    /// An enumerated set of row numbers.
    Rows(BTreeSet<u64>),
    /// An inclusive range.
    Range { lo: u64, hi: u64 },
}

impl RowSelection {
    pub fn contains(&self, row: u64) -> bool {
        match self {
            RowSelection::Rows(set) => set.contains(&row),
            RowSelection::Range { lo, hi } => (*lo..=*hi).contains(&row),
        }
    }

    pub fn min(&self) -> Option<u64> {
        match self {
            RowSelection::Rows(set) => set.first().copied(),
            RowSelection::Range { lo, hi } => (lo <= hi).then_some(*lo),
        }
    }

    pub fn max(&self) -> Option<u64> {
        match self {
            RowSelection::Rows(set) => set.last().copied(),
            RowSelection::Range { lo, hi } => (lo <= hi).then_some(*hi),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min().is_none()
    }
}

/// Collects the selected rows, in row-number order, as the parse passes
/// over them.
pub struct SourceGatherer {
    selection: RowSelection,
    salter: Option<TableSalt>,
    rows: Vec<SourceRow>,
}

impl SourceGatherer {
    pub fn new(selection: RowSelection, salter: Option<TableSalt>) -> Self {
        SourceGatherer {
            selection,
            salter,
            rows: Vec::new(),
        }
    }

    pub fn selection(&self) -> &RowSelection {
        &self.selection
    }

    pub fn rows(&self) -> &[SourceRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<SourceRow> {
        self.rows
    }
}

impl LogListener for SourceGatherer {
    fn observe_ledgered_line(&mut self, line: &LedgeredLine<'_>) -> Result<()> {
        if !self.selection.contains(line.row_no) {
            return Ok(());
        }
        if let Some(last) = self.rows.last() {
            if line.row_no <= last.row_number() {
                return Err(LedgerError::invalid_state(format!(
                    "row {} gathered after row {}; parser emitted rows out of order",
                    line.row_no,
                    last.row_number()
                )));
            }
        }
        self.rows.push(SourceRow::build(
            line.row_no,
            line.grammar,
            self.salter.as_ref(),
            line.line,
        ));
        Ok(())
    }
}
