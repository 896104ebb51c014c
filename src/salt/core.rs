use std::fmt;

use digest::Digest;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::hashing::{self, Hash, SENTINEL};

/// Width of the secret seed, in bytes.
pub const SEED_WIDTH: usize = 32;

/// Deterministic salt scheme: a 32-byte secret seed derived into per-row and
/// per-cell salts. Derivation is one-way; there is no unsalting.
#[derive(Clone, PartialEq, Eq)]
pub struct TableSalt {
    seed: [u8; SEED_WIDTH],
}

impl TableSalt {
    pub const fn new(seed: [u8; SEED_WIDTH]) -> Self {
        TableSalt { seed }
    }

    /// Fresh salt scheme with a seed drawn from the OS entropy source.
    pub fn generate() -> Self {
        let mut seed = [0u8; SEED_WIDTH];
        OsRng.fill_bytes(&mut seed);
        TableSalt { seed }
    }

    pub fn seed(&self) -> &[u8; SEED_WIDTH] {
        &self.seed
    }

    /// Per-row salt: `SHA-256(seed ∥ bigEndian64(rowNumber))`.
    pub fn row_salt(&self, row_number: u64) -> RowSalt {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(row_number.to_be_bytes());
        RowSalt {
            salt: hashing::finish(hasher),
        }
    }
}

impl fmt::Debug for TableSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the seed.
        f.write_str("TableSalt(..)")
    }
}

/// Salt for one row, ready to derive per-cell salts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RowSalt {
    salt: Hash,
}

impl RowSalt {
    /// Per-cell salt: `SHA-256(rowSalt ∥ bigEndian32(column))`.
    pub fn cell_salt(&self, column: u32) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(column.to_be_bytes());
        hashing::finish(hasher)
    }
}

/// Input hash of one row's cells under an optional salt scheme.
///
/// Cell count 0 hashes to the sentinel. A single cell is digested directly
/// (`SHA-256(cellSalt? ∥ cell)`), with no intermediate cell digest. Two or
/// more cells are digested individually and the row hash taken over the
/// concatenation of the cell digests.
pub fn row_input_hash(cells: &[&[u8]], salter: Option<&TableSalt>, row_number: u64) -> Hash {
    cells_input_hash(cells.iter().copied(), cells.len(), salter, row_number)
}

/// Same as [`row_input_hash`], with pre-derived per-cell salts instead of a
/// scheme. Used by reconstructed source rows, which carry their salts.
pub fn salted_cells_input_hash(cells: &[(&[u8], Option<Hash>)]) -> Hash {
    match cells {
        [] => SENTINEL,
        [(value, salt)] => cell_digest(value, salt.as_ref()),
        _ => {
            let mut outer = Sha256::new();
            for (value, salt) in cells {
                outer.update(cell_digest(value, salt.as_ref()).as_bytes());
            }
            hashing::finish(outer)
        }
    }
}

fn cells_input_hash<'a, I>(
    cells: I,
    count: usize,
    salter: Option<&TableSalt>,
    row_number: u64,
) -> Hash
where
    I: Iterator<Item = &'a [u8]>,
{
    if count == 0 {
        return SENTINEL;
    }
    let row_salt = salter.map(|s| s.row_salt(row_number));
    let mut cells = cells.enumerate();
    if count == 1 {
        let (_, value) = cells.next().expect("count checked");
        let salt = row_salt.map(|rs| rs.cell_salt(0));
        return cell_digest(value, salt.as_ref());
    }
    let mut outer = Sha256::new();
    for (column, value) in cells {
        let salt = row_salt.map(|rs| rs.cell_salt(column as u32));
        outer.update(cell_digest(value, salt.as_ref()).as_bytes());
    }
    hashing::finish(outer)
}

fn cell_digest(value: &[u8], salt: Option<&Hash>) -> Hash {
    let mut hasher = Sha256::new();
    if let Some(salt) = salt {
        hasher.update(salt.as_bytes());
    }
    hasher.update(value);
    hashing::finish(hasher)
}
