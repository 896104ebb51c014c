use std::collections::BTreeSet;
use std::io::{self, Read, Write};

use digest::Digest;
use sha2::Sha256;

use crate::common::{LedgerError, Result};
use crate::hashing::{self, HASH_WIDTH, Hash, SENTINEL};

/// Skip count `k(N)`: one plus the number of trailing zero bits. Bounds the
/// number of back-links at row N: the row references rows `N - 2^i` for
/// `i` in `[0, k(N))`.
#[inline]
pub fn skip_count(row_number: u64) -> u32 {
    debug_assert!(row_number > 0);
    1 + row_number.trailing_zeros()
}

/// The rows row N links back to, nearest first: `N - 2^i` for `i < k(N)`.
/// The last may be the abstract row 0.
pub fn skip_pointer_rows(row_number: u64) -> impl Iterator<Item = u64> {
    (0..skip_count(row_number)).map(move |i| row_number - (1u64 << i))
}

/// Whether rows `a < b` are directly linked: `b - a` must be a power of two
/// no larger than b's highest skip pointer.
pub fn rows_linked(a: u64, b: u64) -> bool {
    if a >= b {
        return false;
    }
    let delta = b - a;
    delta.is_power_of_two() && delta <= (1u64 << (skip_count(b) - 1))
}

/// The canonical skip path from `lo` up to `hi`, both included: the greedy
/// descent from `hi` toward `lo`, taking at each step the largest valid
/// power-of-two back-link that does not overshoot `lo`. Iterative, returned
/// ascending.
pub fn skip_path_numbers(lo: u64, hi: u64) -> Vec<u64> {
    debug_assert!(lo >= 1 && lo <= hi);
    let mut path = Vec::new();
    let mut row = hi;
    while row > lo {
        path.push(row);
        let mut step = 1u64 << (skip_count(row) - 1);
        while row - step < lo {
            step >>= 1;
        }
        row -= step;
    }
    path.push(lo);
    path.reverse();
    path
}

/// The unique ascending row list containing every target and, between each
/// consecutive pair, the skip-path numbers connecting them.
pub fn stitch(targets: &[u64]) -> Result<Vec<u64>> {
    let sorted: BTreeSet<u64> = targets.iter().copied().collect();
    if sorted.contains(&0) {
        return Err(LedgerError::out_of_range("row 0 cannot appear in a path"));
    }
    let mut iter = sorted.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| LedgerError::out_of_range("no rows to stitch"))?;
    let mut stitched = vec![first];
    for target in iter {
        let prev = *stitched.last().expect("stitched is non-empty");
        stitched.extend_from_slice(&skip_path_numbers(prev, target)[1..]);
    }
    Ok(stitched)
}

/// Rows referenced by a stitched row via a skip pointer but not themselves
/// stitched. Row 0 is excluded (its hash is the sentinel).
pub fn ref_only_coverage(stitched: &[u64]) -> BTreeSet<u64> {
    let in_path: BTreeSet<u64> = stitched.iter().copied().collect();
    let mut coverage = BTreeSet::new();
    for &row in stitched {
        for referent in skip_pointer_rows(row) {
            if referent > 0 && !in_path.contains(&referent) {
                coverage.insert(referent);
            }
        }
    }
    coverage
}

/// Minimal state sufficient to compute `R(N+1)` from `I(N+1)`: the row
/// number N and one row hash per set bit of N.
///
/// Level j (lowest bit first) holds `R(N & !((1 << b_j) - 1))` where `b_j`
/// is the j-th lowest set bit; level 0 is always `R(N)` itself, the
/// frontier hash. `F(0)` has no levels and frontier hash equal to the
/// sentinel.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HashFrontier {
    row_number: u64,
    levels: Vec<Hash>,
}

impl HashFrontier {
    /// `F(0)`: the state before any row.
    pub fn origin() -> Self {
        HashFrontier {
            row_number: 0,
            levels: Vec::new(),
        }
    }

    /// Rebuilds a frontier from its parts. The level count must match the
    /// row number's population count.
    pub fn new(row_number: u64, levels: Vec<Hash>) -> Result<Self> {
        if levels.len() != Self::level_count(row_number) {
            return Err(LedgerError::invalid_state(format!(
                "frontier for row {row_number} requires {} levels, got {}",
                Self::level_count(row_number),
                levels.len()
            )));
        }
        Ok(HashFrontier { row_number, levels })
    }

    /// Number of level hashes a frontier at this row carries.
    pub fn level_count(row_number: u64) -> usize {
        row_number.count_ones() as usize
    }

    pub fn row_number(&self) -> u64 {
        self.row_number
    }

    /// `R(N)`; the sentinel at row 0.
    pub fn frontier_hash(&self) -> Hash {
        self.levels.first().copied().unwrap_or(SENTINEL)
    }

    pub fn levels(&self) -> &[Hash] {
        &self.levels
    }

    /// The row numbers backing each level, lowest level first.
    pub fn level_rows(&self) -> Vec<u64> {
        let mut rows = Vec::with_capacity(self.levels.len());
        let mut bits = self.row_number;
        while bits != 0 {
            let bit = bits.trailing_zeros();
            rows.push(self.row_number & !((1u64 << bit) - 1));
            bits &= bits - 1;
        }
        rows
    }

    /// The skip pointers of row `N + 1`: `(row, hash)` pairs in level order.
    /// Exactly the hashes [`advance`](Self::advance) consumes.
    pub fn next_pointers(&self) -> Vec<(u64, Hash)> {
        let next = self.row_number + 1;
        let count = skip_count(next) as usize;
        let mut pointers = Vec::with_capacity(count);
        for i in 0..count {
            let row = next - (1u64 << i);
            let hash = if row == 0 {
                SENTINEL
            } else {
                self.levels[i]
            };
            pointers.push((row, hash));
        }
        pointers
    }

    /// Advances the frontier by one row given that row's input hash. This is
    /// the frontier recurrence: with `m = N + 1` and `t` its trailing zero
    /// count, `R(m) = SHA-256(I(m) ∥ R(m-2^0) ∥ … ∥ R(m-2^t))`, the first
    /// `t` levels collapse into the new row hash, and the higher levels
    /// carry over unchanged.
    pub fn advance(&self, input_hash: &Hash) -> HashFrontier {
        let next = self.row_number + 1;
        let skips = skip_count(next) as usize;
        debug_assert!(self.levels.len() + 1 >= skips);

        let mut hasher = Sha256::new();
        hasher.update(input_hash.as_bytes());
        for i in 0..skips {
            let pointer = self.levels.get(i).unwrap_or(&SENTINEL);
            hasher.update(pointer.as_bytes());
        }
        let row_hash = hashing::finish(hasher);

        let keep = (skips - 1).min(self.levels.len());
        let mut levels = Vec::with_capacity(self.levels.len() + 1 - keep);
        levels.push(row_hash);
        levels.extend_from_slice(&self.levels[keep..]);
        HashFrontier {
            row_number: next,
            levels,
        }
    }

    /// Serialized form: `bigEndian64(rowNumber)` followed by the level
    /// hashes in level order. The count is derivable from the row number.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.row_number.to_be_bytes())?;
        for level in &self.levels {
            w.write_all(level.as_bytes())?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut word = [0u8; 8];
        r.read_exact(&mut word)?;
        let row_number = u64::from_be_bytes(word);
        let count = Self::level_count(row_number);
        let mut levels = Vec::with_capacity(count);
        let mut buf = [0u8; HASH_WIDTH];
        for _ in 0..count {
            r.read_exact(&mut buf)?;
            levels.push(Hash::from_bytes(buf));
        }
        Ok(HashFrontier { row_number, levels })
    }

    /// Serialized size in bytes.
    pub fn serial_len(&self) -> usize {
        8 + self.levels.len() * HASH_WIDTH
    }
}
