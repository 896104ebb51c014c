use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path as FsPath, PathBuf};

use memmap2::Mmap;
use tracing::warn;

use crate::common::{LedgerError, Result};
use crate::frontier::{self, HashFrontier};
use crate::hasher::FrontierListener;
use crate::hashing::{HASH_WIDTH, Hash, SENTINEL};
use crate::skippath::{Path, PathRow};

/// Chain block width: 32 bytes of input hash, 32 bytes of row hash.
pub const BLOCK_WIDTH: u64 = 2 * HASH_WIDTH as u64;

/// Appends `{I(N), R(N)}` blocks to the headerless chain file as row hashes
/// are parsed. Block `N - 1` holds row N; the file is dense, so the next
/// appended row must be `blockCount + 1`.
///
/// In verify mode, rows at or below the existing block count are re-read
/// and compared instead of written; any divergence is a `HashConflict`.
pub struct ChainWriter {
    file: File,
    blocks: u64,
    verify: bool,
}

impl ChainWriter {
    /// Opens (or creates) the chain file. A trailing partial block is
    /// ignored — with a warning — and overwritten by the next append.
    pub fn open(path: &FsPath, verify: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        if len % BLOCK_WIDTH != 0 {
            warn!(
                path = %path.display(),
                len,
                "chain file length is not block-aligned; ignoring trailing bytes"
            );
        }
        Ok(ChainWriter {
            file,
            blocks: len / BLOCK_WIDTH,
            verify,
        })
    }

    pub fn block_count(&self) -> u64 {
        self.blocks
    }

    pub fn is_verifying(&self) -> bool {
        self.verify
    }

    fn append(&mut self, input_hash: &Hash, row_hash: &Hash) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.blocks * BLOCK_WIDTH))?;
        self.file.write_all(input_hash.as_bytes())?;
        self.file.write_all(row_hash.as_bytes())?;
        self.blocks += 1;
        Ok(())
    }

    fn compare(&mut self, row: u64, input_hash: &Hash, row_hash: &Hash) -> Result<()> {
        self.file.seek(SeekFrom::Start((row - 1) * BLOCK_WIDTH))?;
        let mut block = [0u8; BLOCK_WIDTH as usize];
        self.file.read_exact(&mut block)?;
        if &block[..HASH_WIDTH] != input_hash.as_bytes() {
            return Err(LedgerError::HashConflict {
                row,
                detail: format!("input hash differs from chain block {}", row - 1),
            });
        }
        if &block[HASH_WIDTH..] != row_hash.as_bytes() {
            return Err(LedgerError::HashConflict {
                row,
                detail: format!("row hash differs from chain block {}", row - 1),
            });
        }
        Ok(())
    }

    /// Flushes appended blocks to the OS.
    pub fn commit(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

impl FrontierListener for ChainWriter {
    fn row_hash_parsed(
        &mut self,
        input_hash: &Hash,
        fr: &HashFrontier,
        _prev: &HashFrontier,
    ) -> Result<()> {
        let row = fr.row_number();
        if row == self.blocks + 1 {
            self.append(input_hash, &fr.frontier_hash())
        } else if row > self.blocks + 1 {
            Err(LedgerError::invalid_state(format!(
                "row {row} reached the chain writer with only {} blocks on file",
                self.blocks
            )))
        } else if self.verify {
            self.compare(row, input_hash, &fr.frontier_hash())
        } else {
            Ok(())
        }
    }
}

/// Read-only random access over a chain file, memory-mapped.
pub struct ChainReader {
    path: PathBuf,
    map: Option<Mmap>,
    blocks: u64,
}

impl ChainReader {
    pub fn open(path: &FsPath) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len % BLOCK_WIDTH != 0 {
            warn!(
                path = %path.display(),
                len,
                "chain file length is not block-aligned; ignoring trailing bytes"
            );
        }
        let blocks = len / BLOCK_WIDTH;
        let map = if blocks == 0 {
            None
        } else {
            // SAFETY: read-only mapping; ledger artifacts are single-writer
            // and never truncated while readers are open.
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(ChainReader {
            path: path.to_owned(),
            map,
            blocks,
        })
    }

    pub fn block_count(&self) -> u64 {
        self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }

    fn block(&self, row: u64) -> Result<&[u8]> {
        if row == 0 || row > self.blocks {
            return Err(LedgerError::out_of_range(format!(
                "row {row} not in chain {} (holds rows 1..={})",
                self.path.display(),
                self.blocks
            )));
        }
        let map = self.map.as_ref().expect("non-zero block count has a map");
        let start = ((row - 1) * BLOCK_WIDTH) as usize;
        Ok(&map[start..start + BLOCK_WIDTH as usize])
    }

    /// `I(row)`.
    pub fn input_hash(&self, row: u64) -> Result<Hash> {
        let block = self.block(row)?;
        Ok(Hash::from_slice(&block[..HASH_WIDTH]).expect("block half is hash-sized"))
    }

    /// `R(row)`; the sentinel for row 0.
    pub fn row_hash(&self, row: u64) -> Result<Hash> {
        if row == 0 {
            return Ok(SENTINEL);
        }
        let block = self.block(row)?;
        Ok(Hash::from_slice(&block[HASH_WIDTH..]).expect("block half is hash-sized"))
    }

    /// Reconstructs `F(row)` from the stored row hashes.
    pub fn frontier(&self, row: u64) -> Result<HashFrontier> {
        if row > self.blocks {
            return Err(LedgerError::out_of_range(format!(
                "frontier row {row} exceeds chain block count {}",
                self.blocks
            )));
        }
        if row == 0 {
            return Ok(HashFrontier::origin());
        }
        let mut levels = Vec::with_capacity(HashFrontier::level_count(row));
        let mut bits = row;
        while bits != 0 {
            let bit = bits.trailing_zeros();
            levels.push(self.row_hash(row & !((1u64 << bit) - 1))?);
            bits &= bits - 1;
        }
        HashFrontier::new(row, levels)
    }

    /// Assembles a verified skip path over the target rows without touching
    /// the log. This is random access: only the stitched rows and their
    /// referents are read.
    pub fn path(&self, targets: &[u64]) -> Result<Path> {
        let stitched = frontier::stitch(targets)?;
        let hi = *stitched.last().expect("stitch is never empty");
        if hi > self.blocks {
            return Err(LedgerError::out_of_range(format!(
                "path row {hi} exceeds chain block count {}",
                self.blocks
            )));
        }
        let mut rows = Vec::with_capacity(stitched.len());
        for &n in &stitched {
            let mut pointers = Vec::new();
            for referent in frontier::skip_pointer_rows(n) {
                pointers.push(self.row_hash(referent)?);
            }
            rows.push(PathRow::new(n, self.input_hash(n)?, pointers)?);
        }
        Path::new(rows)
    }

    /// The 1-to-N state path committing to the whole chain.
    pub fn state_path(&self) -> Result<Path> {
        if self.blocks == 0 {
            return Err(LedgerError::out_of_range(
                "empty chain has no state path".to_string(),
            ));
        }
        self.path(&[1, self.blocks])
    }
}
