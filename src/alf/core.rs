use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::artifact::{HEADER_LEN, read_header, write_header};
use crate::common::{LedgerError, Result};
use crate::logparse::{LedgeredLine, LogListener};

/// Width of one stored value.
const CELL_WIDTH: u64 = 8;

/// Ascending-long file: a strictly increasing sequence of 64-bit values
/// behind a 4-byte header, supporting random read by index and amortized
/// O(1) append.
///
/// Appends are buffered in memory until [`commit`](Self::commit); dropping
/// the file without committing discards the pending tail. The cell layout
/// (big-endian u64) is private to this type.
#[derive(Debug)]
pub struct AlfFile {
    file: File,
    path: PathBuf,
    committed: u64,
    pending: Vec<u64>,
    last: Option<u64>,
}

impl AlfFile {
    /// Opens an existing file or creates an empty one (header only).
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        let committed = if len == 0 {
            write_header(&mut file)?;
            file.flush()?;
            0
        } else {
            read_header(&mut file, path)?;
            let body = len - HEADER_LEN as u64;
            if body % CELL_WIDTH != 0 {
                warn!(
                    path = %path.display(),
                    len,
                    "offset index length is not cell-aligned; ignoring trailing bytes"
                );
            }
            body / CELL_WIDTH
        };
        let mut alf = AlfFile {
            file,
            path: path.to_owned(),
            committed,
            pending: Vec::new(),
            last: None,
        };
        if committed > 0 {
            alf.last = Some(alf.read_cell(committed - 1)?);
        }
        Ok(alf)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total entries, pending appends included.
    pub fn size(&self) -> u64 {
        self.committed + self.pending.len() as u64
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// The value at `index`, pending appends included.
    pub fn get(&mut self, index: u64) -> Result<u64> {
        if index < self.committed {
            self.read_cell(index)
        } else if index < self.size() {
            Ok(self.pending[(index - self.committed) as usize])
        } else {
            Err(LedgerError::out_of_range(format!(
                "index {index} not in {} (size {})",
                self.path.display(),
                self.size()
            )))
        }
    }

    /// Appends a value; must exceed the last stored value.
    pub fn append(&mut self, value: u64) -> Result<()> {
        if let Some(last) = self.last {
            if value <= last {
                return Err(LedgerError::invalid_state(format!(
                    "offset {value} appended after {last}; values must ascend"
                )));
            }
        }
        self.pending.push(value);
        self.last = Some(value);
        Ok(())
    }

    /// Writes the pending tail to disk. A no-op when nothing is pending.
    pub fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(self.pending.len() * CELL_WIDTH as usize);
        for value in &self.pending {
            buf.extend_from_slice(&value.to_be_bytes());
        }
        self.file.seek(SeekFrom::Start(
            HEADER_LEN as u64 + self.committed * CELL_WIDTH,
        ))?;
        self.file.write_all(&buf)?;
        self.file.flush()?;
        self.committed += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    /// Count of buffered, not-yet-committed appends.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn read_cell(&mut self, index: u64) -> Result<u64> {
        self.file
            .seek(SeekFrom::Start(HEADER_LEN as u64 + index * CELL_WIDTH))?;
        let mut cell = [0u8; CELL_WIDTH as usize];
        self.file.read_exact(&mut cell)?;
        Ok(u64::from_be_bytes(cell))
    }
}

/// Indexes each row's starting byte offset: entry `N - 1` is the start of
/// row N. Verifies pre-existing entries when asked; commits on parse end.
#[derive(Debug)]
pub struct OffsetIndexer {
    alf: AlfFile,
    verify: bool,
}

impl OffsetIndexer {
    pub fn new(alf: AlfFile, verify: bool) -> Self {
        OffsetIndexer { alf, verify }
    }

    pub fn alf(&self) -> &AlfFile {
        &self.alf
    }

    pub fn into_alf(self) -> AlfFile {
        self.alf
    }
}

impl LogListener for OffsetIndexer {
    fn observe_ledgered_line(&mut self, line: &LedgeredLine<'_>) -> Result<()> {
        let row = line.row_no;
        let size = self.alf.size();
        if row <= size {
            if self.verify {
                let stored = self.alf.get(row - 1)?;
                if stored != line.offset {
                    return Err(LedgerError::AlfMismatch {
                        index: row - 1,
                        stored,
                        computed: line.offset,
                    });
                }
            }
            Ok(())
        } else if row == size + 1 {
            self.alf.append(line.offset)
        } else {
            Err(LedgerError::invalid_state(format!(
                "row {row} reached the offset indexer with only {size} entries"
            )))
        }
    }

    fn on_parse_end(&mut self) -> Result<()> {
        self.alf.commit()
    }
}
