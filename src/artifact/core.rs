use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::warn;

use crate::common::{LedgerError, Result};
use crate::frontier::HashFrontier;
use crate::grammar::{Grammar, MAX_TOKEN_CHARS};
use crate::hasher::Checkpoint;
use crate::hashing::{HASH_WIDTH, Hash};
use crate::salt::{SEED_WIDTH, TableSalt};

/// Magic bytes opening every artifact file except the chain.
pub const MAGIC: [u8; 3] = *b"lgl";

/// Current artifact format version.
pub const VERSION: u8 = 1;

/// Header length: magic plus version byte.
pub const HEADER_LEN: usize = 4;

// ── Versioned header ────────────────────────────────────────────────

pub fn write_header<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&[VERSION])
}

/// Reads and checks the 4-byte header. Bad magic and version 0 fail;
/// a version ahead of this build is tolerated with a warning.
pub fn read_header<R: Read>(r: &mut R, path: &Path) -> Result<u8> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            LedgerError::BadHeader {
                path: path.to_owned(),
                reason: "file shorter than header".into(),
            }
        } else {
            e.into()
        }
    })?;
    if header[..3] != MAGIC {
        return Err(LedgerError::BadHeader {
            path: path.to_owned(),
            reason: format!("bad magic {:02x?}", &header[..3]),
        });
    }
    let version = header[3];
    if version == 0 {
        return Err(LedgerError::BadHeader {
            path: path.to_owned(),
            reason: "version byte is zero".into(),
        });
    }
    if version > VERSION {
        warn!(
            path = %path.display(),
            version,
            current = VERSION,
            "artifact version is ahead of this build; proceeding"
        );
    }
    Ok(version)
}

// ── File naming ─────────────────────────────────────────────────────

/// The conventional artifact directory: a sibling `.lgl` directory next to
/// the log file.
pub fn default_lgl_dir(log_path: &Path) -> PathBuf {
    log_path.parent().unwrap_or(Path::new(".")).join(".lgl")
}

pub fn rules_path(dir: &Path, log_name: &str) -> PathBuf {
    dir.join(format!("{log_name}.rules.lgl"))
}

pub fn chain_path(dir: &Path, log_name: &str) -> PathBuf {
    dir.join(format!("{log_name}.sldg.lgl"))
}

pub fn offsets_path(dir: &Path, log_name: &str) -> PathBuf {
    dir.join(format!("{log_name}.off.alf.lgl"))
}

pub fn checkpoint_path(dir: &Path, log_name: &str, row: u64) -> PathBuf {
    dir.join(format!("{log_name}-{row}.ckpt.lgl"))
}

pub fn grammar_path(dir: &Path, log_name: &str) -> PathBuf {
    dir.join(format!("{log_name}.gram.lgl"))
}

pub fn salt_path(dir: &Path, log_name: &str) -> PathBuf {
    dir.join(format!("{log_name}.salt.lgl"))
}

pub fn lock_path(dir: &Path, log_name: &str) -> PathBuf {
    dir.join(format!("{log_name}.lock.lgl"))
}

/// Row numbers of the saved checkpoints for a log, ascending, from the
/// `<log>-<N>.ckpt.lgl` file names.
pub fn checkpoint_numbers(dir: &Path, log_name: &str) -> Result<Vec<u64>> {
    let prefix = format!("{log_name}-");
    let suffix = ".ckpt.lgl";
    let mut numbers = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(numbers),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(middle) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
        else {
            continue;
        };
        if let Ok(row) = middle.parse::<u64>() {
            numbers.push(row);
        }
    }
    numbers.sort_unstable();
    Ok(numbers)
}

// ── Checkpoint files ────────────────────────────────────────────────

/// Layout: header ∥ be64(eol) ∥ frontier(N) ∥ frontier(N-1) ∥ I(N) ∥
/// be64(prevEol). The leading (eol, frontier) pair doubles as the log
/// state; the extension makes the snapshot resumable.
pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let mut buf = Vec::with_capacity(
        HEADER_LEN + 16 + HASH_WIDTH + checkpoint.pre_frontier().serial_len() * 2,
    );
    write_header(&mut buf)?;
    buf.extend_from_slice(&checkpoint.eol().to_be_bytes());
    checkpoint.frontier().write_to(&mut buf)?;
    checkpoint.pre_frontier().write_to(&mut buf)?;
    buf.extend_from_slice(checkpoint.input_hash().as_bytes());
    buf.extend_from_slice(&checkpoint.prev_eol().to_be_bytes());
    fs::write(path, buf)?;
    Ok(())
}

pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let mut file = File::open(path)?;
    read_header(&mut file, path)?;
    let mut word = [0u8; 8];
    file.read_exact(&mut word)?;
    let eol = u64::from_be_bytes(word);
    let frontier = HashFrontier::read_from(&mut file)?;
    let pre_frontier = HashFrontier::read_from(&mut file)?;
    let mut hash = [0u8; HASH_WIDTH];
    file.read_exact(&mut hash)?;
    let input_hash = Hash::from_bytes(hash);
    file.read_exact(&mut word)?;
    let prev_eol = u64::from_be_bytes(word);

    if frontier.row_number() != pre_frontier.row_number() + 1 {
        return Err(LedgerError::BadHeader {
            path: path.to_owned(),
            reason: format!(
                "checkpoint frontier rows disagree: {} vs pre {}",
                frontier.row_number(),
                pre_frontier.row_number()
            ),
        });
    }
    let checkpoint = Checkpoint::new(pre_frontier, input_hash, eol, prev_eol);
    // Cheap integrity check: the stored frontier must be one advance from
    // the pre-state.
    if checkpoint.frontier() != frontier {
        return Err(LedgerError::HashConflict {
            row: checkpoint.row_number(),
            detail: format!(
                "checkpoint {} is internally inconsistent",
                path.display()
            ),
        });
    }
    Ok(checkpoint)
}

// ── Hashing-rules file ──────────────────────────────────────────────

const FLAG_GRAMMAR: u8 = 0b01;
const FLAG_SALT: u8 = 0b10;

/// What a log is hashed with: its grammar and, when salting is on, the
/// secret seed. Written once at init; read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashingRules {
    pub grammar: Grammar,
    pub salter: Option<TableSalt>,
}

impl HashingRules {
    pub fn new(grammar: Grammar, salter: Option<TableSalt>) -> Self {
        HashingRules { grammar, salter }
    }

    pub fn unsalted(grammar: Grammar) -> Self {
        HashingRules {
            grammar,
            salter: None,
        }
    }

    pub fn is_salted(&self) -> bool {
        self.salter.is_some()
    }
}

fn encode_grammar(buf: &mut Vec<u8>, grammar: &Grammar) {
    buf.push(grammar.skip_blank_lines() as u8);
    let delims = grammar.token_delimiters().unwrap_or("").as_bytes();
    buf.push(delims.len() as u8);
    buf.extend_from_slice(delims);
    let comment = grammar.comment_prefix().unwrap_or(b"");
    buf.push(comment.len() as u8);
    buf.extend_from_slice(comment);
}

fn decode_grammar<R: Read>(r: &mut R, path: &Path) -> Result<Grammar> {
    let mut byte = [0u8; 1];
    r.read_exact(&mut byte)?;
    let skip_blank = match byte[0] {
        0 => false,
        1 => true,
        other => {
            return Err(LedgerError::BadHeader {
                path: path.to_owned(),
                reason: format!("bad skip-blank flag {other}"),
            });
        }
    };
    let delims = read_short_string(r, path, "delimiter set")?;
    let comment = read_short_string(r, path, "comment prefix")?;
    Grammar::new(skip_blank, delims.as_deref(), comment.as_deref())
}

fn read_short_string<R: Read>(r: &mut R, path: &Path, what: &str) -> Result<Option<String>> {
    let mut byte = [0u8; 1];
    r.read_exact(&mut byte)?;
    let len = byte[0] as usize;
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_TOKEN_CHARS {
        return Err(LedgerError::BadHeader {
            path: path.to_owned(),
            reason: format!("{what} length {len} exceeds {MAX_TOKEN_CHARS}"),
        });
    }
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map(Some).map_err(|_| {
        LedgerError::BadHeader {
            path: path.to_owned(),
            reason: format!("{what} is not UTF-8"),
        }
    })
}

/// Writes the rules file. Fails if it already exists: rules are written
/// once at init and are immutable afterwards.
pub fn save_rules(path: &Path, rules: &HashingRules) -> Result<()> {
    let mut buf = Vec::new();
    write_header(&mut buf)?;
    let mut flags = FLAG_GRAMMAR;
    if rules.salter.is_some() {
        flags |= FLAG_SALT;
    }
    buf.push(flags);
    encode_grammar(&mut buf, &rules.grammar);
    if let Some(salter) = &rules.salter {
        buf.extend_from_slice(salter.seed());
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => LedgerError::invalid_state(format!(
                "hashing rules already exist at {}",
                path.display()
            )),
            _ => LedgerError::from(e),
        })?;
    file.write_all(&buf)?;
    Ok(())
}

pub fn load_rules(path: &Path) -> Result<HashingRules> {
    let mut file = File::open(path)?;
    read_header(&mut file, path)?;
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte)?;
    let flags = byte[0];
    let grammar = if flags & FLAG_GRAMMAR != 0 {
        decode_grammar(&mut file, path)?
    } else {
        Grammar::default()
    };
    let salter = if flags & FLAG_SALT != 0 {
        let mut seed = [0u8; SEED_WIDTH];
        file.read_exact(&mut seed)?;
        Some(TableSalt::new(seed))
    } else {
        None
    };
    Ok(HashingRules { grammar, salter })
}

// ── Standalone grammar and salt files ───────────────────────────────

pub fn save_grammar(path: &Path, grammar: &Grammar) -> Result<()> {
    let mut buf = Vec::new();
    write_header(&mut buf)?;
    encode_grammar(&mut buf, grammar);
    fs::write(path, buf)?;
    Ok(())
}

pub fn load_grammar(path: &Path) -> Result<Grammar> {
    let mut file = File::open(path)?;
    read_header(&mut file, path)?;
    decode_grammar(&mut file, path)
}

pub fn save_salt(path: &Path, salter: &TableSalt) -> Result<()> {
    let mut buf = Vec::new();
    write_header(&mut buf)?;
    buf.extend_from_slice(salter.seed());
    fs::write(path, buf)?;
    Ok(())
}

pub fn load_salt(path: &Path) -> Result<TableSalt> {
    let mut file = File::open(path)?;
    read_header(&mut file, path)?;
    let mut seed = [0u8; SEED_WIDTH];
    file.read_exact(&mut seed)?;
    Ok(TableSalt::new(seed))
}

// ── Directory lock ──────────────────────────────────────────────────

/// Exclusive advisory lock over the artifact directory, held by
/// write-capable jobs. Blocks until the lock is granted; released on drop.
pub struct DirLock {
    file: File,
}

impl DirLock {
    pub fn acquire(dir: &Path, log_name: &str) -> Result<Self> {
        let path = lock_path(dir, log_name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.lock_exclusive()?;
        Ok(DirLock { file })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
