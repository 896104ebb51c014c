use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Seek, SeekFrom};
use std::path::{Path as FsPath, PathBuf};

use tracing::debug;

use crate::alf::{AlfFile, OffsetIndexer};
use crate::artifact::{self, DirLock, HashingRules};
use crate::chain::{ChainReader, ChainWriter};
use crate::common::{LedgerError, Result};
use crate::grammar::Grammar;
use crate::hasher::{Checkpoint, HasherStats, LogState, StateHasher};
use crate::lines::LineParser;
use crate::logparse::{ListenerStack, LogParser};
use crate::salt::TableSalt;
use crate::skippath::{Path, PathGatherer};
use crate::source::{RowSelection, SourceGatherer, SourceRow};

/// Declarative description of what one parse pass must produce.
///
/// A builder over the recognized options; mutators return the same
/// instance. A job is single-shot: executing it twice is an error, though
/// an identical fresh job produces an equal result.
#[derive(Clone, Debug, Default)]
pub struct Job {
    compute_hash: bool,
    min_row_hashed: Option<u64>,
    max_row_hashed: Option<u64>,
    save_parse_state: bool,
    overwrite_checkpoints: bool,
    validate_checkpoints: bool,
    index_offsets: bool,
    use_offsets_index: bool,
    verify_offsets_index: bool,
    source_rows: BTreeSet<u64>,
    path_rows: BTreeSet<u64>,
    executed: bool,
}

impl Job {
    pub fn new() -> Self {
        Job::default()
    }

    /// Enables the hasher.
    pub fn compute_hash(&mut self, on: bool) -> &mut Self {
        self.compute_hash = on;
        self
    }

    /// Earliest row whose hash event must be produced.
    pub fn min_row_hashed(&mut self, row: u64) -> &mut Self {
        self.min_row_hashed = Some(row);
        self.compute_hash = true;
        self
    }

    /// Inclusive upper bound; the parse stops at this row.
    pub fn max_row_hashed(&mut self, row: u64) -> &mut Self {
        self.max_row_hashed = Some(row);
        self.compute_hash = true;
        self
    }

    /// Write a checkpoint for the final row on success.
    pub fn save_parse_state(&mut self, on: bool) -> &mut Self {
        self.save_parse_state = on;
        self
    }

    /// Replace a conflicting checkpoint at the same row number.
    pub fn overwrite_checkpoints(&mut self, on: bool) -> &mut Self {
        self.overwrite_checkpoints = on;
        self
    }

    /// Verify saved checkpoints crossed during the parse.
    pub fn validate_checkpoints(&mut self, on: bool) -> &mut Self {
        self.validate_checkpoints = on;
        self
    }

    /// Enable the offset indexer.
    pub fn index_offsets(&mut self, on: bool) -> &mut Self {
        self.index_offsets = on;
        self
    }

    /// Allow seeking via an existing offset index instead of parsing from
    /// byte 0 (only applies when no hashing is required below the seek).
    pub fn use_offsets_index(&mut self, on: bool) -> &mut Self {
        self.use_offsets_index = on;
        self
    }

    /// Verify pre-existing index entries against computed offsets.
    pub fn verify_offsets_index(&mut self, on: bool) -> &mut Self {
        self.verify_offsets_index = on;
        self
    }

    /// Gather row N's source cells; optionally include it in the path.
    pub fn add_source_row(&mut self, row: u64, with_path: bool) -> &mut Self {
        self.source_rows.insert(row);
        if with_path {
            self.add_to_path(row);
        }
        self
    }

    /// Include row N in the gathered skip path. Implies hashing.
    pub fn add_to_path(&mut self, row: u64) -> &mut Self {
        self.path_rows.insert(row);
        self.compute_hash = true;
        self
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Whether this job writes artifacts and therefore needs the lock.
    pub fn is_write_job(&self) -> bool {
        self.save_parse_state || self.index_offsets
    }

    fn wants_hash(&self) -> bool {
        self.compute_hash || self.save_parse_state || !self.path_rows.is_empty()
    }
}

/// What a job produced.
#[derive(Debug, Default)]
pub struct JobResult {
    /// Final frontier and EOL, when the job hashed.
    pub state: Option<LogState>,
    pub stats: Option<HasherStats>,
    pub path: Option<Path>,
    pub sources: Vec<SourceRow>,
    /// Row number of the checkpoint written, when one was.
    pub checkpoint_saved: Option<u64>,
    /// Offset-index entries appended by this job.
    pub offsets_indexed: u64,
}

/// Façade over one log file and its artifact directory.
///
/// Owns no open handles between jobs; artifact files are opened per job and
/// released on return.
pub struct LogLedger {
    log_path: PathBuf,
    lgl_dir: PathBuf,
    log_name: String,
    rules: HashingRules,
}

impl LogLedger {
    /// Creates the artifact directory and writes the rules file. Fails if a
    /// rules file already exists.
    pub fn init(
        log_path: &FsPath,
        lgl_dir: Option<&FsPath>,
        grammar: Grammar,
        salted: bool,
    ) -> Result<Self> {
        let salter = salted.then(TableSalt::generate);
        Self::init_with_rules(log_path, lgl_dir, HashingRules::new(grammar, salter))
    }

    /// Like [`init`](Self::init) with salting on: generates a fresh 32-byte
    /// seed from the OS RNG.
    pub fn init_salt(log_path: &FsPath, lgl_dir: Option<&FsPath>, grammar: Grammar) -> Result<Self> {
        Self::init(log_path, lgl_dir, grammar, true)
    }

    fn init_with_rules(
        log_path: &FsPath,
        lgl_dir: Option<&FsPath>,
        rules: HashingRules,
    ) -> Result<Self> {
        let (lgl_dir, log_name) = Self::locate(log_path, lgl_dir)?;
        fs::create_dir_all(&lgl_dir)?;
        artifact::save_rules(&artifact::rules_path(&lgl_dir, &log_name), &rules)?;
        Ok(LogLedger {
            log_path: log_path.to_owned(),
            lgl_dir,
            log_name,
            rules,
        })
    }

    /// Opens an existing ledger. Rules come from the rules file, falling
    /// back to the standalone grammar/salt files, then to defaults. An
    /// explicit grammar override replaces the persisted grammar.
    pub fn open(
        log_path: &FsPath,
        lgl_dir: Option<&FsPath>,
        grammar_override: Option<Grammar>,
    ) -> Result<Self> {
        let (lgl_dir, log_name) = Self::locate(log_path, lgl_dir)?;
        let rules_file = artifact::rules_path(&lgl_dir, &log_name);
        let mut rules = if rules_file.exists() {
            artifact::load_rules(&rules_file)?
        } else {
            let gram_file = artifact::grammar_path(&lgl_dir, &log_name);
            let salt_file = artifact::salt_path(&lgl_dir, &log_name);
            let grammar = if gram_file.exists() {
                artifact::load_grammar(&gram_file)?
            } else {
                Grammar::default()
            };
            let salter = if salt_file.exists() {
                Some(artifact::load_salt(&salt_file)?)
            } else {
                None
            };
            HashingRules::new(grammar, salter)
        };
        if let Some(grammar) = grammar_override {
            rules.grammar = grammar;
        }
        Ok(LogLedger {
            log_path: log_path.to_owned(),
            lgl_dir,
            log_name,
            rules,
        })
    }

    fn locate(log_path: &FsPath, lgl_dir: Option<&FsPath>) -> Result<(PathBuf, String)> {
        let name = log_path
            .file_name()
            .ok_or_else(|| LedgerError::invalid_state("log path has no file name"))?
            .to_string_lossy()
            .into_owned();
        let dir = lgl_dir
            .map(FsPath::to_owned)
            .unwrap_or_else(|| artifact::default_lgl_dir(log_path));
        Ok((dir, name))
    }

    pub fn log_path(&self) -> &FsPath {
        &self.log_path
    }

    pub fn lgl_dir(&self) -> &FsPath {
        &self.lgl_dir
    }

    pub fn log_name(&self) -> &str {
        &self.log_name
    }

    pub fn grammar(&self) -> &Grammar {
        &self.rules.grammar
    }

    pub fn is_salted(&self) -> bool {
        self.rules.is_salted()
    }

    pub fn new_job(&self) -> Job {
        Job::new()
    }

    // ── Checkpoints ─────────────────────────────────────────────────

    /// Saved checkpoint row numbers, ascending.
    pub fn checkpoint_nos(&self) -> Result<Vec<u64>> {
        artifact::checkpoint_numbers(&self.lgl_dir, &self.log_name)
    }

    pub fn load_checkpoint(&self, row: u64) -> Result<Checkpoint> {
        artifact::load_checkpoint(&artifact::checkpoint_path(&self.lgl_dir, &self.log_name, row))
    }

    /// The saved checkpoint with the greatest row number at or below `row`.
    pub fn nearest_checkpoint(&self, row: u64) -> Result<Option<Checkpoint>> {
        let numbers = self.checkpoint_nos()?;
        let at = match numbers.binary_search(&row) {
            Ok(i) => i,
            Err(0) => return Ok(None),
            Err(i) => i - 1,
        };
        self.load_checkpoint(numbers[at]).map(Some)
    }

    // ── Artifact access ─────────────────────────────────────────────

    /// Read access to the chain file, if one has been built.
    pub fn load_skip_ledger(&self) -> Result<Option<ChainReader>> {
        let path = artifact::chain_path(&self.lgl_dir, &self.log_name);
        if !path.exists() {
            return Ok(None);
        }
        ChainReader::open(&path).map(Some)
    }

    /// The row-offset index, if one has been built.
    pub fn load_source_index(&self) -> Result<Option<AlfFile>> {
        let path = artifact::offsets_path(&self.lgl_dir, &self.log_name);
        if !path.exists() {
            return Ok(None);
        }
        AlfFile::open(&path).map(Some)
    }

    /// Whether the chain file covers every row of the last completed build,
    /// enabling path assembly without re-parsing the log.
    pub fn is_random_access(&self) -> Result<bool> {
        let Some(reader) = self.load_skip_ledger()? else {
            return Ok(false);
        };
        let numbers = self.checkpoint_nos()?;
        Ok(reader.block_count() > 0 && numbers.last() == Some(&reader.block_count()))
    }

    /// The 1-to-N skip path assembled from the chain file.
    pub fn state_path(&self) -> Result<Path> {
        let reader = self.load_skip_ledger()?.ok_or_else(|| {
            LedgerError::invalid_state("no skip ledger chain on file; build it first")
        })?;
        reader.state_path()
    }

    // ── Job execution ───────────────────────────────────────────────

    /// Runs the job in a single parse pass, resuming from the nearest
    /// usable saved state.
    pub fn execute_job(&self, job: &mut Job) -> Result<JobResult> {
        if job.executed {
            return Err(LedgerError::invalid_state(
                "job already executed; build a fresh job",
            ));
        }
        job.executed = true;

        let _lock = if job.is_write_job() {
            fs::create_dir_all(&self.lgl_dir)?;
            Some(DirLock::acquire(&self.lgl_dir, &self.log_name)?)
        } else {
            None
        };

        let wants_hash = job.wants_hash();
        let salter = self.rules.salter.clone();

        // Collaborators, declared before the hasher that borrows them.
        let mut path_gatherer = match job.path_rows.is_empty() {
            true => None,
            false => Some(PathGatherer::new(
                &job.path_rows.iter().copied().collect::<Vec<_>>(),
            )?),
        };
        let mut source_gatherer = (!job.source_rows.is_empty()).then(|| {
            SourceGatherer::new(RowSelection::Rows(job.source_rows.clone()), salter.clone())
        });
        let mut indexer = match job.index_offsets {
            true => {
                let alf = AlfFile::open(&artifact::offsets_path(&self.lgl_dir, &self.log_name))?;
                Some(OffsetIndexer::new(alf, job.verify_offsets_index))
            }
            false => None,
        };

        // Row-number needs, per the scheduling algorithm.
        let src_min = source_gatherer.as_ref().and_then(|g| g.selection().min());
        let src_max = source_gatherer.as_ref().and_then(|g| g.selection().max());
        let path_min = path_gatherer.as_ref().map(PathGatherer::min_row);
        let path_max = path_gatherer.as_ref().map(PathGatherer::max_row);
        let hash_event_min = min_of(&[job.min_row_hashed, path_min]);
        let first_rn_to_index = indexer.as_ref().map(|ix| ix.alf().size() + 1);

        let stop_row: Option<u64> = match job.max_row_hashed {
            Some(max) => Some(max_of(&[Some(max), src_max, path_max]).unwrap_or(max)),
            None if wants_hash || job.index_offsets => None, // to EOF
            None => max_of(&[src_max, path_max]),
        };
        if !wants_hash && !job.index_offsets && src_max.is_none() {
            debug!("job requests no artifacts; nothing to parse");
            return Ok(JobResult::default());
        }

        // Decide where the parse starts and how the hasher initializes.
        let mut hasher: Option<StateHasher<'_>> = None;
        let mut seek: Option<(u64, u64)> = None; // (byte offset, last consumed row)
        if wants_hash {
            let bound = min_of(&[
                hash_event_min.map(|r| r.saturating_sub(1)),
                src_min,
                first_rn_to_index,
                stop_row,
            ])
            .unwrap_or(u64::MAX);
            let resumed = match self.nearest_checkpoint(bound)? {
                Some(ckpt) => {
                    seek = Some((ckpt.prev_eol(), ckpt.row_number() - 1));
                    let h = StateHasher::from_checkpoint(&ckpt, salter.clone());
                    Some((h, ckpt.row_number()))
                }
                None => None,
            };
            let (mut h, resume_row) = match resumed {
                Some((h, row)) => (h, row),
                None => (StateHasher::new(salter.clone()), 0),
            };
            if job.validate_checkpoints {
                for row in self.checkpoint_nos()? {
                    if row <= resume_row || stop_row.is_some_and(|stop| row > stop) {
                        continue;
                    }
                    let saved = self.load_checkpoint(row)?;
                    h.expect_frontier(row, saved.frontier().frontier_hash());
                }
            }
            hasher = Some(h);
        } else if job.use_offsets_index {
            // No hashing anywhere: an offset index may replace the scan.
            let start_need = min_of(&[src_min, first_rn_to_index]).unwrap_or(u64::MAX);
            let mut index = self.load_source_index()?;
            if let Some(alf) = index.as_mut() {
                let target = start_need.min(alf.size());
                if target >= 1 {
                    seek = Some((alf.get(target - 1)?, target - 1));
                }
            }
        }

        if let (Some(h), Some(g)) = (hasher.as_mut(), path_gatherer.as_mut()) {
            h.push_listener(g);
        }

        // Listener stack, LIFO: indexer first, then the hasher (which fans
        // out to the path gatherer), then the source gatherer.
        let mut stack = ListenerStack::new();
        if let Some(g) = source_gatherer.as_mut() {
            stack.push(g);
        }
        if let Some(h) = hasher.as_mut() {
            stack.push(h);
        }
        let alf_before = indexer.as_ref().map(|ix| ix.alf().size()).unwrap_or(0);
        if let Some(ix) = indexer.as_mut() {
            stack.push(ix);
        }

        // Run the single pass.
        let mut log_parser = LogParser::new(self.rules.grammar.clone());
        if let Some(stop) = stop_row {
            log_parser.set_max_row_no(stop);
        }
        let mut file = File::open(&self.log_path)?;
        let (offset, last_row) = seek.unwrap_or((0, 0));
        file.seek(SeekFrom::Start(offset))?;
        // Line numbers are not persisted; after a seek they count relative
        // to ledgered rows.
        let mut line_parser = LineParser::with_state(file, offset, last_row);
        log_parser.set_row_no(last_row);
        log_parser.parse(&mut line_parser, &mut stack)?;
        drop(stack);

        // Package results.
        let mut result = JobResult::default();
        if let Some(h) = hasher.take() {
            result.state = Some(h.state());
            result.stats = Some(h.stats());
            if job.save_parse_state {
                result.checkpoint_saved = self.save_checkpoint_guarded(
                    h.parse_state(),
                    job.overwrite_checkpoints,
                )?;
            }
        }
        if let Some(g) = path_gatherer.take() {
            result.path = Some(g.build()?);
        }
        if let Some(g) = source_gatherer.take() {
            result.sources = g.into_rows();
        }
        if let Some(ix) = indexer.take() {
            result.offsets_indexed = ix.alf().size().saturating_sub(alf_before);
        }
        Ok(result)
    }

    fn save_checkpoint_guarded(
        &self,
        checkpoint: Option<Checkpoint>,
        overwrite: bool,
    ) -> Result<Option<u64>> {
        let Some(checkpoint) = checkpoint else {
            debug!("nothing hashed; no checkpoint to save");
            return Ok(None);
        };
        let row = checkpoint.row_number();
        let path = artifact::checkpoint_path(&self.lgl_dir, &self.log_name, row);
        if path.exists() {
            let existing = artifact::load_checkpoint(&path)?;
            if existing == checkpoint {
                return Ok(Some(row));
            }
            if !overwrite {
                return Err(LedgerError::HashConflict {
                    row,
                    detail: format!(
                        "a different checkpoint already exists at {}",
                        path.display()
                    ),
                });
            }
        }
        artifact::save_checkpoint(&path, &checkpoint)?;
        Ok(Some(row))
    }

    // ── Bulk rebuild ────────────────────────────────────────────────

    /// Parses the log from the cheapest saved state and writes every row
    /// into the chain file, optionally filling the offset index. With
    /// `verify`, re-hashes from row 1 and compares every existing block.
    /// Returns the number of chain blocks added.
    pub fn build_skip_ledger(
        &self,
        index_offsets: bool,
        overwrite: bool,
        verify: bool,
    ) -> Result<u64> {
        fs::create_dir_all(&self.lgl_dir)?;
        let _lock = DirLock::acquire(&self.lgl_dir, &self.log_name)?;

        let chain_file = artifact::chain_path(&self.lgl_dir, &self.log_name);
        let offsets_file = artifact::offsets_path(&self.lgl_dir, &self.log_name);
        if overwrite {
            remove_if_present(&chain_file)?;
            if index_offsets {
                remove_if_present(&offsets_file)?;
            }
        }

        let mut writer = ChainWriter::open(&chain_file, verify)?;
        let preexisting = writer.block_count();
        let mut indexer = match index_offsets {
            true => Some(OffsetIndexer::new(
                AlfFile::open(&offsets_file)?,
                verify,
            )),
            false => None,
        };
        let first_rn_to_index = indexer.as_ref().map(|ix| ix.alf().size() + 1);

        let salter = self.rules.salter.clone();
        let mut seek: Option<(u64, u64)> = None;
        let mut hasher = if verify || preexisting == 0 {
            StateHasher::new(salter)
        } else {
            // Resume from the chain itself: rebuild the frontier at the
            // last written row, then seek as close to it as saved state
            // allows.
            let reader = ChainReader::open(&chain_file)?;
            let frontier = reader.frontier(preexisting)?;
            let pre = reader.frontier(preexisting - 1)?;
            let input = reader.input_hash(preexisting)?;
            let mut h = StateHasher::from_state(frontier, Some(pre), Some(input), None, None);
            h.set_salter(salter);

            let start_need = (preexisting + 1).min(first_rn_to_index.unwrap_or(u64::MAX));
            if let Some(ckpt) = self.nearest_checkpoint(start_need)? {
                seek = Some((ckpt.prev_eol(), ckpt.row_number() - 1));
            } else if let Some(index) = self.load_source_index()?.as_mut() {
                let target = start_need.min(index.size());
                if target >= 1 {
                    seek = Some((index.get(target - 1)?, target - 1));
                }
            }
            h
        };
        hasher.push_listener(&mut writer);

        let mut stack = ListenerStack::new();
        stack.push(&mut hasher);
        if let Some(ix) = indexer.as_mut() {
            stack.push(ix);
        }

        let mut log_parser = LogParser::new(self.rules.grammar.clone());
        let mut file = File::open(&self.log_path)?;
        let (offset, last_row) = seek.unwrap_or((0, 0));
        file.seek(SeekFrom::Start(offset))?;
        let mut line_parser = LineParser::with_state(file, offset, last_row);
        log_parser.set_row_no(last_row);
        log_parser.parse(&mut line_parser, &mut stack)?;
        drop(stack);

        let parse_state = hasher.parse_state();
        drop(hasher);
        writer.commit()?;
        let added = writer.block_count() - preexisting;

        // Record the final state so later jobs resume cheaply and
        // `is_random_access` can vouch for the chain.
        self.save_checkpoint_guarded(parse_state, overwrite)?;
        Ok(added)
    }
}

fn remove_if_present(path: &FsPath) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn min_of(values: &[Option<u64>]) -> Option<u64> {
    values.iter().flatten().copied().min()
}

fn max_of(values: &[Option<u64>]) -> Option<u64> {
    values.iter().flatten().copied().max()
}
