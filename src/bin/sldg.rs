use std::path::PathBuf;
use std::process;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use skipledge::grammar::Grammar;
use skipledge::ledger::LogLedger;
use skipledge::source::SourceRow;

#[derive(Parser)]
#[command(
    name = "sldg",
    about = "Skip-ledger for append-only text logs",
    after_help = "Artifacts live in a sibling .lgl directory unless --dir is given."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the hashing rules for a log
    Init {
        /// Log file to ledger
        log: PathBuf,
        /// Artifact directory (default: sibling .lgl)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Token delimiter characters (default: any whitespace)
        #[arg(long)]
        delimiters: Option<String>,
        /// Comment-line prefix (default: none)
        #[arg(long)]
        comment_prefix: Option<String>,
        /// Ledger blank lines instead of skipping them
        #[arg(long)]
        keep_blank: bool,
        /// Salt every cell with a fresh secret seed
        #[arg(long)]
        salt: bool,
    },
    /// Report row count, frontier hash, and artifact inventory
    Status {
        log: PathBuf,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Hash any new rows and save a checkpoint
    Update {
        log: PathBuf,
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Hash without writing a checkpoint
        #[arg(long)]
        no_checkpoint: bool,
    },
    /// Write every row hash into the chain file
    Build {
        log: PathBuf,
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Also fill the row-offset index
        #[arg(long)]
        index: bool,
        /// Discard existing chain (and index) first
        #[arg(long)]
        overwrite: bool,
        /// Re-hash from row 1, verifying every existing block
        #[arg(long)]
        verify: bool,
    },
    /// Gather a skip path connecting the given rows to the latest state
    Path {
        log: PathBuf,
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Row numbers to prove
        #[arg(required = true)]
        rows: Vec<u64>,
    },
    /// Print selected source rows with their input hashes
    Row {
        log: PathBuf,
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(required = true)]
        rows: Vec<u64>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("sldg: {err:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Init {
            log,
            dir,
            delimiters,
            comment_prefix,
            keep_blank,
            salt,
        } => {
            let grammar = Grammar::new(
                !keep_blank,
                delimiters.as_deref(),
                comment_prefix.as_deref(),
            )?;
            let ledger = LogLedger::init(&log, dir.as_deref(), grammar, salt)
                .context("init failed")?;
            println!(
                "initialized {} (salted: {})",
                ledger.lgl_dir().display(),
                ledger.is_salted()
            );
            Ok(())
        }
        Command::Status { log, dir } => {
            let ledger = LogLedger::open(&log, dir.as_deref(), None)?;
            let mut job = ledger.new_job();
            job.compute_hash(true);
            let result = ledger.execute_job(&mut job)?;
            let state = result.state.expect("hash job returns state");
            println!("rows:     {}", state.row_number());
            println!("frontier: {}", state.frontier.frontier_hash());
            println!("eol:      {}", state.eol);
            let nos = ledger.checkpoint_nos()?;
            println!("checkpoints: {nos:?}");
            if let Some(chain) = ledger.load_skip_ledger()? {
                println!("chain blocks: {}", chain.block_count());
            }
            if let Some(index) = ledger.load_source_index()? {
                println!("indexed offsets: {}", index.size());
            }
            Ok(())
        }
        Command::Update {
            log,
            dir,
            no_checkpoint,
        } => {
            let ledger = LogLedger::open(&log, dir.as_deref(), None)?;
            let mut job = ledger.new_job();
            job.compute_hash(true).save_parse_state(!no_checkpoint);
            let result = ledger.execute_job(&mut job)?;
            let state = result.state.expect("hash job returns state");
            let stats = result.stats.expect("hash job returns stats");
            println!(
                "rows: {} ({} newly hashed)",
                state.row_number(),
                stats.rows_hashed
            );
            println!("frontier: {}", state.frontier.frontier_hash());
            if let Some(row) = result.checkpoint_saved {
                println!("checkpoint saved at row {row}");
            }
            Ok(())
        }
        Command::Build {
            log,
            dir,
            index,
            overwrite,
            verify,
        } => {
            let ledger = LogLedger::open(&log, dir.as_deref(), None)?;
            let added = ledger.build_skip_ledger(index, overwrite, verify)?;
            println!("{added} rows added to the chain");
            Ok(())
        }
        Command::Path { log, dir, rows } => {
            let ledger = LogLedger::open(&log, dir.as_deref(), None)?;
            let mut job = ledger.new_job();
            for row in rows {
                job.add_to_path(row);
            }
            let result = ledger.execute_job(&mut job)?;
            let Some(path) = result.path else {
                bail!("no path produced");
            };
            println!("path {}..{} ({} rows)", path.lo(), path.hi(), path.rows().len());
            for row in path.rows() {
                println!("{:>12}  {}", row.row_number(), row.row_hash());
            }
            Ok(())
        }
        Command::Row { log, dir, rows } => {
            let ledger = LogLedger::open(&log, dir.as_deref(), None)?;
            let mut job = ledger.new_job();
            for row in rows {
                job.add_source_row(row, false);
            }
            let result = ledger.execute_job(&mut job)?;
            if result.sources.is_empty() {
                bail!("no matching rows");
            }
            for row in &result.sources {
                print_row(row);
            }
            Ok(())
        }
    }
}

fn print_row(row: &SourceRow) {
    let cells: Vec<&str> = row.cells().iter().map(|c| c.value()).collect();
    println!(
        "{:>12}  {}  [{}]",
        row.row_number(),
        row.input_hash(),
        cells.join(" | ")
    );
}
