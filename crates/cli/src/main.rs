//! # benchstore - shared benchmark result store
//!
//! Runs the standard deviation benchmark and appends its timings to one
//! container file that many processes may write at once.
//!
//! ## Commands
//!
//! ```text
//! calc      compute, save, read back; repeat -n times (default from env)
//! read      count (and with --verbose list) every stored dataset
//! parallel  launch --np copies of `calc --collective` and wait for them
//! unlock    remove a stale <file>.lock left by a dead writer
//! ```
//!
//! ## Configuration
//!
//! Defaults come from `BENCHSTORE_*` environment variables (see the `config`
//! crate); flags override them. Log output goes to stderr, `--debug` or
//! `RUST_LOG` raises the level.
//!
//! ## Example
//!
//! ```text
//! $ benchstore calc -n 3
//! status: file output.bsc has 1 items
//! status: file output.bsc has 2 items
//! status: file output.bsc has 3 items
//! status: wrote 3, skipped 0
//! $ benchstore read --verbose
//! result/2024.01.01.0000.00.000
//! result/2024.01.01.0000.00.412
//! result/2024.01.01.0000.00.829
//! status: file output.bsc has 3 items
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::logging::{init_logging, LogLevel};
use config::{Iterations, Settings, WriteMode};
use stddev::BenchParams;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use store::{
    read_output, CollectiveWriter, Participant, Worker, WorkerConfig, RANK_ENV, WORLD_SIZE_ENV,
};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "benchstore")]
#[command(version, about = "Append benchmark timings to a shared container file", long_about = None)]
struct Cli {
    /// Container file (default: $BENCHSTORE_FILE or ./output.bsc)
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute, save and read back, repeatedly
    Calc {
        /// Iterations, or "inf"
        #[arg(short = 'n', long)]
        iterations: Option<String>,

        /// Group namespace the results go under
        #[arg(long)]
        address: Option<String>,

        /// Lock-free write as one participant of a collective run
        #[arg(long)]
        collective: bool,

        /// With --collective: write into the address itself, not a rank group
        #[arg(long, requires = "collective")]
        shared_group: bool,

        /// Skip the advisory lock
        #[arg(long)]
        no_lock: bool,

        /// Discard existing contents on every save
        #[arg(long)]
        truncate: bool,

        /// List every dataset during read-back
        #[arg(short, long)]
        verbose: bool,
    },

    /// Count the datasets in the container
    Read {
        /// List every dataset path
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run several collective writers as child processes
    Parallel {
        /// Number of participants
        #[arg(long)]
        np: u32,

        /// Iterations per participant, or "inf"
        #[arg(short = 'n', long)]
        iterations: Option<String>,

        #[arg(long)]
        address: Option<String>,

        /// All participants write into the address itself
        #[arg(long)]
        shared_group: bool,
    },

    /// Remove the lock file by hand
    Unlock,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.debug {
        LogLevel::Debug
    } else {
        LogLevel::Info
    });

    let mut settings = Settings::from_env().context("reading BENCHSTORE_* environment")?;
    settings.file = resolve_file(cli.file, &settings.file);

    match cli.command {
        Commands::Calc {
            iterations,
            address,
            collective,
            shared_group,
            no_lock,
            truncate,
            verbose,
        } => {
            apply_overrides(&mut settings, iterations, address)?;
            if no_lock {
                settings.lock = false;
            }
            if truncate {
                settings.write_mode = WriteMode::Truncate;
            }
            calc(&settings, collective, shared_group, verbose)
        }
        Commands::Read { verbose } => {
            let stdout = io::stdout();
            read_output(&settings.file, verbose, &mut stdout.lock())
                .with_context(|| format!("reading {}", settings.file.display()))?;
            Ok(())
        }
        Commands::Parallel {
            np,
            iterations,
            address,
            shared_group,
        } => {
            apply_overrides(&mut settings, iterations, address)?;
            parallel(&settings, np, shared_group, cli.debug)
        }
        Commands::Unlock => {
            let path = lockfile::lock_path_for(&settings.file);
            if lockfile::force_unlock(&settings.file)? {
                println!("removed {}", path.display());
            } else {
                println!("no lock at {}", path.display());
            }
            Ok(())
        }
    }
}

/// `--file` wins, then `BENCHSTORE_FILE`, then `output.bsc` in the working
/// directory.
fn resolve_file(flag: Option<PathBuf>, from_env: &Path) -> PathBuf {
    match flag {
        Some(path) => path,
        None if from_env == Path::new(config::DEFAULT_FILENAME) => store::default_filename(),
        None => from_env.to_path_buf(),
    }
}

fn apply_overrides(
    settings: &mut Settings,
    iterations: Option<String>,
    address: Option<String>,
) -> Result<()> {
    if let Some(n) = iterations {
        settings.iterations = n.parse::<Iterations>()?;
    }
    if let Some(address) = address {
        settings.address = address;
    }
    Ok(())
}

fn calc(settings: &Settings, collective: bool, shared_group: bool, verbose: bool) -> Result<()> {
    let mut worker_config = if collective {
        let participant = Participant::from_env()?;
        let writer = CollectiveWriter::new(&settings.file, &settings.address, participant, !shared_group)?
            .with_base_seed(settings.seed)
            .with_sync(settings.sync);
        let bench = BenchParams::default().with_repeats(settings.repeats);
        let mut cfg = WorkerConfig::collective(&writer, settings.iterations, bench);
        // rejected by Worker::new if it asks for truncation
        cfg.save.write_mode = settings.write_mode;
        cfg
    } else {
        WorkerConfig::from_settings(settings)
    };
    worker_config.verbose = verbose;
    debug!(?worker_config, "worker config");

    let mut worker = Worker::new(worker_config)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let report = worker.run(&mut out)?;

    writeln!(
        out,
        "status: wrote {}, skipped {}",
        report.written, report.collisions
    )?;
    Ok(())
}

fn parallel(settings: &Settings, np: u32, shared_group: bool, debug: bool) -> Result<()> {
    if np == 0 {
        bail!("--np must be at least 1");
    }
    let exe = std::env::current_exe().context("locating the benchstore executable")?;

    run_participants(np, |rank| {
        let mut cmd = Command::new(&exe);
        cmd.arg("--file").arg(&settings.file);
        if debug {
            cmd.arg("--debug");
        }
        cmd.args(["calc", "--collective", "-n"])
            .arg(settings.iterations.to_string())
            .arg("--address")
            .arg(&settings.address);
        if shared_group {
            cmd.arg("--shared-group");
        }
        cmd.env(RANK_ENV, rank.to_string())
            .env(WORLD_SIZE_ENV, np.to_string());
        cmd.spawn()
    })?;

    let stdout = io::stdout();
    read_output(&settings.file, false, &mut stdout.lock())?;
    Ok(())
}

/// Starts ranks `0..np` through `spawn` and waits for all of them. If a
/// rank fails to start, the ones already running are killed and reaped
/// before the error is returned.
fn run_participants<F>(np: u32, mut spawn: F) -> Result<()>
where
    F: FnMut(u32) -> io::Result<Child>,
{
    let mut children: Vec<(u32, Child)> = Vec::with_capacity(np as usize);
    for rank in 0..np {
        match spawn(rank) {
            Ok(child) => {
                info!(rank, pid = child.id(), "participant started");
                children.push((rank, child));
            }
            Err(e) => {
                for (started, mut child) in children {
                    warn!(rank = started, pid = child.id(), "stopping participant");
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(anyhow::Error::new(e).context(format!("spawning participant {rank}")));
            }
        }
    }

    let mut failed = Vec::new();
    for (rank, mut child) in children {
        match child.wait() {
            Ok(status) if status.success() => {}
            Ok(_) => failed.push(rank),
            Err(e) => {
                warn!(rank, error = %e, "waiting for participant");
                failed.push(rank);
            }
        }
    }
    if !failed.is_empty() {
        bail!("participants {failed:?} failed");
    }
    Ok(())
}
