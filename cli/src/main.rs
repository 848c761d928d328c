//! zonemove - Command-line interface for the verified zone-transfer engine.
//!
//! Provides subcommands for running configured transfer batches, single
//! verified moves, checksum snapshots, and sidecar inventory maintenance.
//! Progress is reported to stderr; structured logging goes through
//! `env_logger` (RUST_LOG).

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use engine::{
    config,
    dirsnapshot::{DirectorySnapshot, StructureConfig},
    model::{MoveState, TransferJob, ValidationReport},
    mover::{verify_tree, VerifiedMover},
    orchestrator::{run_batch, JobOutcome},
    progress::MoveProgress,
    sidecar,
    snapshot::{ChecksumSnapshotEngine, SnapshotConfig},
    ChecksumAlgorithm, TransferSpec,
};

/// zonemove - move directory trees between storage zones with checksum
/// verification at every step
#[derive(Parser, Debug)]
#[command(name = "zonemove")]
#[command(version = "0.1.0")]
#[command(about = "Integrity-verified directory tree relocation")]
struct Args {
    /// Enable verbose per-file output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the transfer batch defined in the system configuration directory
    Run {
        /// Directory holding the JSON configuration files
        #[arg(long, value_name = "DIR", default_value = "system")]
        system_dir: PathBuf,

        /// Checksum algorithm: md5, sha256, blake3
        #[arg(long, value_name = "ALGORITHM", default_value = "md5")]
        hash: String,
    },

    /// Move a single directory tree with verification
    Move {
        /// Source directory
        #[arg(long, value_name = "PATH")]
        src: PathBuf,

        /// Destination directory
        #[arg(long, value_name = "PATH")]
        dst: PathBuf,

        /// Checksum algorithm: md5, sha256, blake3
        #[arg(long, value_name = "ALGORITHM", default_value = "md5")]
        hash: String,

        /// Delete the source even if validation reported problems
        #[arg(long)]
        force_delete: bool,
    },

    /// Create or resume a whole-tree checksum snapshot
    Snapshot {
        /// Root directory to snapshot
        #[arg(long, value_name = "PATH")]
        root: PathBuf,

        /// History directory (default: system/checksum_snapshots)
        #[arg(long, value_name = "DIR")]
        history_dir: Option<PathBuf>,

        /// Checksum algorithm: md5, sha256, blake3
        #[arg(long, value_name = "ALGORITHM", default_value = "md5")]
        hash: String,

        /// Bytes hashed between persisted checkpoints
        #[arg(long, value_name = "BYTES")]
        checkpoint_bytes: Option<u64>,
    },

    /// Write a digest inventory into every directory under a root
    Hash {
        /// Root directory to hash
        #[arg(long, value_name = "PATH")]
        root: PathBuf,

        /// Checksum algorithm: md5, sha256, blake3
        #[arg(long, value_name = "ALGORITHM", default_value = "md5")]
        hash: String,

        /// Overwrite existing inventories
        #[arg(long)]
        overwrite: bool,
    },

    /// Re-hash a tree against its inventories and report problems
    Verify {
        /// Root directory to verify
        #[arg(long, value_name = "PATH")]
        root: PathBuf,

        /// Checksum algorithm: md5, sha256, blake3
        #[arg(long, value_name = "ALGORITHM", default_value = "md5")]
        hash: String,
    },

    /// List files lacking an inventory entry, optionally hashing them
    Missing {
        /// Root directory to scan
        #[arg(long, value_name = "PATH")]
        root: PathBuf,

        /// Hash the missing files and append them to their inventories
        #[arg(long)]
        backfill: bool,

        /// Checksum algorithm: md5, sha256, blake3
        #[arg(long, value_name = "ALGORITHM", default_value = "md5")]
        hash: String,
    },

    /// Capture a directory-structure snapshot
    Dirsnap {
        /// Root directory to snapshot
        #[arg(long, value_name = "PATH")]
        root: PathBuf,

        /// History directory (default: system/directorystructure_snapshots)
        #[arg(long, value_name = "DIR")]
        history_dir: Option<PathBuf>,
    },

    /// Compare two structure snapshots and print added/removed paths
    Dirdiff {
        /// History directory (default: system/directorystructure_snapshots)
        #[arg(long, value_name = "DIR")]
        history_dir: Option<PathBuf>,

        /// Sequence number of the older snapshot
        #[arg(long, value_name = "NUMBER")]
        old: u32,

        /// Sequence number of the newer snapshot (latest if omitted)
        #[arg(long, value_name = "NUMBER")]
        new: Option<u32>,
    },
}

/// CLI implementation of MoveProgress for displaying move progress
struct CliProgress {
    verbose: bool,
    start_time: Instant,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

fn format_duration(elapsed: std::time::Duration) -> String {
    let secs = elapsed.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

impl MoveProgress for CliProgress {
    fn on_phase_started(&self, job: &TransferJob, phase: MoveState) {
        let label = match phase {
            MoveState::HashingSource => "Hashing source tree...",
            MoveState::Copying => "Copying to destination...",
            MoveState::Validating => "Validating destination...",
            MoveState::DeletingSource => "Deleting source contents...",
            _ => return,
        };
        eprintln!("[{} -> {}] {}", job.source_path.display(), job.destination_path.display(), label);
    }

    fn on_file_copied(&self, path: &Path, bytes: u64) {
        if self.verbose {
            eprintln!("  copied {} ({})", path.display(), format_bytes(bytes));
        }
    }

    fn on_validated(&self, _job: &TransferJob, report: &ValidationReport) {
        eprintln!("  validation: {}", report);
    }

    fn on_job_finished(&self, job: &TransferJob) {
        eprintln!(
            "Job {} finished in {} (state {})",
            job.id,
            format_duration(self.start_time.elapsed()),
            job.state
        );
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<(), String> {
    match &args.command {
        Command::Run { system_dir, hash } => {
            cmd_run(system_dir, parse_algorithm(hash)?, args.verbose)
        }
        Command::Move {
            src,
            dst,
            hash,
            force_delete,
        } => cmd_move(src, dst, parse_algorithm(hash)?, *force_delete, args.verbose),
        Command::Snapshot {
            root,
            history_dir,
            hash,
            checkpoint_bytes,
        } => cmd_snapshot(root, history_dir.as_deref(), parse_algorithm(hash)?, *checkpoint_bytes),
        Command::Hash {
            root,
            hash,
            overwrite,
        } => cmd_hash(root, parse_algorithm(hash)?, *overwrite),
        Command::Verify { root, hash } => cmd_verify(root, parse_algorithm(hash)?),
        Command::Missing {
            root,
            backfill,
            hash,
        } => cmd_missing(root, *backfill, parse_algorithm(hash)?),
        Command::Dirsnap { root, history_dir } => cmd_dirsnap(root, history_dir.as_deref()),
        Command::Dirdiff {
            history_dir,
            old,
            new,
        } => cmd_dirdiff(history_dir.as_deref(), *old, *new),
    }
}

fn parse_algorithm(s: &str) -> Result<ChecksumAlgorithm, String> {
    ChecksumAlgorithm::from_str(s).ok_or_else(|| {
        format!(
            "Invalid hash algorithm '{}'. Must be 'md5', 'sha256', or 'blake3'",
            s
        )
    })
}

fn cmd_run(system_dir: &Path, algorithm: ChecksumAlgorithm, verbose: bool) -> Result<(), String> {
    let transfers: Vec<TransferSpec> =
        config::load_transfers(system_dir).map_err(|e| format!("Configuration failed: {}", e))?;
    if transfers.is_empty() {
        eprintln!("No transfers configured, nothing to do");
        return Ok(());
    }

    let progress = CliProgress::new(verbose);
    let report = run_batch(&transfers, algorithm, &progress);

    eprintln!();
    eprintln!(
        "Batch summary: {} done, {} failed of {}",
        report.completed(),
        report.failed(),
        report.results.len()
    );
    for result in &report.results {
        match &result.outcome {
            JobOutcome::Done { .. } => {}
            JobOutcome::Conflicts { conflicts } => {
                eprintln!("  skipped {}: destination collisions:", result.source.display());
                for path in conflicts {
                    eprintln!("    {}", path.display());
                }
            }
            JobOutcome::IntegrityFailed { validation } => {
                eprintln!(
                    "  kept source {}: validation dirty ({})",
                    result.source.display(),
                    validation
                );
                print_validation_details(validation);
            }
            JobOutcome::Errored { error } => {
                eprintln!("  failed {}: {}", result.source.display(), error);
            }
        }
    }

    if report.all_done() {
        Ok(())
    } else {
        Err(format!("{} transfer job(s) did not complete", report.failed()))
    }
}

fn cmd_move(
    src: &Path,
    dst: &Path,
    algorithm: ChecksumAlgorithm,
    force_delete: bool,
    verbose: bool,
) -> Result<(), String> {
    let progress = CliProgress::new(verbose);
    let mut mover = VerifiedMover::new(src.to_path_buf(), dst.to_path_buf(), algorithm);

    mover.precheck().map_err(|e| format!("Precheck failed: {}", e))?;
    mover
        .hash_source(&progress)
        .map_err(|e| format!("Hashing failed: {}", e))?;
    mover
        .copy(&progress)
        .map_err(|e| format!("Copy failed: {}", e))?;
    let report = mover
        .validate(&progress)
        .map_err(|e| format!("Validation failed to run: {}", e))?;

    if !report.is_clean() {
        print_validation_details(&report);
        if !force_delete {
            return Err(format!(
                "Source kept: validation reported problems ({})",
                report
            ));
        }
        eprintln!("Deleting source anyway (--force-delete)");
    } else if report.has_unlisted() {
        // Pre-existing destination content; reported, not fatal
        eprintln!(
            "{} destination file(s) have no inventory entry:",
            report.missing_inventory.len()
        );
        for path in &report.missing_inventory {
            eprintln!("  {}", path.display());
        }
    }

    mover
        .delete_source(force_delete, &progress)
        .map_err(|e| format!("Source deletion failed: {}", e))?;
    Ok(())
}

fn cmd_snapshot(
    root: &Path,
    history_dir: Option<&Path>,
    algorithm: ChecksumAlgorithm,
    checkpoint_bytes: Option<u64>,
) -> Result<(), String> {
    let mut snapshot_config = SnapshotConfig {
        algorithm,
        ..SnapshotConfig::default()
    };
    if let Some(dir) = history_dir {
        snapshot_config.history_dir = dir.to_path_buf();
    }
    if let Some(bytes) = checkpoint_bytes {
        snapshot_config.checkpoint_bytes = bytes;
    }

    let mut snapshot_engine = ChecksumSnapshotEngine::resume_or_start(snapshot_config)
        .map_err(|e| format!("Snapshot startup failed: {}", e))?;
    eprintln!(
        "Snapshot status: {} ({} file(s) listed, {} pending)",
        snapshot_engine.status(),
        snapshot_engine.file_count(),
        snapshot_engine.pending_count()
    );

    snapshot_engine
        .enumerate(root)
        .map_err(|e| format!("Enumeration failed: {}", e))?;
    let summary = snapshot_engine
        .run()
        .map_err(|e| format!("Snapshot run failed: {}", e))?;

    eprintln!(
        "Snapshot complete: {} file(s), {} hashed in {:.3}s",
        summary.files_hashed,
        format_bytes(summary.bytes_hashed),
        summary.runtime
    );
    if let Some(path) = &summary.final_path {
        eprintln!("Written to {}", path.display());
    }
    if !summary.failures.is_empty() {
        eprintln!("{} file(s) could not be hashed:", summary.failures.len());
        for (path, reason) in &summary.failures {
            eprintln!("  {}: {}", path, reason);
        }
        return Err(format!(
            "{} file(s) were dropped from the snapshot",
            summary.failures.len()
        ));
    }
    Ok(())
}

fn cmd_hash(root: &Path, algorithm: ChecksumAlgorithm, overwrite: bool) -> Result<(), String> {
    let stats = sidecar::hash_tree(root, algorithm, overwrite)
        .map_err(|e| format!("Hashing failed: {}", e))?;
    eprintln!(
        "Hashed {} file(s), {} under {}",
        stats.files,
        format_bytes(stats.bytes),
        root.display()
    );
    Ok(())
}

fn cmd_verify(root: &Path, algorithm: ChecksumAlgorithm) -> Result<(), String> {
    let report = verify_tree(root, algorithm).map_err(|e| format!("Verify failed to run: {}", e))?;
    eprintln!("Verification: {}", report);
    // A standalone audit is strict: unhashed content fails it even though it
    // would not block a move
    if report.is_clean() && !report.has_unlisted() {
        Ok(())
    } else {
        print_validation_details(&report);
        Err("Tree does not match its inventories".to_string())
    }
}

fn cmd_missing(root: &Path, backfill: bool, algorithm: ChecksumAlgorithm) -> Result<(), String> {
    if backfill {
        let count = sidecar::backfill_missing(root, algorithm)
            .map_err(|e| format!("Backfill failed: {}", e))?;
        eprintln!("Hashed and recorded {} missing file(s)", count);
        return Ok(());
    }

    let mut count = 0u64;
    for path in sidecar::find_missing(root) {
        let path = path.map_err(|e| format!("Scan failed: {}", e))?;
        println!("{}", path.display());
        count += 1;
    }
    eprintln!("{} file(s) lack an inventory entry", count);
    Ok(())
}

fn cmd_dirsnap(root: &Path, history_dir: Option<&Path>) -> Result<(), String> {
    let mut structure_config = StructureConfig::default();
    if let Some(dir) = history_dir {
        structure_config.history_dir = dir.to_path_buf();
    }

    let mut snapshot = DirectorySnapshot::new(structure_config);
    let stats = snapshot
        .capture(root)
        .map_err(|e| format!("Capture failed: {}", e))?;
    let path = snapshot.save().map_err(|e| format!("Save failed: {}", e))?;

    eprintln!(
        "Captured {} dir(s), {} file(s), {} -> {}",
        stats.dirs,
        stats.files,
        format_bytes(stats.bytes),
        path.display()
    );
    Ok(())
}

fn cmd_dirdiff(history_dir: Option<&Path>, old: u32, new: Option<u32>) -> Result<(), String> {
    let mut structure_config = StructureConfig::default();
    if let Some(dir) = history_dir {
        structure_config.history_dir = dir.to_path_buf();
    }

    let older = DirectorySnapshot::load(structure_config.clone(), old)
        .map_err(|e| format!("Loading snapshot {} failed: {}", old, e))?;
    let newer = match new {
        Some(nr) => DirectorySnapshot::load(structure_config, nr)
            .map_err(|e| format!("Loading snapshot {} failed: {}", nr, e))?,
        None => DirectorySnapshot::load_latest(structure_config)
            .map_err(|e| format!("Loading latest snapshot failed: {}", e))?,
    };

    let changes = newer.diff(&older);
    for (path, sign) in &changes {
        println!("{} {}", sign, path);
    }
    eprintln!("{} change(s)", changes.len());
    Ok(())
}

fn print_validation_details(report: &ValidationReport) {
    for mismatch in &report.mismatches {
        eprintln!(
            "  mismatch {}: expected {}, got {}",
            mismatch.path.display(),
            mismatch.expected,
            mismatch.actual
        );
    }
    for path in &report.missing {
        eprintln!("  missing {}", path.display());
    }
    for path in &report.missing_inventory {
        eprintln!("  no inventory entry for {}", path.display());
    }
}
