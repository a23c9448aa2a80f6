//! Dump Command Handler
//!
//! Runs a full mirrored dump of one manifest onto a fresh tape pair.

use super::open_changer;
use crate::archive::{ArchiveWriter, DiskQueueArchiver, DriveTable, Manifest, StreamingArchiver};
use crate::catalog::JsonCatalog;
use crate::cli::{CommitArg, ModeArg};
use crate::config::{CommitMode, Config, WriteMode};
use crate::drives::DriveSelection;
use crate::dump::DumpSession;
use crate::error::{PapertapeError, Result};
use crate::executor::ProcessExecutor;
use crate::utils::format_elapsed;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub async fn execute(
    config: &Config,
    manifest_path: PathBuf,
    drive: Option<usize>,
    mode: Option<ModeArg>,
    commit: Option<CommitArg>,
    progress: bool,
) -> Result<()> {
    let mut archive = config.archive.clone();
    if let Some(mode) = mode {
        archive.mode = match mode {
            ModeArg::DiskQueue => WriteMode::DiskQueue,
            ModeArg::Streaming => WriteMode::Streaming,
        };
    }
    if let Some(commit) = commit {
        archive.commit = match commit {
            CommitArg::Buffered => CommitMode::Buffered,
            CommitArg::Fast => CommitMode::Fast,
        };
    }

    let drive_count = config.library.drive_count;
    let selection = match drive {
        Some(drive) if drive < drive_count => DriveSelection::Single(drive),
        Some(drive) => {
            return Err(PapertapeError::parameter_validation(format!(
                "drive {} out of range (library has {})",
                drive, drive_count
            )))
        }
        None => DriveSelection::All(drive_count),
    };

    let manifest = Manifest::read_csv(&manifest_path)?;
    let job_pid = std::process::id();
    info!(
        "Dump job {}: {} file(s) from {}, mode {:?}",
        job_pid,
        manifest.len(),
        manifest_path.display(),
        archive.mode
    );

    let mut catalog = JsonCatalog::open(&config.catalog.path, &config.catalog.label_prefixes)?;
    let mut changer = open_changer(&config.library).await?;
    let drives = Arc::clone(changer.drives());

    let mut writer: Box<dyn ArchiveWriter> = match archive.mode {
        WriteMode::DiskQueue => Box::new(DiskQueueArchiver::new(
            drives,
            ProcessExecutor::new(archive.poll_interval(), config.library.command_timeout()),
            &archive,
            selection,
            job_pid,
        )),
        WriteMode::Streaming => Box::new(StreamingArchiver::from_config(
            drives,
            &archive,
            DriveTable::new(selection, drive_count, &config.library.lock_dir),
            selection,
            job_pid,
        )),
    };

    let started = Instant::now();
    let mut session = DumpSession::new(&mut changer, &mut catalog, job_pid)
        .with_reconciliation_log(&config.catalog.reconciliation_log);
    if progress {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
                .map_err(|e| PapertapeError::parameter_validation(e.to_string()))?,
        );
        session = session.with_progress(bar);
    }

    let report = session
        .run(&manifest, &archive.data_root, writer.as_mut())
        .await?;

    println!(
        "Job {} wrote {} archive(s) to {} in {}",
        job_pid,
        report.groups_written.len(),
        report
            .labels
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(" + "),
        format_elapsed(started.elapsed())
    );
    for item in &report.reconciliation {
        warn!(
            "Catalog needs reconciliation: {} for {:?} ({})",
            item.operation, item.labels, item.error
        );
    }
    Ok(())
}
