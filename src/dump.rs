//! Mirrored dump session
//!
//! select pair -> claim -> mount pair -> tape catalog -> groups -> date -> unload
//!
//! A tape that holds data is never rolled back. Catalog updates that fail
//! along the way are reported as [`ReconciliationItem`]s instead of failing the
//! session; anything that fails on the hardware side stops it.

use crate::archive::{write_tape_catalog, ArchiveWriter, Manifest};
use crate::catalog::{format_date, TapeCatalog};
use crate::changer::inventory::TapeLabel;
use crate::changer::mtx::MediaChanger;
use crate::changer::Changer;
use crate::drives::TapeDrives;
use crate::error::{PapertapeError, Result};
use chrono::Local;
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Catalog bookkeeping left undone, to be replayed by an operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationItem {
    pub operation: String,
    pub labels: Vec<TapeLabel>,
    pub job_pid: u32,
    pub error: String,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpReport {
    pub labels: Vec<TapeLabel>,
    pub groups_written: Vec<u32>,
    pub reconciliation: Vec<ReconciliationItem>,
}

impl DumpReport {
    pub fn is_reconciled(&self) -> bool {
        self.reconciliation.is_empty()
    }
}

pub struct DumpSession<'a, M: MediaChanger, D: TapeDrives, C: TapeCatalog> {
    changer: &'a mut Changer<M, D>,
    catalog: &'a mut C,
    job_pid: u32,
    reconciliation_log: Option<PathBuf>,
    progress: Option<ProgressBar>,
}

impl<'a, M: MediaChanger, D: TapeDrives, C: TapeCatalog> DumpSession<'a, M, D, C> {
    pub fn new(changer: &'a mut Changer<M, D>, catalog: &'a mut C, job_pid: u32) -> Self {
        Self {
            changer,
            catalog,
            job_pid,
            reconciliation_log: None,
            progress: None,
        }
    }

    /// Append reconciliation items to this JSON-lines file as they happen
    pub fn with_reconciliation_log(mut self, path: &Path) -> Self {
        self.reconciliation_log = Some(path.to_path_buf());
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn run<W: ArchiveWriter + ?Sized>(
        &mut self,
        manifest: &Manifest,
        data_root: &Path,
        writer: &mut W,
    ) -> Result<DumpReport> {
        let groups = manifest.groups(data_root);
        if groups.is_empty() {
            return Err(PapertapeError::parameter_validation("manifest has no entries"));
        }

        let labels = self.catalog.select_available_label_pair()?;
        info!("Job {} dumping {} archive(s) to {:?}", self.job_pid, groups.len(), labels);
        let mut report = DumpReport {
            labels: labels.clone(),
            ..DumpReport::default()
        };

        if let Err(e) = self.catalog.claim_labels(&labels, self.job_pid) {
            self.reconcile(&mut report, "claim_labels", &labels, &e);
        }

        self.changer.mount_pair(&labels).await?;

        let catalog_text = manifest.catalog_text(self.job_pid);
        if let Err(e) = write_tape_catalog(self.changer.drives().as_ref(), writer.selection(), &catalog_text) {
            error!("Cannot write tape catalog: {}", e);
            self.unload_after_failure().await;
            return Err(e);
        }

        if let Some(progress) = &self.progress {
            progress.set_length(groups.len() as u64);
        }
        for group in &groups {
            if let Some(progress) = &self.progress {
                progress.set_message(format!("archive {}", group.tape_index));
            }
            if let Err(e) = writer.write_group(group).await {
                error!("Dump aborted at archive {}: {}", group.tape_index, e);
                self.unload_after_failure().await;
                return Err(e);
            }
            report.groups_written.push(group.tape_index);
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }

        if let Err(e) = self.catalog.record_completion_date(&labels) {
            self.reconcile(&mut report, "record_completion_date", &labels, &e);
        }

        if let Err(e) = self.changer.unmount_pair().await {
            warn!("Tapes written but not unloaded: {}", e);
        }
        if let Some(progress) = &self.progress {
            progress.finish_with_message("done");
        }
        Ok(report)
    }

    async fn unload_after_failure(&mut self) {
        if let Err(e) = self.changer.unmount_pair().await {
            warn!("Cannot unload after failed dump: {}", e);
        }
        if let Some(progress) = &self.progress {
            progress.abandon_with_message("failed");
        }
    }

    fn reconcile(&self, report: &mut DumpReport, operation: &str, labels: &[TapeLabel], e: &PapertapeError) {
        warn!("Catalog {} failed for {:?}: {}", operation, labels, e);
        let item = ReconciliationItem {
            operation: operation.to_string(),
            labels: labels.to_vec(),
            job_pid: self.job_pid,
            error: e.to_string(),
            recorded_at: format_date(Local::now()),
        };
        if let Some(path) = &self.reconciliation_log {
            if let Err(log_error) = append_reconciliation(path, &item) {
                warn!("Cannot queue reconciliation in {}: {}", path.display(), log_error);
            }
        }
        report.reconciliation.push(item);
    }
}

fn append_reconciliation(path: &Path, item: &ReconciliationItem) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(item)
        .map_err(|e| PapertapeError::catalog(format!("Cannot encode reconciliation item: {}", e)))?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}
