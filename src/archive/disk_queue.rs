//! Disk-queued archive writes
//!
//! Groups are staged under `<queue_dir>/<pid>/` as a container plus its
//! `.file_list`, then one `tar cf <device>` process per drive copies the pair
//! onto tape. All processes run concurrently under the executor.

use super::{assemble_group, mirror_outcome, stage_file_list, ArchiveGroup, ArchiveNames, ArchiveWriter};
use crate::config::ArchiveConfig;
use crate::drives::{DriveSelection, TapeDrives};
use crate::error::{PapertapeError, Result};
use crate::executor::{CommandTask, ProcessExecutor, TaskState};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub struct DiskQueueArchiver<D: TapeDrives> {
    drives: Arc<D>,
    executor: ProcessExecutor,
    selection: DriveSelection,
    job_pid: u32,
    job_dir: PathBuf,
    tar_program: String,
}

impl<D: TapeDrives> DiskQueueArchiver<D> {
    pub fn new(
        drives: Arc<D>,
        executor: ProcessExecutor,
        config: &ArchiveConfig,
        selection: DriveSelection,
        job_pid: u32,
    ) -> Self {
        Self {
            drives,
            executor,
            selection,
            job_pid,
            job_dir: config.queue_dir.join(job_pid.to_string()),
            tar_program: config.tar_program.clone(),
        }
    }

    pub fn job_dir(&self) -> &PathBuf {
        &self.job_dir
    }

    /// Build the container and sidecar for `group` in the queue directory
    pub fn stage_group(&self, group: &ArchiveGroup) -> Result<()> {
        let names = ArchiveNames::new(self.job_pid, group.tape_index);
        stage_file_list(&self.job_dir, group, &names)?;

        let path = self.job_dir.join(names.archive_file_name());
        let file = File::create(&path)?;
        let mut writer = assemble_group(group, &names, BufWriter::new(file))?;
        writer.flush()?;
        debug!("Queued {}", path.display());
        Ok(())
    }

    fn tasks(&self, names: &ArchiveNames) -> Vec<CommandTask> {
        self.selection
            .selected()
            .into_iter()
            .map(|drive| {
                CommandTask::new(
                    drive,
                    self.tar_program.clone(),
                    [
                        "cf".to_string(),
                        self.drives.device_path(drive).to_string_lossy().into_owned(),
                        "-C".to_string(),
                        self.job_dir.to_string_lossy().into_owned(),
                        names.file_list_name(),
                        names.archive_file_name(),
                    ],
                )
            })
            .collect()
    }
}

#[async_trait]
impl<D: TapeDrives> ArchiveWriter for DiskQueueArchiver<D> {
    fn selection(&self) -> DriveSelection {
        self.selection
    }

    async fn write_group(&mut self, group: &ArchiveGroup) -> Result<()> {
        let names = ArchiveNames::new(self.job_pid, group.tape_index);
        let staged = self.job_dir.join(names.archive_file_name());
        if !staged.exists() || !self.job_dir.join(names.file_list_name()).exists() {
            info!("{} not in queue, staging it", names.archive_file_name());
            self.stage_group(group)?;
        }

        info!("Writing {} to drive(s) {:?}", names.prefix(), self.selection.selected());
        let report = self.executor.run_all(self.tasks(&names)).await;

        let succeeded = report.succeeded().map(|task| task.tag).collect();
        let failures = report
            .failed()
            .map(|task| {
                let reason = match task.state() {
                    TaskState::Failed(reason) => reason.clone(),
                    other => format!("{:?}", other),
                };
                (
                    task.tag,
                    PapertapeError::process_failure(task.command_line(), reason),
                )
            })
            .collect();
        mirror_outcome(group.tape_index, succeeded, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveItem;
    use crate::config::LibraryConfig;
    use crate::drives::SystemDrives;
    use std::fs;
    use std::io::Read;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(root: &TempDir) -> (DiskQueueArchiver<SystemDrives>, ArchiveGroup) {
        fs::create_dir_all(root.path().join("data")).unwrap();
        fs::write(root.path().join("data/a"), b"alpha").unwrap();
        fs::create_dir_all(root.path().join("dev0")).unwrap();

        let library = LibraryConfig {
            device_template: format!("{}/dev{{drive}}/nst", root.path().display()),
            ..LibraryConfig::default()
        };
        let archive = ArchiveConfig {
            queue_dir: root.path().join("queue"),
            ..ArchiveConfig::default()
        };
        let archiver = DiskQueueArchiver::new(
            Arc::new(SystemDrives::new(&library)),
            ProcessExecutor::new(Duration::from_millis(20), Duration::from_secs(30)),
            &archive,
            DriveSelection::All(2),
            55,
        );
        let group = ArchiveGroup {
            tape_index: 1,
            items: vec![ArchiveItem::new(root.path(), "data/a")],
        };
        (archiver, group)
    }

    #[test]
    fn test_task_command_lines() {
        let root = TempDir::new().unwrap();
        let (archiver, _) = setup(&root);
        let tasks = archiver.tasks(&ArchiveNames::new(55, 1));

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].tag, 1);
        assert_eq!(
            tasks[0].command_line(),
            format!(
                "tar cf {root}/dev0/nst -C {root}/queue/55 paper.55.1.file_list paper.55.1.tar",
                root = root.path().display()
            )
        );
    }

    #[tokio::test]
    async fn test_missing_device_is_partial_mirror() {
        let root = TempDir::new().unwrap();
        let (mut archiver, group) = setup(&root);
        archiver.stage_group(&group).unwrap();

        let err = archiver.write_group(&group).await.unwrap_err();
        match err {
            PapertapeError::PartialMirrorFailure {
                failed_drives,
                succeeded_drives,
                ..
            } => {
                assert_eq!(failed_drives, vec![1]);
                assert_eq!(succeeded_drives, vec![0]);
            }
            other => panic!("expected PartialMirrorFailure, got {:?}", other),
        }

        let mut names = Vec::new();
        let file = File::open(root.path().join("dev0/nst")).unwrap();
        for entry in tar::Archive::new(file).entries().unwrap() {
            let mut entry = entry.unwrap();
            names.push(entry.path().unwrap().to_string_lossy().into_owned());
            let mut sink = Vec::new();
            entry.read_to_end(&mut sink).unwrap();
        }
        assert_eq!(names, vec!["paper.55.1.file_list", "paper.55.1.tar"]);
    }

    #[tokio::test]
    async fn test_no_drive_written_returns_drive_error() {
        let root = TempDir::new().unwrap();
        let (mut archiver, group) = setup(&root);
        fs::remove_dir_all(root.path().join("dev0")).unwrap();

        // staged on demand, then refused by every drive
        let err = archiver.write_group(&group).await.unwrap_err();
        match err {
            PapertapeError::ProcessFailure { command, .. } => {
                assert!(command.contains("/dev0/nst"), "{}", command);
            }
            other => panic!("expected ProcessFailure, got {:?}", other),
        }
        assert!(archiver.job_dir().join("paper.55.1.file_list").exists());
    }
}
