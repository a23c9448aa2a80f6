//! Archive builder
//!
//! Every group becomes one tape file on every selected drive. That tape file is
//! an outer tar holding two entries: the group's `.file_list` and the group
//! container `paper.<pid>.<index>.tar`, whose members are named
//! `paper.<pid>.<index>/<item>`.
//!
//! Two writers implement [`ArchiveWriter`]: [`DiskQueueArchiver`] hands staged
//! files to one `tar` process per drive, and [`StreamingArchiver`] writes the
//! outer tar straight into each device with a pluggable commit strategy.

pub mod disk_queue;
pub mod drive_state;
pub mod manifest;
pub mod streaming;

pub use disk_queue::DiskQueueArchiver;
pub use drive_state::{DriveState, DriveTable};
pub use manifest::{Manifest, ManifestEntry};
pub use streaming::{BufferedCommit, CommitStrategy, FastCommit, StreamingArchiver};

use crate::changer::inventory::DriveIndex;
use crate::drives::{write_catalog_block, DriveSelection, TapeDrives};
use crate::error::{PapertapeError, Result};
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// One source path and the name it is archived under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveItem {
    pub source: PathBuf,
    /// Manifest path without leading `/`
    pub name: String,
}

impl ArchiveItem {
    pub fn new(data_root: &Path, manifest_path: &str) -> Self {
        let name = manifest_path.trim_start_matches('/').to_string();
        Self {
            source: data_root.join(&name),
            name,
        }
    }
}

/// Unit of mirrored write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveGroup {
    pub tape_index: u32,
    pub items: Vec<ArchiveItem>,
}

/// Names derived from the job pid and tape index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveNames {
    pub job_pid: u32,
    pub tape_index: u32,
}

impl ArchiveNames {
    pub fn new(job_pid: u32, tape_index: u32) -> Self {
        Self { job_pid, tape_index }
    }

    pub fn prefix(&self) -> String {
        format!("paper.{}.{}", self.job_pid, self.tape_index)
    }

    pub fn archive_file_name(&self) -> String {
        format!("{}.tar", self.prefix())
    }

    pub fn file_list_name(&self) -> String {
        format!("{}.file_list", self.prefix())
    }

    /// Member name inside the group container
    pub fn member(&self, item_name: &str) -> String {
        format!("{}/{}", self.prefix(), item_name.trim_start_matches('/'))
    }
}

/// Writes one group to every selected drive
#[async_trait]
pub trait ArchiveWriter: Send {
    fn selection(&self) -> DriveSelection;

    async fn write_group(&mut self, group: &ArchiveGroup) -> Result<()>;
}

/// Build the group container into `writer`, one member per item.
///
/// Directories are added recursively. Any unreadable source aborts the group.
pub fn assemble_group<W: Write>(group: &ArchiveGroup, names: &ArchiveNames, writer: W) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    for item in &group.items {
        let member = names.member(&item.name);
        debug!("Archive {}: {} -> {}", group.tape_index, item.source.display(), member);
        let appended = if item.source.is_dir() {
            builder.append_dir_all(&member, &item.source)
        } else {
            builder.append_path_with_name(&item.source, &member)
        };
        appended.map_err(|e| PapertapeError::Assembly {
            tape_index: group.tape_index,
            path: item.source.display().to_string(),
            reason: e.to_string(),
        })?;
    }
    builder.into_inner().map_err(|e| PapertapeError::Assembly {
        tape_index: group.tape_index,
        path: names.archive_file_name(),
        reason: e.to_string(),
    })
}

/// Contents of the `.file_list` sidecar, one `index<TAB>name` line per item
pub fn file_list_text(group: &ArchiveGroup) -> String {
    group
        .items
        .iter()
        .map(|item| format!("{}\t{}\n", group.tape_index, item.name))
        .collect()
}

/// Write the sidecar into `dir`, returning its path
pub fn stage_file_list(dir: &Path, group: &ArchiveGroup, names: &ArchiveNames) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(names.file_list_name());
    fs::write(&path, file_list_text(group))?;
    Ok(path)
}

/// Collapse per-drive outcomes of one group into the mirrored-write result.
///
/// Some drives succeeding and some failing is a partial mirror; all failing
/// surfaces the first drive's error.
pub fn mirror_outcome(
    tape_index: u32,
    succeeded: Vec<DriveIndex>,
    failures: Vec<(DriveIndex, PapertapeError)>,
) -> Result<()> {
    if failures.is_empty() {
        info!("Archive {} mirrored to drive(s) {:?}", tape_index, succeeded);
        return Ok(());
    }
    for (drive, e) in &failures {
        error!("Archive {} failed on drive {}: {}", tape_index, drive, e);
    }
    if succeeded.is_empty() {
        let (_, first) = failures.into_iter().next().ok_or_else(|| {
            PapertapeError::parameter_validation("mirror outcome without drives")
        })?;
        return Err(first);
    }
    Err(PapertapeError::PartialMirrorFailure {
        tape_index,
        failed_drives: failures.into_iter().map(|(drive, _)| drive).collect(),
        succeeded_drives: succeeded,
    })
}

/// Lay the session catalog down as the first tape file of every selected drive
pub fn write_tape_catalog<D: TapeDrives + ?Sized>(
    drives: &D,
    selection: DriveSelection,
    catalog_text: &str,
) -> Result<()> {
    for drive in selection.selected() {
        info!("Writing tape catalog to drive {}", drive);
        write_catalog_block(drives, drive, catalog_text)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_names() {
        let names = ArchiveNames::new(4242, 7);
        assert_eq!(names.prefix(), "paper.4242.7");
        assert_eq!(names.archive_file_name(), "paper.4242.7.tar");
        assert_eq!(names.file_list_name(), "paper.4242.7.file_list");
        assert_eq!(names.member("/data/a"), "paper.4242.7/data/a");
    }

    #[test]
    fn test_assemble_group_names_members() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("data/dir")).unwrap();
        std::fs::write(root.path().join("data/a"), b"alpha").unwrap();
        std::fs::write(root.path().join("data/dir/x"), b"x-ray").unwrap();

        let group = ArchiveGroup {
            tape_index: 7,
            items: vec![
                ArchiveItem::new(root.path(), "/data/a"),
                ArchiveItem::new(root.path(), "data/dir"),
            ],
        };
        let names = ArchiveNames::new(1, 7);
        let bytes = assemble_group(&group, &names, Vec::new()).unwrap();

        let mut archive = tar::Archive::new(&bytes[..]);
        let mut found = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            found.push((path, body));
        }
        assert!(found.contains(&("paper.1.7/data/a".to_string(), "alpha".to_string())));
        assert!(found.contains(&("paper.1.7/data/dir/x".to_string(), "x-ray".to_string())));
    }

    #[test]
    fn test_assemble_group_missing_source() {
        let root = TempDir::new().unwrap();
        let group = ArchiveGroup {
            tape_index: 3,
            items: vec![ArchiveItem::new(root.path(), "missing")],
        };
        let err = assemble_group(&group, &ArchiveNames::new(1, 3), Vec::new()).unwrap_err();
        assert!(matches!(err, PapertapeError::Assembly { tape_index: 3, .. }));
    }

    #[test]
    fn test_mirror_outcome() {
        assert!(mirror_outcome(1, vec![0, 1], vec![]).is_ok());

        let err = mirror_outcome(
            1,
            vec![0],
            vec![(1, PapertapeError::parse("medium error"))],
        )
        .unwrap_err();
        match err {
            PapertapeError::PartialMirrorFailure {
                failed_drives,
                succeeded_drives,
                ..
            } => {
                assert_eq!(failed_drives, vec![1]);
                assert_eq!(succeeded_drives, vec![0]);
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = mirror_outcome(1, vec![], vec![(0, PapertapeError::parse("dead"))]).unwrap_err();
        assert!(matches!(err, PapertapeError::Parse(_)));
    }
}
