//! Direct-to-device archive streaming
//!
//! The group container is built once, then appended to an outer tar opened on
//! each selected drive in turn. How the container is held between those two
//! steps is the [`CommitStrategy`]: in memory ([`BufferedCommit`]) or as a
//! staged file ([`FastCommit`]).

use super::drive_state::{DeviceStream, DriveTable};
use super::{assemble_group, mirror_outcome, stage_file_list, ArchiveGroup, ArchiveNames, ArchiveWriter};
use crate::changer::inventory::DriveIndex;
use crate::config::{ArchiveConfig, CommitMode};
use crate::drives::{DriveSelection, TapeDrives};
use crate::error::{PapertapeError, Result};
use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub trait CommitStrategy: Send {
    fn name(&self) -> &'static str;

    /// Build the group container ahead of the per-drive writes
    fn stage(&mut self, group: &ArchiveGroup, names: &ArchiveNames) -> Result<()>;

    /// Append the staged container to one drive's outer tar.
    ///
    /// `template` is an on-disk file whose metadata seeds the entry header.
    fn write_payload(&mut self, stream: &mut DeviceStream, names: &ArchiveNames, template: &Path) -> Result<()>;

    /// Release staged data once every drive holds the group
    fn finish(&mut self, names: &ArchiveNames) -> Result<()>;
}

/// Fails writes that would grow the buffer past `limit`
struct BoundedBuffer<'a> {
    buf: &'a mut Vec<u8>,
    limit: u64,
    overflow_at: Option<u64>,
}

impl Write for BoundedBuffer<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let wanted = (self.buf.len() + data.len()) as u64;
        if wanted > self.limit {
            self.overflow_at = Some(wanted);
            return Err(io::Error::other("archive buffer limit reached"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Group container held in memory, rewrapped as one entry per drive
pub struct BufferedCommit {
    buffer: Vec<u8>,
    limit: u64,
}

impl BufferedCommit {
    pub fn new(limit: u64) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
        }
    }
}

impl CommitStrategy for BufferedCommit {
    fn name(&self) -> &'static str {
        "buffered"
    }

    fn stage(&mut self, group: &ArchiveGroup, names: &ArchiveNames) -> Result<()> {
        self.buffer.clear();
        let mut bounded = BoundedBuffer {
            buf: &mut self.buffer,
            limit: self.limit,
            overflow_at: None,
        };
        let assembled = assemble_group(group, names, &mut bounded).map(|_| ());
        match (assembled, bounded.overflow_at) {
            (Err(_), Some(size)) => {
                self.buffer.clear();
                Err(PapertapeError::ArchiveTooLarge {
                    tape_index: group.tape_index,
                    size,
                    limit: self.limit,
                })
            }
            (result, _) => result,
        }
    }

    fn write_payload(&mut self, stream: &mut DeviceStream, names: &ArchiveNames, template: &Path) -> Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_metadata(&fs::metadata(template)?);
        header.set_size(self.buffer.len() as u64);
        stream.append_data(&mut header, names.archive_file_name(), &self.buffer[..])?;
        Ok(())
    }

    fn finish(&mut self, _names: &ArchiveNames) -> Result<()> {
        // keep the allocation for the next group
        self.buffer.clear();
        Ok(())
    }
}

/// Group container staged on local disk and appended without rewrapping
pub struct FastCommit {
    stage_dir: PathBuf,
}

impl FastCommit {
    pub fn new(stage_dir: &Path) -> Self {
        Self {
            stage_dir: stage_dir.to_path_buf(),
        }
    }

    pub fn staged_path(&self, names: &ArchiveNames) -> PathBuf {
        self.stage_dir.join(names.archive_file_name())
    }
}

impl CommitStrategy for FastCommit {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn stage(&mut self, group: &ArchiveGroup, names: &ArchiveNames) -> Result<()> {
        fs::create_dir_all(&self.stage_dir)?;
        let path = self.staged_path(names);
        let file = File::create(&path)?;
        let mut writer = assemble_group(group, names, BufWriter::new(file))?;
        writer.flush()?;
        debug!("Staged {}", path.display());
        Ok(())
    }

    fn write_payload(&mut self, stream: &mut DeviceStream, names: &ArchiveNames, _template: &Path) -> Result<()> {
        stream.append_path_with_name(self.staged_path(names), names.archive_file_name())?;
        Ok(())
    }

    fn finish(&mut self, names: &ArchiveNames) -> Result<()> {
        let path = self.staged_path(names);
        OpenOptions::new().write(true).open(&path)?.set_len(0)?;
        debug!("Truncated {}", path.display());
        Ok(())
    }
}

pub struct StreamingArchiver<D: TapeDrives> {
    drives: Arc<D>,
    table: DriveTable,
    selection: DriveSelection,
    job_pid: u32,
    list_dir: PathBuf,
    commit: Box<dyn CommitStrategy>,
}

impl<D: TapeDrives> StreamingArchiver<D> {
    pub fn new(
        drives: Arc<D>,
        table: DriveTable,
        selection: DriveSelection,
        job_pid: u32,
        list_dir: PathBuf,
        commit: Box<dyn CommitStrategy>,
    ) -> Self {
        Self {
            drives,
            table,
            selection,
            job_pid,
            list_dir,
            commit,
        }
    }

    pub fn from_config(
        drives: Arc<D>,
        config: &ArchiveConfig,
        table: DriveTable,
        selection: DriveSelection,
        job_pid: u32,
    ) -> Self {
        let stage_dir = config.stage_dir.join(job_pid.to_string());
        let commit: Box<dyn CommitStrategy> = match config.commit {
            CommitMode::Buffered => Box::new(BufferedCommit::new(config.buffer_limit_bytes)),
            CommitMode::Fast => Box::new(FastCommit::new(&stage_dir)),
        };
        Self::new(drives, table, selection, job_pid, stage_dir, commit)
    }

    pub fn drive_table(&self) -> &DriveTable {
        &self.table
    }

    fn write_to_drive(&mut self, drive: DriveIndex, names: &ArchiveNames, file_list: &Path) -> Result<u64> {
        let stream = self.table.open(drive, self.drives.as_ref())?;
        stream.append_path_with_name(file_list, names.file_list_name())?;
        self.commit.write_payload(stream, names, file_list)?;
        self.table.close(drive)
    }
}

#[async_trait]
impl<D: TapeDrives> ArchiveWriter for StreamingArchiver<D> {
    fn selection(&self) -> DriveSelection {
        self.selection
    }

    async fn write_group(&mut self, group: &ArchiveGroup) -> Result<()> {
        let names = ArchiveNames::new(self.job_pid, group.tape_index);
        info!(
            "Streaming archive {} ({} item(s), {} commit)",
            names.prefix(),
            group.items.len(),
            self.commit.name()
        );

        let file_list = stage_file_list(&self.list_dir, group, &names)?;
        self.commit.stage(group, &names)?;

        let mut succeeded = Vec::new();
        let mut failures = Vec::new();
        for drive in self.selection.selected() {
            match self.write_to_drive(drive, &names, &file_list) {
                Ok(bytes) => {
                    debug!("Drive {}: {} bytes for {}", drive, bytes, names.prefix());
                    succeeded.push(drive);
                }
                Err(e) => {
                    self.table.abort(drive);
                    failures.push((drive, e));
                    break;
                }
            }
        }

        if failures.is_empty() {
            self.commit.finish(&names)?;
        }
        mirror_outcome(group.tape_index, succeeded, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveItem;
    use crate::changer::inventory::TapeLabel;
    use crate::simulated::SimulatedLibrary;
    use std::io::Read;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        lib: SimulatedLibrary,
    }

    impl Fixture {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            fs::create_dir_all(root.path().join("data")).unwrap();
            fs::write(root.path().join("data/a"), b"first file\n").unwrap();
            fs::write(root.path().join("data/b"), b"second file\n").unwrap();
            let lib = SimulatedLibrary::new(2, 4)
                .with_mounted(0, 1, "H0C10001")
                .with_mounted(1, 2, "H0C20001");
            Self { root, lib }
        }

        fn group(&self) -> ArchiveGroup {
            ArchiveGroup {
                tape_index: 7,
                items: vec![
                    ArchiveItem::new(self.root.path(), "/data/a"),
                    ArchiveItem::new(self.root.path(), "/data/b"),
                ],
            }
        }

        fn archiver(&self, commit: Box<dyn CommitStrategy>) -> StreamingArchiver<SimulatedLibrary> {
            let locks = self.root.path().join("locks");
            StreamingArchiver::new(
                Arc::new(self.lib.clone()),
                DriveTable::new(DriveSelection::All(2), 2, &locks),
                DriveSelection::All(2),
                99,
                self.root.path().join("lists"),
                commit,
            )
        }

        fn tape(&self, label: &str) -> Vec<Vec<u8>> {
            self.lib.tape_files(&TapeLabel::new(label).unwrap())
        }
    }

    fn outer_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = entry.path().unwrap().to_string_lossy().into_owned();
                let mut body = Vec::new();
                entry.read_to_end(&mut body).unwrap();
                (name, body)
            })
            .collect()
    }

    fn assert_group_on_tape(files: &[Vec<u8>]) {
        assert_eq!(files.len(), 1);
        let outer = outer_entries(&files[0]);
        let names: Vec<_> = outer.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["paper.99.7.file_list", "paper.99.7.tar"]);
        assert_eq!(outer[0].1, b"7\tdata/a\n7\tdata/b\n");

        let inner = outer_entries(&outer[1].1);
        assert_eq!(inner[0], ("paper.99.7/data/a".to_string(), b"first file\n".to_vec()));
        assert_eq!(inner[1], ("paper.99.7/data/b".to_string(), b"second file\n".to_vec()));
    }

    #[tokio::test]
    async fn test_buffered_commit_mirrors_identical_bytes() {
        let fx = Fixture::new();
        let mut archiver = fx.archiver(Box::new(BufferedCommit::new(1024 * 1024)));

        archiver.write_group(&fx.group()).await.unwrap();

        let left = fx.tape("H0C10001");
        let right = fx.tape("H0C20001");
        assert_group_on_tape(&left);
        assert_eq!(left, right);
        assert_eq!(left[0].len() % crate::drives::TAR_RECORD_SIZE, 0);
    }

    #[tokio::test]
    async fn test_fast_commit_truncates_stage_copy() {
        let fx = Fixture::new();
        let stage = fx.root.path().join("shm");
        let mut archiver = fx.archiver(Box::new(FastCommit::new(&stage)));

        archiver.write_group(&fx.group()).await.unwrap();

        assert_group_on_tape(&fx.tape("H0C10001"));
        assert_group_on_tape(&fx.tape("H0C20001"));
        let staged = stage.join("paper.99.7.tar");
        assert_eq!(fs::metadata(staged).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_buffer_limit() {
        let fx = Fixture::new();
        let mut archiver = fx.archiver(Box::new(BufferedCommit::new(1024)));

        let err = archiver.write_group(&fx.group()).await.unwrap_err();
        match err {
            PapertapeError::ArchiveTooLarge { tape_index, size, limit } => {
                assert_eq!(tape_index, 7);
                assert_eq!(limit, 1024);
                assert!(size > limit);
            }
            other => panic!("expected ArchiveTooLarge, got {:?}", other),
        }
        assert!(fx.tape("H0C10001").is_empty());
    }

    #[tokio::test]
    async fn test_second_drive_failure_is_partial_mirror() {
        let fx = Fixture::new();
        fx.lib.fail_writes_on(1);
        let mut archiver = fx.archiver(Box::new(BufferedCommit::new(1024 * 1024)));

        let err = archiver.write_group(&fx.group()).await.unwrap_err();
        match err {
            PapertapeError::PartialMirrorFailure {
                tape_index,
                failed_drives,
                succeeded_drives,
            } => {
                assert_eq!(tape_index, 7);
                assert_eq!(failed_drives, vec![1]);
                assert_eq!(succeeded_drives, vec![0]);
            }
            _ => unreachable!(),
        }
        assert_eq!(
            archiver.drive_table().state(1),
            Some(crate::archive::DriveState::Init)
        );
    }

    #[tokio::test]
    async fn test_missing_source_aborts_before_any_drive() {
        let fx = Fixture::new();
        let mut archiver = fx.archiver(Box::new(BufferedCommit::new(1024 * 1024)));
        let group = ArchiveGroup {
            tape_index: 8,
            items: vec![ArchiveItem::new(fx.root.path(), "data/nope")],
        };

        let err = archiver.write_group(&group).await.unwrap_err();
        assert!(matches!(err, PapertapeError::Assembly { tape_index: 8, .. }));
        assert!(fx.tape("H0C10001").is_empty());
        assert!(fx.tape("H0C20001").is_empty());
    }
}
