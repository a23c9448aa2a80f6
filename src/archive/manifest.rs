//! Flat archive manifests
//!
//! A manifest is a CSV list of `tape_index,path` rows. Paths are relative to the
//! data root (a leading `/` is tolerated). Rows sharing a tape index form one
//! [`ArchiveGroup`], and groups are written in ascending index order.

use super::{ArchiveGroup, ArchiveItem};
use crate::error::{PapertapeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub tape_index: u32,
    pub path: String,
}

impl ManifestEntry {
    pub fn new<P: Into<String>>(tape_index: u32, path: P) -> Self {
        Self {
            tape_index,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut entries = Vec::new();
        for (line, record) in csv_reader.deserialize::<ManifestEntry>().enumerate() {
            let entry = record.map_err(|e| {
                PapertapeError::parse(format!("Manifest row {}: {}", line + 1, e))
            })?;
            if entry.path.trim().is_empty() {
                return Err(PapertapeError::parse(format!(
                    "Manifest row {} has an empty path",
                    line + 1
                )));
            }
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        debug!("Reading manifest {}", path.display());
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for entry in &self.entries {
            csv_writer
                .serialize(entry)
                .map_err(|e| PapertapeError::parse(format!("Cannot write manifest: {}", e)))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.to_writer(file)
    }

    /// Walk `dir` and pack its files into consecutive tape indices.
    ///
    /// A new index starts whenever the next file would push the running total
    /// past `batch_bytes`; a single oversized file still gets an index of its
    /// own. Paths are recorded relative to `data_root`.
    pub fn from_directory(
        data_root: &Path,
        dir: &Path,
        batch_bytes: u64,
        first_index: u32,
    ) -> Result<Self> {
        let mut entries = Vec::new();
        let mut tape_index = first_index;
        let mut batch_total = 0u64;

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| PapertapeError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let size = entry.metadata().map_err(|e| PapertapeError::Io(e.into()))?.len();
            let relative = entry.path().strip_prefix(data_root).map_err(|_| {
                PapertapeError::parameter_validation(format!(
                    "{} is not under data root {}",
                    entry.path().display(),
                    data_root.display()
                ))
            })?;

            if batch_total > 0 && batch_total + size > batch_bytes {
                tape_index += 1;
                batch_total = 0;
            }
            batch_total += size;
            entries.push(ManifestEntry::new(
                tape_index,
                relative.to_string_lossy().into_owned(),
            ));
        }

        info!(
            "Manifest for {}: {} files in {} archive(s)",
            dir.display(),
            entries.len(),
            if entries.is_empty() { 0 } else { tape_index - first_index + 1 }
        );
        Ok(Self { entries })
    }

    /// Group rows by tape index, ascending, keeping manifest order inside a group
    pub fn groups(&self, data_root: &Path) -> Vec<ArchiveGroup> {
        let mut grouped: BTreeMap<u32, Vec<ArchiveItem>> = BTreeMap::new();
        for entry in &self.entries {
            grouped
                .entry(entry.tape_index)
                .or_default()
                .push(ArchiveItem::new(data_root, &entry.path));
        }
        grouped
            .into_iter()
            .map(|(tape_index, items)| ArchiveGroup { tape_index, items })
            .collect()
    }

    /// Session catalog text laid down as the first tape file
    pub fn catalog_text(&self, job_pid: u32) -> String {
        let mut text = format!("## papertape job {}\n", job_pid);
        for entry in &self.entries {
            text.push_str(&format!("{}:{}\t{}\n", job_pid, entry.tape_index, entry.path));
        }
        text
    }
}
