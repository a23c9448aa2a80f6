//! Sequential tape drive access
//!
//! A drive is addressed by index. Writing opens one tape file at the current
//! position; closing the writer lays down a file mark. Reading yields the
//! current tape file and leaves the position inside it, so the next
//! forward-space lands on the following file.

pub mod system;

use crate::changer::inventory::DriveIndex;
use crate::error::{PapertapeError, Result};
use async_trait::async_trait;
use std::io::{self, Read, Write};
use std::path::PathBuf;

pub use system::SystemDrives;

/// GNU tar default blocking factor 20 x 512
pub const TAR_RECORD_SIZE: usize = 20 * 512;

/// The tape catalog occupies the first file in 32 KiB blocks
pub const CATALOG_BLOCK_SIZE: usize = 32 * 1024;

#[async_trait]
pub trait TapeDrives: Send + Sync {
    fn device_path(&self, drive: DriveIndex) -> PathBuf;

    async fn rewind(&self, drive: DriveIndex) -> Result<()>;

    /// Skip `count` file marks forward
    async fn forward_space(&self, drive: DriveIndex, count: u32) -> Result<()>;

    fn open_writer(&self, drive: DriveIndex) -> Result<Box<dyn Write + Send>>;

    fn open_reader(&self, drive: DriveIndex) -> Result<Box<dyn Read + Send>>;
}

/// Which drives a session writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveSelection {
    Single(DriveIndex),
    All(usize),
}

impl DriveSelection {
    pub fn selected(&self) -> Vec<DriveIndex> {
        match *self {
            DriveSelection::Single(drive) => vec![drive],
            DriveSelection::All(count) => (0..count).collect(),
        }
    }

    /// Drives present in the library but withheld from this session
    pub fn reserved(&self, drive_count: usize) -> Vec<DriveIndex> {
        match *self {
            DriveSelection::Single(drive) => (0..drive_count).filter(|d| *d != drive).collect(),
            DriveSelection::All(_) => Vec::new(),
        }
    }
}

/// Cuts a byte stream into fixed-size device records, zero padding the last
pub struct RecordWriter<W: Write> {
    inner: W,
    record: Vec<u8>,
    record_size: usize,
    bytes_written: u64,
    abandoned: bool,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W, record_size: usize) -> Self {
        Self {
            inner,
            record: Vec::with_capacity(record_size),
            record_size,
            bytes_written: 0,
            abandoned: false,
        }
    }

    /// Drop the pending record and swallow every later write
    pub fn abandon(&mut self) {
        self.record.clear();
        self.abandoned = true;
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Size on the device once `finish` has padded the last record
    pub fn padded_len(&self) -> u64 {
        let pending = if self.record.is_empty() { 0 } else { self.record_size };
        self.bytes_written + pending as u64
    }

    /// Flush the padded final record and hand back the device
    pub fn finish(mut self) -> io::Result<W> {
        if !self.abandoned && !self.record.is_empty() {
            self.record.resize(self.record_size, 0);
            self.emit()?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn emit(&mut self) -> io::Result<()> {
        self.inner.write_all(&self.record)?;
        self.bytes_written += self.record.len() as u64;
        self.record.clear();
        Ok(())
    }
}

impl<W: Write> Write for RecordWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.abandoned {
            return Ok(buf.len());
        }
        let room = self.record_size - self.record.len();
        let take = room.min(buf.len());
        self.record.extend_from_slice(&buf[..take]);
        if self.record.len() == self.record_size {
            self.emit()?;
        }
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.abandoned {
            return Ok(());
        }
        // partial records stay buffered until finish()
        self.inner.flush()
    }
}

/// Write `text` as the first tape file on one drive, padded to catalog blocks
pub fn write_catalog_block<D: TapeDrives + ?Sized>(
    drives: &D,
    drive: DriveIndex,
    text: &str,
) -> Result<()> {
    let device = drives.open_writer(drive)?;
    let mut writer = RecordWriter::new(device, CATALOG_BLOCK_SIZE);
    writer.write_all(text.as_bytes())?;
    writer.finish()?;
    Ok(())
}

/// Read the catalog file at the current position, dropping block padding
pub fn read_catalog_block<D: TapeDrives + ?Sized>(drives: &D, drive: DriveIndex) -> Result<Vec<String>> {
    let mut reader = drives.open_reader(drive)?;
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;

    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    let text = std::str::from_utf8(&raw[..end])
        .map_err(|e| PapertapeError::parse(format!("Catalog on drive {} is not text: {}", drive, e)))?;

    Ok(text.lines().map(str::to_string).collect())
}
