//! Simulated tape library
//!
//! An in-memory changer and drive set used for offline runs and tests. It
//! speaks the same `mtx status` text as a real library, keeps tape contents
//! with the cartridge (not the drive), and counts every hardware call so
//! tests can assert on robot and tape movement.

use crate::changer::inventory::{DriveIndex, Slot, TapeLabel};
use crate::changer::mtx::MediaChanger;
use crate::drives::TapeDrives;
use crate::error::{PapertapeError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Number of calls made per hardware operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounters {
    pub status: u32,
    pub load: u32,
    pub unload: u32,
    pub rewind: u32,
    pub forward_space: u32,
}

#[derive(Debug, Default)]
struct LibraryState {
    slots: BTreeMap<Slot, Option<TapeLabel>>,
    drives: Vec<Option<(TapeLabel, Slot)>>,
    positions: Vec<usize>,
    tapes: HashMap<TapeLabel, Vec<Vec<u8>>>,
    stuck_drives: HashSet<DriveIndex>,
    /// Drive -> first tape file index whose writes fail
    failing_writes: HashMap<DriveIndex, usize>,
    calls: CallCounters,
}

impl LibraryState {
    fn loaded(&self, drive: DriveIndex, op: &str) -> Result<TapeLabel> {
        match self.drives.get(drive) {
            Some(Some((label, _))) => Ok(label.clone()),
            Some(None) => Err(PapertapeError::process_failure(
                format!("mt -f sim{} {}", drive, op),
                "no tape loaded",
            )),
            None => Err(PapertapeError::process_failure(
                format!("mt -f sim{} {}", drive, op),
                "no such drive",
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedLibrary {
    state: Arc<Mutex<LibraryState>>,
}

impl SimulatedLibrary {
    pub fn new(drive_count: usize, slot_count: Slot) -> Self {
        let state = LibraryState {
            slots: (1..=slot_count).map(|slot| (slot, None)).collect(),
            drives: vec![None; drive_count],
            positions: vec![0; drive_count],
            ..LibraryState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Shelve a blank cartridge. Panics on a malformed label.
    pub fn with_tape(self, slot: Slot, label: &str) -> Self {
        let label = TapeLabel::new(label).expect("valid simulated label");
        {
            let mut state = self.state.lock();
            state.tapes.entry(label.clone()).or_default();
            state.slots.insert(slot, Some(label));
        }
        self
    }

    /// Start with a cartridge already in a drive, remembering its home slot.
    /// Panics on a malformed label.
    pub fn with_mounted(self, drive: DriveIndex, slot: Slot, label: &str) -> Self {
        let label = TapeLabel::new(label).expect("valid simulated label");
        {
            let mut state = self.state.lock();
            state.tapes.entry(label.clone()).or_default();
            state.slots.insert(slot, None);
            state.drives[drive] = Some((label, slot));
        }
        self
    }

    /// Unload requests on `drive` are accepted but the cartridge never leaves
    pub fn stick_drive(&self, drive: DriveIndex) {
        self.state.lock().stuck_drives.insert(drive);
    }

    /// Every write to `drive` fails with a medium error
    pub fn fail_writes_on(&self, drive: DriveIndex) {
        self.fail_writes_from(drive, 0);
    }

    /// Writes to tape file `file_index` and later on `drive` fail
    pub fn fail_writes_from(&self, drive: DriveIndex, file_index: usize) {
        self.state.lock().failing_writes.insert(drive, file_index);
    }

    pub fn calls(&self) -> CallCounters {
        self.state.lock().calls
    }

    pub fn position(&self, drive: DriveIndex) -> usize {
        self.state.lock().positions[drive]
    }

    /// Tape files recorded on a cartridge, in order
    pub fn tape_files(&self, label: &TapeLabel) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .tapes
            .get(label)
            .cloned()
            .unwrap_or_default()
    }

    fn render_status(state: &LibraryState) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "  Storage Changer sim:{} Drives, {} Slots ( 0 Import/Export )",
            state.drives.len(),
            state.slots.len()
        );
        for (drive, content) in state.drives.iter().enumerate() {
            match content {
                Some((label, slot)) => {
                    let _ = writeln!(
                        out,
                        "Data Transfer Element {}:Full (Storage Element {} Loaded):VolumeTag = {}",
                        drive, slot, label
                    );
                }
                None => {
                    let _ = writeln!(out, "Data Transfer Element {}:Empty", drive);
                }
            }
        }
        for (slot, content) in &state.slots {
            match content {
                Some(label) => {
                    let _ = writeln!(out, "      Storage Element {}:Full :VolumeTag={}", slot, label);
                }
                None => {
                    let _ = writeln!(out, "      Storage Element {}:Empty", slot);
                }
            }
        }
        out
    }
}

#[async_trait]
impl MediaChanger for SimulatedLibrary {
    async fn status(&self) -> Result<String> {
        let mut state = self.state.lock();
        state.calls.status += 1;
        Ok(Self::render_status(&state))
    }

    async fn load(&self, slot: Slot, drive: DriveIndex) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.load += 1;
        let command = format!("mtx load {} {}", slot, drive);

        if !matches!(state.drives.get(drive), Some(None)) {
            return Err(PapertapeError::process_failure(command, "drive full or missing"));
        }
        let label = match state.slots.get_mut(&slot) {
            Some(content) => content
                .take()
                .ok_or_else(|| PapertapeError::process_failure(&command, "slot empty"))?,
            None => return Err(PapertapeError::process_failure(command, "no such slot")),
        };
        state.drives[drive] = Some((label, slot));
        state.positions[drive] = 0;
        Ok(())
    }

    async fn unload(&self, slot: Slot, drive: DriveIndex) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.unload += 1;
        let command = format!("mtx unload {} {}", slot, drive);

        if state.stuck_drives.contains(&drive) {
            return Ok(());
        }
        if !matches!(state.slots.get(&slot), Some(None)) {
            return Err(PapertapeError::process_failure(command, "slot full or missing"));
        }
        let (label, _) = state
            .drives
            .get_mut(drive)
            .and_then(Option::take)
            .ok_or_else(|| PapertapeError::process_failure(&command, "drive empty"))?;
        state.slots.insert(slot, Some(label));
        state.positions[drive] = 0;
        Ok(())
    }
}

struct SimulatedWriter {
    state: Arc<Mutex<LibraryState>>,
    label: TapeLabel,
    file_index: usize,
    failing: bool,
}

impl Write for SimulatedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.failing {
            return Err(io::Error::other("simulated medium error"));
        }
        let mut state = self.state.lock();
        let files = state.tapes.entry(self.label.clone()).or_default();
        files[self.file_index].extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TapeDrives for SimulatedLibrary {
    fn device_path(&self, drive: DriveIndex) -> PathBuf {
        PathBuf::from(format!("sim://nst{}", drive))
    }

    async fn rewind(&self, drive: DriveIndex) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.rewind += 1;
        state.loaded(drive, "rewind")?;
        state.positions[drive] = 0;
        Ok(())
    }

    async fn forward_space(&self, drive: DriveIndex, count: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.forward_space += 1;
        let label = state.loaded(drive, "fsf")?;
        let file_count = state.tapes.get(&label).map(Vec::len).unwrap_or(0);
        let target = state.positions[drive] + count as usize;
        if target > file_count {
            return Err(PapertapeError::process_failure(
                format!("mt -f sim{} fsf {}", drive, count),
                "end of data",
            ));
        }
        state.positions[drive] = target;
        Ok(())
    }

    fn open_writer(&self, drive: DriveIndex) -> Result<Box<dyn Write + Send>> {
        let mut state = self.state.lock();
        let label = state.loaded(drive, "write")?;
        let position = state.positions[drive];
        let failing = state
            .failing_writes
            .get(&drive)
            .is_some_and(|from| position >= *from);

        // writing at a position discards everything after it
        let files = state.tapes.entry(label.clone()).or_default();
        files.truncate(position);
        files.push(Vec::new());
        state.positions[drive] = position + 1;

        Ok(Box::new(SimulatedWriter {
            state: Arc::clone(&self.state),
            label,
            file_index: position,
            failing,
        }))
    }

    fn open_reader(&self, drive: DriveIndex) -> Result<Box<dyn Read + Send>> {
        let state = self.state.lock();
        let label = state.loaded(drive, "read")?;
        let position = state.positions[drive];
        let file = state
            .tapes
            .get(&label)
            .and_then(|files| files.get(position))
            .cloned()
            .ok_or_else(|| {
                PapertapeError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("drive {} is at end of data", drive),
                ))
            })?;
        Ok(Box::new(Cursor::new(file)))
    }
}
