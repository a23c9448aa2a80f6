//! Per-drive archive stream state
//!
//! Independent of what the changer has physically mounted: this only tracks
//! whether this session holds an open tar stream on a drive. Every change goes
//! through [`transition`].

use crate::changer::inventory::DriveIndex;
use crate::changer::lock::DriveLock;
use crate::drives::{DriveSelection, RecordWriter, TapeDrives, TAR_RECORD_SIZE};
use crate::error::{PapertapeError, Result};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outer tar written directly into a drive
pub type DeviceStream = tar::Builder<RecordWriter<Box<dyn Write + Send>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    Init,
    Open,
    Closing,
    Reserved,
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriveState::Init => "init",
            DriveState::Open => "open",
            DriveState::Closing => "closing",
            DriveState::Reserved => "reserved",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveEvent {
    Open,
    Close,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveEffect {
    OpenStream,
    FinishStream,
}

pub fn transition(
    drive: DriveIndex,
    state: DriveState,
    event: DriveEvent,
) -> Result<(DriveState, Option<DriveEffect>)> {
    use DriveEvent as E;
    use DriveState as S;

    match (state, event) {
        (S::Init, E::Open) => Ok((S::Open, Some(DriveEffect::OpenStream))),
        (S::Open, E::Close) => Ok((S::Closing, Some(DriveEffect::FinishStream))),
        (S::Closing, E::Closed) => Ok((S::Init, None)),
        (other, E::Open) => Err(PapertapeError::DriveBusy {
            drive,
            state: other.to_string(),
        }),
        (other, E::Close) | (other, E::Closed) => Err(PapertapeError::DriveNotOpen {
            drive,
            state: other.to_string(),
        }),
    }
}

struct OpenDrive {
    stream: DeviceStream,
    _lock: DriveLock,
}

/// State and open streams for every drive in the library
pub struct DriveTable {
    states: Vec<DriveState>,
    open: Vec<Option<OpenDrive>>,
    lock_dir: PathBuf,
}

impl DriveTable {
    /// Drives outside `selection` start `Reserved`
    pub fn new(selection: DriveSelection, drive_count: usize, lock_dir: &Path) -> Self {
        let mut states = vec![DriveState::Init; drive_count];
        for drive in selection.reserved(drive_count) {
            if let Some(state) = states.get_mut(drive) {
                *state = DriveState::Reserved;
            }
        }
        Self {
            states,
            open: (0..drive_count).map(|_| None).collect(),
            lock_dir: lock_dir.to_path_buf(),
        }
    }

    pub fn state(&self, drive: DriveIndex) -> Option<DriveState> {
        self.states.get(drive).copied()
    }

    fn apply(&mut self, drive: DriveIndex, event: DriveEvent) -> Result<Option<DriveEffect>> {
        let current = self.state(drive).ok_or_else(|| {
            PapertapeError::parameter_validation(format!("no drive {} in this library", drive))
        })?;
        let (next, effect) = transition(drive, current, event)?;
        debug!("Drive {}: {} --{:?}--> {}", drive, current, event, next);
        self.states[drive] = next;
        Ok(effect)
    }

    /// Open a tar stream on the drive's device, reserving it across processes
    pub fn open<D: TapeDrives + ?Sized>(&mut self, drive: DriveIndex, drives: &D) -> Result<&mut DeviceStream> {
        self.apply(drive, DriveEvent::Open)?;

        let opened = DriveLock::try_acquire(&self.lock_dir, drive).and_then(|lock| {
            let device = drives.open_writer(drive)?;
            Ok(OpenDrive {
                stream: tar::Builder::new(RecordWriter::new(device, TAR_RECORD_SIZE)),
                _lock: lock,
            })
        });

        match opened {
            Ok(open) => Ok(&mut self.open[drive].insert(open).stream),
            Err(e) => {
                self.states[drive] = DriveState::Init;
                Err(e)
            }
        }
    }

    pub fn stream(&mut self, drive: DriveIndex) -> Result<&mut DeviceStream> {
        let state = self.state(drive).unwrap_or(DriveState::Init);
        match self.open.get_mut(drive).and_then(Option::as_mut) {
            Some(open) if state == DriveState::Open => Ok(&mut open.stream),
            _ => Err(PapertapeError::DriveNotOpen {
                drive,
                state: state.to_string(),
            }),
        }
    }

    /// Finish the tar stream and pad the last record. Returns bytes written.
    pub fn close(&mut self, drive: DriveIndex) -> Result<u64> {
        self.apply(drive, DriveEvent::Close)?;
        let open = self.open[drive].take();

        let finished = match open {
            Some(open) => open
                .stream
                .into_inner()
                .and_then(|records| {
                    let written = records.padded_len();
                    records.finish().map(|_| written)
                })
                .map_err(PapertapeError::from),
            None => Err(PapertapeError::DriveNotOpen {
                drive,
                state: DriveState::Closing.to_string(),
            }),
        };

        self.apply(drive, DriveEvent::Closed)?;
        finished
    }

    /// Drop an open stream without finishing it. Nothing more reaches the
    /// device, not even the end-of-archive trailer.
    pub fn abort(&mut self, drive: DriveIndex) {
        if let Some(mut open) = self.open.get_mut(drive).and_then(Option::take) {
            warn!("Aborting open archive stream on drive {}", drive);
            open.stream.get_mut().abandon();
        }
        if let Some(state) = self.states.get_mut(drive) {
            if matches!(*state, DriveState::Open | DriveState::Closing) {
                *state = DriveState::Init;
            }
        }
    }
}

impl Drop for DriveTable {
    fn drop(&mut self) {
        for drive in 0..self.open.len() {
            self.abort(drive);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changer::inventory::TapeLabel;
    use crate::simulated::SimulatedLibrary;
    use tempfile::TempDir;

    #[test]
    fn test_transition_table() {
        assert_eq!(
            transition(0, DriveState::Init, DriveEvent::Open).unwrap(),
            (DriveState::Open, Some(DriveEffect::OpenStream))
        );
        assert_eq!(
            transition(0, DriveState::Open, DriveEvent::Close).unwrap(),
            (DriveState::Closing, Some(DriveEffect::FinishStream))
        );
        assert_eq!(
            transition(0, DriveState::Closing, DriveEvent::Closed).unwrap(),
            (DriveState::Init, None)
        );

        for state in [DriveState::Open, DriveState::Closing, DriveState::Reserved] {
            let err = transition(1, state, DriveEvent::Open).unwrap_err();
            assert!(matches!(err, PapertapeError::DriveBusy { drive: 1, .. }));
        }
        for state in [DriveState::Init, DriveState::Closing, DriveState::Reserved] {
            let err = transition(1, state, DriveEvent::Close).unwrap_err();
            assert!(matches!(err, PapertapeError::DriveNotOpen { drive: 1, .. }));
        }
    }

    #[test]
    fn test_single_drive_selection_reserves_the_other() {
        let dir = TempDir::new().unwrap();
        let lib = SimulatedLibrary::new(2, 2)
            .with_mounted(0, 1, "H0C10001")
            .with_mounted(1, 2, "H0C20001");
        let mut table = DriveTable::new(DriveSelection::Single(0), 2, dir.path());
        assert_eq!(table.state(0), Some(DriveState::Init));
        assert_eq!(table.state(1), Some(DriveState::Reserved));

        assert!(matches!(table.open(1, &lib), Err(PapertapeError::DriveBusy { drive: 1, .. })));
        assert_eq!(table.state(1), Some(DriveState::Reserved));
        assert!(lib.tape_files(&TapeLabel::new("H0C20001").unwrap()).is_empty());
        assert!(table.open(0, &lib).is_ok());
    }

    #[test]
    fn test_abort_writes_no_trailer() {
        let dir = TempDir::new().unwrap();
        let lib = SimulatedLibrary::new(2, 2).with_mounted(0, 1, "H0C10001");
        let mut table = DriveTable::new(DriveSelection::All(2), 2, dir.path());

        // header plus payload leave exactly the two trailer blocks of room in the record
        let payload = vec![7u8; TAR_RECORD_SIZE - 3 * 512];
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        table
            .open(0, &lib)
            .unwrap()
            .append_data(&mut header, "partial.bin", &payload[..])
            .unwrap();

        table.abort(0);
        assert_eq!(table.state(0), Some(DriveState::Init));
        let files = lib.tape_files(&TapeLabel::new("H0C10001").unwrap());
        assert_eq!(files.len(), 1);
        assert!(files[0].is_empty());
    }

    #[test]
    fn test_open_write_close() {
        let dir = TempDir::new().unwrap();
        let lib = SimulatedLibrary::new(2, 2).with_mounted(0, 1, "H0C10001");
        let mut table = DriveTable::new(DriveSelection::All(2), 2, dir.path());

        table.open(0, &lib).unwrap();
        assert!(matches!(table.open(0, &lib), Err(PapertapeError::DriveBusy { .. })));

        let mut header = tar::Header::new_gnu();
        header.set_size(5);
        header.set_mode(0o644);
        table
            .stream(0)
            .unwrap()
            .append_data(&mut header, "hello.txt", &b"hello"[..])
            .unwrap();

        let written = table.close(0).unwrap();
        assert_eq!(written as usize % TAR_RECORD_SIZE, 0);
        assert_eq!(table.state(0), Some(DriveState::Init));

        let err = table.close(0).unwrap_err();
        assert!(matches!(err, PapertapeError::DriveNotOpen { .. }));
        assert!(table.stream(0).is_err());

        let files = lib.tape_files(&TapeLabel::new("H0C10001").unwrap());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].len(), TAR_RECORD_SIZE);
    }

    #[test]
    fn test_failed_open_returns_to_init() {
        let dir = TempDir::new().unwrap();
        let lib = SimulatedLibrary::new(2, 2);
        let mut table = DriveTable::new(DriveSelection::All(2), 2, dir.path());

        assert!(table.open(1, &lib).is_err());
        assert_eq!(table.state(1), Some(DriveState::Init));
    }
}
