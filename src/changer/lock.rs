//! Cross-process locks on the library
//!
//! The robotic arm and each drive are shared by every process on the host, so
//! ownership is taken through `flock`-style locks on files in a common lock
//! directory. Dropping a lock releases it.

use crate::changer::inventory::DriveIndex;
use crate::error::{PapertapeError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const CHANGER_LOCK_FILE: &str = "changer.lock";
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

fn write_owner(file: &mut File) {
    let stamp = format!("{}\n", std::process::id());
    if let Err(e) = file.set_len(0).and_then(|_| file.write_all(stamp.as_bytes())) {
        warn!("Cannot record lock owner: {}", e);
    }
}

/// Exclusive ownership of the changer for one session
#[derive(Debug)]
pub struct ChangerLock {
    file: File,
    path: PathBuf,
}

impl ChangerLock {
    /// Wait up to `wait` for the changer lock, polling without blocking the runtime
    pub async fn acquire(lock_dir: &Path, wait: Duration) -> Result<Self> {
        let path = lock_dir.join(CHANGER_LOCK_FILE);
        let mut file = open_lock_file(&path)?;
        let start = Instant::now();

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    write_owner(&mut file);
                    debug!("Changer lock acquired: {}", path.display());
                    return Ok(Self { file, path });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if start.elapsed() >= wait {
                        return Err(PapertapeError::lock(format!(
                            "changer is held by another process ({}) after waiting {:?}",
                            path.display(),
                            wait
                        )));
                    }
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for ChangerLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release changer lock {}: {}", self.path.display(), e);
        }
    }
}

/// Reservation of one drive's device stream, visible to other processes
#[derive(Debug)]
pub struct DriveLock {
    file: File,
    drive: DriveIndex,
}

impl DriveLock {
    /// Take the reservation or fail immediately with `DriveBusy`
    pub fn try_acquire(lock_dir: &Path, drive: DriveIndex) -> Result<Self> {
        let path = lock_dir.join(format!("drive{}.lock", drive));
        let mut file = open_lock_file(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                write_owner(&mut file);
                Ok(Self { file, drive })
            }
            Err(_) => Err(PapertapeError::DriveBusy {
                drive,
                state: "reserved by another process".to_string(),
            }),
        }
    }
}

impl Drop for DriveLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release drive {} reservation: {}", self.drive, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_changer_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let held = ChangerLock::acquire(dir.path(), Duration::ZERO).await.unwrap();

        let err = ChangerLock::acquire(dir.path(), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, PapertapeError::Lock(_)));

        drop(held);
        assert!(ChangerLock::acquire(dir.path(), Duration::ZERO).await.is_ok());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_waiting_for_changer_lock_yields_to_other_tasks() {
        let dir = TempDir::new().unwrap();
        let held = ChangerLock::acquire(dir.path(), Duration::ZERO).await.unwrap();

        let release = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(held);
        };
        let (acquired, ()) = tokio::join!(ChangerLock::acquire(dir.path(), Duration::from_secs(5)), release);
        assert!(acquired.is_ok());
    }

    #[test]
    fn test_drive_lock_reports_busy() {
        let dir = TempDir::new().unwrap();
        let _first = DriveLock::try_acquire(dir.path(), 1).unwrap();

        match DriveLock::try_acquire(dir.path(), 1) {
            Err(PapertapeError::DriveBusy { drive, .. }) => assert_eq!(drive, 1),
            other => panic!("expected DriveBusy, got {:?}", other),
        }
        assert!(DriveLock::try_acquire(dir.path(), 0).is_ok());
    }
}
