use super::TapeDrives;
use crate::changer::inventory::DriveIndex;
use crate::config::LibraryConfig;
use crate::error::Result;
use crate::executor::run_checked;
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Largest block a variable-block drive hands back on one read
const MAX_READ_BLOCK: usize = 256 * 1024;

/// Non-rewinding device nodes positioned with `mt`
#[derive(Debug, Clone)]
pub struct SystemDrives {
    library: LibraryConfig,
    timeout: Duration,
}

impl SystemDrives {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            library: config.clone(),
            timeout: config.command_timeout(),
        }
    }

    async fn mt(&self, drive: DriveIndex, op: &[&str]) -> Result<()> {
        let mut args = vec![
            "-f".to_string(),
            self.device_path(drive).to_string_lossy().into_owned(),
        ];
        args.extend(op.iter().map(|s| s.to_string()));
        run_checked(&self.library.mt_program, &args, self.timeout).await?;
        Ok(())
    }
}

#[async_trait]
impl TapeDrives for SystemDrives {
    fn device_path(&self, drive: DriveIndex) -> PathBuf {
        self.library.device_path(drive)
    }

    async fn rewind(&self, drive: DriveIndex) -> Result<()> {
        debug!("Rewinding drive {}", drive);
        self.mt(drive, &["rewind"]).await
    }

    async fn forward_space(&self, drive: DriveIndex, count: u32) -> Result<()> {
        debug!("Forward space drive {} by {} file mark(s)", drive, count);
        let count = count.to_string();
        self.mt(drive, &["fsf", &count]).await
    }

    fn open_writer(&self, drive: DriveIndex) -> Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new().write(true).open(self.device_path(drive))?;
        Ok(Box::new(file))
    }

    fn open_reader(&self, drive: DriveIndex) -> Result<Box<dyn Read + Send>> {
        let file = File::open(self.device_path(drive))?;
        Ok(Box::new(BufReader::with_capacity(MAX_READ_BLOCK, file)))
    }
}
