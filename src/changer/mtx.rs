//! Media changer backends
//!
//! [`MediaChanger`] is the seam between the changer controller and the robot.
//! [`MtxChanger`] drives a real library through the `mtx` utility.

use crate::changer::inventory::{DriveIndex, Slot};
use crate::config::LibraryConfig;
use crate::error::Result;
use crate::executor::run_checked;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait MediaChanger: Send + Sync {
    /// Raw library status text, in `mtx status` format
    async fn status(&self) -> Result<String>;

    /// Move the cartridge in `slot` into `drive`
    async fn load(&self, slot: Slot, drive: DriveIndex) -> Result<()>;

    /// Return the cartridge in `drive` to `slot`
    async fn unload(&self, slot: Slot, drive: DriveIndex) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MtxChanger {
    program: String,
    device: String,
    timeout: Duration,
}

impl MtxChanger {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            program: config.mtx_program.clone(),
            device: config.changer_device.clone(),
            timeout: config.command_timeout(),
        }
    }

    async fn mtx(&self, args: &[String]) -> Result<String> {
        let mut full = vec!["-f".to_string(), self.device.clone()];
        full.extend_from_slice(args);
        run_checked(&self.program, &full, self.timeout).await
    }
}

#[async_trait]
impl MediaChanger for MtxChanger {
    async fn status(&self) -> Result<String> {
        self.mtx(&["status".to_string()]).await
    }

    async fn load(&self, slot: Slot, drive: DriveIndex) -> Result<()> {
        self.mtx(&["load".to_string(), slot.to_string(), drive.to_string()])
            .await
            .map(|_| ())
    }

    async fn unload(&self, slot: Slot, drive: DriveIndex) -> Result<()> {
        self.mtx(&["unload".to_string(), slot.to_string(), drive.to_string()])
            .await
            .map(|_| ())
    }
}
