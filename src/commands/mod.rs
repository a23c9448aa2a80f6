//! Command Handlers Module
//!
//! This module contains handlers for all CLI subcommands.

pub mod dump;
pub mod insert_labels;
pub mod inventory;
pub mod load;
pub mod manifest;
pub mod tape_catalog;
pub mod unload;
pub mod verify;

use crate::changer::inventory::TapeLabel;
use crate::changer::lock::ChangerLock;
use crate::changer::mtx::MtxChanger;
use crate::changer::Changer;
use crate::config::LibraryConfig;
use crate::drives::SystemDrives;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long a command waits for another process to release the changer
const CHANGER_LOCK_WAIT: Duration = Duration::from_secs(60);

pub type SystemChanger = Changer<MtxChanger, SystemDrives>;

/// Take the changer lock and read the current inventory
pub async fn open_changer(config: &LibraryConfig) -> Result<SystemChanger> {
    debug!("Opening changer {}", config.changer_device);
    let lock = ChangerLock::acquire(&config.lock_dir, CHANGER_LOCK_WAIT).await?;
    Changer::new(
        MtxChanger::new(config),
        Arc::new(SystemDrives::new(config)),
        lock,
        config.mount_attempts,
    )
    .await
}

pub fn parse_label(label: &str) -> Result<TapeLabel> {
    TapeLabel::new(&label.trim().to_ascii_uppercase())
}
