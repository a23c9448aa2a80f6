//! Unload Command Handler

use super::open_changer;
use crate::config::Config;
use crate::error::Result;

pub async fn execute(config: &Config, drive: Option<usize>) -> Result<()> {
    let mut changer = open_changer(&config.library).await?;

    match drive {
        Some(drive) => {
            changer.unmount_one(drive).await?;
            println!("Drive {} empty", drive);
        }
        None => {
            changer.unmount_pair().await?;
            println!("All drives empty");
        }
    }
    Ok(())
}
