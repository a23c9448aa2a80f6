//! Load Command Handler

use super::{open_changer, parse_label};
use crate::config::Config;
use crate::error::{PapertapeError, Result};

pub async fn execute(config: &Config, label: String, drive: usize) -> Result<()> {
    if drive >= config.library.drive_count {
        return Err(PapertapeError::parameter_validation(format!(
            "drive {} out of range (library has {})",
            drive, config.library.drive_count
        )));
    }
    let label = parse_label(&label)?;
    let mut changer = open_changer(&config.library).await?;

    changer.mount_one(&label, drive).await?;
    println!("{} loaded in drive {}", label, drive);
    Ok(())
}
