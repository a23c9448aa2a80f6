//! Tape Catalog Command Handler
//!
//! Prints the catalog written as the first file of a tape.

use super::{open_changer, parse_label};
use crate::config::Config;
use crate::error::Result;

pub async fn execute(config: &Config, label: String, drive: usize, count: bool) -> Result<()> {
    let label = parse_label(&label)?;
    let mut changer = open_changer(&config.library).await?;

    changer.refresh_inventory().await?;
    if changer.drive_of(&label).is_err() {
        changer.mount_one(&label, drive).await?;
    }

    for line in changer.read_tape_catalog(&label).await? {
        println!("{}", line);
    }

    if count {
        let files = changer.count_files(&label).await?;
        println!("{}: {} file(s) on tape", label, files);
    }
    Ok(())
}
