//! Inventory Command Handler

use super::open_changer;
use crate::config::Config;
use crate::error::Result;
use tracing::info;

pub async fn execute(config: &Config) -> Result<()> {
    let mut changer = open_changer(&config.library).await?;
    let snapshot = changer.refresh_inventory().await?;

    if snapshot.is_empty() {
        println!("Library reported no tapes (not ready?)");
        return Ok(());
    }

    info!(
        "{} tape(s) mounted, {} shelved",
        snapshot.mounted().len(),
        snapshot.shelved().len()
    );
    print!("{}", snapshot);
    Ok(())
}
