//! Manifest Command Handler
//!
//! Builds a manifest from a directory tree and, optionally, records the
//! checksum of every listed file in the catalog for later spot checks.

use crate::archive::{ArchiveItem, Manifest};
use crate::catalog::JsonCatalog;
use crate::config::Config;
use crate::error::Result;
use crate::hash::checksum_file;
use crate::utils::format_bytes;
use std::path::PathBuf;
use tracing::{debug, info};

pub async fn execute(
    config: &Config,
    dir: PathBuf,
    out: PathBuf,
    first_index: u32,
    checksums: bool,
) -> Result<()> {
    let data_root = &config.archive.data_root;
    info!(
        "Building manifest for {} in batches of {}",
        dir.display(),
        format_bytes(config.archive.batch_size_bytes)
    );

    let manifest = Manifest::from_directory(data_root, &dir, config.archive.batch_size_bytes, first_index)?;
    manifest.write_csv(&out)?;

    if checksums {
        let algorithm = config.verify.checksum;
        let mut sums = Vec::with_capacity(manifest.len());
        for entry in manifest.entries() {
            let item = ArchiveItem::new(data_root, &entry.path);
            let sum = checksum_file(algorithm, &item.source)?;
            debug!("{} {}", sum, entry.path);
            sums.push((entry.path.clone(), sum));
        }
        let mut catalog = JsonCatalog::open(&config.catalog.path, &config.catalog.label_prefixes)?;
        catalog.record_checksums(sums)?;
        info!("Recorded {} checksum(s) in {}", manifest.len(), catalog.path().display());
    }

    let archives = manifest.groups(data_root).len();
    println!(
        "Wrote {} ({} file(s), {} archive(s))",
        out.display(),
        manifest.len(),
        archives
    );
    Ok(())
}
