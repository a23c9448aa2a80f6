//! Verify Command Handler

use super::{open_changer, parse_label};
use crate::archive::Manifest;
use crate::catalog::{JsonCatalog, TapeCatalog};
use crate::config::Config;
use crate::error::{PapertapeError, Result};
use crate::verify::Verifier;
use std::path::PathBuf;
use tracing::info;

pub async fn execute(
    config: &Config,
    label: String,
    catalog_csv: PathBuf,
    job_pid: Option<u32>,
    drive: usize,
    seed: Option<u64>,
) -> Result<()> {
    let label = parse_label(&label)?;
    let entries = Manifest::read_csv(&catalog_csv)?;
    let catalog = JsonCatalog::open(&config.catalog.path, &config.catalog.label_prefixes)?;

    let job_pid = job_pid.or_else(|| catalog.owner_of(&label)).ok_or_else(|| {
        PapertapeError::parameter_validation(format!(
            "no job pid given and the catalog has no owner for {}",
            label
        ))
    })?;

    let paths: Vec<String> = entries.entries().iter().map(|e| e.path.clone()).collect();
    let expected = catalog.expected_checksums(&paths)?;
    info!(
        "Verifying {} (job {}) against {} catalog entries",
        label,
        job_pid,
        entries.len()
    );

    let mut verifier = Verifier::new(config.verify.checksum, job_pid).with_drive(drive);
    if let Some(seed) = seed {
        verifier = verifier.with_seed(seed);
    }

    let mut changer = open_changer(&config.library).await?;
    match verifier
        .spot_check(&mut changer, &label, entries.entries(), &expected)
        .await
    {
        Ok(report) => {
            for target in &report.verified {
                println!("ok {}:{} {}", target.tape_index, target.path, target.expected);
            }
            println!("{}: OK", label);
            Ok(())
        }
        Err(e) => {
            if let PapertapeError::ChecksumMismatch { tape_index, path, .. } = &e {
                println!("{}: MISMATCH {}:{}", label, tape_index, path);
            }
            Err(e)
        }
    }
}
