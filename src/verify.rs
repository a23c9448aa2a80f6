//! Tape spot checks
//!
//! One member per archive index is sampled at random and checksummed straight
//! off the drive: forward-space to the index, walk the outer tar to the group
//! container, walk the container to the member, hash it while streaming. The
//! archive is never written to disk.

use crate::archive::{ArchiveNames, ManifestEntry};
use crate::changer::inventory::{DriveIndex, TapeLabel};
use crate::changer::mtx::MediaChanger;
use crate::changer::Changer;
use crate::drives::TapeDrives;
use crate::error::{PapertapeError, Result};
use crate::hash::{checksum_reader, ChecksumAlgorithm};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{debug, info, warn};

/// Recorded in place of a checksum when the member is absent from the tape
pub const MISSING_MEMBER: &str = "<missing>";

/// One sampled member and what the catalog says it should hash to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationTarget {
    pub label: TapeLabel,
    pub tape_index: u32,
    pub path: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotCheckReport {
    pub label: TapeLabel,
    pub verified: Vec<VerificationTarget>,
}

pub struct Verifier {
    algorithm: ChecksumAlgorithm,
    job_pid: u32,
    default_drive: DriveIndex,
    rng: StdRng,
}

impl Verifier {
    /// `job_pid` is the pid of the job that wrote the tape; it is part of every
    /// archive name.
    pub fn new(algorithm: ChecksumAlgorithm, job_pid: u32) -> Self {
        Self {
            algorithm,
            job_pid,
            default_drive: 0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Drive used when the tape is not already mounted
    pub fn with_drive(mut self, drive: DriveIndex) -> Self {
        self.default_drive = drive;
        self
    }

    /// Pick one member per tape index, ascending by index
    pub fn plan(
        &mut self,
        label: &TapeLabel,
        entries: &[ManifestEntry],
        expected: &HashMap<String, String>,
    ) -> Result<Vec<VerificationTarget>> {
        let mut by_index: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
        for entry in entries {
            by_index.entry(entry.tape_index).or_default().push(&entry.path);
        }

        let mut targets = Vec::with_capacity(by_index.len());
        for (tape_index, paths) in by_index {
            let Some(path) = paths.choose(&mut self.rng) else {
                continue;
            };
            let expected = expected.get(*path).ok_or_else(|| {
                PapertapeError::catalog(format!("No expected checksum for {}", path))
            })?;
            targets.push(VerificationTarget {
                label: label.clone(),
                tape_index,
                path: path.to_string(),
                expected: expected.to_lowercase(),
            });
        }
        Ok(targets)
    }

    /// Verify `label` against the catalog; the tape is unloaded afterwards
    /// whether or not a mismatch was found.
    pub async fn spot_check<M, D>(
        &mut self,
        changer: &mut Changer<M, D>,
        label: &TapeLabel,
        entries: &[ManifestEntry],
        expected: &HashMap<String, String>,
    ) -> Result<SpotCheckReport>
    where
        M: MediaChanger,
        D: TapeDrives,
    {
        let targets = self.plan(label, entries, expected)?;

        changer.refresh_inventory().await?;
        let drive = changer.drive_of(label).unwrap_or(self.default_drive);
        info!("Loading {} into drive {} for verification", label, drive);
        changer.mount_one(label, drive).await?;

        let outcome = self.check_targets(changer.drives().as_ref(), drive, targets).await;
        if let Err(e) = changer.unmount_one(drive).await {
            warn!("Cannot unload {} after verification: {}", label, e);
        }

        let verified = outcome?;
        info!("{}: {} archive(s) verified", label, verified.len());
        Ok(SpotCheckReport {
            label: label.clone(),
            verified,
        })
    }

    async fn check_targets<D: TapeDrives + ?Sized>(
        &self,
        drives: &D,
        drive: DriveIndex,
        targets: Vec<VerificationTarget>,
    ) -> Result<Vec<VerificationTarget>> {
        let mut verified = Vec::with_capacity(targets.len());
        for target in targets {
            drives.forward_space(drive, 1).await?;

            let names = ArchiveNames::new(self.job_pid, target.tape_index);
            debug!("Checking {} in {}", target.path, names.archive_file_name());
            let actual = checksum_member(drives, drive, &names, &target.path, self.algorithm)?
                .unwrap_or_else(|| MISSING_MEMBER.to_string());

            if actual != target.expected {
                warn!(
                    "Checksum mismatch at {}:{}: {} != {}",
                    target.tape_index, target.path, actual, target.expected
                );
                return Err(PapertapeError::ChecksumMismatch {
                    label: target.label.to_string(),
                    tape_index: target.tape_index,
                    path: target.path,
                    expected: target.expected,
                    actual,
                });
            }
            debug!("Checksum match: {}", actual);
            verified.push(target);
        }
        Ok(verified)
    }
}

/// Checksum of one member of the group container in the current tape file.
///
/// `None` when either the container or the member is missing.
pub fn checksum_member<D: TapeDrives + ?Sized>(
    drives: &D,
    drive: DriveIndex,
    names: &ArchiveNames,
    path: &str,
    algorithm: ChecksumAlgorithm,
) -> Result<Option<String>> {
    let container = names.archive_file_name();
    let member = names.member(path);

    let mut outer = tar::Archive::new(drives.open_reader(drive)?);
    for entry in outer.entries()? {
        let entry = entry?;
        let is_container = entry.path()?.file_name() == Some(OsStr::new(&container));
        if !is_container {
            continue;
        }

        let mut inner = tar::Archive::new(entry);
        for item in inner.entries()? {
            let item = item?;
            let is_member = item.path()?.as_ref() == Path::new(&member);
            if is_member {
                return Ok(Some(checksum_reader(algorithm, item)?));
            }
        }
        return Ok(None);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> TapeLabel {
        TapeLabel::new("H0C10001").unwrap()
    }

    fn expected(paths: &[&str]) -> HashMap<String, String> {
        paths
            .iter()
            .map(|p| (p.to_string(), "D41D8CD98F00B204E9800998ECF8427E".to_string()))
            .collect()
    }

    #[test]
    fn test_plan_samples_one_member_per_index() {
        let entries = vec![
            ManifestEntry::new(2, "/b/1"),
            ManifestEntry::new(1, "/a/1"),
            ManifestEntry::new(2, "/b/2"),
            ManifestEntry::new(1, "/a/2"),
        ];
        let sums = expected(&["/a/1", "/a/2", "/b/1", "/b/2"]);
        let mut verifier = Verifier::new(ChecksumAlgorithm::Md5, 1).with_seed(7);

        for _ in 0..20 {
            let plan = verifier.plan(&label(), &entries, &sums).unwrap();
            assert_eq!(plan.len(), 2);
            assert_eq!(plan[0].tape_index, 1);
            assert!(plan[0].path.starts_with("/a/"));
            assert_eq!(plan[1].tape_index, 2);
            assert!(plan[1].path.starts_with("/b/"));
            assert_eq!(plan[1].expected, "d41d8cd98f00b204e9800998ecf8427e");
        }
    }

    #[test]
    fn test_plan_is_reproducible_with_seed() {
        let entries: Vec<_> = (0..50).map(|i| ManifestEntry::new(1, format!("/f/{}", i))).collect();
        let paths: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();
        let sums: HashMap<String, String> = paths.iter().map(|p| (p.clone(), "00".to_string())).collect();

        let first = Verifier::new(ChecksumAlgorithm::Md5, 1)
            .with_seed(42)
            .plan(&label(), &entries, &sums)
            .unwrap();
        let second = Verifier::new(ChecksumAlgorithm::Md5, 1)
            .with_seed(42)
            .plan(&label(), &entries, &sums)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_plan_requires_expected_checksum() {
        let entries = vec![ManifestEntry::new(1, "/a/1")];
        let err = Verifier::new(ChecksumAlgorithm::Md5, 1)
            .plan(&label(), &entries, &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, PapertapeError::Catalog(_)));
    }
}
