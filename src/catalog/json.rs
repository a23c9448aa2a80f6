use super::{format_date, TapeCatalog};
use crate::changer::inventory::TapeLabel;
use crate::error::{PapertapeError, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeRecord {
    /// Completion date, `None` while the tape is blank
    pub date: Option<String>,
    pub owner_pid: Option<u32>,
    pub description: Option<String>,
    /// Unused capacity in bytes, when known
    pub capacity: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct CatalogData {
    tapes: BTreeMap<TapeLabel, TapeRecord>,
    checksums: BTreeMap<String, String>,
}

/// File-backed catalog; every change is written through atomically
#[derive(Debug)]
pub struct JsonCatalog {
    path: PathBuf,
    prefixes: Vec<String>,
    data: CatalogData,
}

impl JsonCatalog {
    /// Open `path`, starting empty when the file does not exist yet
    pub fn open(path: &Path, prefixes: &[String]) -> Result<Self> {
        let data = if path.exists() {
            let text = fs::read_to_string(path)?;
            serde_json::from_str(&text).map_err(|e| {
                PapertapeError::catalog(format!("Cannot parse {}: {}", path.display(), e))
            })?
        } else {
            debug!("Catalog {} not found, starting empty", path.display());
            CatalogData::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            prefixes: prefixes.to_vec(),
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, label: &TapeLabel) -> Option<&TapeRecord> {
        self.data.tapes.get(label)
    }

    /// Job that claimed `label`
    pub fn owner_of(&self, label: &TapeLabel) -> Option<u32> {
        self.record(label).and_then(|r| r.owner_pid)
    }

    /// Register blank labels; existing records are left alone.
    /// Returns how many labels were new.
    pub fn insert_labels(&mut self, labels: &[TapeLabel]) -> Result<usize> {
        let mut added = 0;
        for label in labels {
            if !self.data.tapes.contains_key(label) {
                self.data.tapes.insert(label.clone(), TapeRecord::default());
                added += 1;
            }
        }
        self.save()?;
        Ok(added)
    }

    /// True when `label` would be picked for some drive of a pair
    pub fn matches_prefix(&self, label: &TapeLabel) -> bool {
        self.prefixes.iter().any(|p| label.as_str().starts_with(p.as_str()))
    }

    pub fn record_checksums<I>(&mut self, checksums: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.data.checksums.extend(checksums);
        self.save()
    }

    fn record_mut(&mut self, label: &TapeLabel) -> Result<&mut TapeRecord> {
        self.data
            .tapes
            .get_mut(label)
            .ok_or_else(|| PapertapeError::catalog(format!("Unknown label {}", label)))
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.data)
            .map_err(|e| PapertapeError::catalog(format!("Cannot serialize catalog: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TapeCatalog for JsonCatalog {
    fn select_available_label_pair(&mut self) -> Result<Vec<TapeLabel>> {
        let mut labels = Vec::with_capacity(self.prefixes.len());
        for prefix in &self.prefixes {
            let label = self
                .data
                .tapes
                .iter()
                .find(|(label, record)| label.as_str().starts_with(prefix.as_str()) && record.date.is_none())
                .map(|(label, _)| label.clone())
                .ok_or_else(|| {
                    PapertapeError::catalog(format!("No blank tape left with prefix {}", prefix))
                })?;
            labels.push(label);
        }
        debug!("Selected labels {:?}", labels);
        Ok(labels)
    }

    fn claim_labels(&mut self, labels: &[TapeLabel], owner_pid: u32) -> Result<()> {
        let description = format!("papertape dump version:{}", env!("CARGO_PKG_VERSION"));
        for label in labels {
            let record = self.record_mut(label)?;
            record.owner_pid = Some(owner_pid);
            record.description = Some(description.clone());
        }
        info!("Claimed {:?} for job {}", labels, owner_pid);
        self.save()
    }

    fn record_completion_date(&mut self, labels: &[TapeLabel]) -> Result<()> {
        let date = format_date(Local::now());
        for label in labels {
            self.record_mut(label)?.date = Some(date.clone());
        }
        info!("Dated {:?} as {}", labels, date);
        self.save()
    }

    fn expected_checksums(&self, paths: &[String]) -> Result<HashMap<String, String>> {
        Ok(paths
            .iter()
            .filter_map(|path| {
                self.data
                    .checksums
                    .get(path)
                    .map(|sum| (path.clone(), sum.clone()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn labels(names: &[&str]) -> Vec<TapeLabel> {
        names.iter().map(|n| TapeLabel::new(n).unwrap()).collect()
    }

    fn catalog(dir: &TempDir) -> JsonCatalog {
        JsonCatalog::open(
            &dir.path().join("catalog.json"),
            &["H0C1".to_string(), "H0C2".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_selects_lowest_undated_per_prefix() {
        let dir = TempDir::new().unwrap();
        let mut cat = catalog(&dir);
        cat.insert_labels(&labels(&["H0C20002", "H0C10003", "H0C10001", "H0C20001", "PAPR0001"]))
            .unwrap();
        cat.record_completion_date(&labels(&["H0C10001"])).unwrap();

        let pair = cat.select_available_label_pair().unwrap();
        assert_eq!(pair, labels(&["H0C10003", "H0C20001"]));
    }

    #[test]
    fn test_no_blank_tape_is_catalog_error() {
        let dir = TempDir::new().unwrap();
        let mut cat = catalog(&dir);
        cat.insert_labels(&labels(&["H0C10001"])).unwrap();

        let err = cat.select_available_label_pair().unwrap_err();
        assert!(matches!(err, PapertapeError::Catalog(_)));
    }

    #[test]
    fn test_changes_persist() {
        let dir = TempDir::new().unwrap();
        let pair = labels(&["H0C10001", "H0C20001"]);
        {
            let mut cat = catalog(&dir);
            cat.insert_labels(&pair).unwrap();
            cat.claim_labels(&pair, 1234).unwrap();
            cat.record_checksums([("/data/a".to_string(), "abc".to_string())])
                .unwrap();
        }

        let cat = catalog(&dir);
        assert_eq!(cat.owner_of(&pair[0]), Some(1234));
        assert!(cat.record(&pair[1]).unwrap().date.is_none());

        let sums = cat
            .expected_checksums(&["/data/a".to_string(), "/data/z".to_string()])
            .unwrap();
        assert_eq!(sums.len(), 1);
        assert_eq!(sums["/data/a"], "abc");
    }

    #[test]
    fn test_unknown_label() {
        let dir = TempDir::new().unwrap();
        let mut cat = catalog(&dir);
        let err = cat.claim_labels(&labels(&["H0C19999"]), 1).unwrap_err();
        assert!(matches!(err, PapertapeError::Catalog(_)));
    }
}
