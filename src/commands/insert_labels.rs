//! Insert Labels Command Handler

use super::parse_label;
use crate::catalog::JsonCatalog;
use crate::config::Config;
use crate::error::Result;
use tracing::{info, warn};

pub async fn execute(config: &Config, labels: Vec<String>) -> Result<()> {
    let labels = labels
        .iter()
        .map(|l| parse_label(l))
        .collect::<Result<Vec<_>>>()?;

    let mut catalog = JsonCatalog::open(&config.catalog.path, &config.catalog.label_prefixes)?;
    for label in labels.iter().filter(|l| !catalog.matches_prefix(l)) {
        warn!(
            "{} matches none of {:?}, it will never be selected for a dump",
            label, config.catalog.label_prefixes
        );
    }

    let added = catalog.insert_labels(&labels)?;
    info!("Catalog {} updated", config.catalog.path.display());
    println!("{} new label(s), {} already known", added, labels.len() - added);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TapeCatalog;
    use crate::changer::inventory::TapeLabel;
    use crate::error::PapertapeError;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.catalog.path = dir.path().join("catalog.json");
        config
    }

    #[tokio::test]
    async fn test_inserted_labels_become_selectable() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        execute(&config, vec!["h0c20001".into(), "H0C10001".into(), "PAPR0001".into()])
            .await
            .unwrap();
        // known labels are left alone
        execute(&config, vec!["H0C10001".into()]).await.unwrap();

        let mut catalog = JsonCatalog::open(&config.catalog.path, &config.catalog.label_prefixes).unwrap();
        assert_eq!(
            catalog.select_available_label_pair().unwrap(),
            vec![TapeLabel::new("H0C10001").unwrap(), TapeLabel::new("H0C20001").unwrap()]
        );
        assert!(catalog.record(&TapeLabel::new("PAPR0001").unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_bad_label_leaves_catalog_untouched() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        let err = execute(&config, vec!["H0C10001".into(), "".into()]).await.unwrap_err();
        assert!(matches!(err, PapertapeError::Parse(_)));
        assert!(!config.catalog.path.exists());
    }
}
