// ⚙️ Sync Configuration
//
// Loaded from TOML, every field optional:
//
//   dry_run = true
//   page_size = 500
//   merge_depth = 5
//   location_merge_depth = 10
//   flush_threshold = 10000
//   delete_parallelism = 4
//   journal_path = "/var/lib/catalog-sync/journal.db"
//   log_filter = "catalog_sync=debug"

use crate::catalog::DEFAULT_PAGE_SIZE;
use crate::error::{Result, SyncError};
use anyhow::Context;
use crate::merge::{DEFAULT_MERGE_DEPTH, LOCATION_MERGE_DEPTH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Perform all reads, suppress all writes
    pub dry_run: bool,

    /// Page size for bulk cache loads
    pub page_size: usize,

    /// Property-bag merge depth for every kind except Location
    pub merge_depth: usize,

    /// Property-bag merge depth for Locations
    pub location_merge_depth: usize,

    /// Pending observations that trigger flush_if_full() (0 = never)
    pub flush_threshold: usize,

    /// Worker count handed to BulkDeleter::delete
    pub delete_parallelism: usize,

    /// SQLite run journal, None = no journal
    pub journal_path: Option<PathBuf>,

    /// tracing EnvFilter directive used when RUST_LOG is not set
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            dry_run: false,
            page_size: DEFAULT_PAGE_SIZE,
            merge_depth: DEFAULT_MERGE_DEPTH,
            location_merge_depth: LOCATION_MERGE_DEPTH,
            flush_threshold: 10_000,
            delete_parallelism: 4,
            journal_path: None,
            log_filter: "info".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SyncConfig =
            toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))
            .map_err(|e| SyncError::Config(format!("{e:#}")))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(SyncError::Config("page_size must be at least 1".to_string()));
        }
        if self.delete_parallelism == 0 {
            return Err(SyncError::Config(
                "delete_parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder pattern: toggle dry-run mode
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert!(!config.dry_run);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.merge_depth, 5);
        assert_eq!(config.location_merge_depth, 10);
        assert!(config.journal_path.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str("dry_run = true\npage_size = 250\n").unwrap();
        assert!(config.dry_run);
        assert_eq!(config.page_size, 250);
        assert_eq!(config.delete_parallelism, 4);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = SyncConfig::from_toml_str("dry_runn = true").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        assert!(SyncConfig::from_toml_str("page_size = 0").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "delete_parallelism = 8").unwrap();
        writeln!(file, "journal_path = \"/tmp/journal.db\"").unwrap();

        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.delete_parallelism, 8);
        assert_eq!(config.journal_path, Some(PathBuf::from("/tmp/journal.db")));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = SyncConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err
            .to_string()
            .contains("Failed to read config file: /definitely/not/here.toml"));
    }
}
