use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::errors::{AlmanacError, Result};

/// Name of the automatically-created local cache catalog.
pub const DEFAULT_CACHE_CATALOG: &str = "cache";

/// Configuration for a collection root and its execution behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlmanacConfig {
    /// Base directory holding the collection database, catalog caches,
    /// installations, and scratch space.
    pub collection_root: PathBuf,
    /// Name of the protected cache catalog.
    #[serde(default = "default_cache_catalog")]
    pub cache_catalog_name: String,
    /// Number of workers in the task pool.
    #[serde(default = "default_task_workers")]
    pub task_workers: usize,
    /// Remove a solution's installation directory on uninstall.
    #[serde(default = "default_true")]
    pub remove_installation_on_uninstall: bool,
}

fn default_cache_catalog() -> String {
    DEFAULT_CACHE_CATALOG.to_string()
}

fn default_task_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for AlmanacConfig {
    fn default() -> Self {
        Self {
            collection_root: PathBuf::from(".almanac"),
            cache_catalog_name: default_cache_catalog(),
            task_workers: default_task_workers(),
            remove_installation_on_uninstall: true,
        }
    }
}

impl AlmanacConfig {
    pub fn new(collection_root: impl Into<PathBuf>) -> Self {
        Self {
            collection_root: collection_root.into(),
            ..Self::default()
        }
    }

    /// Validates configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.collection_root.as_os_str().is_empty() {
            return Err(AlmanacError::configuration("collection_root must not be empty"));
        }
        if self.cache_catalog_name.is_empty() {
            return Err(AlmanacError::configuration(
                "cache_catalog_name must not be empty",
            ));
        }
        if self.cache_catalog_name.contains(':') {
            return Err(AlmanacError::configuration(
                "cache_catalog_name must not contain ':'",
            ));
        }
        if self.task_workers == 0 {
            return Err(AlmanacError::configuration(
                "task_workers must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Path of the sled collection database.
    pub fn collection_db_path(&self) -> PathBuf {
        self.collection_root.join("collection.db")
    }

    /// Root directory for catalog caches.
    pub fn catalogs_path(&self) -> PathBuf {
        self.collection_root.join("catalogs")
    }

    /// Cache directory of one catalog.
    pub fn catalog_cache_path(&self, catalog_name: &str) -> PathBuf {
        self.catalogs_path().join(catalog_name)
    }

    /// Root directory for per-solution installations.
    pub fn installations_path(&self) -> PathBuf {
        self.collection_root.join("installations")
    }

    /// Scratch root for downloads and path-based resolutions.
    pub fn scratch_path(&self) -> PathBuf {
        self.collection_root.join("tmp")
    }

    /// Creates the directory skeleton under the collection root.
    pub fn prepare_directories(&self) -> Result<()> {
        for dir in [
            self.collection_root.as_path(),
            &self.catalogs_path(),
            &self.installations_path(),
            &self.scratch_path(),
        ] {
            std::fs::create_dir_all(dir)
                .map_err(|e| AlmanacError::io(format!("creating {}", dir.display()), e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AlmanacConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_catalog_name, "cache");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = AlmanacConfig::default();
        config.task_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_catalog_name_must_not_collide_with_references() {
        let mut config = AlmanacConfig::default();
        config.cache_catalog_name = "my:cache".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_paths_live_under_root() {
        let config = AlmanacConfig::new("/data/collection");
        assert!(config.collection_db_path().starts_with("/data/collection"));
        assert!(config
            .catalog_cache_path("main")
            .ends_with("catalogs/main"));
    }
}
