//! A catalog: an index plus provenance and caching policy.
//!
//! The three kinds differ only in a handful of branching rules, so this is
//! one struct with a `CatalogKind` tag. `Cache` is the collection's own
//! always-present local catalog, `Direct` points at a catalog directory on
//! this machine, `Remote` is a synced copy of a catalog published at a URL.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::catalog::index::{CatalogIndex, INDEX_FILE_NAME};
use crate::core::errors::{AlmanacError, Result};
use crate::ports::CatalogTransport;
use crate::solution::{Coordinates, SolutionSetup, SOLUTION_FILE_NAME};

/// Directory below a catalog cache holding the solution files.
pub const SOLUTIONS_DIR: &str = "solutions";
/// Name of the downloadable solution archive in a published catalog.
pub const SOLUTION_ARCHIVE_NAME: &str = "solution.zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Cache,
    Direct,
    Remote,
}

impl CatalogKind {
    /// Classify a catalog source string.
    pub fn for_src(src: &str) -> CatalogKind {
        if src.is_empty() {
            CatalogKind::Cache
        } else if src.starts_with("http://") || src.starts_with("https://") {
            CatalogKind::Remote
        } else {
            CatalogKind::Direct
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CatalogKind::Cache => "cache",
            CatalogKind::Direct => "direct",
            CatalogKind::Remote => "remote",
        };
        write!(f, "{}", name)
    }
}

pub struct Catalog {
    catalog_id: u64,
    name: String,
    src: String,
    path: PathBuf,
    kind: CatalogKind,
    deletable: bool,
    index: RwLock<CatalogIndex>,
}

impl Catalog {
    /// Open a catalog over its cache directory. An existing `index.json`
    /// below `path` is loaded; otherwise an empty index is written.
    pub fn open(
        catalog_id: u64,
        name: impl Into<String>,
        src: impl Into<String>,
        path: impl Into<PathBuf>,
        deletable: bool,
    ) -> Result<Self> {
        let name = name.into();
        let src = src.into();
        let path = path.into();
        let kind = CatalogKind::for_src(&src);
        let index_file = path.join(INDEX_FILE_NAME);
        let index = if index_file.is_file() {
            let mut index = CatalogIndex::load(&index_file)?;
            if index.name() != name {
                warn!(
                    catalog = %name,
                    stored = %index.name(),
                    "index cache carries a different catalog name, adopting ours"
                );
                index.set_name(&name);
            }
            index
        } else {
            let index = CatalogIndex::new(&name);
            index.export(&index_file)?;
            index
        };
        debug!(catalog = %name, kind = %kind, path = %path.display(), "catalog opened");
        Ok(Self {
            catalog_id,
            name,
            src,
            path,
            kind,
            deletable,
            index: RwLock::new(index),
        })
    }

    pub fn catalog_id(&self) -> u64 {
        self.catalog_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> CatalogKind {
        self.kind
    }

    pub fn deletable(&self) -> bool {
        self.deletable
    }

    /// Content is authoritative on disk; nothing to fetch over the network.
    pub fn is_local(&self) -> bool {
        self.kind != CatalogKind::Remote
    }

    pub fn is_cache(&self) -> bool {
        self.kind == CatalogKind::Cache
    }

    pub fn index_file_path(&self) -> PathBuf {
        self.path.join(INDEX_FILE_NAME)
    }

    /// Cache directory of one solution below this catalog.
    pub fn solution_dir(&self, coordinates: &Coordinates) -> PathBuf {
        self.path
            .join(SOLUTIONS_DIR)
            .join(coordinates.as_relative_path())
    }

    /// Cached document path of one solution below this catalog.
    pub fn solution_file_path(&self, coordinates: &Coordinates) -> PathBuf {
        self.solution_dir(coordinates).join(SOLUTION_FILE_NAME)
    }

    /// Where a published remote catalog serves the solution archive.
    pub fn download_url(&self, coordinates: &Coordinates) -> Result<String> {
        if self.kind != CatalogKind::Remote {
            return Err(AlmanacError::configuration(format!(
                "catalog '{}' is local, nothing to download",
                self.name
            )));
        }
        let mut base = self.src.trim_end_matches('/');
        base = base.strip_suffix(".git").unwrap_or(base);
        Ok(format!(
            "{}/{}/{}/{}/{}/{}",
            base,
            SOLUTIONS_DIR,
            coordinates.group(),
            coordinates.name(),
            coordinates.version(),
            SOLUTION_ARCHIVE_NAME
        ))
    }

    pub async fn get_by_coordinates(&self, coordinates: &Coordinates) -> Option<SolutionSetup> {
        self.index.read().await.get_by_coordinates(coordinates).cloned()
    }

    pub async fn get_all_versions(&self, group: &str, name: &str) -> Vec<SolutionSetup> {
        self.index
            .read()
            .await
            .get_all_versions(group, name)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn get_by_doi(&self, doi: &str) -> Result<Option<SolutionSetup>> {
        Ok(self.index.read().await.get_by_doi(doi)?.cloned())
    }

    /// Every entry of the index, in key order.
    pub async fn list_solutions(&self) -> Vec<SolutionSetup> {
        self.index.read().await.solutions().cloned().collect()
    }

    pub async fn contains(&self, coordinates: &Coordinates) -> bool {
        self.index
            .read()
            .await
            .get_by_coordinates(coordinates)
            .is_some()
    }

    /// Register a solution in this catalog's index and persist the index.
    pub async fn add(&self, setup: SolutionSetup, force_overwrite: bool) -> Result<()> {
        let coordinates = setup.coordinates();
        let mut index = self.index.write().await;
        if !force_overwrite && index.get_by_coordinates(&coordinates).is_some() {
            return Err(AlmanacError::duplicate(&self.name, coordinates.to_string()));
        }
        index.update(setup)?;
        index.export(&self.index_file_path())?;
        info!(catalog = %self.name, coordinates = %coordinates, "solution added to catalog");
        Ok(())
    }

    /// Drop the index entry and any cached solution files. Returns whether
    /// an entry existed.
    pub async fn remove(&self, coordinates: &Coordinates) -> Result<bool> {
        let mut index = self.index.write().await;
        let removed = index.remove(coordinates).is_some();
        if removed {
            index.export(&self.index_file_path())?;
        }
        drop(index);
        let cached = self.solution_dir(coordinates);
        if cached.exists() {
            std::fs::remove_dir_all(&cached)
                .map_err(|e| AlmanacError::io(format!("removing {}", cached.display()), e))?;
        }
        Ok(removed)
    }

    /// Re-fetch the index from the catalog source. Fatal errors belong to
    /// the initial configuration of a catalog; routine refreshes go through
    /// [`Catalog::update_index_cache_if_possible`].
    pub async fn sync_from_source(&self, transport: &dyn CatalogTransport) -> Result<()> {
        match self.kind {
            CatalogKind::Cache => Ok(()),
            CatalogKind::Direct => {
                let source_index = Path::new(&self.src).join(INDEX_FILE_NAME);
                let mut fetched = CatalogIndex::load(&source_index)?;
                fetched.set_name(&self.name);
                fetched.export(&self.index_file_path())?;
                let entries = fetched.len();
                *self.index.write().await = fetched;
                debug!(catalog = %self.name, entries, "index refreshed from local source");
                Ok(())
            }
            CatalogKind::Remote => {
                transport
                    .clone_or_update(&self.src, &self.path)
                    .await
                    .map_err(|e| AlmanacError::transport(&self.name, e))?;
                let mut fetched = CatalogIndex::load(&self.index_file_path())?;
                fetched.set_name(&self.name);
                fetched.export(&self.index_file_path())?;
                let entries = fetched.len();
                *self.index.write().await = fetched;
                debug!(catalog = %self.name, entries, "index refreshed from remote source");
                Ok(())
            }
        }
    }

    /// Best-effort index refresh: a stale index is strictly better than
    /// none, so every failure is downgraded to a warning and the previous
    /// index stays in place. Returns whether a refresh happened.
    pub async fn update_index_cache_if_possible(&self, transport: &dyn CatalogTransport) -> bool {
        match self.sync_from_source(transport).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    catalog = %self.name,
                    error = %e,
                    "index refresh failed, keeping previous index"
                );
                false
            }
        }
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("catalog_id", &self.catalog_id)
            .field("name", &self.name)
            .field("src", &self.src)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("deletable", &self.deletable)
            .finish()
    }
}
