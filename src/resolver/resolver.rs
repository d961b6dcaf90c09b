//! Multi-source resolution of references into concrete solutions.
//!
//! The resolver prefers already-known local state: path and URL inputs are
//! materialized into scratch space and read directly, coordinate references
//! consult the collection before any catalog index, and catalog hits whose
//! document is not cached yet are downloaded or copied before the result is
//! returned. Resolution always leaves a loadable file on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogKind, SOLUTIONS_DIR};
use crate::collection::{CollectionIndex, SolutionRecord};
use crate::core::config::AlmanacConfig;
use crate::core::errors::{AlmanacError, Result};
use crate::ports::Downloader;
use crate::resolver::reference::{parse_reference, SolutionRef};
use crate::solution::{loader, Coordinates, InstallationPaths, Solution, SOLUTION_FILE_NAME};

/// Outcome of a resolution. Consumed immediately by run/install/test and
/// the queue builder; never persisted.
#[derive(Debug, Clone)]
pub struct ResolveResult {
    pub catalog: Arc<Catalog>,
    /// The solution document on disk.
    pub path: PathBuf,
    pub coordinates: Coordinates,
    /// The collection row backing these coordinates, present only when
    /// local install state exists.
    pub collection_entry: Option<SolutionRecord>,
    /// Populated by `resolve_and_load`; `resolve` leaves it empty unless
    /// the input itself had to be parsed (path and URL cases).
    pub loaded: Option<Solution>,
}

impl ResolveResult {
    /// The loaded document, failing when the caller skipped loading.
    pub fn solution(&self) -> Result<&Solution> {
        self.loaded.as_ref().ok_or_else(|| {
            AlmanacError::solution_load(&self.path, "resolve result was not loaded")
        })
    }
}

/// Environment name for a solution bound to a catalog.
pub fn environment_name(catalog_name: &str, coordinates: &Coordinates) -> String {
    format!(
        "{}_{}_{}_{}",
        catalog_name,
        coordinates.group(),
        coordinates.name(),
        coordinates.version()
    )
}

pub struct Resolver {
    config: AlmanacConfig,
    collection: Arc<CollectionIndex>,
    downloader: Arc<dyn Downloader>,
    /// Live catalog handles in priority order (ascending catalog id).
    catalogs: RwLock<Vec<Arc<Catalog>>>,
}

impl Resolver {
    pub fn new(
        config: AlmanacConfig,
        collection: Arc<CollectionIndex>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            config,
            collection,
            downloader,
            catalogs: RwLock::new(Vec::new()),
        }
    }

    pub fn collection(&self) -> &Arc<CollectionIndex> {
        &self.collection
    }

    // ---------------- catalog registry ----------------

    pub async fn register_catalog(&self, catalog: Arc<Catalog>) {
        let mut catalogs = self.catalogs.write().await;
        catalogs.retain(|c| c.name() != catalog.name());
        catalogs.push(catalog);
        catalogs.sort_by_key(|c| c.catalog_id());
    }

    pub async fn unregister_catalog(&self, name: &str) {
        self.catalogs.write().await.retain(|c| c.name() != name);
    }

    pub async fn get_catalog(&self, name: &str) -> Option<Arc<Catalog>> {
        self.catalogs
            .read()
            .await
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    pub async fn catalog_by_id(&self, catalog_id: u64) -> Option<Arc<Catalog>> {
        self.catalogs
            .read()
            .await
            .iter()
            .find(|c| c.catalog_id() == catalog_id)
            .cloned()
    }

    /// All registered catalogs in priority order.
    pub async fn catalogs(&self) -> Vec<Arc<Catalog>> {
        self.catalogs.read().await.clone()
    }

    pub async fn cache_catalog(&self) -> Result<Arc<Catalog>> {
        self.get_catalog(&self.config.cache_catalog_name)
            .await
            .ok_or_else(|| {
                AlmanacError::configuration(format!(
                    "collection has no cache catalog '{}'",
                    self.config.cache_catalog_name
                ))
            })
    }

    // ---------------- resolution ----------------

    /// Map a reference to a concrete (catalog, path, coordinates) triple
    /// without loading the document for catalog-backed cases.
    pub async fn resolve(&self, reference: &str) -> Result<ResolveResult> {
        debug!(reference, "resolving");
        match parse_reference(reference)? {
            SolutionRef::Path(path) => {
                let scratch = self.scratch_dir()?;
                self.resolve_local_input(&path, scratch).await
            }
            SolutionRef::Url(url) => {
                // The download lands in the same scratch directory the
                // materialized copy uses.
                let scratch = self.scratch_dir()?;
                let fetched = self
                    .downloader
                    .download(&url, &scratch)
                    .await
                    .map_err(|e| AlmanacError::download(&url, e))?;
                self.resolve_local_input(&fetched, scratch).await
            }
            SolutionRef::Doi(doi) => self.resolve_doi(&doi, reference).await,
            SolutionRef::Coordinates(coordinates) => {
                self.resolve_coordinates(&coordinates, reference).await
            }
            SolutionRef::CatalogCoordinates {
                catalog,
                coordinates,
            } => self.resolve_in_catalog(&catalog, &coordinates, reference).await,
        }
    }

    /// Resolve and parse the document, binding installation paths.
    pub async fn resolve_and_load(&self, reference: &str) -> Result<ResolveResult> {
        let mut result = self.resolve(reference).await?;
        if result.loaded.is_none() {
            let mut solution = loader::load_solution(&result.path)?;
            if solution.coordinates() != result.coordinates {
                return Err(AlmanacError::solution_load(
                    &result.path,
                    format!(
                        "document declares '{}' but the catalog entry is '{}'",
                        solution.coordinates(),
                        result.coordinates
                    ),
                ));
            }
            self.assign_paths(&result.catalog, &mut solution, &result.path);
            result.loaded = Some(solution);
        }
        Ok(result)
    }

    /// Resolve and load, failing unless the collection records an install
    /// for the coordinates. Used by the run, test, and uninstall flows.
    pub async fn resolve_require_installation(&self, reference: &str) -> Result<ResolveResult> {
        let result = self.resolve_and_load(reference).await?;
        let installed = result
            .collection_entry
            .as_ref()
            .map(|row| row.internal.installed)
            .unwrap_or(false);
        if !installed {
            return Err(AlmanacError::not_installed(result.coordinates.to_string()));
        }
        Ok(result)
    }

    // ---------------- the five cases ----------------

    /// Case 1 (and the tail of case 2): an input on the local filesystem.
    /// The input is materialized into the caller's scratch directory and
    /// parsed right away; it is not looked up in any catalog. For URL
    /// inputs the fetched file already sits inside `scratch`.
    async fn resolve_local_input(&self, input: &Path, scratch: PathBuf) -> Result<ResolveResult> {
        let doc_path = if input.is_dir() {
            copy_dir_all(input, &scratch)?;
            loader::resolve_solution_file(&scratch)?
        } else if input.extension().map(|e| e == "zip").unwrap_or(false) {
            let extracted = self
                .downloader
                .extract(input, &scratch.join("unpacked"))
                .await
                .map_err(|e| {
                    AlmanacError::solution_load_cause(input, "cannot extract archive", e)
                })?;
            loader::resolve_solution_file(&extracted)?
        } else {
            let target = scratch.join(SOLUTION_FILE_NAME);
            if target != *input {
                std::fs::copy(input, &target)
                    .map_err(|e| AlmanacError::io(format!("copying {}", input.display()), e))?;
            }
            target
        };

        let mut solution = loader::load_solution(&doc_path)?;
        let catalog = self.cache_catalog().await?;
        let coordinates = solution.coordinates();
        self.assign_paths(&catalog, &mut solution, &doc_path);
        let collection_entry =
            self.install_state_entry(catalog.catalog_id(), &coordinates)?;
        debug!(coordinates = %coordinates, "resolved from local input");
        Ok(ResolveResult {
            catalog,
            path: doc_path,
            coordinates,
            collection_entry,
            loaded: Some(solution),
        })
    }

    /// Case 3: ask each catalog in priority order, first hit wins.
    async fn resolve_doi(&self, doi: &str, reference: &str) -> Result<ResolveResult> {
        for catalog in self.catalogs().await {
            if let Some(setup) = catalog.get_by_doi(doi).await? {
                let coordinates = setup.coordinates();
                debug!(doi, catalog = catalog.name(), coordinates = %coordinates, "doi hit");
                return self.finish_catalog_hit(catalog, coordinates).await;
            }
        }
        Err(AlmanacError::unresolved(reference))
    }

    /// Case 4: collection first, then catalog indexes in priority order.
    async fn resolve_coordinates(
        &self,
        coordinates: &Coordinates,
        reference: &str,
    ) -> Result<ResolveResult> {
        let rows = self.collection.get_solutions_by_grp_name_version(coordinates)?;
        let installed: Vec<&SolutionRecord> = rows
            .iter()
            .filter(|row| row.internal.installed)
            .collect();
        match installed.as_slice() {
            [row] => {
                let catalog = self.require_catalog_handle(row.catalog_id).await?;
                return self.finish_catalog_hit(catalog, coordinates.clone()).await;
            }
            [] => {}
            several => {
                let mut candidates = Vec::with_capacity(several.len());
                for row in several {
                    let name = match self.catalog_by_id(row.catalog_id).await {
                        Some(catalog) => catalog.name().to_string(),
                        None => row.catalog_id.to_string(),
                    };
                    candidates.push(format!("{}:{}", name, coordinates));
                }
                return Err(AlmanacError::ambiguous(
                    coordinates.to_string(),
                    candidates,
                ));
            }
        }

        for catalog in self.catalogs().await {
            if catalog.contains(coordinates).await {
                return self.finish_catalog_hit(catalog, coordinates.clone()).await;
            }
        }
        Err(AlmanacError::unresolved(reference))
    }

    /// Case 5: look only in the named catalog.
    async fn resolve_in_catalog(
        &self,
        catalog_name: &str,
        coordinates: &Coordinates,
        reference: &str,
    ) -> Result<ResolveResult> {
        let catalog = self
            .get_catalog(catalog_name)
            .await
            .ok_or_else(|| AlmanacError::unknown_catalog(catalog_name))?;
        if !catalog.contains(coordinates).await {
            return Err(AlmanacError::unresolved(reference));
        }
        self.finish_catalog_hit(catalog, coordinates.clone()).await
    }

    // ---------------- shared tail ----------------

    async fn finish_catalog_hit(
        &self,
        catalog: Arc<Catalog>,
        coordinates: Coordinates,
    ) -> Result<ResolveResult> {
        let path = self.ensure_solution_file(&catalog, &coordinates).await?;
        let collection_entry =
            self.install_state_entry(catalog.catalog_id(), &coordinates)?;
        Ok(ResolveResult {
            catalog,
            path,
            coordinates,
            collection_entry,
            loaded: None,
        })
    }

    /// Make sure the catalog cache holds the solution document, fetching or
    /// copying it when missing. A failure here is fatal to the resolution;
    /// unlike an index refresh there is no stale content to fall back to.
    async fn ensure_solution_file(
        &self,
        catalog: &Arc<Catalog>,
        coordinates: &Coordinates,
    ) -> Result<PathBuf> {
        let target = catalog.solution_file_path(coordinates);
        if target.is_file() {
            return Ok(target);
        }
        match catalog.kind() {
            CatalogKind::Cache => Err(AlmanacError::solution_load(
                &target,
                "cache catalog entry has no cached document",
            )),
            CatalogKind::Direct => {
                let source_dir = Path::new(catalog.src())
                    .join(SOLUTIONS_DIR)
                    .join(coordinates.as_relative_path());
                loader::resolve_solution_file(&source_dir)?;
                copy_dir_all(&source_dir, &catalog.solution_dir(coordinates))?;
                info!(catalog = catalog.name(), coordinates = %coordinates, "solution copied into catalog cache");
                Ok(target)
            }
            CatalogKind::Remote => {
                let url = catalog.download_url(coordinates)?;
                let scratch = self.scratch_dir()?;
                let archive = self
                    .downloader
                    .download(&url, &scratch)
                    .await
                    .map_err(|e| AlmanacError::download(&url, e))?;
                let extracted = self
                    .downloader
                    .extract(&archive, &scratch.join("unpacked"))
                    .await
                    .map_err(|e| AlmanacError::download(&url, e))?;
                loader::resolve_solution_file(&extracted)?;
                copy_dir_all(&extracted, &catalog.solution_dir(coordinates))?;
                info!(catalog = catalog.name(), coordinates = %coordinates, "solution downloaded into catalog cache");
                Ok(target)
            }
        }
    }

    fn install_state_entry(
        &self,
        catalog_id: u64,
        coordinates: &Coordinates,
    ) -> Result<Option<SolutionRecord>> {
        Ok(self
            .collection
            .get_solution_by_catalog_grp_name_version(catalog_id, coordinates)?
            .filter(|row| row.internal.installed || row.internal.install_unfinished))
    }

    async fn require_catalog_handle(&self, catalog_id: u64) -> Result<Arc<Catalog>> {
        self.catalog_by_id(catalog_id).await.ok_or_else(|| {
            AlmanacError::configuration(format!(
                "collection row references unregistered catalog id {}",
                catalog_id
            ))
        })
    }

    fn assign_paths(&self, catalog: &Catalog, solution: &mut Solution, doc_path: &Path) {
        let coordinates = solution.coordinates();
        let package_path = doc_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| doc_path.to_path_buf());
        solution.paths = Some(InstallationPaths {
            package_path,
            installation_path: self
                .config
                .installations_path()
                .join(catalog.name())
                .join(coordinates.as_relative_path()),
            environment_name: environment_name(catalog.name(), &coordinates),
        });
    }

    /// A fresh scratch directory under `<root>/tmp/`.
    fn scratch_dir(&self) -> Result<PathBuf> {
        let dir = self.config.scratch_path().join(cuid2::create_id());
        std::fs::create_dir_all(&dir)
            .map_err(|e| AlmanacError::io(format!("creating {}", dir.display()), e))?;
        Ok(dir)
    }
}

pub(crate) fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)
        .map_err(|e| AlmanacError::io(format!("creating {}", dst.display()), e))?;
    let entries = std::fs::read_dir(src)
        .map_err(|e| AlmanacError::io(format!("reading {}", src.display()), e))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| AlmanacError::io(format!("reading {}", src.display()), e))?;
        let target = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| AlmanacError::io(format!("reading {}", src.display()), e))?;
        if file_type.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .map_err(|e| AlmanacError::io(format!("copying {}", entry.path().display()), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_environment_name_layout() {
        let coordinates = Coordinates::new("grp", "sol", "1.0.0");
        assert_eq!(
            environment_name("cache", &coordinates),
            "cache_grp_sol_1.0.0"
        );
    }

    #[test]
    fn test_copy_dir_all_preserves_nesting() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("inner")).unwrap();
        std::fs::write(src.join("solution.yaml"), "setup: {}").unwrap();
        std::fs::write(src.join("inner/data.txt"), "payload").unwrap();

        let dst = dir.path().join("dst");
        copy_dir_all(&src, &dst).unwrap();
        assert!(dst.join("solution.yaml").is_file());
        assert_eq!(
            std::fs::read_to_string(dst.join("inner/data.txt")).unwrap(),
            "payload"
        );
    }
}
