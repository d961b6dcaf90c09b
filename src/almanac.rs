//! The facade tying configuration, collection database, catalogs, and the
//! collaborator traits into the high-level operations: catalog management,
//! reference resolution, and install/uninstall/run/test flows with their
//! task-pool variants.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogKind};
use crate::collection::{CollectionIndex, SolutionRecord, CATALOG_SYNC_ATTRS};
use crate::core::config::AlmanacConfig;
use crate::core::errors::{AlmanacError, Result};
use crate::ports::{CatalogTransport, Downloader, EnvironmentProvider};
use crate::queue::{QueueBuilder, QueueRunner, ScriptAction};
use crate::resolver::{ResolveResult, Resolver};
use crate::solution::Coordinates;
use crate::task::{TaskLog, TaskManager, TaskReport};

/// What an [`Almanac::upgrade`] pass did (or, for a dry run, would do) to
/// one catalog's collection rows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogChangelog {
    pub catalog: String,
    pub added: Vec<Coordinates>,
    pub updated: Vec<Coordinates>,
    pub removed: Vec<Coordinates>,
    /// Gone from the catalog index but kept because local install state
    /// still references them.
    pub kept_installed: Vec<Coordinates>,
}

impl CatalogChangelog {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.kept_installed.is_empty()
    }
}

/// Facade over a collection root. One instance per collection; cheap to
/// share behind an `Arc` (the task variants require it).
pub struct Almanac {
    config: AlmanacConfig,
    collection: Arc<CollectionIndex>,
    resolver: Resolver,
    environments: Arc<dyn EnvironmentProvider>,
    transport: Arc<dyn CatalogTransport>,
    tasks: Arc<TaskManager>,
}

impl Almanac {
    /// Open (or initialize) the collection at `config.collection_root`,
    /// re-create catalog handles for every configured catalog, and make
    /// sure the cache catalog exists.
    pub async fn open(
        config: AlmanacConfig,
        environments: Arc<dyn EnvironmentProvider>,
        downloader: Arc<dyn Downloader>,
        transport: Arc<dyn CatalogTransport>,
    ) -> Result<Self> {
        config.validate()?;
        config.prepare_directories()?;
        prune_scratch(&config.scratch_path());

        let collection = Arc::new(CollectionIndex::open(&config.collection_db_path())?);
        let resolver = Resolver::new(config.clone(), collection.clone(), downloader);

        if collection
            .get_catalog_by_name(&config.cache_catalog_name)?
            .is_none()
        {
            collection
                .insert_catalog(
                    &config.cache_catalog_name,
                    "",
                    &config.catalog_cache_path(&config.cache_catalog_name),
                    CatalogKind::Cache,
                    false,
                )
                .await?;
        }

        for record in collection.get_all_catalogs()? {
            let catalog = Catalog::open(
                record.catalog_id,
                &record.name,
                &record.src,
                &record.path,
                record.deletable,
            )?;
            resolver.register_catalog(Arc::new(catalog)).await;
        }
        info!(
            root = %config.collection_root.display(),
            catalogs = collection.catalog_count(),
            solutions = collection.solution_count(),
            "collection opened"
        );

        let tasks = Arc::new(TaskManager::new(config.task_workers));
        Ok(Self {
            config,
            collection,
            resolver,
            environments,
            transport,
            tasks,
        })
    }

    pub fn config(&self) -> &AlmanacConfig {
        &self.config
    }

    pub fn collection(&self) -> &Arc<CollectionIndex> {
        &self.collection
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    // ---------------- catalog management ----------------

    /// Register a catalog and mirror its index into the collection. The
    /// initial sync is fatal: a catalog that cannot deliver its index is
    /// not added.
    pub async fn add_catalog(&self, name: &str, src: &str) -> Result<Arc<Catalog>> {
        let kind = CatalogKind::for_src(src);
        if kind == CatalogKind::Cache {
            return Err(AlmanacError::configuration(
                "catalog source must not be empty",
            ));
        }

        let record = self
            .collection
            .insert_catalog(name, src, &self.config.catalog_cache_path(name), kind, true)
            .await?;
        let catalog = Catalog::open(
            record.catalog_id,
            &record.name,
            &record.src,
            &record.path,
            record.deletable,
        )?;

        if let Err(e) = catalog.sync_from_source(self.transport.as_ref()).await {
            // Roll the registration back so a retry starts clean.
            if let Err(rollback) = self.collection.remove_catalog(record.catalog_id).await {
                warn!(catalog = name, error = %rollback, "rollback of failed catalog add did not complete");
            }
            let _ = fs::remove_dir_all(&record.path);
            return Err(e);
        }

        for setup in catalog.list_solutions().await {
            self.collection
                .insert_solution(record.catalog_id, setup)
                .await?;
        }

        let catalog = Arc::new(catalog);
        self.resolver.register_catalog(catalog.clone()).await;
        info!(catalog = name, src, "catalog added");
        Ok(catalog)
    }

    /// Drop a catalog, its collection rows, and its cache directory.
    /// The cache catalog is protected and survives this call untouched.
    pub async fn remove_catalog(&self, name: &str) -> Result<()> {
        let record = self
            .collection
            .get_catalog_by_name(name)?
            .ok_or_else(|| AlmanacError::unknown_catalog(name))?;
        self.collection.remove_catalog(record.catalog_id).await?;
        self.resolver.unregister_catalog(name).await;
        if record.path.exists() {
            if let Err(e) = fs::remove_dir_all(&record.path) {
                warn!(catalog = name, error = %e, "catalog cache directory not removed");
            }
        }
        info!(catalog = name, "catalog removed");
        Ok(())
    }

    pub async fn get_catalog(&self, name: &str) -> Option<Arc<Catalog>> {
        self.resolver.get_catalog(name).await
    }

    pub async fn catalogs(&self) -> Vec<Arc<Catalog>> {
        self.resolver.catalogs().await
    }

    /// Refresh index caches for one catalog or all of them. Refresh
    /// failures are warnings; the stale index stays usable.
    pub async fn update(&self, catalog: Option<&str>) -> Result<()> {
        for catalog in self.target_catalogs(catalog).await? {
            catalog
                .update_index_cache_if_possible(self.transport.as_ref())
                .await;
        }
        Ok(())
    }

    /// Sync collection rows from the (already refreshed) catalog indexes
    /// and report what changed. With `dry_run` nothing is written.
    ///
    /// Rows that disappeared from their index but are installed locally
    /// are kept and reported under `kept_installed`.
    pub async fn upgrade(
        &self,
        catalog: Option<&str>,
        dry_run: bool,
    ) -> Result<Vec<CatalogChangelog>> {
        let mut changelogs = Vec::new();
        for catalog in self.target_catalogs(catalog).await? {
            let mut changelog = CatalogChangelog {
                catalog: catalog.name().to_string(),
                ..CatalogChangelog::default()
            };
            let index_entries = catalog.list_solutions().await;
            let rows = self.collection.get_solutions_by_catalog(catalog.catalog_id())?;

            for setup in &index_entries {
                let coordinates = setup.coordinates();
                match rows.iter().find(|row| row.coordinates() == coordinates) {
                    None => {
                        if !dry_run {
                            self.collection
                                .insert_solution(catalog.catalog_id(), setup.clone())
                                .await?;
                        }
                        changelog.added.push(coordinates);
                    }
                    Some(row) if row.setup != *setup => {
                        if !dry_run {
                            self.collection
                                .update_solution(
                                    catalog.catalog_id(),
                                    &coordinates,
                                    setup,
                                    CATALOG_SYNC_ATTRS,
                                )
                                .await?;
                        }
                        changelog.updated.push(coordinates);
                    }
                    Some(_) => {}
                }
            }

            for row in &rows {
                let coordinates = row.coordinates();
                if index_entries.iter().any(|s| s.coordinates() == coordinates) {
                    continue;
                }
                if row.internal.installed || row.internal.install_unfinished {
                    changelog.kept_installed.push(coordinates);
                } else {
                    if !dry_run {
                        self.collection
                            .remove_solution(catalog.catalog_id(), &coordinates)
                            .await?;
                    }
                    changelog.removed.push(coordinates);
                }
            }

            debug!(
                catalog = catalog.name(),
                added = changelog.added.len(),
                updated = changelog.updated.len(),
                removed = changelog.removed.len(),
                kept = changelog.kept_installed.len(),
                dry_run,
                "catalog upgrade pass"
            );
            changelogs.push(changelog);
        }
        Ok(changelogs)
    }

    async fn target_catalogs(&self, name: Option<&str>) -> Result<Vec<Arc<Catalog>>> {
        match name {
            Some(name) => {
                let catalog = self
                    .resolver
                    .get_catalog(name)
                    .await
                    .ok_or_else(|| AlmanacError::unknown_catalog(name))?;
                Ok(vec![catalog])
            }
            None => Ok(self.resolver.catalogs().await),
        }
    }

    // ---------------- resolution & execution ----------------

    /// Resolve a reference and load its document.
    pub async fn resolve(&self, reference: &str) -> Result<ResolveResult> {
        self.resolver.resolve_and_load(reference).await
    }

    pub async fn install(&self, reference: &str, args: &[String]) -> Result<()> {
        self.run_action(reference, args, ScriptAction::Install, &TaskLog::new())
            .await
    }

    pub async fn uninstall(&self, reference: &str, args: &[String]) -> Result<()> {
        self.run_action(reference, args, ScriptAction::Uninstall, &TaskLog::new())
            .await
    }

    pub async fn run(&self, reference: &str, args: &[String]) -> Result<()> {
        self.run_action(reference, args, ScriptAction::Run, &TaskLog::new())
            .await
    }

    pub async fn test(&self, reference: &str, args: &[String]) -> Result<()> {
        self.run_action(reference, args, ScriptAction::Test, &TaskLog::new())
            .await
    }

    pub fn install_async(self: &Arc<Self>, reference: &str, args: &[String]) -> String {
        self.submit(reference, args, ScriptAction::Install)
    }

    pub fn uninstall_async(self: &Arc<Self>, reference: &str, args: &[String]) -> String {
        self.submit(reference, args, ScriptAction::Uninstall)
    }

    pub fn run_async(self: &Arc<Self>, reference: &str, args: &[String]) -> String {
        self.submit(reference, args, ScriptAction::Run)
    }

    pub fn test_async(self: &Arc<Self>, reference: &str, args: &[String]) -> String {
        self.submit(reference, args, ScriptAction::Test)
    }

    pub fn task_status(&self, id: &str) -> Option<TaskReport> {
        self.tasks.get_status(id)
    }

    pub async fn wait_for_task(&self, id: &str) -> Option<TaskReport> {
        self.tasks.wait_for(id).await
    }

    // ---------------- recency surfaces ----------------

    pub fn recently_installed(&self) -> Result<Vec<SolutionRecord>> {
        self.collection.get_recently_installed_solutions()
    }

    pub fn recently_launched(&self) -> Result<Vec<SolutionRecord>> {
        self.collection.get_recently_launched_solutions()
    }

    pub fn unfinished_installations(&self) -> Result<Vec<SolutionRecord>> {
        self.collection.get_unfinished_installation_solutions()
    }

    // ---------------- internals ----------------

    /// The one flow behind install/uninstall/run/test: resolve, expand
    /// into a queue, drain with bookkeeping.
    async fn run_action(
        &self,
        reference: &str,
        args: &[String],
        action: ScriptAction,
        log: &TaskLog,
    ) -> Result<()> {
        let resolved = match action {
            ScriptAction::Install => self.resolver.resolve_and_load(reference).await?,
            _ => self.resolver.resolve_require_installation(reference).await?,
        };
        let builder = QueueBuilder::new(&self.resolver, self.environments.as_ref());
        let queue = builder.build(resolved, args, action).await?;
        let runner = QueueRunner::new(&self.resolver, self.environments.as_ref(), &self.config);
        runner.run(queue, log).await
    }

    fn submit(self: &Arc<Self>, reference: &str, args: &[String], action: ScriptAction) -> String {
        let almanac = Arc::clone(self);
        let reference = reference.to_string();
        let args = args.to_vec();
        self.tasks.register_task(
            format!("{} {}", action, reference),
            move |log| {
                async move {
                    almanac
                        .run_action(&reference, &args, action, &log)
                        .await
                }
                .boxed()
            },
        )
    }
}

/// Scratch directories live for one resolution; anything still under the
/// scratch root belongs to an earlier process. Removal is best effort.
fn prune_scratch(scratch: &Path) {
    let entries = match fs::read_dir(scratch) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = removed {
            warn!(path = %path.display(), error = %e, "failed to prune scratch entry");
        }
    }
}
