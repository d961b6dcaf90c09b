//! Sequential execution of a built script queue with collection
//! bookkeeping around every entry.

use std::collections::HashMap;
use std::fs;

use tracing::{debug, info};

use crate::catalog::CatalogKind;
use crate::collection::CollectionIndex;
use crate::core::config::AlmanacConfig;
use crate::core::errors::{AlmanacError, Result};
use crate::ports::EnvironmentProvider;
use crate::queue::{QueueEntry, ScriptAction, ScriptQueue};
use crate::resolver::{copy_dir_all, Resolver};
use crate::task::TaskLog;

/// Environment variables every script sees.
pub const ENV_ACTION: &str = "ALMANAC_ACTION";
pub const ENV_INSTALLATION_PATH: &str = "ALMANAC_INSTALLATION_PATH";
pub const ENV_PACKAGE_PATH: &str = "ALMANAC_PACKAGE_PATH";
pub const ENV_ENVIRONMENT_PATH: &str = "ALMANAC_ENVIRONMENT_PATH";

/// Drains a [`ScriptQueue`] front to back. The first failing entry aborts
/// the run; already-finished entries keep their recorded state.
pub struct QueueRunner<'a> {
    resolver: &'a Resolver,
    collection: &'a CollectionIndex,
    environments: &'a dyn EnvironmentProvider,
    config: &'a AlmanacConfig,
}

impl<'a> QueueRunner<'a> {
    pub fn new(
        resolver: &'a Resolver,
        environments: &'a dyn EnvironmentProvider,
        config: &'a AlmanacConfig,
    ) -> Self {
        Self {
            resolver,
            collection: resolver.collection().as_ref(),
            environments,
            config,
        }
    }

    pub async fn run(&self, mut queue: ScriptQueue, log: &TaskLog) -> Result<()> {
        while let Some(entry) = queue.pop_front() {
            self.run_entry(&entry, log).await?;
        }
        Ok(())
    }

    async fn run_entry(&self, entry: &QueueEntry, log: &TaskLog) -> Result<()> {
        info!(coordinates = %entry.coordinates, action = %entry.action, "executing queue entry");
        log.info(format!("{} {}", entry.action, entry.coordinates));

        // An interrupted install must stay visible as unfinished.
        if entry.action == ScriptAction::Install {
            self.collection
                .mark_install_started(entry.catalog_id, &entry.setup)
                .await?;
        }

        if entry.script.is_empty() {
            debug!(
                coordinates = %entry.coordinates,
                action = %entry.action,
                "no script payload, bookkeeping only"
            );
        } else {
            let env_vars = self.env_vars(entry);
            let status = self
                .environments
                .run_script(
                    &entry.environment,
                    &entry.script,
                    &entry.args,
                    &env_vars,
                    true,
                    log,
                )
                .await
                .map_err(|source| {
                    AlmanacError::environment(entry.environment.name.clone(), source)
                })?;
            if status != 0 {
                return Err(AlmanacError::script_failure(
                    entry.coordinates.to_string(),
                    entry.action.as_str(),
                    status,
                ));
            }
        }

        match entry.action {
            ScriptAction::Install => {
                if !entry.installation_path.exists() {
                    fs::create_dir_all(&entry.installation_path)
                        .map_err(|e| AlmanacError::io("create installation directory", e))?;
                }
                self.deposit_cached_document(entry).await?;
                let row = self
                    .collection
                    .set_installed(entry.catalog_id, &entry.coordinates)
                    .await?;
                if let Some(parent_id) = entry.parent_collection_id {
                    self.collection
                        .insert_collection_collection(parent_id, row.collection_id)
                        .await?;
                }
            }
            ScriptAction::Run | ScriptAction::Test => {
                // Workflow steps may execute without ever being installed;
                // only known rows get a launch timestamp.
                let known = self
                    .collection
                    .get_solution_by_catalog_grp_name_version(entry.catalog_id, &entry.coordinates)?
                    .is_some();
                if known {
                    self.collection
                        .update_solution_launched(entry.catalog_id, &entry.coordinates)
                        .await?;
                }
            }
            ScriptAction::Uninstall => {
                self.collection
                    .set_uninstalled(entry.catalog_id, &entry.coordinates)
                    .await?;
                if self.config.remove_installation_on_uninstall && entry.installation_path.exists()
                {
                    fs::remove_dir_all(&entry.installation_path)
                        .map_err(|e| AlmanacError::io("remove installation directory", e))?;
                }
            }
        }
        Ok(())
    }

    /// Installs resolved from a path or URL belong to the cache catalog,
    /// with their package still in scratch space. The package moves into
    /// the catalog's cache and its index before the install is recorded.
    async fn deposit_cached_document(&self, entry: &QueueEntry) -> Result<()> {
        let catalog = match self.resolver.catalog_by_id(entry.catalog_id).await {
            Some(catalog) => catalog,
            None => {
                return Err(AlmanacError::configuration(format!(
                    "queue entry references unregistered catalog id {}",
                    entry.catalog_id
                )))
            }
        };
        if catalog.kind() != CatalogKind::Cache {
            return Ok(());
        }
        let cached = catalog.solution_dir(&entry.coordinates);
        if cached != entry.package_path {
            copy_dir_all(&entry.package_path, &cached)?;
        }
        catalog.add(entry.setup.clone(), true).await
    }

    fn env_vars(&self, entry: &QueueEntry) -> HashMap<String, String> {
        HashMap::from([
            (ENV_ACTION.to_string(), entry.action.to_string()),
            (
                ENV_INSTALLATION_PATH.to_string(),
                entry.installation_path.display().to_string(),
            ),
            (
                ENV_PACKAGE_PATH.to_string(),
                entry.package_path.display().to_string(),
            ),
            (
                ENV_ENVIRONMENT_PATH.to_string(),
                entry.environment.path.display().to_string(),
            ),
        ])
    }
}
