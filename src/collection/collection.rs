//! The collection database: the single local source of truth for which
//! catalogs are configured and what is installed, independent of any one
//! catalog's availability.
//!
//! Backing store is a sled keyspace with three trees: `catalogs` (keyed by
//! big-endian catalog id, so iteration order is priority order), `solutions`
//! (keyed by zero-padded catalog id + coordinate string), and `meta` (id
//! counters). Rows are bincode-encoded and only ever replaced whole; every
//! mutating method holds the single writer lock and flushes before
//! returning, so readers never observe a partial row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalog::CatalogKind;
use crate::core::errors::{AlmanacError, Result};
use crate::solution::{Coordinates, SolutionSetup};

const CATALOGS_TREE: &str = "catalogs";
const SOLUTIONS_TREE: &str = "solutions";
const META_TREE: &str = "meta";

const NEXT_CATALOG_ID: &[u8] = b"next_catalog_id";
const NEXT_COLLECTION_ID: &[u8] = b"next_collection_id";

/// Setup fields a catalog refresh may overwrite on a collection row.
/// Everything else, in particular the `internal` bookkeeping, belongs to
/// this collection and survives any upstream change.
pub const CATALOG_SYNC_ATTRS: &[&str] = &[
    "title",
    "description",
    "license",
    "doi",
    "changelog",
    "solution_creators",
    "tags",
    "documentation",
    "cite",
    "args",
    "dependencies",
];

/// One configured catalog, as recorded in the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub catalog_id: u64,
    pub name: String,
    pub src: String,
    pub path: PathBuf,
    pub kind: CatalogKind,
    pub deletable: bool,
}

/// Local-only bookkeeping of one collection row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalState {
    pub installed: bool,
    pub install_unfinished: bool,
    pub installed_on: Option<DateTime<Utc>>,
    pub launched_on: Option<DateTime<Utc>>,
    /// Weak back-reference: the collection id of the solution this one was
    /// installed as a dependency of. Never an ownership edge.
    pub parent: Option<u64>,
}

/// One solution instance known to the collection. `(catalog_id,
/// coordinates)` is unique by key construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub collection_id: u64,
    pub catalog_id: u64,
    pub setup: SolutionSetup,
    pub internal: InternalState,
}

impl SolutionRecord {
    pub fn coordinates(&self) -> Coordinates {
        self.setup.coordinates()
    }
}

pub struct CollectionIndex {
    db: sled::Db,
    catalogs: sled::Tree,
    solutions: sled::Tree,
    meta: sled::Tree,
    write_lock: Mutex<()>,
}

impl CollectionIndex {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        let catalogs = db.open_tree(CATALOGS_TREE)?;
        let solutions = db.open_tree(SOLUTIONS_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        debug!(path = %path.display(), "collection database opened");
        Ok(Self {
            db,
            catalogs,
            solutions,
            meta,
            write_lock: Mutex::new(()),
        })
    }

    // ---------------- catalogs ----------------

    /// Register a catalog and return its record. Names are unique within a
    /// collection.
    pub async fn insert_catalog(
        &self,
        name: &str,
        src: &str,
        path: &Path,
        kind: CatalogKind,
        deletable: bool,
    ) -> Result<CatalogRecord> {
        let _guard = self.write_lock.lock().await;
        if self.get_catalog_by_name(name)?.is_some() {
            return Err(AlmanacError::configuration(format!(
                "catalog '{}' is already configured",
                name
            )));
        }
        let catalog_id = self.allocate_id(NEXT_CATALOG_ID)?;
        let record = CatalogRecord {
            catalog_id,
            name: name.to_string(),
            src: src.to_string(),
            path: path.to_path_buf(),
            kind,
            deletable,
        };
        self.catalogs
            .insert(catalog_id.to_be_bytes(), bincode::serialize(&record)?)?;
        self.db.flush()?;
        info!(catalog = name, catalog_id, kind = %kind, "catalog registered");
        Ok(record)
    }

    /// Remove a catalog and every solution row belonging to it. The cache
    /// catalog is protected; attempting to remove it changes nothing.
    pub async fn remove_catalog(&self, catalog_id: u64) -> Result<CatalogRecord> {
        let _guard = self.write_lock.lock().await;
        let record = self.get_catalog(catalog_id)?.ok_or_else(|| {
            AlmanacError::configuration(format!("no catalog with id {}", catalog_id))
        })?;
        if !record.deletable {
            return Err(AlmanacError::protected_catalog(&record.name));
        }
        let keys: Vec<sled::IVec> = self
            .solutions
            .scan_prefix(catalog_prefix(catalog_id))
            .keys()
            .collect::<std::result::Result<_, _>>()?;
        for key in &keys {
            self.solutions.remove(key)?;
        }
        self.catalogs.remove(catalog_id.to_be_bytes())?;
        self.db.flush()?;
        info!(catalog = %record.name, catalog_id, rows = keys.len(), "catalog removed");
        Ok(record)
    }

    pub fn get_catalog(&self, catalog_id: u64) -> Result<Option<CatalogRecord>> {
        match self.catalogs.get(catalog_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_catalog_by_name(&self, name: &str) -> Result<Option<CatalogRecord>> {
        for record in self.get_all_catalogs()? {
            if record.name == name {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// All catalogs in priority order (ascending id, which is insertion
    /// order).
    pub fn get_all_catalogs(&self) -> Result<Vec<CatalogRecord>> {
        let mut records = Vec::new();
        for item in self.catalogs.iter() {
            let (_, bytes) = item?;
            records.push(bincode::deserialize(&bytes)?);
        }
        Ok(records)
    }

    // ---------------- solutions ----------------

    /// Create a row for a catalog entry. The row starts with clean
    /// bookkeeping; install flows flip it later.
    pub async fn insert_solution(
        &self,
        catalog_id: u64,
        setup: SolutionSetup,
    ) -> Result<SolutionRecord> {
        let _guard = self.write_lock.lock().await;
        let coordinates = setup.coordinates();
        let key = solution_key(catalog_id, &coordinates);
        if self.solutions.get(&key)?.is_some() {
            let catalog = self
                .get_catalog(catalog_id)?
                .map(|c| c.name)
                .unwrap_or_else(|| catalog_id.to_string());
            return Err(AlmanacError::duplicate(catalog, coordinates.to_string()));
        }
        let record = SolutionRecord {
            collection_id: self.allocate_id(NEXT_COLLECTION_ID)?,
            catalog_id,
            setup,
            internal: InternalState::default(),
        };
        self.solutions.insert(&key, bincode::serialize(&record)?)?;
        self.db.flush()?;
        debug!(catalog_id, coordinates = %coordinates, collection_id = record.collection_id, "solution row inserted");
        Ok(record)
    }

    /// Overwrite the setup fields named in `supported_attrs` from
    /// `incoming`. Coordinates and `internal` are never touched here, which
    /// keeps an untrusted catalog refresh from altering local bookkeeping.
    pub async fn update_solution(
        &self,
        catalog_id: u64,
        coordinates: &Coordinates,
        incoming: &SolutionSetup,
        supported_attrs: &[&str],
    ) -> Result<SolutionRecord> {
        let _guard = self.write_lock.lock().await;
        let key = solution_key(catalog_id, coordinates);
        let mut record = self.require_row(&key, catalog_id, coordinates)?;
        for attr in supported_attrs {
            if !apply_setup_attr(&mut record.setup, incoming, attr) {
                warn!(attr, "unsupported setup attribute skipped during update");
            }
        }
        self.solutions.insert(&key, bincode::serialize(&record)?)?;
        self.db.flush()?;
        Ok(record)
    }

    pub async fn remove_solution(
        &self,
        catalog_id: u64,
        coordinates: &Coordinates,
    ) -> Result<Option<SolutionRecord>> {
        let _guard = self.write_lock.lock().await;
        let key = solution_key(catalog_id, coordinates);
        let removed = match self.solutions.remove(&key)? {
            Some(bytes) => Some(bincode::deserialize(&bytes)?),
            None => None,
        };
        self.db.flush()?;
        Ok(removed)
    }

    pub fn get_solution_by_catalog_grp_name_version(
        &self,
        catalog_id: u64,
        coordinates: &Coordinates,
    ) -> Result<Option<SolutionRecord>> {
        match self.solutions.get(solution_key(catalog_id, coordinates))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All rows matching the coordinates across catalogs, in catalog
    /// priority order.
    pub fn get_solutions_by_grp_name_version(
        &self,
        coordinates: &Coordinates,
    ) -> Result<Vec<SolutionRecord>> {
        let mut matches = Vec::new();
        for record in self.iter_solutions()? {
            if record.coordinates() == *coordinates {
                matches.push(record);
            }
        }
        Ok(matches)
    }

    /// First row carrying the DOI, in catalog priority order.
    pub fn get_solution_by_doi(&self, doi: &str) -> Result<Option<SolutionRecord>> {
        for record in self.iter_solutions()? {
            if record.setup.doi.as_deref() == Some(doi) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub fn get_solutions_by_catalog(&self, catalog_id: u64) -> Result<Vec<SolutionRecord>> {
        let mut records = Vec::new();
        for item in self.solutions.scan_prefix(catalog_prefix(catalog_id)) {
            let (_, bytes) = item?;
            records.push(bincode::deserialize(&bytes)?);
        }
        Ok(records)
    }

    pub fn get_solution_by_collection_id(
        &self,
        collection_id: u64,
    ) -> Result<Option<SolutionRecord>> {
        for record in self.iter_solutions()? {
            if record.collection_id == collection_id {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub fn is_installed(&self, catalog_id: u64, coordinates: &Coordinates) -> Result<bool> {
        Ok(self
            .get_solution_by_catalog_grp_name_version(catalog_id, coordinates)?
            .map(|record| record.internal.installed)
            .unwrap_or(false))
    }

    // ---------------- install-state transitions ----------------

    /// Flag an installation as started. Creates the row from `setup` when
    /// the solution was not known to the collection yet. Until
    /// [`CollectionIndex::set_installed`] runs, the row counts as an
    /// unfinished installation.
    pub async fn mark_install_started(
        &self,
        catalog_id: u64,
        setup: &SolutionSetup,
    ) -> Result<SolutionRecord> {
        let _guard = self.write_lock.lock().await;
        let coordinates = setup.coordinates();
        let key = solution_key(catalog_id, &coordinates);
        let mut record = match self.solutions.get(&key)? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => SolutionRecord {
                collection_id: self.allocate_id(NEXT_COLLECTION_ID)?,
                catalog_id,
                setup: setup.clone(),
                internal: InternalState::default(),
            },
        };
        record.internal.install_unfinished = true;
        record.internal.installed = false;
        self.solutions.insert(&key, bincode::serialize(&record)?)?;
        self.db.flush()?;
        debug!(catalog_id, coordinates = %coordinates, "installation started");
        Ok(record)
    }

    pub async fn set_installed(
        &self,
        catalog_id: u64,
        coordinates: &Coordinates,
    ) -> Result<SolutionRecord> {
        let _guard = self.write_lock.lock().await;
        let key = solution_key(catalog_id, coordinates);
        let mut record = self.require_row(&key, catalog_id, coordinates)?;
        record.internal.installed = true;
        record.internal.install_unfinished = false;
        record.internal.installed_on = Some(Utc::now());
        self.solutions.insert(&key, bincode::serialize(&record)?)?;
        self.db.flush()?;
        info!(catalog_id, coordinates = %coordinates, "solution installed");
        Ok(record)
    }

    /// Clear the install state but keep the row: the solution is still
    /// known from its catalog, it is just no longer installed.
    pub async fn set_uninstalled(
        &self,
        catalog_id: u64,
        coordinates: &Coordinates,
    ) -> Result<SolutionRecord> {
        let _guard = self.write_lock.lock().await;
        let key = solution_key(catalog_id, coordinates);
        let mut record = self.require_row(&key, catalog_id, coordinates)?;
        record.internal.installed = false;
        record.internal.install_unfinished = false;
        record.internal.installed_on = None;
        record.internal.parent = None;
        self.solutions.insert(&key, bincode::serialize(&record)?)?;
        self.db.flush()?;
        info!(catalog_id, coordinates = %coordinates, "solution uninstalled");
        Ok(record)
    }

    pub async fn update_solution_launched(
        &self,
        catalog_id: u64,
        coordinates: &Coordinates,
    ) -> Result<SolutionRecord> {
        let _guard = self.write_lock.lock().await;
        let key = solution_key(catalog_id, coordinates);
        let mut record = self.require_row(&key, catalog_id, coordinates)?;
        record.internal.launched_on = Some(Utc::now());
        self.solutions.insert(&key, bincode::serialize(&record)?)?;
        self.db.flush()?;
        Ok(record)
    }

    // ---------------- parent links ----------------

    /// Record that `child` was installed as a dependency of `parent`. Pure
    /// metadata; neither row's lifecycle changes.
    pub async fn insert_collection_collection(
        &self,
        parent_collection_id: u64,
        child_collection_id: u64,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let child = self
            .get_solution_by_collection_id(child_collection_id)?
            .ok_or_else(|| {
                AlmanacError::configuration(format!(
                    "no collection row with id {}",
                    child_collection_id
                ))
            })?;
        let key = solution_key(child.catalog_id, &child.coordinates());
        let mut record = child;
        record.internal.parent = Some(parent_collection_id);
        self.solutions.insert(&key, bincode::serialize(&record)?)?;
        self.db.flush()?;
        Ok(())
    }

    pub async fn remove_parent(&self, collection_id: u64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(child) = self.get_solution_by_collection_id(collection_id)? else {
            return Ok(());
        };
        let key = solution_key(child.catalog_id, &child.coordinates());
        let mut record = child;
        record.internal.parent = None;
        self.solutions.insert(&key, bincode::serialize(&record)?)?;
        self.db.flush()?;
        Ok(())
    }

    /// Follow parent back-references upward until a row without a parent.
    /// Tolerates cycles and dangling ids by stopping at the last sound row.
    pub fn walk_to_root_parent(&self, collection_id: u64) -> Result<Option<SolutionRecord>> {
        let Some(mut current) = self.get_solution_by_collection_id(collection_id)? else {
            return Ok(None);
        };
        let mut visited = HashSet::from([current.collection_id]);
        while let Some(parent_id) = current.internal.parent {
            if !visited.insert(parent_id) {
                warn!(collection_id = parent_id, "parent chain contains a cycle");
                break;
            }
            match self.get_solution_by_collection_id(parent_id)? {
                Some(parent) => current = parent,
                None => {
                    warn!(collection_id = parent_id, "parent chain points at a missing row");
                    break;
                }
            }
        }
        Ok(Some(current))
    }

    // ---------------- recency surfaces ----------------

    /// Installed rows, most recent first.
    pub fn get_recently_installed_solutions(&self) -> Result<Vec<SolutionRecord>> {
        let mut records: Vec<SolutionRecord> = self
            .iter_solutions()?
            .into_iter()
            .filter(|r| r.internal.installed && r.internal.installed_on.is_some())
            .collect();
        records.sort_by(|a, b| b.internal.installed_on.cmp(&a.internal.installed_on));
        Ok(records)
    }

    /// Launched rows, most recent first.
    pub fn get_recently_launched_solutions(&self) -> Result<Vec<SolutionRecord>> {
        let mut records: Vec<SolutionRecord> = self
            .iter_solutions()?
            .into_iter()
            .filter(|r| r.internal.launched_on.is_some())
            .collect();
        records.sort_by(|a, b| b.internal.launched_on.cmp(&a.internal.launched_on));
        Ok(records)
    }

    /// Rows whose installation started but never finished. Candidates for
    /// cleanup or retry; never silently treated as installed.
    pub fn get_unfinished_installation_solutions(&self) -> Result<Vec<SolutionRecord>> {
        Ok(self
            .iter_solutions()?
            .into_iter()
            .filter(|r| r.internal.install_unfinished)
            .collect())
    }

    pub fn solution_count(&self) -> usize {
        self.solutions.len()
    }

    pub fn catalog_count(&self) -> usize {
        self.catalogs.len()
    }

    // ---------------- internals ----------------

    fn iter_solutions(&self) -> Result<Vec<SolutionRecord>> {
        let mut records = Vec::new();
        for item in self.solutions.iter() {
            let (_, bytes) = item?;
            records.push(bincode::deserialize(&bytes)?);
        }
        Ok(records)
    }

    fn require_row(
        &self,
        key: &[u8],
        catalog_id: u64,
        coordinates: &Coordinates,
    ) -> Result<SolutionRecord> {
        match self.solutions.get(key)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Err(AlmanacError::database(
                format!("row {}:{} expected but missing", catalog_id, coordinates),
                std::io::Error::new(ErrorKind::NotFound, "no such collection row"),
            )),
        }
    }

    /// Hand out the next id for `key`, starting at 1. Only called while
    /// holding the writer lock.
    fn allocate_id(&self, key: &[u8]) -> Result<u64> {
        let current = match self.meta.get(key)? {
            Some(bytes) => decode_u64(&bytes)?,
            None => 1,
        };
        self.meta.insert(key, (current + 1).to_be_bytes().to_vec())?;
        Ok(current)
    }
}

fn catalog_prefix(catalog_id: u64) -> Vec<u8> {
    format!("{:020}:", catalog_id).into_bytes()
}

fn solution_key(catalog_id: u64, coordinates: &Coordinates) -> Vec<u8> {
    format!("{:020}:{}", catalog_id, coordinates).into_bytes()
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let array: [u8; 8] = bytes.try_into().map_err(|_| {
        AlmanacError::database(
            "decoding id counter",
            std::io::Error::new(ErrorKind::InvalidData, "counter is not 8 bytes"),
        )
    })?;
    Ok(u64::from_be_bytes(array))
}

fn apply_setup_attr(target: &mut SolutionSetup, source: &SolutionSetup, attr: &str) -> bool {
    match attr {
        "title" => target.title = source.title.clone(),
        "description" => target.description = source.description.clone(),
        "license" => target.license = source.license.clone(),
        "doi" => target.doi = source.doi.clone(),
        "changelog" => target.changelog = source.changelog.clone(),
        "solution_creators" => target.solution_creators = source.solution_creators.clone(),
        "tags" => target.tags = source.tags.clone(),
        "documentation" => target.documentation = source.documentation.clone(),
        "cite" => target.cite = source.cite.clone(),
        "args" => target.args = source.args.clone(),
        "dependencies" => target.dependencies = source.dependencies.clone(),
        _ => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup(group: &str, name: &str, version: &str) -> SolutionSetup {
        SolutionSetup {
            group: group.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            title: Some("original".to_string()),
            description: None,
            license: None,
            doi: None,
            changelog: None,
            solution_creators: vec![],
            tags: vec![],
            documentation: vec![],
            cite: vec![],
            args: vec![],
            dependencies: None,
        }
    }

    fn open_collection(dir: &tempfile::TempDir) -> CollectionIndex {
        CollectionIndex::open(&dir.path().join("collection.db")).unwrap()
    }

    async fn cache_and_remote(collection: &CollectionIndex) -> (CatalogRecord, CatalogRecord) {
        let cache = collection
            .insert_catalog("cache", "", Path::new("/tmp/cache"), CatalogKind::Cache, false)
            .await
            .unwrap();
        let remote = collection
            .insert_catalog(
                "default",
                "https://example.org/catalog.git",
                Path::new("/tmp/default"),
                CatalogKind::Remote,
                true,
            )
            .await
            .unwrap();
        (cache, remote)
    }

    #[tokio::test]
    async fn test_catalog_ids_follow_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let collection = open_collection(&dir);
        let (cache, remote) = cache_and_remote(&collection).await;
        assert_eq!(cache.catalog_id, 1);
        assert_eq!(remote.catalog_id, 2);
        let all = collection.get_all_catalogs().unwrap();
        assert_eq!(all, vec![cache, remote]);
    }

    #[tokio::test]
    async fn test_protected_catalog_cannot_be_removed() {
        let dir = tempfile::tempdir().unwrap();
        let collection = open_collection(&dir);
        let (cache, _) = cache_and_remote(&collection).await;
        let before = collection.get_all_catalogs().unwrap();
        let err = collection.remove_catalog(cache.catalog_id).await.unwrap_err();
        assert!(matches!(err, AlmanacError::ProtectedCatalog { .. }));
        assert_eq!(collection.get_all_catalogs().unwrap(), before);
    }

    #[tokio::test]
    async fn test_remove_catalog_drops_its_rows() {
        let dir = tempfile::tempdir().unwrap();
        let collection = open_collection(&dir);
        let (cache, remote) = cache_and_remote(&collection).await;
        collection
            .insert_solution(cache.catalog_id, setup("grp", "keep", "1.0.0"))
            .await
            .unwrap();
        collection
            .insert_solution(remote.catalog_id, setup("grp", "gone", "1.0.0"))
            .await
            .unwrap();
        collection.remove_catalog(remote.catalog_id).await.unwrap();
        assert_eq!(collection.solution_count(), 1);
        assert!(collection.get_catalog(remote.catalog_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_install_lifecycle_flags() {
        let dir = tempfile::tempdir().unwrap();
        let collection = open_collection(&dir);
        let (cache, _) = cache_and_remote(&collection).await;
        let coords: Coordinates = "grp:sol:1.0.0".parse().unwrap();
        let entry = setup("grp", "sol", "1.0.0");

        collection
            .mark_install_started(cache.catalog_id, &entry)
            .await
            .unwrap();
        assert!(!collection.is_installed(cache.catalog_id, &coords).unwrap());
        let unfinished = collection.get_unfinished_installation_solutions().unwrap();
        assert_eq!(unfinished.len(), 1);

        collection
            .set_installed(cache.catalog_id, &coords)
            .await
            .unwrap();
        assert!(collection.is_installed(cache.catalog_id, &coords).unwrap());
        assert!(collection
            .get_unfinished_installation_solutions()
            .unwrap()
            .is_empty());

        let row = collection
            .set_uninstalled(cache.catalog_id, &coords)
            .await
            .unwrap();
        assert!(!row.internal.installed);
        assert!(row.internal.installed_on.is_none());
        // the row stays known to the collection
        assert!(collection
            .get_solution_by_catalog_grp_name_version(cache.catalog_id, &coords)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_update_solution_respects_supported_attrs() {
        let dir = tempfile::tempdir().unwrap();
        let collection = open_collection(&dir);
        let (cache, _) = cache_and_remote(&collection).await;
        let coords: Coordinates = "grp:sol:1.0.0".parse().unwrap();
        collection
            .insert_solution(cache.catalog_id, setup("grp", "sol", "1.0.0"))
            .await
            .unwrap();
        collection
            .set_installed(cache.catalog_id, &coords)
            .await
            .unwrap();

        let mut incoming = setup("grp", "sol", "1.0.0");
        incoming.title = Some("refreshed".to_string());
        incoming.tags = vec!["new".to_string()];
        let row = collection
            .update_solution(cache.catalog_id, &coords, &incoming, &["title"])
            .await
            .unwrap();

        assert_eq!(row.setup.title.as_deref(), Some("refreshed"));
        assert!(row.setup.tags.is_empty(), "tags were not in supported attrs");
        assert!(row.internal.installed, "internal state must survive updates");
    }

    #[tokio::test]
    async fn test_lookup_across_catalogs_follows_priority() {
        let dir = tempfile::tempdir().unwrap();
        let collection = open_collection(&dir);
        let (cache, remote) = cache_and_remote(&collection).await;
        let coords: Coordinates = "grp:sol:1.0.0".parse().unwrap();
        collection
            .insert_solution(remote.catalog_id, setup("grp", "sol", "1.0.0"))
            .await
            .unwrap();
        collection
            .insert_solution(cache.catalog_id, setup("grp", "sol", "1.0.0"))
            .await
            .unwrap();
        let rows = collection.get_solutions_by_grp_name_version(&coords).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].catalog_id, cache.catalog_id, "priority order");
        assert_eq!(rows[1].catalog_id, remote.catalog_id);
    }

    #[tokio::test]
    async fn test_doi_lookup_follows_priority_and_sees_install_state() {
        let dir = tempfile::tempdir().unwrap();
        let collection = open_collection(&dir);
        let (cache, remote) = cache_and_remote(&collection).await;
        let doi = "10.5281/zenodo.1234";

        let mut published = setup("grp", "sol", "1.0.0");
        published.doi = Some(doi.to_string());
        collection
            .insert_solution(cache.catalog_id, published.clone())
            .await
            .unwrap();
        let mut mirrored = setup("grp", "sol", "2.0.0");
        mirrored.doi = Some(doi.to_string());
        collection
            .insert_solution(remote.catalog_id, mirrored)
            .await
            .unwrap();

        assert!(collection
            .get_solution_by_doi("10.5281/zenodo.9999")
            .unwrap()
            .is_none());

        let hit = collection.get_solution_by_doi(doi).unwrap().unwrap();
        assert_eq!(hit.catalog_id, cache.catalog_id, "priority order");
        assert_eq!(hit.setup.version, "1.0.0");
        assert!(!hit.internal.installed);

        collection
            .set_installed(cache.catalog_id, &published.coordinates())
            .await
            .unwrap();
        let hit = collection.get_solution_by_doi(doi).unwrap().unwrap();
        assert!(hit.internal.installed);
    }

    #[tokio::test]
    async fn test_parent_walk_tolerates_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let collection = open_collection(&dir);
        let (cache, _) = cache_and_remote(&collection).await;
        let a = collection
            .insert_solution(cache.catalog_id, setup("grp", "a", "1.0.0"))
            .await
            .unwrap();
        let b = collection
            .insert_solution(cache.catalog_id, setup("grp", "b", "1.0.0"))
            .await
            .unwrap();
        collection
            .insert_collection_collection(a.collection_id, b.collection_id)
            .await
            .unwrap();

        let root = collection
            .walk_to_root_parent(b.collection_id)
            .unwrap()
            .unwrap();
        assert_eq!(root.collection_id, a.collection_id);

        // close the loop: a's parent is b
        collection
            .insert_collection_collection(b.collection_id, a.collection_id)
            .await
            .unwrap();
        let walked = collection.walk_to_root_parent(b.collection_id).unwrap();
        assert!(walked.is_some(), "cyclic chain must still terminate");

        collection.remove_parent(b.collection_id).await.unwrap();
        let root = collection
            .walk_to_root_parent(b.collection_id)
            .unwrap()
            .unwrap();
        assert_eq!(root.collection_id, b.collection_id);
    }

    #[tokio::test]
    async fn test_recency_surfaces_order_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let collection = open_collection(&dir);
        let (cache, _) = cache_and_remote(&collection).await;
        let first: Coordinates = "grp:first:1.0.0".parse().unwrap();
        let second: Coordinates = "grp:second:1.0.0".parse().unwrap();
        for name in ["first", "second"] {
            collection
                .insert_solution(cache.catalog_id, setup("grp", name, "1.0.0"))
                .await
                .unwrap();
        }
        collection.set_installed(cache.catalog_id, &first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        collection.set_installed(cache.catalog_id, &second).await.unwrap();

        let recent = collection.get_recently_installed_solutions().unwrap();
        assert_eq!(recent[0].coordinates(), second);
        assert_eq!(recent[1].coordinates(), first);

        collection
            .update_solution_launched(cache.catalog_id, &first)
            .await
            .unwrap();
        let launched = collection.get_recently_launched_solutions().unwrap();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].coordinates(), first);
    }

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let coords: Coordinates = "grp:sol:1.0.0".parse().unwrap();
        {
            let collection = open_collection(&dir);
            let (cache, _) = cache_and_remote(&collection).await;
            collection
                .insert_solution(cache.catalog_id, setup("grp", "sol", "1.0.0"))
                .await
                .unwrap();
            collection.set_installed(cache.catalog_id, &coords).await.unwrap();
        }
        let reopened = open_collection(&dir);
        assert_eq!(reopened.catalog_count(), 2);
        assert!(reopened.is_installed(1, &coords).unwrap());
    }
}
