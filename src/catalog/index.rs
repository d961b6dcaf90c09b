//! Per-catalog solution index.
//!
//! One `CatalogIndex` maps coordinate strings to solution metadata for a
//! single catalog. The backing map is a `BTreeMap` so that exports are
//! byte-stable: serializing unchanged state twice produces identical output,
//! which keeps git-deployed catalogs diff-clean.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::core::errors::{AlmanacError, Result};
use crate::solution::{Coordinates, SolutionSetup};

/// File name of the index inside a catalog cache.
pub const INDEX_FILE_NAME: &str = "index.json";

const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogIndex {
    name: String,
    format_version: u32,
    solutions: BTreeMap<String, SolutionSetup>,
}

impl CatalogIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format_version: INDEX_FORMAT_VERSION,
            solutions: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adopt a fetched index under the locally configured catalog name.
    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn len(&self) -> usize {
        self.solutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty()
    }

    pub fn solutions(&self) -> impl Iterator<Item = &SolutionSetup> {
        self.solutions.values()
    }

    pub fn get_by_coordinates(&self, coordinates: &Coordinates) -> Option<&SolutionSetup> {
        self.solutions.get(&coordinates.to_string())
    }

    /// All entries for a (group, name), across versions, in key order.
    pub fn get_all_versions(&self, group: &str, name: &str) -> Vec<&SolutionSetup> {
        self.solutions
            .values()
            .filter(|setup| setup.group == group && setup.name == name)
            .collect()
    }

    /// Look up an entry by DOI. More than one match means the index is
    /// corrupted (`update` enforces uniqueness); a match whose record is
    /// structurally incomplete points at a hand-edited file.
    pub fn get_by_doi(&self, doi: &str) -> Result<Option<&SolutionSetup>> {
        let matches: Vec<(&String, &SolutionSetup)> = self
            .solutions
            .iter()
            .filter(|(_, setup)| setup.doi.as_deref() == Some(doi))
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => {
                let (key, setup) = matches[0];
                let coordinates = setup.coordinates();
                if !coordinates.is_complete() {
                    return Err(AlmanacError::not_a_leaf(
                        doi,
                        format!("entry '{}' has an empty coordinate segment", key),
                    ));
                }
                if key != &coordinates.to_string() {
                    return Err(AlmanacError::not_a_leaf(
                        doi,
                        format!("entry key '{}' does not match its record '{}'", key, coordinates),
                    ));
                }
                Ok(Some(setup))
            }
            _ => Err(AlmanacError::ambiguous(
                format!("doi '{}' in catalog '{}'", doi, self.name),
                matches.iter().map(|(key, _)| (*key).clone()).collect(),
            )),
        }
    }

    /// Insert or fully replace the entry for the setup's coordinates. No
    /// field-level merge happens: a replace drops every attribute of the
    /// previous record. DOI uniqueness within the catalog is enforced here.
    pub fn update(&mut self, setup: SolutionSetup) -> Result<()> {
        let key = setup.coordinates().to_string();
        if let Some(doi) = setup.doi.as_deref() {
            if let Some(holder) = self
                .solutions
                .iter()
                .find(|(other, s)| other.as_str() != key && s.doi.as_deref() == Some(doi))
            {
                return Err(AlmanacError::duplicate(
                    &self.name,
                    format!("{} (doi '{}' already used by {})", key, doi, holder.0),
                ));
            }
        }
        debug!(catalog = %self.name, coordinates = %key, "index update");
        self.solutions.insert(key, setup);
        Ok(())
    }

    pub fn remove(&mut self, coordinates: &Coordinates) -> Option<SolutionSetup> {
        let removed = self.solutions.remove(&coordinates.to_string());
        if removed.is_some() {
            debug!(catalog = %self.name, coordinates = %coordinates, "index remove");
        }
        removed
    }

    /// Read an index file written by `export`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AlmanacError::io(format!("reading index {}", path.display()), e))?;
        let index: CatalogIndex = serde_json::from_str(&contents)?;
        if index.format_version != INDEX_FORMAT_VERSION {
            return Err(AlmanacError::configuration(format!(
                "index {} has unsupported format version {}",
                path.display(),
                index.format_version
            )));
        }
        Ok(index)
    }

    /// Serialize the full index to `path`. Output is canonical: sorted
    /// keys, fixed field order, UTF-8, trailing newline.
    pub fn export(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AlmanacError::io(format!("creating {}", parent.display()), e))?;
        }
        let bytes = self.export_bytes()?;
        std::fs::write(path, bytes)
            .map_err(|e| AlmanacError::io(format!("writing index {}", path.display()), e))?;
        debug!(catalog = %self.name, path = %path.display(), entries = self.len(), "index exported");
        Ok(())
    }

    fn export_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup(group: &str, name: &str, version: &str, doi: Option<&str>) -> SolutionSetup {
        SolutionSetup {
            group: group.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            title: Some(format!("{} title", name)),
            description: None,
            license: None,
            doi: doi.map(str::to_string),
            changelog: None,
            solution_creators: vec![],
            tags: vec![],
            documentation: vec![],
            cite: vec![],
            args: vec![],
            dependencies: None,
        }
    }

    #[test]
    fn test_update_then_get_round_trips() {
        let mut index = CatalogIndex::new("main");
        let entry = setup("grp", "sol", "1.0.0", None);
        index.update(entry.clone()).unwrap();
        let coords: Coordinates = "grp:sol:1.0.0".parse().unwrap();
        assert_eq!(index.get_by_coordinates(&coords), Some(&entry));
    }

    #[test]
    fn test_second_update_fully_replaces() {
        let mut index = CatalogIndex::new("main");
        index.update(setup("grp", "sol", "1.0.0", None)).unwrap();
        let mut second = setup("grp", "sol", "1.0.0", None);
        second.title = None;
        second.tags = vec!["replaced".to_string()];
        index.update(second.clone()).unwrap();
        let coords: Coordinates = "grp:sol:1.0.0".parse().unwrap();
        let got = index.get_by_coordinates(&coords).unwrap();
        assert_eq!(got, &second);
        assert!(got.title.is_none(), "old title must not bleed through");
    }

    #[test]
    fn test_get_all_versions() {
        let mut index = CatalogIndex::new("main");
        index.update(setup("grp", "sol", "1.0.0", None)).unwrap();
        index.update(setup("grp", "sol", "2.0.0", None)).unwrap();
        index.update(setup("grp", "other", "1.0.0", None)).unwrap();
        let versions = index.get_all_versions("grp", "sol");
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().all(|s| s.name == "sol"));
    }

    #[test]
    fn test_doi_uniqueness_enforced_on_update() {
        let mut index = CatalogIndex::new("main");
        index
            .update(setup("grp", "sol", "1.0.0", Some("10.5072/zenodo.1")))
            .unwrap();
        let err = index
            .update(setup("grp", "other", "1.0.0", Some("10.5072/zenodo.1")))
            .unwrap_err();
        assert!(matches!(err, AlmanacError::DuplicateSolution { .. }));
        // replacing the holder itself with the same doi stays legal
        index
            .update(setup("grp", "sol", "1.0.0", Some("10.5072/zenodo.1")))
            .unwrap();
    }

    #[test]
    fn test_get_by_doi_flags_corrupted_index() {
        // two entries sharing a doi can only exist in a hand-edited file,
        // so build the index through `load`
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE_NAME);
        let mut index = CatalogIndex::new("main");
        index
            .update(setup("grp", "a", "1.0.0", Some("10.5072/zenodo.9")))
            .unwrap();
        index.update(setup("grp", "b", "1.0.0", None)).unwrap();
        index.export(&path).unwrap();
        let edited = std::fs::read_to_string(&path)
            .unwrap()
            .replace("\"doi\": null", "\"doi\": \"10.5072/zenodo.9\"");
        std::fs::write(&path, edited).unwrap();

        let corrupted = CatalogIndex::load(&path).unwrap();
        let err = corrupted.get_by_doi("10.5072/zenodo.9").unwrap_err();
        assert!(matches!(err, AlmanacError::AmbiguousResult { .. }));
    }

    #[test]
    fn test_export_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CatalogIndex::new("main");
        index.update(setup("grp", "b", "1.0.0", None)).unwrap();
        index.update(setup("grp", "a", "1.0.0", None)).unwrap();

        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        index.export(&first).unwrap();
        index.export(&second).unwrap();
        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&second).unwrap()
        );

        let reloaded = CatalogIndex::load(&first).unwrap();
        let third = dir.path().join("third.json");
        reloaded.export(&third).unwrap();
        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&third).unwrap(),
            "load + export of unchanged state must not produce a diff"
        );
    }

    #[test]
    fn test_remove_deletes_entry() {
        let mut index = CatalogIndex::new("main");
        index.update(setup("grp", "sol", "1.0.0", None)).unwrap();
        let coords: Coordinates = "grp:sol:1.0.0".parse().unwrap();
        assert!(index.remove(&coords).is_some());
        assert!(index.get_by_coordinates(&coords).is_none());
        assert!(index.remove(&coords).is_none());
    }
}
