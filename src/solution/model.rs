//! Solution data model.
//!
//! Two layers: the `*Doc` types mirror `solution.yaml` as written by authors
//! (including the flat-or-grouped step shorthand), and the core types
//! (`SolutionSetup`, `Scripts`, `Solution`) are the normalized form the rest
//! of the crate works with. Only core types are persisted; the document
//! layer never crosses the parsing edge.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::core::errors::{AlmanacError, Result};
use crate::solution::coordinates::Coordinates;

// ---------------- document layer ----------------

/// A parsed `solution.yaml` before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionDoc {
    pub setup: SetupDoc,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub install: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub uninstall: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupDoc {
    pub group: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub changelog: Option<String>,
    #[serde(default)]
    pub solution_creators: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub documentation: Vec<String>,
    #[serde(default)]
    pub cite: Vec<Citation>,
    #[serde(default)]
    pub args: Vec<ArgumentSpec>,
    #[serde(default)]
    pub dependencies: Option<DependenciesDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependenciesDoc {
    #[serde(default)]
    pub parent: Option<ParentSpec>,
    #[serde(default)]
    pub steps: Option<Vec<StepEntry>>,
}

/// A step as authored: either a single child or a group of children that
/// share one parent environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepEntry {
    Group(Vec<StepRef>),
    Single(StepRef),
}

// ---------------- core layer ----------------

/// The deploy-relevant metadata of a solution. This is what catalog indexes
/// and collection rows carry; everything in here survives a bincode round
/// trip (no untagged shapes, all values string-typed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionSetup {
    pub group: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub changelog: Option<String>,
    #[serde(default)]
    pub solution_creators: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub documentation: Vec<String>,
    #[serde(default)]
    pub cite: Vec<Citation>,
    #[serde(default)]
    pub args: Vec<ArgumentSpec>,
    #[serde(default)]
    pub dependencies: Option<DependencySpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub text: String,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A declared runtime argument of a solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Normalized dependency declaration: a solution has at most one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DependencySpec {
    /// Run inside another solution's environment.
    Parent(ParentSpec),
    /// Ordered sub-workflow; inner vectors are groups sharing this
    /// solution's environment context.
    Steps(Vec<Vec<StepRef>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentSpec {
    pub group: String,
    pub name: String,
    pub version: String,
    /// Fixed argument overrides the parent is always invoked with.
    #[serde(default)]
    pub args: Vec<ArgBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRef {
    pub group: String,
    pub name: String,
    pub version: String,
    /// Argument bindings for the child. Values are literal text that may
    /// embed `${arg}` placeholders expanded against the declaring
    /// solution's parsed arguments.
    #[serde(default)]
    pub args: Vec<ArgBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgBinding {
    pub name: String,
    pub value: String,
}

/// The four script payloads a solution may carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scripts {
    pub run: Option<String>,
    pub install: Option<String>,
    pub test: Option<String>,
    pub uninstall: Option<String>,
}

/// Paths assigned by the cache-path algorithm once a solution is bound to a
/// catalog. Not persisted; recomputed on every resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationPaths {
    /// Directory holding the cached `solution.yaml` and any shipped files.
    pub package_path: PathBuf,
    /// Directory the install script may write into.
    pub installation_path: PathBuf,
    /// Environment name handed to the environment collaborator,
    /// `<catalog>_<group>_<name>_<version>`.
    pub environment_name: String,
}

/// A fully loaded solution: normalized setup, script payloads, and (once
/// bound to a catalog) its installation paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub setup: SolutionSetup,
    pub scripts: Scripts,
    pub paths: Option<InstallationPaths>,
}

impl ParentSpec {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(&self.group, &self.name, &self.version)
    }
}

impl StepRef {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(&self.group, &self.name, &self.version)
    }
}

impl SolutionSetup {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(&self.group, &self.name, &self.version)
    }
}

impl Solution {
    pub fn coordinates(&self) -> Coordinates {
        self.setup.coordinates()
    }

    /// Installation paths, failing when the solution was loaded without
    /// being bound to a catalog.
    pub fn installation(&self) -> Result<&InstallationPaths> {
        self.paths.as_ref().ok_or_else(|| {
            AlmanacError::argument(
                self.coordinates().to_string(),
                "solution is not bound to a catalog cache, no installation paths assigned",
            )
        })
    }
}

impl SolutionDoc {
    /// Normalize the authored document into a `Solution`. `origin` is the
    /// file the document came from and is only used for error context.
    pub fn into_solution(self, origin: &Path) -> Result<Solution> {
        let load_err = |reason: String| AlmanacError::solution_load(origin, reason);

        let doc = self.setup;
        for (field, value) in [
            ("group", &doc.group),
            ("name", &doc.name),
            ("version", &doc.version),
        ] {
            if value.is_empty() {
                return Err(load_err(format!("setup.{} must not be empty", field)));
            }
        }

        let mut seen = HashSet::new();
        for arg in &doc.args {
            if arg.name.is_empty() {
                return Err(load_err("argument with empty name".to_string()));
            }
            if !seen.insert(arg.name.as_str()) {
                return Err(load_err(format!("argument '{}' declared twice", arg.name)));
            }
        }

        let dependencies = match doc.dependencies {
            None => None,
            Some(deps) => normalize_dependencies(deps).map_err(load_err)?,
        };

        Ok(Solution {
            setup: SolutionSetup {
                group: doc.group,
                name: doc.name,
                version: doc.version,
                title: doc.title,
                description: doc.description,
                license: doc.license,
                doi: doc.doi,
                changelog: doc.changelog,
                solution_creators: doc.solution_creators,
                tags: doc.tags,
                documentation: doc.documentation,
                cite: doc.cite,
                args: doc.args,
                dependencies,
            },
            scripts: Scripts {
                run: self.run,
                install: self.install,
                test: self.test,
                uninstall: self.uninstall,
            },
            paths: None,
        })
    }
}

fn normalize_dependencies(deps: DependenciesDoc) -> std::result::Result<Option<DependencySpec>, String> {
    match (deps.parent, deps.steps) {
        (Some(_), Some(_)) => {
            Err("dependencies declare both a parent and steps, pick one".to_string())
        }
        (Some(parent), None) => Ok(Some(DependencySpec::Parent(parent))),
        (None, Some(steps)) => {
            if steps.is_empty() {
                return Err("dependencies declare an empty steps list".to_string());
            }
            let mut groups = Vec::with_capacity(steps.len());
            for entry in steps {
                match entry {
                    StepEntry::Single(step) => groups.push(vec![step]),
                    StepEntry::Group(group) => {
                        if group.is_empty() {
                            return Err("steps contain an empty group".to_string());
                        }
                        groups.push(group);
                    }
                }
            }
            Ok(Some(DependencySpec::Steps(groups)))
        }
        (None, None) => Ok(None),
    }
}
