//! Expansion of a resolved solution into a flat, ordered script queue.
//!
//! A solution is either a leaf (no dependencies), a child delegating to a
//! parent environment, or a workflow of steps. [`QueueBuilder`] walks that
//! shape recursively and emits one [`QueueEntry`] per script that has to
//! run, in execution order. The walk is all-or-nothing: any resolution or
//! argument failure aborts the whole build and no partial queue escapes.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::PathBuf;

use futures::future::BoxFuture;
use futures::FutureExt;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::errors::{AlmanacError, Result};
use crate::ports::{EnvironmentHandle, EnvironmentProvider};
use crate::queue::script;
use crate::resolver::{ResolveResult, Resolver};
use crate::solution::{
    Coordinates, DependencySpec, Scripts, Solution, SolutionSetup, SOLUTION_FILE_NAME,
};

/// Which of the four script payloads a queue executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptAction {
    Run,
    Install,
    Test,
    Uninstall,
}

impl ScriptAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptAction::Run => "run",
            ScriptAction::Install => "install",
            ScriptAction::Test => "test",
            ScriptAction::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for ScriptAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One script execution, fully bound: what to run, where, and with which
/// arguments. An empty `script` marks a bookkeeping-only entry (install or
/// uninstall of a solution that ships no such payload).
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub coordinates: Coordinates,
    pub catalog_id: u64,
    /// Setup snapshot the runner records into the collection.
    pub setup: SolutionSetup,
    pub script: String,
    pub action: ScriptAction,
    pub args: Vec<String>,
    pub environment: EnvironmentHandle,
    pub installation_path: PathBuf,
    pub package_path: PathBuf,
    /// Collection id of the parent whose environment this entry borrows.
    /// The runner records the child-to-parent link after an install.
    pub parent_collection_id: Option<u64>,
}

/// FIFO of fully bound script executions.
#[derive(Debug, Default)]
pub struct ScriptQueue {
    entries: VecDeque<QueueEntry>,
}

impl ScriptQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }
}

impl From<Vec<QueueEntry>> for ScriptQueue {
    fn from(entries: Vec<QueueEntry>) -> Self {
        Self {
            entries: entries.into(),
        }
    }
}

#[derive(Default)]
struct BuildState {
    entries: Vec<QueueEntry>,
    graph: DiGraph<(), ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl BuildState {
    fn node(&mut self, coordinates: &Coordinates) -> NodeIndex {
        let graph = &mut self.graph;
        *self
            .nodes
            .entry(coordinates.to_string())
            .or_insert_with(|| graph.add_node(()))
    }

    /// Record a declaring-to-dependency edge and fail as soon as the
    /// accumulated reference graph stops being a DAG.
    fn guard_edge(&mut self, from: &Coordinates, to: &Coordinates) -> Result<()> {
        let from_ix = self.node(from);
        let to_ix = self.node(to);
        self.graph.add_edge(from_ix, to_ix, ());
        if is_cyclic_directed(&self.graph) {
            return Err(AlmanacError::cycle(format!("{} -> {}", from, to)));
        }
        Ok(())
    }
}

/// Builds a [`ScriptQueue`] from a resolved (and loaded) solution.
pub struct QueueBuilder<'a> {
    resolver: &'a Resolver,
    environments: &'a dyn EnvironmentProvider,
}

impl<'a> QueueBuilder<'a> {
    pub fn new(resolver: &'a Resolver, environments: &'a dyn EnvironmentProvider) -> Self {
        Self {
            resolver,
            environments,
        }
    }

    /// Expand `resolved` into an ordered queue for `action`.
    ///
    /// `args` are the caller-provided `--name=value` tokens for the top
    /// solution; workflows re-derive per-step tokens from their bindings.
    pub async fn build(
        &self,
        resolved: ResolveResult,
        args: &[String],
        action: ScriptAction,
    ) -> Result<ScriptQueue> {
        let mut state = BuildState::default();
        self.expand(resolved, args.to_vec(), action, &mut state)
            .await?;
        debug!(entries = state.entries.len(), %action, "script queue built");
        Ok(ScriptQueue::from(state.entries))
    }

    fn expand<'b>(
        &'b self,
        resolved: ResolveResult,
        args: Vec<String>,
        action: ScriptAction,
        state: &'b mut BuildState,
    ) -> BoxFuture<'b, Result<()>> {
        async move {
            let solution = resolved.solution()?;
            let coordinates = solution.coordinates();
            match &solution.setup.dependencies {
                None => {
                    let environment_name = &solution.installation()?.environment_name;
                    let environment = self.environment_for(environment_name).await?;
                    let entry = make_entry(
                        solution,
                        resolved.catalog.catalog_id(),
                        action,
                        args,
                        environment,
                        None,
                    )?;
                    state.entries.push(entry);
                    Ok(())
                }
                Some(DependencySpec::Parent(parent)) => {
                    let parent_coordinates = parent.coordinates();
                    state.guard_edge(&coordinates, &parent_coordinates)?;
                    let parent_resolved = self
                        .resolver
                        .resolve_require_installation(&parent_coordinates.to_string())
                        .await?;
                    let parent_solution = parent_resolved.solution()?;
                    let environment_name = &parent_solution.installation()?.environment_name;
                    let environment = self.environment_for(environment_name).await?;
                    let parent_collection_id = parent_resolved
                        .collection_entry
                        .as_ref()
                        .map(|row| row.collection_id);

                    // Parent overrides first, caller tokens after; the last
                    // occurrence of a flag wins at parse time.
                    let mut merged = script::encode_args(&parent.args);
                    merged.extend(args);
                    let entry = make_entry(
                        solution,
                        resolved.catalog.catalog_id(),
                        action,
                        merged,
                        environment,
                        parent_collection_id,
                    )?;
                    state.entries.push(entry);
                    Ok(())
                }
                Some(DependencySpec::Steps(groups)) => {
                    for group in groups {
                        // Parse the workflow's own arguments once per group
                        // so every member sees the same values.
                        let parsed =
                            script::parse_arguments(&solution.setup.args, &args, &coordinates)?;
                        for step in group {
                            let step_coordinates = step.coordinates();
                            state.guard_edge(&coordinates, &step_coordinates)?;
                            let tokens =
                                script::render_bindings(&step.args, &parsed, &step_coordinates)?;
                            let child = self
                                .resolver
                                .resolve_and_load(&step_coordinates.to_string())
                                .await?;
                            self.expand(child, tokens, action, state).await?;
                        }
                    }
                    Ok(())
                }
            }
        }
        .boxed()
    }

    async fn environment_for(&self, name: &str) -> Result<EnvironmentHandle> {
        self.environments
            .get_or_create(name)
            .await
            .map_err(|source| AlmanacError::environment(name, source))
    }
}

fn make_entry(
    solution: &Solution,
    catalog_id: u64,
    action: ScriptAction,
    args: Vec<String>,
    environment: EnvironmentHandle,
    parent_collection_id: Option<u64>,
) -> Result<QueueEntry> {
    let paths = solution.installation()?;
    let script = match select_script(&solution.scripts, action) {
        Some(text) => text.to_string(),
        // Install and uninstall may be bookkeeping-only; run and test
        // without a payload cannot do anything useful.
        None => match action {
            ScriptAction::Run | ScriptAction::Test => {
                return Err(AlmanacError::solution_load(
                    paths.package_path.join(SOLUTION_FILE_NAME),
                    format!("solution declares no '{}' script", action),
                ))
            }
            ScriptAction::Install | ScriptAction::Uninstall => String::new(),
        },
    };
    Ok(QueueEntry {
        coordinates: solution.coordinates(),
        catalog_id,
        setup: solution.setup.clone(),
        script,
        action,
        args,
        environment,
        installation_path: paths.installation_path.clone(),
        package_path: paths.package_path.clone(),
        parent_collection_id,
    })
}

fn select_script(scripts: &Scripts, action: ScriptAction) -> Option<&str> {
    match action {
        ScriptAction::Run => scripts.run.as_deref(),
        ScriptAction::Install => scripts.install.as_deref(),
        ScriptAction::Test => scripts.test.as_deref(),
        ScriptAction::Uninstall => scripts.uninstall.as_deref(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_action_names_match_wire_form() {
        assert_eq!(ScriptAction::Run.as_str(), "run");
        assert_eq!(ScriptAction::Uninstall.to_string(), "uninstall");
        assert_eq!(
            serde_json::to_string(&ScriptAction::Install).unwrap(),
            "\"install\""
        );
    }

    #[test]
    fn test_select_script_per_action() {
        let scripts = Scripts {
            run: Some("run()".to_string()),
            install: None,
            test: Some("test()".to_string()),
            uninstall: None,
        };
        assert_eq!(select_script(&scripts, ScriptAction::Run), Some("run()"));
        assert_eq!(select_script(&scripts, ScriptAction::Install), None);
        assert_eq!(select_script(&scripts, ScriptAction::Test), Some("test()"));
        assert_eq!(select_script(&scripts, ScriptAction::Uninstall), None);
    }

    #[test]
    fn test_cycle_guard_rejects_back_edge() {
        let mut state = BuildState::default();
        let a = Coordinates::new("grp", "a", "1.0.0");
        let b = Coordinates::new("grp", "b", "1.0.0");
        state.guard_edge(&a, &b).unwrap();
        let err = state.guard_edge(&b, &a).unwrap_err();
        assert!(err.to_string().contains("dependency cycle"));
    }

    fn entry(name: &str) -> QueueEntry {
        let setup: SolutionSetup = serde_json::from_value(serde_json::json!({
            "group": "grp", "name": name, "version": "1.0.0"
        }))
        .unwrap();
        QueueEntry {
            coordinates: setup.coordinates(),
            catalog_id: 1,
            setup,
            script: "run()".to_string(),
            action: ScriptAction::Run,
            args: Vec::new(),
            environment: EnvironmentHandle {
                name: "env".to_string(),
                path: PathBuf::from("/tmp/env"),
            },
            installation_path: PathBuf::from("/tmp/install"),
            package_path: PathBuf::from("/tmp/pkg"),
            parent_collection_id: None,
        }
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = ScriptQueue::from(vec![entry("a"), entry("b"), entry("c")]);
        assert_eq!(queue.len(), 3);
        let order: Vec<String> = std::iter::from_fn(|| queue.pop_front())
            .map(|e| e.coordinates.name().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }
}
