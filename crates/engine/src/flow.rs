//! Flow forest and graph builder.
//!
//! A flow is a named tree of description names. Building a flow
//! instantiates every tree node from the object store and wires parents to
//! children, giving every live node an ID derived from its path so a
//! description reused in several places still yields distinct nodes.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use nodes::{NodeStatus, Triggerable, Triggerer};

use crate::models::Dependencies;
use crate::store::ObjectStore;
use crate::walk::find_files;
use crate::EngineError;

/// Extension of flow files.
pub const FLOW_EXTENSION: &str = "flow";

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

/// One position in a flow tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Name of a description in the object store.
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Targets", default)]
    pub targets: Vec<FlowNode>,
}

impl FlowNode {
    /// Every description name used in this subtree, depth first.
    pub fn names(&self) -> Vec<&str> {
        let mut out = vec![self.name.as_str()];
        for t in &self.targets {
            out.extend(t.names());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Root")]
    pub root: FlowNode,
}

/// All flows known to the daemon, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowForest {
    #[serde(rename = "Flows", default)]
    flows: BTreeMap<String, Flow>,
}

impl FlowForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one flow fragment. The map key is the flow's name.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut forest: FlowForest = serde_json::from_str(raw)?;
        for (key, flow) in forest.flows.iter_mut() {
            if flow.name.is_empty() {
                flow.name = key.clone();
            } else if flow.name != *key {
                warn!(key = %key, name = %flow.name, "flow name differs from its key, using the key");
                flow.name = key.clone();
            }
        }
        Ok(forest)
    }

    /// Move every flow of `other` into this forest.
    ///
    /// # Errors
    /// [`EngineError::DuplicateFlow`] if a name is already taken; `path` is
    /// the file `other` came from. Nothing is merged in that case.
    pub fn merge(&mut self, other: FlowForest, path: &Path) -> Result<(), EngineError> {
        if let Some(name) = other.flows.keys().find(|n| self.flows.contains_key(*n)) {
            return Err(EngineError::DuplicateFlow {
                name: name.clone(),
                path: path.to_path_buf(),
            });
        }
        self.flows.extend(other.flows);
        Ok(())
    }

    /// Load and merge every flow file below `dir`.
    #[instrument(skip(dir), fields(dir = %dir.display()))]
    pub fn load_all(dir: &Path) -> Result<Self, EngineError> {
        let mut forest = Self::new();
        for path in find_files(dir, FLOW_EXTENSION)? {
            let raw = std::fs::read_to_string(&path).map_err(|e| EngineError::io(&path, e))?;
            let fragment = Self::from_json(&raw).map_err(|source| EngineError::Parse {
                path: path.clone(),
                source,
            })?;
            forest.merge(fragment, &path)?;
        }
        info!(flows = forest.flows.len(), "flows loaded");
        Ok(forest)
    }

    pub fn get(&self, name: &str) -> Option<&Flow> {
        self.flows.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.flows.keys().map(String::as_str).collect()
    }

    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn insert(&mut self, flow: Flow) -> Option<Flow> {
        self.flows.insert(flow.name.clone(), flow)
    }

    // -----------------------------------------------------------------------
    // Building
    // -----------------------------------------------------------------------

    /// Build the flow `name`, seeding IDs with the flow name.
    pub fn build(
        &self,
        name: &str,
        store: &ObjectStore,
        deps: &Dependencies,
    ) -> Result<BuiltFlow, EngineError> {
        self.build_seeded(name, name, store, deps)
    }

    /// Build the flow `name` with every node ID prefixed by `seed`.
    ///
    /// Nothing is returned on error; nodes instantiated before the failure
    /// are dropped.
    #[instrument(skip(self, store, deps))]
    pub fn build_seeded(
        &self,
        name: &str,
        seed: &str,
        store: &ObjectStore,
        deps: &Dependencies,
    ) -> Result<BuiltFlow, EngineError> {
        let flow = self
            .flows
            .get(name)
            .ok_or_else(|| EngineError::FlowNotFound(name.to_string()))?;
        let root_name = &flow.root.name;

        let root_desc = match store.triggerer(root_name) {
            Some(d) => d,
            None if store.triggerable(root_name).is_some() => {
                return Err(EngineError::NotATriggerer(root_name.clone()))
            }
            None => {
                return Err(EngineError::NotFound {
                    name: root_name.clone(),
                    role: "triggerer",
                })
            }
        };

        let mut root = root_desc
            .instantiate(seed, deps)
            .map_err(|source| EngineError::Instantiate {
                id: format!("{seed}__{root_name}"),
                source,
            })?;

        let mut nodes = BTreeMap::new();
        wire(root.as_mut(), &flow.root, seed, store, deps, &mut nodes)?;

        info!(root = %root.id(), nodes = nodes.len(), "flow built");
        Ok(BuiltFlow {
            name: name.to_string(),
            root: Arc::from(root),
            nodes,
        })
    }

    /// Build every flow. A flow that fails to build is reported and left
    /// out; the others are unaffected.
    pub fn build_all(&self, store: &ObjectStore, deps: &Dependencies) -> BuildReport {
        let mut report = BuildReport::default();
        for name in self.flows.keys() {
            match self.build(name, store, deps) {
                Ok(built) => {
                    report.built.insert(name.clone(), built);
                }
                Err(e) => {
                    warn!(flow = %name, error = %e, "flow not built");
                    report.failed.push((name.clone(), e));
                }
            }
        }
        report
    }
}

/// Instantiate the children of `node` and add them to `parent` in order.
fn wire(
    parent: &mut dyn Triggerer,
    node: &FlowNode,
    seed: &str,
    store: &ObjectStore,
    deps: &Dependencies,
    nodes: &mut BTreeMap<String, Arc<dyn Triggerable>>,
) -> Result<(), EngineError> {
    for (idx, child) in node.targets.iter().enumerate() {
        let unique = format!("{seed}_{idx}");
        let instantiate_err = |source| EngineError::Instantiate {
            id: format!("{unique}__{}", child.name),
            source,
        };

        let desc = store
            .triggerable(&child.name)
            .ok_or_else(|| EngineError::NotFound {
                name: child.name.clone(),
                role: "triggerable",
            })?;

        let live = if child.targets.is_empty() {
            desc.instantiate(&unique, deps).map_err(instantiate_err)?
        } else {
            let inner = store
                .triggerer(&child.name)
                .ok_or_else(|| EngineError::NotATriggerer(child.name.clone()))?;
            let mut triggerer = inner.instantiate(&unique, deps).map_err(instantiate_err)?;
            let child_seed = format!("{seed}_{idx}_{}", child.name);
            wire(triggerer.as_mut(), child, &child_seed, store, deps, nodes)?;

            let id = triggerer.id().to_string();
            triggerer
                .into_triggerable()
                .ok_or(EngineError::NotATriggerable(id))?
        };

        nodes.insert(live.id().to_string(), live.clone());
        parent.add_target(live);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Built graphs
// ---------------------------------------------------------------------------

/// A live, fully wired flow.
#[derive(Clone)]
pub struct BuiltFlow {
    pub name: String,
    pub root: Arc<dyn Triggerer>,
    /// Every non-root node, by ID.
    nodes: BTreeMap<String, Arc<dyn Triggerable>>,
}

impl BuiltFlow {
    pub fn root_id(&self) -> &str {
        self.root.id()
    }

    pub fn node(&self, id: &str) -> Option<&Arc<dyn Triggerable>> {
        self.nodes.get(id)
    }

    /// Root ID followed by every other node ID, depth first.
    pub fn node_ids(&self) -> Vec<String> {
        self.status().ids()
    }

    pub fn status(&self) -> NodeStatus {
        self.root.status()
    }
}

impl std::fmt::Debug for BuiltFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltFlow")
            .field("name", &self.name)
            .field("root", &self.root.id())
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Outcome of [`FlowForest::build_all`].
#[derive(Debug, Default)]
pub struct BuildReport {
    pub built: BTreeMap<String, BuiltFlow>,
    pub failed: Vec<(String, EngineError)>,
}
