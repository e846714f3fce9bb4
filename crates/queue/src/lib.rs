//! `queue` crate: owns the loaded flows and drives their roots.
//!
//! The [`FlowQueue`] keeps the object store, the flow forest and one built
//! graph per flow. Every running root is a tokio task paired with a
//! cancellation token; stopping a flow cancels the token and then awaits the
//! task, so a stop returns only once the root's loop has exited.

pub mod error;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use engine::{validate_flows, BuiltFlow, Dependencies, FlowForest, ObjectStore};
use nodes::traits::trigger_sequential;
use nodes::{Node, NodeStatus, ReturnValue, TriggerContext, Triggerable, Triggerer};

pub use error::QueueError;

/// Summary of one flow, as listed by the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSummary {
    pub name: String,
    pub running: bool,
    pub status: NodeStatus,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Entry {
    built: BuiltFlow,
    running: Option<Running>,
    /// Kill signal of manual triggers; replaced each time the flow stops.
    manual: CancellationToken,
}

impl Entry {
    fn new(built: BuiltFlow) -> Self {
        Self {
            built,
            running: None,
            manual: CancellationToken::new(),
        }
    }

    /// Cancel in-flight manual triggers and take the running root, if any.
    fn take_for_stop(&mut self) -> Option<Running> {
        std::mem::replace(&mut self.manual, CancellationToken::new()).cancel();
        self.running.take()
    }

    fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.handle.is_finished())
    }
}

struct State {
    store: ObjectStore,
    forest: FlowForest,
    flows: BTreeMap<String, Entry>,
}

pub struct FlowQueue {
    dir: PathBuf,
    /// Kind registry used for every reload; holds no descriptions.
    kinds: ObjectStore,
    deps: Dependencies,
    state: Mutex<State>,
    /// Number of root tasks that have not exited yet.
    active: Arc<watch::Sender<usize>>,
}

impl FlowQueue {
    /// Load descriptions and flows from `dir` and build every flow.
    ///
    /// `kinds` supplies the kind registry; any descriptions it already holds
    /// are replaced. Flows that fail validation or building are logged and
    /// left out.
    ///
    /// # Errors
    /// Any load error, including an unreadable directory.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn load(
        dir: impl AsRef<Path>,
        kinds: ObjectStore,
        deps: Dependencies,
    ) -> Result<Self, QueueError> {
        let dir = dir.as_ref().to_path_buf();
        let (store, forest) = load_dir(&dir, &kinds)?;
        let flows = build_entries(&forest, &store, &deps);

        let (active, _) = watch::channel(0);
        Ok(Self {
            active: Arc::new(active),
            dir,
            kinds,
            deps,
            state: Mutex::new(State {
                store,
                forest,
                flows,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start every flow that is not already running.
    pub async fn start_all(&self) {
        let mut state = self.state.lock().await;
        for (name, entry) in state.flows.iter_mut() {
            if !entry.is_running() {
                entry.running = Some(self.spawn(name, &entry.built));
            }
        }
        info!(flows = state.flows.len(), "all flows started");
    }

    fn spawn(&self, name: &str, built: &BuiltFlow) -> Running {
        let cancel = CancellationToken::new();
        let ctx = TriggerContext::with_cancel(name, cancel.clone());
        let root = built.root.clone();
        let active = self.active.clone();
        let name = name.to_string();

        active.send_modify(|n| *n += 1);
        let handle = tokio::spawn(async move {
            info!(flow = %name, root = %root.id(), "starting flow");
            match root.run(&ctx).await {
                Ok(()) => info!(flow = %name, "flow root exited"),
                Err(e) => error!(flow = %name, error = %e, "flow root failed"),
            }
            active.send_modify(|n| *n = n.saturating_sub(1));
        });
        Running { cancel, handle }
    }

    /// Cancel a root task and wait for it to exit.
    async fn halt(name: &str, running: Running) {
        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            error!(flow = %name, error = %e, "flow task ended abnormally");
        }
        info!(flow = %name, "flow stopped");
    }

    pub async fn list(&self) -> Vec<FlowSummary> {
        let state = self.state.lock().await;
        state
            .flows
            .iter()
            .map(|(name, entry)| FlowSummary {
                name: name.clone(),
                running: entry.is_running(),
                status: entry.built.status(),
            })
            .collect()
    }

    /// Status of a flow (by name) or of a single node (by ID).
    pub async fn describe(&self, name: &str) -> Result<NodeStatus, QueueError> {
        let state = self.state.lock().await;
        if let Some(entry) = state.flows.get(name) {
            return Ok(entry.built.status());
        }
        state
            .flows
            .values()
            .find_map(|e| e.built.node(name))
            .map(|node| node.status())
            .ok_or_else(|| QueueError::UnknownName(name.to_string()))
    }

    /// Stop the root of flow `name` and wait until its loop has exited.
    pub async fn stop(&self, name: &str) -> Result<(), QueueError> {
        let running = {
            let mut state = self.state.lock().await;
            let entry = state
                .flows
                .get_mut(name)
                .ok_or_else(|| QueueError::UnknownFlow(name.to_string()))?;
            entry.take_for_stop()
        };
        match running {
            Some(running) => Self::halt(name, running).await,
            None => info!(flow = %name, "flow was not running"),
        }
        Ok(())
    }

    /// Stop flow `name` and start its existing graph again.
    pub async fn restart(&self, name: &str) -> Result<(), QueueError> {
        self.stop(name).await?;
        let mut state = self.state.lock().await;
        let entry = state
            .flows
            .get_mut(name)
            .ok_or_else(|| QueueError::UnknownFlow(name.to_string()))?;
        if !entry.is_running() {
            entry.running = Some(self.spawn(name, &entry.built));
        }
        Ok(())
    }

    /// Re-read the directory, rebuild flow `name` from it and restart it.
    ///
    /// The new store and forest replace the old ones only if loading and
    /// building succeed; on error the running flow is left alone.
    #[instrument(skip(self))]
    pub async fn reload(&self, name: &str) -> Result<(), QueueError> {
        let (store, forest) = load_dir(&self.dir, &self.kinds)?;
        let built = forest.build(name, &store, &self.deps)?;

        let old = {
            let mut state = self.state.lock().await;
            state.flows.get_mut(name).and_then(Entry::take_for_stop)
        };
        if let Some(old) = old {
            Self::halt(name, old).await;
        }

        let mut state = self.state.lock().await;
        state.store = store;
        state.forest = forest;
        let mut entry = Entry::new(built);
        entry.running = Some(self.spawn(name, &entry.built));
        // A concurrent start may have raced us; keep only the fresh task.
        if let Some(mut stale) = state.flows.insert(name.to_string(), entry) {
            if let Some(running) = stale.take_for_stop() {
                running.cancel.cancel();
            }
        }
        info!(flow = %name, "flow reloaded");
        Ok(())
    }

    /// Re-read the directory, rebuild every flow and restart them all.
    #[instrument(skip(self))]
    pub async fn reload_all(&self) -> Result<(), QueueError> {
        let (store, forest) = load_dir(&self.dir, &self.kinds)?;
        let flows = build_entries(&forest, &store, &self.deps);

        self.stop_all().await;
        {
            let mut state = self.state.lock().await;
            state.store = store;
            state.forest = forest;
            state.flows = flows;
        }
        self.start_all().await;
        Ok(())
    }

    /// Trigger once, outside any schedule.
    ///
    /// A flow name triggers every child of that flow's root in order; a node
    /// ID triggers that node. Waits for the outcome. Stopping the owning flow
    /// cancels the trigger's waits.
    pub async fn trigger(&self, name: &str) -> Result<ReturnValue, QueueError> {
        enum Target {
            Root(Arc<dyn Triggerer>),
            Node(Arc<dyn Triggerable>),
        }

        let (flow, target, cancel) = {
            let state = self.state.lock().await;
            if let Some(entry) = state.flows.get(name) {
                (
                    name.to_string(),
                    Target::Root(entry.built.root.clone()),
                    entry.manual.clone(),
                )
            } else {
                state
                    .flows
                    .iter()
                    .find_map(|(flow, e)| {
                        let node = e.built.node(name)?.clone();
                        Some((flow.clone(), Target::Node(node), e.manual.clone()))
                    })
                    .ok_or_else(|| QueueError::UnknownName(name.to_string()))?
            }
        };

        let ctx = TriggerContext::with_cancel(flow, cancel);
        let result = match target {
            Target::Root(root) => trigger_sequential(root.targets(), &ctx).await,
            Target::Node(node) => node.trigger(&ctx).await,
        };
        info!(name = %name, result = %result, "manual trigger finished");
        Ok(result)
    }

    /// Stop flow `name` and forget it until the next reload.
    pub async fn remove(&self, name: &str) -> Result<(), QueueError> {
        self.stop(name).await?;
        self.state.lock().await.flows.remove(name);
        info!(flow = %name, "flow removed");
        Ok(())
    }

    /// Stop every running flow. Can take as long as the slowest job.
    pub async fn stop_all(&self) {
        let running: Vec<(String, Running)> = {
            let mut state = self.state.lock().await;
            state
                .flows
                .iter_mut()
                .filter_map(|(name, e)| e.take_for_stop().map(|r| (name.clone(), r)))
                .collect()
        };
        for (_, r) in &running {
            r.cancel.cancel();
        }
        for (name, r) in running {
            Self::halt(&name, r).await;
        }
    }

    /// Resolves once no root task is left running.
    pub async fn wait(&self) {
        let mut rx = self.active.subscribe();
        if rx.wait_for(|n| *n == 0).await.is_err() {
            warn!("flow counter closed");
        }
    }

    pub async fn flow_names(&self) -> Vec<String> {
        self.state.lock().await.flows.keys().cloned().collect()
    }

    /// Names of every description currently loaded, per role.
    pub async fn descriptions(&self) -> (Vec<String>, Vec<String>) {
        let state = self.state.lock().await;
        let owned = |ids: Vec<&str>| ids.into_iter().map(str::to_string).collect();
        (
            owned(state.store.triggerer_ids()),
            owned(state.store.triggerable_ids()),
        )
    }

    pub async fn forest(&self) -> FlowForest {
        self.state.lock().await.forest.clone()
    }
}

fn load_dir(dir: &Path, kinds: &ObjectStore) -> Result<(ObjectStore, FlowForest), QueueError> {
    let mut store = kinds.clone();
    store.load_all(dir)?;
    let forest = FlowForest::load_all(dir)?;
    for problem in validate_flows(&forest, &store) {
        warn!(error = %problem, "flow invalid");
    }
    Ok((store, forest))
}

fn build_entries(
    forest: &FlowForest,
    store: &ObjectStore,
    deps: &Dependencies,
) -> BTreeMap<String, Entry> {
    let report = forest.build_all(store, deps);
    for (name, e) in &report.failed {
        error!(flow = %name, error = %e, "flow skipped");
    }
    report
        .built
        .into_iter()
        .map(|(name, built)| (name, Entry::new(built)))
        .collect()
}
