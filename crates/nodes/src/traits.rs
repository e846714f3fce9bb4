//! The capability contracts every graph node fulfils.
//!
//! A node is [`Triggerable`] when a parent can ask it to execute once and
//! report a [`ReturnValue`], and a [`Triggerer`] when it forwards triggers
//! to child nodes and can drive its own loop as the root of a flow. Fan-out
//! and retry combinators are both, which is what allows arbitrary nesting.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{NodeError, ReturnValue};

/// Shared context handed down the graph with every trigger.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    /// Name of the flow whose root started this trigger.
    pub flow: String,
    /// Identifies one pass of the root's loop in the logs.
    pub run_id: Uuid,
    /// Cooperative kill signal of the owning root.
    pub cancel: CancellationToken,
}

impl TriggerContext {
    pub fn new(flow: impl Into<String>) -> Self {
        Self::with_cancel(flow, CancellationToken::new())
    }

    pub fn with_cancel(flow: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            flow: flow.into(),
            run_id: Uuid::new_v4(),
            cancel,
        }
    }

    /// Same flow and kill signal, fresh run ID.
    pub fn next_run(&self) -> Self {
        Self {
            flow: self.flow.clone(),
            run_id: Uuid::new_v4(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Window a driver is currently sleeping through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaitWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Point-in-time snapshot of a live node and its subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeStatus {
    pub id: String,
    pub kind: String,
    pub trigger_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_retry: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_failed_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting: Option<WaitWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<NodeStatus>,
}

impl NodeStatus {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_targets(mut self, targets: &[Arc<dyn Triggerable>]) -> Self {
        self.targets = targets.iter().map(|t| t.status()).collect();
        self
    }

    /// Every ID in this subtree, depth first.
    pub fn ids(&self) -> Vec<String> {
        let mut out = vec![self.id.clone()];
        for t in &self.targets {
            out.extend(t.ids());
        }
        out
    }
}

/// Identity and introspection shared by both capabilities.
pub trait Node: Send + Sync {
    /// Generated, graph-unique ID.
    fn id(&self) -> &str;

    fn status(&self) -> NodeStatus;
}

/// A node a parent can trigger.
#[async_trait]
pub trait Triggerable: Node {
    /// Execute once and report the outcome.
    async fn trigger(&self, ctx: &TriggerContext) -> ReturnValue;
}

/// A node that forwards triggers to children and can run as a flow root.
#[async_trait]
pub trait Triggerer: Node {
    /// Append a child. Children are triggered in the order they were added.
    fn add_target(&mut self, target: Arc<dyn Triggerable>);

    fn targets(&self) -> &[Arc<dyn Triggerable>];

    /// Drive this node's own loop until it is exhausted or `ctx.cancel` fires.
    async fn run(&self, ctx: &TriggerContext) -> Result<(), NodeError>;

    /// Hand the fully wired node to its parent. Root-only drivers keep the
    /// default and return `None`.
    fn into_triggerable(self: Box<Self>) -> Option<Arc<dyn Triggerable>> {
        None
    }
}

/// Trigger `targets` one after another, in order, and aggregate.
pub async fn trigger_sequential(
    targets: &[Arc<dyn Triggerable>],
    ctx: &TriggerContext,
) -> ReturnValue {
    let mut result = ReturnValue::Stop;
    for target in targets {
        result = result.max(target.trigger(ctx).await);
    }
    result
}
