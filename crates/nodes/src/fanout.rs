//! Fan-out combinator: forwards one trigger to every child.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::traits::{trigger_sequential, Node, NodeStatus, TriggerContext, Triggerable, Triggerer};
use crate::{NodeError, ReturnValue};

/// Triggers all children, one at a time in declared order or all at once.
///
/// Has no schedule of its own. As a root it triggers its children once and
/// returns.
pub struct FanOut {
    id: String,
    parallel: bool,
    targets: Vec<Arc<dyn Triggerable>>,
    trigger_count: AtomicU64,
}

impl FanOut {
    pub fn new(id: impl Into<String>, parallel: bool) -> Self {
        Self {
            id: id.into(),
            parallel,
            targets: Vec::new(),
            trigger_count: AtomicU64::new(0),
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn trigger_count(&self) -> u64 {
        self.trigger_count.load(Ordering::SeqCst)
    }
}

/// Trigger every target on its own task and aggregate once all are done.
pub async fn trigger_parallel(targets: &[Arc<dyn Triggerable>], ctx: &TriggerContext) -> ReturnValue {
    // One target needs no extra task.
    if let [only] = targets {
        return only.trigger(ctx).await;
    }

    let handles: Vec<_> = targets
        .iter()
        .map(|target| {
            let target = Arc::clone(target);
            let ctx = ctx.clone();
            tokio::spawn(async move { target.trigger(&ctx).await })
        })
        .collect();

    let mut result = ReturnValue::Stop;
    for handle in handles {
        let value = match handle.await {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "parallel target task failed");
                ReturnValue::Retry
            }
        };
        result = result.max(value);
    }
    result
}

impl Node for FanOut {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            parallel: Some(self.parallel),
            trigger_count: self.trigger_count(),
            ..NodeStatus::new(&self.id, "fanout")
        }
        .with_targets(&self.targets)
    }
}

#[async_trait]
impl Triggerable for FanOut {
    async fn trigger(&self, ctx: &TriggerContext) -> ReturnValue {
        self.trigger_count.fetch_add(1, Ordering::SeqCst);
        debug!(node = %self.id, parallel = self.parallel, targets = self.targets.len(), "fan out");
        if self.parallel {
            trigger_parallel(&self.targets, ctx).await
        } else {
            trigger_sequential(&self.targets, ctx).await
        }
    }
}

#[async_trait]
impl Triggerer for FanOut {
    fn add_target(&mut self, target: Arc<dyn Triggerable>) {
        self.targets.push(target);
    }

    fn targets(&self) -> &[Arc<dyn Triggerable>] {
        &self.targets
    }

    async fn run(&self, ctx: &TriggerContext) -> Result<(), NodeError> {
        Triggerable::trigger(self, ctx).await;
        Ok(())
    }

    fn into_triggerable(self: Box<Self>) -> Option<Arc<dyn Triggerable>> {
        Some(Arc::new(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNode;
    use std::time::Duration;

    fn fanout(parallel: bool, children: &[Arc<MockNode>]) -> FanOut {
        let mut f = FanOut::new("flow__fan", parallel);
        for c in children {
            f.add_target(c.clone());
        }
        f
    }

    #[tokio::test]
    async fn empty_fanout_is_stop() {
        let f = FanOut::new("flow__fan", true);
        assert_eq!(f.trigger(&TriggerContext::new("flow")).await, ReturnValue::Stop);
        assert_eq!(f.trigger_count(), 1);
    }

    #[tokio::test]
    async fn sequential_runs_children_in_declared_order() {
        let log = MockNode::shared_log();
        let children: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| Arc::new(MockNode::returning(*n, ReturnValue::Ok).with_log(log.clone())))
            .collect();
        let f = fanout(false, &children);

        assert_eq!(f.trigger(&TriggerContext::new("flow")).await, ReturnValue::Ok);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn parallel_with_one_failing_child_is_retry() {
        let children = vec![
            Arc::new(MockNode::returning("ok1", ReturnValue::Ok)),
            Arc::new(MockNode::returning("bad", ReturnValue::Retry)),
            Arc::new(MockNode::returning("ok2", ReturnValue::Ok)),
        ];
        let f = fanout(true, &children);

        assert_eq!(f.trigger(&TriggerContext::new("flow")).await, ReturnValue::Retry);
        for c in &children {
            assert_eq!(c.call_count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_children_run_concurrently() {
        let children: Vec<_> = (0..3)
            .map(|i| {
                Arc::new(
                    MockNode::returning(format!("slow{i}"), ReturnValue::Ok)
                        .with_delay(Duration::from_secs(10)),
                )
            })
            .collect();
        let f = fanout(true, &children);

        let start = tokio::time::Instant::now();
        assert_eq!(f.trigger(&TriggerContext::new("flow")).await, ReturnValue::Ok);
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn run_as_root_triggers_once() {
        let child = Arc::new(MockNode::returning("a", ReturnValue::Retry));
        let f = fanout(false, &[child.clone()]);
        f.run(&TriggerContext::new("flow")).await.unwrap();
        assert_eq!(child.call_count(), 1);
    }

    #[test]
    fn status_reports_the_subtree() {
        let child = Arc::new(MockNode::returning("a", ReturnValue::Ok));
        let f = fanout(true, &[child]);
        let status = f.status();
        assert_eq!(status.kind, "fanout");
        assert_eq!(status.parallel, Some(true));
        assert_eq!(status.targets.len(), 1);
    }
}
