//! `MockNode`: a test double for `Triggerable`.
//!
//! Useful in unit and integration tests where spawning real commands is
//! either unavailable or irrelevant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::traits::{Node, NodeStatus, TriggerContext, Triggerable};
use crate::ReturnValue;

/// Log shared between mocks to assert on trigger order.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// A mock leaf that counts its triggers and answers from a script.
pub struct MockNode {
    /// Label used in test assertions; doubles as the node ID.
    pub name: String,
    /// Values returned in call order. The last one repeats.
    script: Vec<ReturnValue>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    log: Option<CallLog>,
}

impl MockNode {
    /// A mock that always answers `value`.
    pub fn returning(name: impl Into<String>, value: ReturnValue) -> Self {
        Self::sequence(name, vec![value])
    }

    /// A mock that answers `values` one call at a time, then repeats the
    /// last one. An empty script answers `Stop`.
    pub fn sequence(name: impl Into<String>, values: Vec<ReturnValue>) -> Self {
        Self {
            name: name.into(),
            script: values,
            calls: AtomicUsize::new(0),
            delay: None,
            log: None,
        }
    }

    /// Sleep this long on every trigger before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Append this mock's name to `log` on every trigger.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn shared_log() -> CallLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// Number of times this node has been triggered.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Node for MockNode {
    fn id(&self) -> &str {
        &self.name
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            trigger_count: self.call_count() as u64,
            ..NodeStatus::new(&self.name, "mock")
        }
    }
}

#[async_trait]
impl Triggerable for MockNode {
    async fn trigger(&self, _ctx: &TriggerContext) -> ReturnValue {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap_or_else(|e| e.into_inner()).push(self.name.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .get(call)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or_default()
    }
}
