//! Schedule-driven root driver.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::fanout::trigger_parallel;
use crate::schedule::{sleep_sliced, CronSchedule};
use crate::traits::{
    trigger_sequential, Node, NodeStatus, TriggerContext, Triggerable, Triggerer, WaitWindow,
};
use crate::{NodeError, ReturnValue};

/// Triggers its children on a regular schedule and backs off on a retry
/// schedule while they ask for retries.
///
/// Only usable as the root of a flow.
pub struct Timed {
    id: String,
    regular: CronSchedule,
    retry: CronSchedule,
    granularity: Duration,
    max_failed_retries: u32,
    parallel: bool,
    targets: Vec<Arc<dyn Triggerable>>,
    current_retry: AtomicU32,
    trigger_count: AtomicU64,
    waiting: Mutex<Option<WaitWindow>>,
}

/// Which schedule the next wait follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Regular,
    Retry,
}

impl Timed {
    /// `retry` falls back to `regular` when `None`.
    pub fn new(
        id: impl Into<String>,
        regular: CronSchedule,
        retry: Option<CronSchedule>,
        granularity: Duration,
        max_failed_retries: u32,
        parallel: bool,
    ) -> Self {
        let retry = retry.unwrap_or_else(|| regular.clone());
        Self {
            id: id.into(),
            regular,
            retry,
            granularity,
            max_failed_retries,
            parallel,
            targets: Vec::new(),
            current_retry: AtomicU32::new(0),
            trigger_count: AtomicU64::new(0),
            waiting: Mutex::new(None),
        }
    }

    pub fn current_retry(&self) -> u32 {
        self.current_retry.load(Ordering::SeqCst)
    }

    pub fn trigger_count(&self) -> u64 {
        self.trigger_count.load(Ordering::SeqCst)
    }

    fn set_waiting(&self, window: Option<WaitWindow>) {
        *self.waiting.lock().unwrap_or_else(|e| e.into_inner()) = window;
    }

    /// Sleep until the next firing of the chosen schedule.
    ///
    /// Returns `false` when the loop should end: killed during the wait, or
    /// the schedule never fires again.
    async fn wait_for(&self, next: Next, ctx: &TriggerContext) -> bool {
        let schedule = match next {
            Next::Regular => &self.regular,
            Next::Retry => &self.retry,
        };
        let Some(at) = schedule.next_firing() else {
            warn!(node = %self.id, schedule = %schedule.expression(), "schedule never fires again");
            return false;
        };
        info!(node = %self.id, time = %at, "timed trigger scheduled");

        self.set_waiting(Some(WaitWindow {
            start: Utc::now(),
            end: at,
        }));
        let completed = sleep_sliced(at, self.granularity, &ctx.cancel).await;
        self.set_waiting(None);
        completed
    }

    async fn trigger_all(&self, ctx: &TriggerContext) -> ReturnValue {
        self.trigger_count.fetch_add(1, Ordering::SeqCst);
        if self.parallel {
            trigger_parallel(&self.targets, ctx).await
        } else {
            trigger_sequential(&self.targets, ctx).await
        }
    }
}

impl Node for Timed {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            trigger_count: self.trigger_count(),
            parallel: Some(self.parallel),
            current_retry: Some(self.current_retry()),
            max_failed_retries: Some(self.max_failed_retries),
            waiting: *self.waiting.lock().unwrap_or_else(|e| e.into_inner()),
            ..NodeStatus::new(&self.id, "timer")
        }
        .with_targets(&self.targets)
    }
}

#[async_trait]
impl Triggerer for Timed {
    fn add_target(&mut self, target: Arc<dyn Triggerable>) {
        self.targets.push(target);
    }

    fn targets(&self) -> &[Arc<dyn Triggerable>] {
        &self.targets
    }

    #[instrument(skip_all, fields(node = %self.id, flow = %ctx.flow))]
    async fn run(&self, ctx: &TriggerContext) -> Result<(), NodeError> {
        info!("waiting before the first run");
        let mut next = Next::Regular;

        loop {
            if !self.wait_for(next, ctx).await || ctx.is_cancelled() {
                info!("timed loop exiting");
                return Ok(());
            }
            if next == Next::Regular {
                self.current_retry.store(0, Ordering::SeqCst);
            }

            let run = ctx.next_run();
            info!(run = %run.run_id, "waiting finished and no kill received");

            let retries = self.current_retry();
            next = match self.trigger_all(&run).await {
                ReturnValue::Ok => {
                    info!(retries, "successful");
                    self.current_retry.store(0, Ordering::SeqCst);
                    Next::Regular
                }
                ReturnValue::Retry if retries < self.max_failed_retries => {
                    info!(retries, "start next retry");
                    self.current_retry.store(retries + 1, Ordering::SeqCst);
                    Next::Retry
                }
                ReturnValue::Retry => {
                    error!(retries, "failed, will try again at next regular trigger");
                    Next::Regular
                }
                ReturnValue::Stop => {
                    error!(retries, "targets asked to stop, timed loop ends");
                    return Ok(());
                }
            };
        }
    }
}
