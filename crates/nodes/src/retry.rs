//! Retry combinator: re-triggers its children on a schedule until they stop
//! asking for a retry or the retry budget is spent.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::schedule::{sleep_sliced, CronSchedule};
use crate::traits::{
    trigger_sequential, Node, NodeStatus, TriggerContext, Triggerable, Triggerer, WaitWindow,
};
use crate::{NodeError, ReturnValue};

pub struct Retry {
    id: String,
    schedule: CronSchedule,
    granularity: Duration,
    max_failed_retries: u32,
    targets: Vec<Arc<dyn Triggerable>>,
    current_retry: AtomicU32,
    trigger_count: AtomicU64,
    waiting: Mutex<Option<WaitWindow>>,
}

impl Retry {
    pub fn new(
        id: impl Into<String>,
        schedule: CronSchedule,
        granularity: Duration,
        max_failed_retries: u32,
    ) -> Self {
        Self {
            id: id.into(),
            schedule,
            granularity,
            max_failed_retries,
            targets: Vec::new(),
            current_retry: AtomicU32::new(0),
            trigger_count: AtomicU64::new(0),
            waiting: Mutex::new(None),
        }
    }

    pub fn current_retry(&self) -> u32 {
        self.current_retry.load(Ordering::SeqCst)
    }

    fn set_waiting(&self, window: Option<WaitWindow>) {
        *self.waiting.lock().unwrap_or_else(|e| e.into_inner()) = window;
    }

    /// The bounded retry loop.
    async fn drive(&self, ctx: &TriggerContext) -> ReturnValue {
        self.current_retry.store(0, Ordering::SeqCst);

        loop {
            let retries = self.current_retry();
            info!(node = %self.id, retry = retries, "starting try");

            match trigger_sequential(&self.targets, ctx).await {
                ReturnValue::Ok => {
                    info!(node = %self.id, retries, "successful");
                    return ReturnValue::Ok;
                }
                ReturnValue::Stop => {
                    warn!(node = %self.id, retries, "targets asked to stop");
                    return ReturnValue::Stop;
                }
                ReturnValue::Retry if retries < self.max_failed_retries => {
                    self.current_retry.store(retries + 1, Ordering::SeqCst);
                    info!(node = %self.id, retries, "start next retry");

                    let Some(next) = self.schedule.next_firing() else {
                        error!(node = %self.id, schedule = %self.schedule.expression(), "retry schedule never fires again");
                        return ReturnValue::Retry;
                    };
                    info!(node = %self.id, time = %next, "retry scheduled");

                    self.set_waiting(Some(WaitWindow {
                        start: Utc::now(),
                        end: next,
                    }));
                    let completed = sleep_sliced(next, self.granularity, &ctx.cancel).await;
                    self.set_waiting(None);

                    if !completed {
                        info!(node = %self.id, "killed while waiting for retry");
                        return ReturnValue::Retry;
                    }
                }
                ReturnValue::Retry => {
                    error!(node = %self.id, retries, "failed, retries exhausted");
                    return ReturnValue::Retry;
                }
            }
        }
    }
}

impl Node for Retry {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            trigger_count: self.trigger_count.load(Ordering::SeqCst),
            current_retry: Some(self.current_retry()),
            max_failed_retries: Some(self.max_failed_retries),
            waiting: *self.waiting.lock().unwrap_or_else(|e| e.into_inner()),
            ..NodeStatus::new(&self.id, "retry")
        }
        .with_targets(&self.targets)
    }
}

#[async_trait]
impl Triggerable for Retry {
    async fn trigger(&self, ctx: &TriggerContext) -> ReturnValue {
        self.trigger_count.fetch_add(1, Ordering::SeqCst);
        self.drive(ctx).await
    }
}

#[async_trait]
impl Triggerer for Retry {
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
