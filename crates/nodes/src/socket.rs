//! Root driver fed by an external process over a Unix socket.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, instrument};

use crate::traits::{Node, NodeStatus, TriggerContext, Triggerable, Triggerer};
use crate::NodeError;

/// Connects to `socket_path` and triggers every child once per received
/// line. The line content is ignored.
pub struct UnixSocketTrigger {
    id: String,
    socket_path: PathBuf,
    targets: Vec<Arc<dyn Triggerable>>,
    trigger_count: AtomicU64,
}

impl UnixSocketTrigger {
    pub fn new(id: impl Into<String>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            socket_path: socket_path.into(),
            targets: Vec::new(),
            trigger_count: AtomicU64::new(0),
        }
    }

    pub fn trigger_count(&self) -> u64 {
        self.trigger_count.load(Ordering::SeqCst)
    }

    fn socket_error(&self, source: std::io::Error) -> NodeError {
        NodeError::Socket {
            node: self.id.clone(),
            path: self.socket_path.display().to_string(),
            source,
        }
    }
}

impl Node for UnixSocketTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            trigger_count: self.trigger_count(),
            ..NodeStatus::new(&self.id, "unix")
        }
        .with_targets(&self.targets)
    }
}

#[async_trait]
impl Triggerer for UnixSocketTrigger {
    fn add_target(&mut self, target: Arc<dyn Triggerable>) {
        self.targets.push(target);
    }

    fn targets(&self) -> &[Arc<dyn Triggerable>] {
        &self.targets
    }

    #[instrument(skip_all, fields(node = %self.id, path = %self.socket_path.display()))]
    async fn run(&self, ctx: &TriggerContext) -> Result<(), NodeError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| self.socket_error(e))?;
        info!("connected to signal socket");
        let mut lines = BufReader::new(stream).lines();

        loop {
            let line = tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    info!("killed while waiting for a signal");
                    return Ok(());
                }
                line = lines.next_line() => line.map_err(|e| self.socket_error(e))?,
            };

            let Some(line) = line else {
                return Err(NodeError::SocketClosed {
                    node: self.id.clone(),
                    path: self.socket_path.display().to_string(),
                });
            };
            debug!(signal = %line, "signal received");

            self.trigger_count.fetch_add(1, Ordering::SeqCst);
            let run = ctx.next_run();
            // Results are ignored; the next signal decides when to run again.
            for target in &self.targets {
                target.trigger(&run).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNode;
    use crate::ReturnValue;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn each_line_triggers_every_child_then_eof_ends_the_driver() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signal.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let log = MockNode::shared_log();
        let a = Arc::new(MockNode::returning("a", ReturnValue::Retry).with_log(log.clone()));
        let b = Arc::new(MockNode::returning("b", ReturnValue::Ok).with_log(log.clone()));
        let mut driver = UnixSocketTrigger::new("flow__sock", &path);
        driver.add_target(a.clone());
        driver.add_target(b.clone());

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            conn.write_all(b"go\nagain\n").await.unwrap();
        });

        let err = driver.run(&TriggerContext::new("flow")).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, NodeError::SocketClosed { .. }));
        assert_eq!(driver.trigger_count(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn missing_socket_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let driver = UnixSocketTrigger::new("flow__sock", dir.path().join("absent.sock"));
        let err = driver.run(&TriggerContext::new("flow")).await.unwrap_err();
        assert!(matches!(err, NodeError::Socket { .. }));
    }

    #[tokio::test]
    async fn kill_while_idle_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signal.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let held = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            drop(conn);
        });

        let driver = UnixSocketTrigger::new("flow__sock", &path);
        let ctx = TriggerContext::new("flow");
        let killer = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            killer.cancel();
        });

        driver.run(&ctx).await.unwrap();
        held.abort();
    }
}
