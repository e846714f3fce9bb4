//! The leaf node: runs one external command.
//!
//! A job owns its command line, the secret injected into the command's
//! environment and its readiness checks. Executions of one job never
//! overlap: a trigger arriving while another is in flight waits for it and
//! then runs again.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::credentials::CredentialStore;
use crate::precondition::JobPreconditions;
use crate::traits::{Node, NodeStatus, TriggerContext, Triggerable};
use crate::ReturnValue;

/// Binary run when a job does not name one.
pub const DEFAULT_BINARY: &str = "restic";
/// Variable the secret is passed in unless the job picks another.
pub const DEFAULT_SECRET_ENV: &str = "RESTIC_PASSWORD";

/// Exit code recorded when the process gave none (spawn failure, signal).
const FALLBACK_EXIT_CODE: i32 = 1;

/// Static configuration of a job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobConfig {
    pub name: String,
    pub username: String,
    pub service: String,
    /// Executable to run; empty means [`DEFAULT_BINARY`].
    pub executable: String,
    pub arguments: Vec<String>,
    pub preconditions: JobPreconditions,
    /// Number of precondition polls; 0 disables the checks.
    pub check_preconds_max_times: u32,
    pub check_preconds_every: Duration,
    /// Variable the secret is exported as; empty means [`DEFAULT_SECRET_ENV`].
    pub secret_env: String,
}

impl JobConfig {
    fn program(&self) -> &str {
        if self.executable.is_empty() {
            DEFAULT_BINARY
        } else {
            &self.executable
        }
    }

    fn secret_variable(&self) -> &str {
        if self.secret_env.is_empty() {
            DEFAULT_SECRET_ENV
        } else {
            &self.secret_env
        }
    }
}

/// What the process collaborator reports back.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub stderr: String,
    pub spawn_error: Option<std::io::Error>,
}

/// Spawn `program` with `args`, optionally exporting `secret` as `secret_var`,
/// capture stderr and wait for it to exit.
pub async fn spawn_process(
    program: &str,
    args: &[String],
    secret: Option<(&str, &str)>,
) -> ProcessOutcome {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    if let Some((var, value)) = secret {
        cmd.env(var, value);
    }

    match cmd.output().await {
        Ok(output) => ProcessOutcome {
            exit_code: output.status.code().unwrap_or(FALLBACK_EXIT_CODE),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            spawn_error: None,
        },
        Err(e) => ProcessOutcome {
            exit_code: FALLBACK_EXIT_CODE,
            stderr: String::new(),
            spawn_error: Some(e),
        },
    }
}

pub struct Job {
    id: String,
    config: JobConfig,
    secret: Option<String>,
    /// Held for the whole of `run`, process wait included.
    run_lock: tokio::sync::Mutex<()>,
    trigger_count: AtomicU64,
    last_exit_code: Mutex<Option<i32>>,
}

impl Job {
    /// Build a job, fetching its secret from `credentials` once.
    ///
    /// A failed lookup is logged and leaves the job without a secret; the
    /// command still runs.
    pub fn new(id: impl Into<String>, config: JobConfig, credentials: &dyn CredentialStore) -> Self {
        let id = id.into();
        let secret = match credentials.get(&config.service, &config.username) {
            Ok(secret) => {
                info!(job = %id, "retrieved password");
                Some(secret)
            }
            Err(e) => {
                warn!(
                    job = %id,
                    user = %config.username,
                    service = %config.service,
                    error = %e,
                    "couldn't retrieve password"
                );
                None
            }
        };
        Self::with_secret(id, config, secret)
    }

    pub fn with_secret(id: impl Into<String>, config: JobConfig, secret: Option<String>) -> Self {
        Self {
            id: id.into(),
            config,
            secret,
            run_lock: tokio::sync::Mutex::new(()),
            trigger_count: AtomicU64::new(0),
            last_exit_code: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    pub fn trigger_count(&self) -> u64 {
        self.trigger_count.load(Ordering::SeqCst)
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        *self.last_exit_code.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn check_preconditions(&self) -> bool {
        self.config.preconditions.check_all().await
    }

    /// Poll the preconditions up to `check_preconds_max_times` times.
    async fn wait_preconditions(&self) -> bool {
        let max = self.config.check_preconds_max_times;
        if max == 0 {
            return true;
        }
        for attempt in 1..=max {
            if self.check_preconditions().await {
                return true;
            }
            if attempt < max {
                tokio::time::sleep(self.config.check_preconds_every).await;
            }
        }
        false
    }

    /// Run the command once, serialized against every other run of this job.
    #[instrument(skip(self), fields(job = %self.id))]
    pub async fn run(&self) -> ReturnValue {
        let _guard = self.run_lock.lock().await;

        if !self.wait_preconditions().await {
            warn!("preconditions not met, command not started");
            return ReturnValue::Retry;
        }

        let secret = self
            .secret
            .as_deref()
            .map(|s| (self.config.secret_variable(), s));

        info!(program = %self.config.program(), "run command");
        let outcome = spawn_process(self.config.program(), &self.config.arguments, secret).await;
        info!(exit_code = outcome.exit_code, "finished running command");

        *self.last_exit_code.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome.exit_code);

        if let Some(e) = &outcome.spawn_error {
            warn!(error = %e, "command could not be started");
        } else if outcome.exit_code != 0 {
            warn!(
                exit_code = outcome.exit_code,
                message = %outcome.stderr.trim(),
                "command failed"
            );
        }

        match outcome.exit_code {
            0 => ReturnValue::Ok,
            _ => ReturnValue::Retry,
        }
    }
}

impl Node for Job {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            last_exit_code: self.last_exit_code(),
            trigger_count: self.trigger_count(),
            ..NodeStatus::new(&self.id, "job")
        }
    }
}

#[async_trait]
impl Triggerable for Job {
    async fn trigger(&self, _ctx: &TriggerContext) -> ReturnValue {
        self.trigger_count.fetch_add(1, Ordering::SeqCst);
        self.run().await
    }
}
