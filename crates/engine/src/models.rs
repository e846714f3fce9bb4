//! Descriptions: the parsed, immutable form of every description file.
//!
//! A description knows its declared name and how to turn itself into a
//! live node under a caller-supplied unique prefix. The live node's ID is
//! always `<unique>__<name>`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use nodes::job::JobConfig;
use nodes::{
    CredentialStore, CronSchedule, FanOut, Job, JobPreconditions, NodeError, Retry, Timed,
    Triggerable, Triggerer,
};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// `{ "Kind": { "Name": <kind> }, "Spec": <payload> }`
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Kind", default)]
    pub kind: Option<KindRef>,
    #[serde(rename = "Spec", default)]
    pub spec: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KindRef {
    #[serde(rename = "Name", default)]
    pub name: String,
}

// ---------------------------------------------------------------------------
// Instantiation
// ---------------------------------------------------------------------------

/// Collaborators handed to every instantiation.
#[derive(Clone)]
pub struct Dependencies {
    pub credentials: Arc<dyn CredentialStore>,
    /// Variable jobs export their secret as when they name none; empty keeps
    /// the job default.
    pub secret_env: String,
}

impl Dependencies {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            credentials,
            secret_env: String::new(),
        }
    }

    pub fn with_secret_env(mut self, secret_env: impl Into<String>) -> Self {
        self.secret_env = secret_env.into();
        self
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("secret_env", &self.secret_env)
            .finish_non_exhaustive()
    }
}

/// A description that can be instantiated as a child node.
pub trait TriggerableDescription: Send + Sync + fmt::Debug {
    /// Declared name; the key in the store.
    fn id(&self) -> &str;

    fn instantiate(&self, unique: &str, deps: &Dependencies) -> Result<Arc<dyn Triggerable>, NodeError>;
}

/// A description that can be instantiated as a node taking targets.
pub trait TriggererDescription: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn instantiate(&self, unique: &str, deps: &Dependencies) -> Result<Box<dyn Triggerer>, NodeError>;
}

/// What a kind parser produced for one file.
#[derive(Debug, Default, Clone)]
pub struct Parsed {
    pub triggerer: Option<Arc<dyn TriggererDescription>>,
    pub triggerable: Option<Arc<dyn TriggerableDescription>>,
}

impl Parsed {
    pub fn triggerer<D: TriggererDescription + 'static>(d: D) -> Self {
        Self {
            triggerer: Some(Arc::new(d)),
            triggerable: None,
        }
    }

    pub fn triggerable<D: TriggerableDescription + 'static>(d: D) -> Self {
        Self {
            triggerer: None,
            triggerable: Some(Arc::new(d)),
        }
    }

    /// One description registered in both roles.
    pub fn both<D>(d: D) -> Self
    where
        D: TriggererDescription + TriggerableDescription + 'static,
    {
        let d = Arc::new(d);
        Self {
            triggerer: Some(d.clone()),
            triggerable: Some(d),
        }
    }
}

fn node_id(unique: &str, name: &str) -> String {
    format!("{unique}__{name}")
}

fn granularity(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Username", default)]
    pub username: String,
    #[serde(rename = "Service", default)]
    pub service: String,
    #[serde(rename = "ResticPath", default)]
    pub restic_path: String,
    #[serde(rename = "ResticArguments", default)]
    pub restic_arguments: Vec<String>,
    #[serde(rename = "Preconditions", default)]
    pub preconditions: JobPreconditions,
    #[serde(rename = "CheckPrecondsMaxTimes", default)]
    pub check_preconds_max_times: u32,
    #[serde(rename = "CheckPrecondsEveryMilli", default)]
    pub check_preconds_every_milli: u64,
    #[serde(rename = "SecretEnv", default)]
    pub secret_env: String,
}

impl JobDescription {
    pub fn to_config(&self, deps: &Dependencies) -> JobConfig {
        let secret_env = if self.secret_env.is_empty() {
            deps.secret_env.clone()
        } else {
            self.secret_env.clone()
        };
        JobConfig {
            name: self.name.clone(),
            username: self.username.clone(),
            service: self.service.clone(),
            executable: self.restic_path.clone(),
            arguments: self.restic_arguments.clone(),
            preconditions: self.preconditions.clone(),
            check_preconds_max_times: self.check_preconds_max_times,
            check_preconds_every: Duration::from_millis(self.check_preconds_every_milli),
            secret_env,
        }
    }
}

impl TriggerableDescription for JobDescription {
    fn id(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, unique: &str, deps: &Dependencies) -> Result<Arc<dyn Triggerable>, NodeError> {
        let job = Job::new(
            node_id(unique, &self.name),
            self.to_config(deps),
            deps.credentials.as_ref(),
        );
        Ok(Arc::new(job))
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanOutDescription {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Parallel", default)]
    pub parallel: bool,
}

impl FanOutDescription {
    fn build(&self, unique: &str) -> FanOut {
        FanOut::new(node_id(unique, &self.name), self.parallel)
    }
}

impl TriggerableDescription for FanOutDescription {
    fn id(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, unique: &str, _deps: &Dependencies) -> Result<Arc<dyn Triggerable>, NodeError> {
        Ok(Arc::new(self.build(unique)))
    }
}

impl TriggererDescription for FanOutDescription {
    fn id(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, unique: &str, _deps: &Dependencies) -> Result<Box<dyn Triggerer>, NodeError> {
        Ok(Box::new(self.build(unique)))
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryDescription {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Timer")]
    pub timer: String,
    /// Milliseconds; 0 picks the default slice.
    #[serde(rename = "WaitGranularity", default)]
    pub wait_granularity: u64,
    #[serde(rename = "MaxFailedRetries", default)]
    pub max_failed_retries: u32,
}

impl RetryDescription {
    fn build(&self, unique: &str) -> Result<Retry, NodeError> {
        let id = node_id(unique, &self.name);
        let schedule = CronSchedule::parse(&id, &self.timer)?;
        Ok(Retry::new(
            id,
            schedule,
            granularity(self.wait_granularity),
            self.max_failed_retries,
        ))
    }
}

impl TriggerableDescription for RetryDescription {
    fn id(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, unique: &str, _deps: &Dependencies) -> Result<Arc<dyn Triggerable>, NodeError> {
        Ok(Arc::new(self.build(unique)?))
    }
}

impl TriggererDescription for RetryDescription {
    fn id(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, unique: &str, _deps: &Dependencies) -> Result<Box<dyn Triggerer>, NodeError> {
        Ok(Box::new(self.build(unique)?))
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerDescription {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Timer")]
    pub timer: String,
    /// Falls back to `Timer` when empty.
    #[serde(rename = "RetryTimer", default)]
    pub retry_timer: String,
    #[serde(rename = "WaitGranularity", default)]
    pub wait_granularity: u64,
    #[serde(rename = "MaxFailedRetries", default)]
    pub max_failed_retries: u32,
    #[serde(rename = "Parallel", default)]
    pub parallel: bool,
}

impl TriggererDescription for TimerDescription {
    fn id(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, unique: &str, _deps: &Dependencies) -> Result<Box<dyn Triggerer>, NodeError> {
        let id = node_id(unique, &self.name);
        let regular = CronSchedule::parse(&id, &self.timer)?;
        let retry = match self.retry_timer.trim() {
            "" => None,
            expr => Some(CronSchedule::parse(&id, expr)?),
        };
        Ok(Box::new(Timed::new(
            id,
            regular,
            retry,
            granularity(self.wait_granularity),
            self.max_failed_retries,
            self.parallel,
        )))
    }
}

// ---------------------------------------------------------------------------
// Unix socket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnixDescription {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "SocketPath")]
    pub socket_path: String,
}

impl TriggererDescription for UnixDescription {
    fn id(&self) -> &str {
        &self.name
    }

    #[cfg(unix)]
    fn instantiate(&self, unique: &str, _deps: &Dependencies) -> Result<Box<dyn Triggerer>, NodeError> {
        Ok(Box::new(nodes::UnixSocketTrigger::new(
            node_id(unique, &self.name),
            &self.socket_path,
        )))
    }

    #[cfg(not(unix))]
    fn instantiate(&self, unique: &str, _deps: &Dependencies) -> Result<Box<dyn Triggerer>, NodeError> {
        Err(NodeError::UnsupportedRole {
            node: node_id(unique, &self.name),
            role: "unix socket listener",
        })
    }
}

// ---------------------------------------------------------------------------
// Default kind parsers
// ---------------------------------------------------------------------------

pub fn parse_job(spec: Value) -> Result<Parsed, serde_json::Error> {
    Ok(Parsed::triggerable(serde_json::from_value::<JobDescription>(spec)?))
}

pub fn parse_fanout(spec: Value) -> Result<Parsed, serde_json::Error> {
    Ok(Parsed::both(serde_json::from_value::<FanOutDescription>(spec)?))
}

/// Fan-out that always triggers its children concurrently.
pub fn parse_parallel_fanout(spec: Value) -> Result<Parsed, serde_json::Error> {
    let d = FanOutDescription {
        parallel: true,
        ..serde_json::from_value(spec)?
    };
    Ok(Parsed::both(d))
}

pub fn parse_retry(spec: Value) -> Result<Parsed, serde_json::Error> {
    Ok(Parsed::both(serde_json::from_value::<RetryDescription>(spec)?))
}

pub fn parse_timer(spec: Value) -> Result<Parsed, serde_json::Error> {
    Ok(Parsed::triggerer(serde_json::from_value::<TimerDescription>(spec)?))
}

pub fn parse_unix(spec: Value) -> Result<Parsed, serde_json::Error> {
    Ok(Parsed::triggerer(serde_json::from_value::<UnixDescription>(spec)?))
}
