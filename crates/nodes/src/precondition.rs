//! Readiness checks evaluated before a job's command is spawned.
//!
//! A set of checks is a conjunction. Every check is evaluated on every poll
//! (no short-circuiting) so each failing check shows up in the log, and the
//! checks run concurrently since they are independent of each other.

use std::path::Path;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::error;

/// A host that must accept a TCP connection on `port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPort {
    #[serde(rename = "Host")]
    pub host: String,
    #[serde(rename = "Port")]
    pub port: u16,
}

/// The conjunctive readiness checks of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPreconditions {
    /// Paths that must exist; directories must also be non-empty.
    #[serde(rename = "PathesMust", default)]
    pub paths_must_exist: Vec<String>,
    /// Host names that must resolve.
    #[serde(rename = "HostsMustRoute", default)]
    pub hosts_must_route: Vec<String>,
    /// Endpoints that must accept a connection.
    #[serde(rename = "HostsMustConnect", default)]
    pub hosts_must_connect: Vec<HostPort>,
}

impl JobPreconditions {
    pub fn is_empty(&self) -> bool {
        self.paths_must_exist.is_empty()
            && self.hosts_must_route.is_empty()
            && self.hosts_must_connect.is_empty()
    }

    /// Evaluate every check and AND the results.
    pub async fn check_all(&self) -> bool {
        let paths = join_all(self.paths_must_exist.iter().map(|p| async move {
            let ok = check_path(Path::new(p)).await;
            if !ok {
                error!(path = %p, "precondition failed");
            }
            ok
        }));
        let routes = join_all(self.hosts_must_route.iter().map(|h| async move {
            let ok = check_route(h).await;
            if !ok {
                error!(host = %h, "precondition failed");
            }
            ok
        }));
        let connects = join_all(self.hosts_must_connect.iter().map(|hp| async move {
            let ok = check_connect(hp).await;
            if !ok {
                error!(host = %hp.host, port = hp.port, "precondition failed");
            }
            ok
        }));

        let (paths, routes, connects) = tokio::join!(paths, routes, connects);
        paths
            .into_iter()
            .chain(routes)
            .chain(connects)
            .all(|ok| ok)
    }
}

/// Exists, and when it is a directory, has at least one entry.
pub async fn check_path(path: &Path) -> bool {
    let meta = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(_) => return false,
    };
    if !meta.is_dir() {
        return true;
    }
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

/// The host name resolves to at least one address.
pub async fn check_route(host: &str) -> bool {
    match tokio::net::lookup_host((host, 0)).await {
        Ok(mut addrs) => addrs.next().is_some(),
        Err(_) => false,
    }
}

pub async fn check_connect(target: &HostPort) -> bool {
    tokio::net::TcpStream::connect((target.host.as_str(), target.port))
        .await
        .is_ok()
}
