//! `nodes` crate: the capability traits and the built-in node kinds.
//!
//! Every node of a flow graph implements [`Triggerable`], [`Triggerer`] or
//! both. The engine crate instantiates them from descriptions and wires
//! them together through these trait objects.

pub mod credentials;
pub mod error;
pub mod fanout;
pub mod job;
pub mod mock;
pub mod precondition;
pub mod result;
pub mod retry;
pub mod schedule;
#[cfg(unix)]
pub mod socket;
pub mod timed;
pub mod traits;

pub use credentials::{CredentialStore, EnvStore, KeyringStore, StaticStore};
pub use error::NodeError;
pub use fanout::FanOut;
pub use job::{Job, JobConfig};
pub use precondition::{HostPort, JobPreconditions};
pub use result::ReturnValue;
pub use retry::Retry;
pub use schedule::CronSchedule;
#[cfg(unix)]
pub use socket::UnixSocketTrigger;
pub use timed::Timed;
pub use traits::{Node, NodeStatus, TriggerContext, Triggerable, Triggerer, WaitWindow};
