//! `engine` crate: descriptions, the object store and the flow graph builder.

pub mod dag;
pub mod error;
pub mod flow;
pub mod models;
pub mod store;
pub mod walk;

pub use dag::validate_flows;
pub use error::EngineError;
pub use flow::{BuildReport, BuiltFlow, Flow, FlowForest, FlowNode};
pub use models::{Dependencies, Parsed, TriggerableDescription, TriggererDescription};
pub use store::ObjectStore;

#[cfg(test)]
mod flow_tests;
