//! The tri-state outcome of a trigger and its aggregation rule.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of triggering a node.
///
/// The variants are ordered `Stop < Ok < Retry`. Aggregating the results of
/// several targets keeps the *most urgent* one: a single `Retry` among
/// siblings wins over any number of `Ok`s, and an `Ok` wins over `Stop`.
/// `Stop` ranks lowest even though it is the terminal outcome for a driver.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ReturnValue {
    /// Nothing more to do; a timed driver receiving this stops looping.
    #[default]
    Stop = 0,
    /// The trigger succeeded.
    Ok = 1,
    /// The trigger failed in a recoverable way and should be retried.
    Retry = 2,
}

impl ReturnValue {
    /// Fold a set of results into one. Zero results aggregate to `Stop`.
    pub fn aggregate<I>(results: I) -> ReturnValue
    where
        I: IntoIterator<Item = ReturnValue>,
    {
        results.into_iter().max().unwrap_or(ReturnValue::Stop)
    }
}

impl FromIterator<ReturnValue> for ReturnValue {
    fn from_iter<T: IntoIterator<Item = ReturnValue>>(iter: T) -> Self {
        ReturnValue::aggregate(iter)
    }
}

impl fmt::Display for ReturnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReturnValue::Stop => "stop",
            ReturnValue::Ok => "ok",
            ReturnValue::Retry => "retry",
        };
        f.write_str(s)
    }
}
