use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{message}")]
/// A failure reported by a remote node
///
/// Errors cannot cross the wire as they are, so only their rendered
/// message is kept.
pub struct RemoteError {
    message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        RemoteError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for RemoteError {
    fn from(err: anyhow::Error) -> Self {
        RemoteError::new(format!("{err:#}"))
    }
}

/// The outcome of a task on one node
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCallEntry {
    outcome: Result<Value, RemoteError>,
    time_ms: u64,
}

impl ClusterCallEntry {
    pub(crate) fn new(outcome: Result<Value, RemoteError>, elapsed: Duration) -> Self {
        ClusterCallEntry {
            outcome,
            time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The value returned by the node, if it succeeded
    pub fn result(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    /// The failure reported for the node, if any
    pub fn error(&self) -> Option<&RemoteError> {
        self.outcome.as_ref().err()
    }

    pub fn result_as<R: DeserializeOwned>(&self) -> Option<Result<R, serde_json::Error>> {
        self.result().map(R::deserialize)
    }

    pub fn outcome(&self) -> &Result<Value, RemoteError> {
        &self.outcome
    }

    /// Milliseconds between the start of the dispatch and the arrival
    /// of this outcome
    pub fn time_ms(&self) -> u64 {
        self.time_ms
    }
}
