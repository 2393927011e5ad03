use thiserror::Error;

use crate::cluster::TransportError;
use crate::collector::CollectorId;
use crate::node::NodeName;
use crate::task::{IdNotAssigned, TaskId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid dispatch: no {0} given")]
    InvalidDispatch(&'static str),

    #[error("cannot dispatch outside of a running task")]
    NoTaskContext,

    #[error("task {0} has been terminated")]
    TaskTerminated(TaskId),

    #[error(transparent)]
    Registry(#[from] crate::registry::Error),

    #[error(transparent)]
    Membership(#[from] crate::membership::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("node {node} no longer accepts results for collector {collector}")]
    ResultRejected {
        node: NodeName,
        collector: CollectorId,
    },

    #[error("failed to deliver result to node {node} after {attempts} attempts: {source}")]
    DeliveryFailed {
        node: NodeName,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    IdNotAssigned(#[from] IdNotAssigned),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown method {service}::{method}")]
    UnknownMethod { service: String, method: String },
}
