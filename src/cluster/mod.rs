//! The remote call substrate
//!
//! Dispatching only needs a way to invoke a named method of a named service
//! on another node. [`ClusterCall`] is that primitive, [`ClusterService`] is
//! the receiving end. [`LocalCluster`] connects services living in the same
//! process, which is enough to run whole clusters in tests.
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

mod local;
mod node;

pub use local::LocalCluster;
pub use node::ClusterNode;

use crate::node::NodeName;

/// Name of the service running tasks on worker nodes
pub const WORKER_SERVICE: &str = "ClusterWorker";

/// Name of the service receiving results on source nodes
pub const DISPATCHER_SERVICE: &str = "ClusterDispatcher";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("node {node} is unreachable")]
    Unreachable { node: NodeName },

    #[error("service {service} is not available on node {node}")]
    ServiceNotFound { node: NodeName, service: String },

    #[error("remote call failed: {0}")]
    Remote(String),

    /// The call reached the service, which failed to handle it
    #[error("remote service failed: {0}")]
    Service(String),

    #[error("failed to encode remote call: {0}")]
    Codec(#[from] serde_json::Error),
}

impl TransportError {
    /// True if repeating the call may succeed
    ///
    /// Errors raised by the remote service or while encoding the call
    /// will fail the same way every time.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Service(_) | TransportError::Codec(_))
    }
}

/// Invokes a method of a service running on another node
#[async_trait]
pub trait ClusterCall: Send + Sync {
    async fn call(
        &self,
        source: &NodeName,
        target: &NodeName,
        service: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, TransportError>;
}

/// A service that can be called from other nodes
#[async_trait]
pub trait ClusterService: Send + Sync {
    async fn invoke(
        &self,
        source: &NodeName,
        method: &str,
        args: Value,
    ) -> Result<Value, crate::Error>;
}
