use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::trace;

use super::{ClusterCall, ClusterService, TransportError};
use crate::node::NodeName;

/// An in-process transport
///
/// Services are held weakly: once the owner of a service drops it, calls to
/// its node fail as if the node had left the cluster. Each call runs on its
/// own tokio task, so the callee is not cancelled along with the caller.
#[derive(Default)]
pub struct LocalCluster {
    services: DashMap<(NodeName, String), Weak<dyn ClusterService>>,
}

impl LocalCluster {
    pub fn new() -> Self {
        LocalCluster::default()
    }

    /// Expose `service` under `name` on `node`
    pub fn register(&self, node: NodeName, name: &str, service: &Arc<dyn ClusterService>) {
        self.services
            .insert((node, name.to_string()), Arc::downgrade(service));
    }

    /// Remove every service of `node`
    pub fn deregister(&self, node: &NodeName) {
        self.services.retain(|(owner, _), _| owner != node);
    }

    fn lookup(&self, node: &NodeName, name: &str) -> Result<Arc<dyn ClusterService>, TransportError> {
        let service = self
            .services
            .get(&(node.clone(), name.to_string()))
            .map(|service| service.value().clone());

        match service {
            Some(service) => service.upgrade().ok_or_else(|| TransportError::Unreachable {
                node: node.clone(),
            }),
            None if self.services.iter().any(|entry| &entry.key().0 == node) => {
                Err(TransportError::ServiceNotFound {
                    node: node.clone(),
                    service: name.to_string(),
                })
            }
            None => Err(TransportError::Unreachable { node: node.clone() }),
        }
    }
}

#[async_trait]
impl ClusterCall for LocalCluster {
    async fn call(
        &self,
        source: &NodeName,
        target: &NodeName,
        service: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, TransportError> {
        trace!(%source, %target, "calling {service}::{method}");
        let callee = self.lookup(target, service)?;

        let source = source.clone();
        let method = method.to_string();
        let call = tokio::spawn(async move { callee.invoke(&source, &method, args).await });

        match call.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TransportError::Service(err.to_string())),
            Err(err) => Err(TransportError::Remote(err.to_string())),
        }
    }
}
