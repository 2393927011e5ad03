use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::ClusterDispatcher;
use crate::collector::{CollectorId, Completion, ResultCollector};
use crate::error::Error;
use crate::membership::{TargetNodeSetFactory, TargetType};
use crate::node::NodeName;
use crate::registry::CollectorRegistry;
use crate::task::{ClusterTask, TaskHandle};

/// The nodes a task should run on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Nodes selected from the cluster state at dispatch time
    Type(TargetType),
    Node(NodeName),
    Nodes(BTreeSet<NodeName>),
}

impl From<TargetType> for Target {
    fn from(target: TargetType) -> Self {
        Target::Type(target)
    }
}

impl From<NodeName> for Target {
    fn from(node: NodeName) -> Self {
        Target::Node(node)
    }
}

impl From<BTreeSet<NodeName>> for Target {
    fn from(nodes: BTreeSet<NodeName>) -> Self {
        Target::Nodes(nodes)
    }
}

/// Removes a collector from the registry when dropped
struct Deregister<'a> {
    registry: &'a CollectorRegistry,
    id: CollectorId,
}

impl Drop for Deregister<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Dispatches a task and waits for the results
pub struct DispatchHelper {
    dispatcher: Arc<ClusterDispatcher>,
    targets: Arc<TargetNodeSetFactory>,
    timeout: Duration,
}

impl DispatchHelper {
    pub fn new(
        dispatcher: Arc<ClusterDispatcher>,
        targets: Arc<TargetNodeSetFactory>,
        timeout: Duration,
    ) -> Self {
        DispatchHelper {
            dispatcher,
            targets,
            timeout,
        }
    }

    pub fn is_cluster_state_initialised(&self) -> bool {
        self.targets.is_cluster_state_initialised()
    }

    /// Run `task` on `target` and wait for the results using the
    /// configured response timeout
    pub async fn exec_async(
        &self,
        task: ClusterTask,
        target: impl Into<Target>,
    ) -> Result<Arc<ResultCollector>, Error> {
        self.exec_async_with_timeout(task, target, Some(self.timeout))
            .await
    }

    /// Run `task` on `target` and wait for the results
    ///
    /// Must be called from within a running task, see
    /// [`ClusterDispatcher::exec_async`]. The wait ends once every node replied, after `timeout` passes
    /// without any reply, or when the calling task is terminated. The
    /// collector is unregistered before returning, whatever the outcome.
    pub async fn exec_async_with_timeout(
        &self,
        task: ClusterTask,
        target: impl Into<Target>,
        timeout: Option<Duration>,
    ) -> Result<Arc<ResultCollector>, Error> {
        let parent = TaskHandle::current().ok_or(Error::NoTaskContext)?;
        let nodes = match target.into() {
            Target::Type(target) => self.targets.resolve(target)?,
            Target::Node(node) => BTreeSet::from([node]),
            Target::Nodes(nodes) => nodes,
        };

        let collector = self.dispatcher.exec_async(task, nodes)?;
        let _deregister = Deregister {
            registry: self.dispatcher.registry(),
            id: *collector.id(),
        };

        let completion = tokio::select! {
            completion = collector.wait_to_complete(timeout) => completion,
            _ = parent.terminated() => {
                collector.terminate();
                Completion::Terminated
            }
        };

        let name = collector.task().name();
        match completion {
            Completion::Complete => debug!(collector = %collector.id(), "{name}: all nodes replied"),
            Completion::Terminated => {
                debug!(collector = %collector.id(), "{name}: terminated while waiting for replies")
            }
            Completion::TimedOut => {
                let missing: Vec<String> =
                    collector.missing_nodes().iter().map(|n| n.to_string()).collect();
                warn!(
                    collector = %collector.id(),
                    "{name}: no reply from {} after waiting {:?}",
                    missing.join(", "),
                    timeout.unwrap_or_default()
                );
            }
        }
        for (node, err) in collector.failures() {
            debug!(collector = %collector.id(), "{name}: failed on {node}: {err}");
        }

        Ok(collector)
    }
}
