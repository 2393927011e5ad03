use std::sync::Arc;

use super::{ClusterCall, ClusterService, LocalCluster, DISPATCHER_SERVICE, WORKER_SERVICE};
use crate::config::Opts;
use crate::dispatch::{ClusterDispatcher, ClusterWorker, DispatchHelper};
use crate::membership::{Membership, TargetNodeSetFactory};
use crate::node::NodeName;
use crate::registry::CollectorRegistry;
use crate::task::TaskManager;

/// Everything a node needs to take part in dispatches
///
/// A node owns one collector registry shared by its dispatcher (sending
/// tasks and receiving results) and its helper, plus a worker running the
/// tasks other nodes send to it.
pub struct ClusterNode {
    name: NodeName,
    registry: Arc<CollectorRegistry>,
    dispatcher: Arc<ClusterDispatcher>,
    worker: Arc<ClusterWorker>,
    targets: Arc<TargetNodeSetFactory>,
    helper: DispatchHelper,
}

impl ClusterNode {
    pub fn new(
        name: NodeName,
        cluster: Arc<dyn ClusterCall>,
        membership: Arc<dyn Membership>,
        tasks: Arc<dyn TaskManager>,
        opts: &Opts,
    ) -> Self {
        let registry = Arc::new(CollectorRegistry::new(
            opts.registry_idle_timeout,
            opts.registry_max_entries,
        ));
        let dispatcher = Arc::new(ClusterDispatcher::new(
            name.clone(),
            Arc::clone(&cluster),
            Arc::clone(&registry),
            Arc::clone(&tasks),
            opts,
        ));
        let worker = Arc::new(ClusterWorker::new(
            name.clone(),
            cluster,
            tasks,
            opts.retry_policy(),
        ));
        let targets = Arc::new(TargetNodeSetFactory::new(name.clone(), membership));
        let helper = DispatchHelper::new(
            Arc::clone(&dispatcher),
            Arc::clone(&targets),
            opts.response_timeout,
        );

        ClusterNode {
            name,
            registry,
            dispatcher,
            worker,
            targets,
            helper,
        }
    }

    /// Expose the worker and dispatcher endpoints of this node on `cluster`
    ///
    /// The cluster only keeps weak references, the node stays reachable for
    /// as long as it is alive.
    pub fn join(&self, cluster: &LocalCluster) {
        let worker: Arc<dyn ClusterService> = self.worker.clone();
        let dispatcher: Arc<dyn ClusterService> = self.dispatcher.clone();
        cluster.register(self.name.clone(), WORKER_SERVICE, &worker);
        cluster.register(self.name.clone(), DISPATCHER_SERVICE, &dispatcher);
    }

    pub fn name(&self) -> &NodeName {
        &self.name
    }

    pub fn registry(&self) -> &Arc<CollectorRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<ClusterDispatcher> {
        &self.dispatcher
    }

    pub fn worker(&self) -> &Arc<ClusterWorker> {
        &self.worker
    }

    pub fn targets(&self) -> &Arc<TargetNodeSetFactory> {
        &self.targets
    }

    pub fn helper(&self) -> &DispatchHelper {
        &self.helper
    }

    /// Stop accepting new dispatches from this node
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}
