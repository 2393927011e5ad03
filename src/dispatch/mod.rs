//! Fan-out of tasks to worker nodes and fan-in of their results
//!
//! A dispatch starts on the source node with [`ClusterDispatcher::exec_async`],
//! which registers a [`ResultCollector`] and calls the [`ClusterWorker`] of
//! every target node. Workers run the task locally and send the outcome
//! back to the [`ClusterDispatcher`] of the source node, which routes it to
//! the collector by id. [`DispatchHelper`] wraps the whole round trip.
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, span, warn, Instrument, Level};

mod helper;
mod wire;
mod worker;

pub use helper::{DispatchHelper, Target};
pub use worker::ClusterWorker;

use wire::{ExecAsyncRequest, ReceiveResultRequest, EXEC_ASYNC, RECEIVE_RESULT};

use crate::cluster::{ClusterCall, ClusterService, DISPATCHER_SERVICE, WORKER_SERVICE};
use crate::collector::{CollectorId, RemoteError, ResultCollector};
use crate::config::Opts;
use crate::error::Error;
use crate::node::NodeName;
use crate::registry::CollectorRegistry;
use crate::task::{ClusterTask, TaskHandle, TaskId, TaskManager};

/// The source side of a dispatch
pub struct ClusterDispatcher {
    node: NodeName,
    cluster: Arc<dyn ClusterCall>,
    registry: Arc<CollectorRegistry>,
    tasks: Arc<dyn TaskManager>,
    dispatch_pool: Arc<Semaphore>,
    result_pool: Arc<Semaphore>,
    slow_result_threshold: Duration,
}

impl ClusterDispatcher {
    pub fn new(
        node: NodeName,
        cluster: Arc<dyn ClusterCall>,
        registry: Arc<CollectorRegistry>,
        tasks: Arc<dyn TaskManager>,
        opts: &Opts,
    ) -> Self {
        ClusterDispatcher {
            node,
            cluster,
            registry,
            tasks,
            dispatch_pool: Arc::new(Semaphore::new(opts.dispatch_pool_size)),
            result_pool: Arc::new(Semaphore::new(opts.result_pool_size)),
            slow_result_threshold: opts.slow_result_threshold,
        }
    }

    pub fn node(&self) -> &NodeName {
        &self.node
    }

    pub fn registry(&self) -> &Arc<CollectorRegistry> {
        &self.registry
    }

    /// Send `task` to every node in `target_nodes`
    ///
    /// Must be called from within a running task, which becomes the source
    /// task of the dispatch. The returned collector is registered and
    /// receives results as they come back; calls to the workers are made
    /// in the background. A call that fails before reaching a worker is
    /// recorded as that node's failure and is not retried.
    pub fn exec_async(
        &self,
        task: ClusterTask,
        target_nodes: BTreeSet<NodeName>,
    ) -> Result<Arc<ResultCollector>, Error> {
        let parent = TaskHandle::current().ok_or(Error::NoTaskContext)?;
        if parent.is_terminated() {
            return Err(Error::TaskTerminated(*parent.id()));
        }
        if task.kind().is_empty() {
            return Err(Error::InvalidDispatch("task"));
        }
        if self.node.is_empty() {
            return Err(Error::InvalidDispatch("source node"));
        }
        if target_nodes.is_empty() {
            return Err(Error::InvalidDispatch("target nodes"));
        }

        let mut task = task;
        task.default_name();

        let collector = Arc::new(ResultCollector::new(
            task.clone(),
            self.node.clone(),
            target_nodes.clone(),
        ));
        let collector_id = *collector.id();
        let args = serde_json::to_value(ExecAsyncRequest {
            task,
            source_node: self.node.clone(),
            source_task_id: *parent.id(),
            collector_id,
        })?;

        self.registry.put(collector_id, Arc::clone(&collector))?;
        debug!(
            collector = %collector_id,
            "dispatching {} to {} node(s)",
            collector.task().name(),
            target_nodes.len()
        );

        for target in target_nodes {
            let source = self.node.clone();
            let cluster = Arc::clone(&self.cluster);
            let pool = Arc::clone(&self.dispatch_pool);
            let collector = Arc::clone(&collector);
            let args = args.clone();
            let span = span!(
                Level::DEBUG,
                "dispatch",
                task = collector.task().name(),
                node = %target,
                collector = %collector_id
            );

            tokio::spawn(
                async move {
                    let Ok(_permit) = pool.acquire_owned().await else {
                        return;
                    };
                    if let Err(err) = cluster
                        .call(&source, &target, WORKER_SERVICE, EXEC_ASYNC, args)
                        .await
                    {
                        warn!("failed to send task: {err}");
                        collector.on_failure(target, RemoteError::new(err.to_string()));
                    }
                }
                .instrument(span),
            );
        }

        Ok(collector)
    }

    /// Accept a result sent back by a worker
    ///
    /// Returns true if the result was accepted for delivery to its
    /// collector. A result arriving after the source task has ended or the
    /// collector has stopped waiting is refused. Handling that takes longer
    /// than the slow result threshold, counting the time spent waiting for
    /// the result pool, is logged.
    pub fn receive_result(
        &self,
        task: ClusterTask,
        target_node: NodeName,
        source_task_id: Option<TaskId>,
        collector_id: CollectorId,
        outcome: Result<Value, RemoteError>,
    ) -> bool {
        let start = Instant::now();
        let Some(source_task_id) = source_task_id else {
            error!(
                collector = %collector_id,
                node = %target_node,
                "received result for {} without a source task id",
                task.name()
            );
            return false;
        };

        let parent = match self.tasks.find(&source_task_id) {
            Some(parent) if !parent.is_terminated() => parent,
            _ => {
                warn!(
                    collector = %collector_id,
                    node = %target_node,
                    "source task {source_task_id} for {} is no longer running",
                    task.name()
                );
                return false;
            }
        };

        let Some(collector) = self.registry.get(&collector_id) else {
            error!(
                node = %target_node,
                "collector {collector_id} for {} not found",
                task.name()
            );
            return false;
        };

        if !collector.on_receive() {
            debug!(
                collector = %collector_id,
                node = %target_node,
                "collector stopped waiting, dropping result"
            );
            return false;
        }

        let pool = Arc::clone(&self.result_pool);
        let threshold = self.slow_result_threshold;
        let span = span!(
            Level::DEBUG,
            "receive_result",
            task = task.name(),
            node = %target_node,
            collector = %collector_id
        );
        tokio::spawn(
            parent.scope(
                async move {
                    let Ok(_permit) = pool.acquire_owned().await else {
                        return;
                    };
                    collector.record(target_node, outcome);

                    let elapsed = start.elapsed();
                    if elapsed > threshold {
                        warn!("handling result took {elapsed:?}");
                    }
                }
                .instrument(span),
            ),
        );

        true
    }
}

#[async_trait]
impl ClusterService for ClusterDispatcher {
    async fn invoke(&self, _source: &NodeName, method: &str, args: Value) -> Result<Value, Error> {
        match method {
            RECEIVE_RESULT => {
                let ReceiveResultRequest {
                    task,
                    target_node,
                    source_task_id,
                    collector_id,
                    outcome,
                } = serde_json::from_value(args)?;
                let accepted =
                    self.receive_result(task, target_node, source_task_id, collector_id, outcome);
                Ok(Value::Bool(accepted))
            }
            _ => Err(Error::UnknownMethod {
                service: DISPATCHER_SERVICE.to_string(),
                method: method.to_string(),
            }),
        }
    }
}
