use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, span, warn, Instrument, Level};

use super::wire::{ExecAsyncRequest, ReceiveResultRequest, EXEC_ASYNC, RECEIVE_RESULT};
use crate::cluster::{
    ClusterCall, ClusterService, TransportError, DISPATCHER_SERVICE, WORKER_SERVICE,
};
use crate::collector::{CollectorId, RemoteError};
use crate::error::Error;
use crate::node::NodeName;
use crate::retry::RetryPolicy;
use crate::task::{ClusterTask, TaskId, TaskManager};

/// The worker side of a dispatch
///
/// Runs tasks received from source nodes and sends their outcome back,
/// retrying the delivery according to its [`RetryPolicy`].
#[derive(Clone)]
pub struct ClusterWorker {
    node: NodeName,
    cluster: Arc<dyn ClusterCall>,
    tasks: Arc<dyn TaskManager>,
    retry: RetryPolicy,
}

impl ClusterWorker {
    pub fn new(
        node: NodeName,
        cluster: Arc<dyn ClusterCall>,
        tasks: Arc<dyn TaskManager>,
        retry: RetryPolicy,
    ) -> Self {
        ClusterWorker {
            node,
            cluster,
            tasks,
            retry,
        }
    }

    pub fn node(&self) -> &NodeName {
        &self.node
    }

    /// Start running `task` on behalf of `source_task_id`
    ///
    /// Returns as soon as the task is handed over to the task manager; the
    /// outcome is sent back to `source_node` once the task finishes.
    pub fn exec_async(
        &self,
        task: ClusterTask,
        source_node: NodeName,
        source_task_id: TaskId,
        collector_id: CollectorId,
    ) {
        let mut task = task;
        task.assign_id(TaskId::derive(&source_task_id));

        let worker = self.clone();
        let span = span!(
            Level::DEBUG,
            "exec_async",
            task = task.name(),
            source = %source_node,
            collector = %collector_id
        );
        tokio::spawn(
            async move {
                let outcome = worker.tasks.execute(task.clone()).await;
                if let Err(err) = &outcome {
                    debug!("task failed: {err}");
                }

                match worker
                    .send_result(task, source_node, source_task_id, collector_id, outcome)
                    .await
                {
                    Ok(()) => debug!("result delivered"),
                    Err(err @ Error::ResultRejected { .. }) => warn!("{err}"),
                    Err(err) => error!("{err}"),
                }
            }
            .instrument(span),
        );
    }

    /// Send the outcome of a task back to the source node
    ///
    /// Transport failures are retried. A source that receives the result
    /// but refuses it is not retried and results in
    /// [`Error::ResultRejected`], neither is a source failing to handle the
    /// call at all.
    pub async fn send_result(
        &self,
        task: ClusterTask,
        source_node: NodeName,
        source_task_id: TaskId,
        collector_id: CollectorId,
        outcome: Result<Value, RemoteError>,
    ) -> Result<(), Error> {
        let args = serde_json::to_value(ReceiveResultRequest {
            task,
            target_node: self.node.clone(),
            source_task_id: Some(source_task_id),
            collector_id,
            outcome,
        })?;

        let attempts = AtomicU32::new(0);
        let cluster = &self.cluster;
        let (node, target) = (&self.node, &source_node);
        let reply = self
            .retry
            .run_if(
                || {
                    let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let args = args.clone();
                    async move {
                        cluster
                            .call(node, target, DISPATCHER_SERVICE, RECEIVE_RESULT, args)
                            .await
                            .inspect_err(|err| debug!("delivery attempt {attempt} failed: {err}"))
                    }
                },
                TransportError::is_transient,
            )
            .await
            .map_err(|source| Error::DeliveryFailed {
                node: source_node.clone(),
                attempts: attempts.load(Ordering::SeqCst),
                source,
            })?;

        match reply {
            Value::Bool(true) => Ok(()),
            _ => Err(Error::ResultRejected {
                node: source_node,
                collector: collector_id,
            }),
        }
    }
}

#[async_trait]
impl ClusterService for ClusterWorker {
    async fn invoke(&self, _source: &NodeName, method: &str, args: Value) -> Result<Value, Error> {
        match method {
            EXEC_ASYNC => {
                let ExecAsyncRequest {
                    task,
                    source_node,
                    source_task_id,
                    collector_id,
                } = serde_json::from_value(args)?;
                self.exec_async(task, source_node, source_task_id, collector_id);
                Ok(Value::Null)
            }
            _ => Err(Error::UnknownMethod {
                service: WORKER_SERVICE.to_string(),
                method: method.to_string(),
            }),
        }
    }
}
