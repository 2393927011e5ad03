use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collector::{CollectorId, RemoteError};
use crate::node::NodeName;
use crate::task::{ClusterTask, TaskId};

pub(crate) const EXEC_ASYNC: &str = "exec_async";
pub(crate) const RECEIVE_RESULT: &str = "receive_result";

/// Arguments of a task execution request sent to a worker
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ExecAsyncRequest {
    pub task: ClusterTask,
    pub source_node: NodeName,
    pub source_task_id: TaskId,
    pub collector_id: CollectorId,
}

/// Arguments of a result sent back by a worker to the source node
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ReceiveResultRequest {
    pub task: ClusterTask,
    pub target_node: NodeName,
    pub source_task_id: Option<TaskId>,
    pub collector_id: CollectorId,
    pub outcome: Result<Value, RemoteError>,
}
