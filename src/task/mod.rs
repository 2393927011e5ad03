//! Tasks and the task execution collaborator
//!
//! A [`ClusterTask`] is the unit of work sent to other nodes. It is built by
//! the caller, gets a display name before being dispatched and is assigned
//! an id by the worker right before running. The [`TaskManager`] trait is the
//! boundary with whatever actually executes tasks on a node;
//! [`LocalTaskManager`] is an in-process implementation.
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod handle;
mod id;
mod interrupt;
mod manager;

pub use handle::TaskHandle;
pub use id::TaskId;
pub use manager::{LocalTaskManager, TaskManager};

#[derive(Debug, Error)]
#[error("task `{0}` has no id assigned yet")]
/// The id of a task was requested before the task was
/// assigned one by a worker
pub struct IdNotAssigned(pub String);

/// A unit of work to execute on one or more cluster nodes
///
/// The `kind` selects the handler that runs the task on the worker, while the
/// `payload` carries its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTask {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pool_size: Option<usize>,
    #[serde(default)]
    payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<TaskId>,
}

impl ClusterTask {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        ClusterTask {
            kind: kind.into(),
            name: None,
            user_token: None,
            pool_size: None,
            payload,
            id: None,
        }
    }

    /// Create a task from a serializable value, using the short type
    /// name of `T` as the task kind
    pub fn of<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(value)?;
        Ok(ClusterTask::new(kind_of::<T>(), payload))
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        let mut task = self;
        task.name = Some(name.into());
        task
    }

    pub fn with_user_token(self, token: impl Into<String>) -> Self {
        let mut task = self;
        task.user_token = Some(token.into());
        task
    }

    /// Hint the number of threads the worker should dedicate to this
    /// kind of task
    pub fn with_pool_size(self, size: usize) -> Self {
        let mut task = self;
        task.pool_size = Some(size);
        task
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The display name of the task, falling back to its kind
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub(crate) fn default_name(&mut self) {
        if self.name.is_none() {
            self.name = Some(self.kind.clone());
        }
    }

    pub fn user_token(&self) -> Option<&str> {
        self.user_token.as_deref()
    }

    pub fn pool_size(&self) -> Option<usize> {
        self.pool_size
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// The id assigned to the task by the worker running it
    pub fn id(&self) -> Result<&TaskId, IdNotAssigned> {
        self.id
            .as_ref()
            .ok_or_else(|| IdNotAssigned(self.name().to_string()))
    }

    pub(crate) fn assign_id(&mut self, id: TaskId) {
        self.id = Some(id);
    }
}

impl PartialEq for ClusterTask {
    fn eq(&self, other: &Self) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            // without an id a task is only equal to itself
            _ => std::ptr::eq(self, other),
        }
    }
}

/// Return the unqualified name of `T`, without generic arguments
pub(crate) fn kind_of<T: ?Sized>() -> &'static str {
    let name = std::any::type_name::<T>();
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}
