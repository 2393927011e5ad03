use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, field, span, Instrument, Level};

use super::{kind_of, ClusterTask, TaskHandle, TaskId};
use crate::collector::RemoteError;

/// Executes tasks on the local node
///
/// This is the boundary between the dispatch machinery and whatever runs the
/// work. Execution happens off the calling task and resolves with exactly
/// one outcome.
#[async_trait]
pub trait TaskManager: Send + Sync {
    /// Run the task and return its result or failure
    async fn execute(&self, task: ClusterTask) -> Result<Value, RemoteError>;

    /// Find a task that is still running on this node
    fn find(&self, id: &TaskId) -> Option<TaskHandle>;
}

type Handler = Arc<dyn Fn(ClusterTask) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

struct Running {
    handle: TaskHandle,
    count: usize,
}

/// Releases a running task entry when dropped
struct Registration<'a> {
    running: &'a DashMap<TaskId, Running>,
    id: TaskId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.running.remove_if_mut(&self.id, |_, running| {
            running.count = running.count.saturating_sub(1);
            running.count == 0
        });
    }
}

/// An in-process task manager
///
/// Tasks are routed to handlers by their kind and run as tokio tasks. Every
/// task being executed, as well as every source task started through
/// [`LocalTaskManager::run`], is tracked so it can be found by id or
/// terminated. Executions sharing an id share a single [`TaskHandle`].
#[derive(Default)]
pub struct LocalTaskManager {
    handlers: DashMap<String, Handler>,
    running: DashMap<TaskId, Running>,
}

impl LocalTaskManager {
    pub fn new() -> Self {
        LocalTaskManager::default()
    }

    /// Add a handler for tasks of the given kind
    pub fn handler<F, Fut>(self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ClusterTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(kind, handler);
        self
    }

    /// Add a handler for tasks created with [`ClusterTask::of`]
    ///
    /// The payload is deserialized into `T` and the returned value is
    /// serialized as the task result.
    pub fn typed_handler<T, R, F, Fut>(self, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        R: Serialize,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.handler(kind_of::<T>(), move |task: ClusterTask| {
            let handler = Arc::clone(&handler);
            async move {
                let input = task.payload_as::<T>()?;
                let output = handler(input).await?;
                Ok(serde_json::to_value(output)?)
            }
        })
    }

    pub fn register<F, Fut>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(ClusterTask) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let kind = kind.into();
        debug!("registered handler for task kind {kind}");
        let handler: Handler = Arc::new(move |task| handler(task).boxed());
        self.handlers.insert(kind, handler);
    }

    /// Run `f` as a new source task
    ///
    /// The future receives the handle of the new task and runs with it as
    /// the ambient task context, so any dispatch it starts has a parent.
    pub async fn run<F, Fut>(&self, name: impl Into<String>, f: F) -> Fut::Output
    where
        F: FnOnce(TaskHandle) -> Fut,
        Fut: Future,
    {
        let (handle, _registration) = self.acquire(TaskId::new(), name.into());
        handle.clone().scope(f(handle)).await
    }

    /// Terminate a running task, returning false if no task has that id
    pub fn terminate(&self, id: &TaskId) -> bool {
        match self.find(id) {
            Some(task) => {
                task.terminate();
                true
            }
            None => false,
        }
    }

    /// Number of tasks currently tracked
    pub fn running(&self) -> usize {
        self.running.len()
    }

    fn acquire(&self, id: TaskId, name: String) -> (TaskHandle, Registration<'_>) {
        let mut entry = self.running.entry(id).or_insert_with(|| Running {
            handle: TaskHandle::new(id, name),
            count: 0,
        });
        entry.count += 1;
        let handle = entry.handle.clone();
        drop(entry);

        (
            handle,
            Registration {
                running: &self.running,
                id,
            },
        )
    }
}

#[async_trait]
impl TaskManager for LocalTaskManager {
    async fn execute(&self, task: ClusterTask) -> Result<Value, RemoteError> {
        let handler = self
            .handlers
            .get(task.kind())
            .map(|handler| Arc::clone(handler.value()))
            .ok_or_else(|| {
                RemoteError::new(format!(
                    "no handler registered for task kind `{}`",
                    task.kind()
                ))
            })?;

        let id = task.id().map(|id| *id).unwrap_or_default();
        let (handle, _registration) = self.acquire(id, task.name().to_string());
        if handle.is_terminated() {
            return Err(RemoteError::new(format!("task {} was terminated", id)));
        }

        let span = span!(
            Level::DEBUG,
            "execute",
            task = task.name(),
            id = %id,
            pool_size = field::Empty
        );
        if let Some(size) = task.pool_size() {
            span.record("pool_size", size);
        }

        let scoped = handle.clone();
        let mut running = tokio::spawn(
            async move { scoped.scope(handler(task)).await }.instrument(span),
        );

        tokio::select! {
            joined = &mut running => match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(RemoteError::from(err)),
                Err(err) => Err(RemoteError::new(format!("task {id} did not complete: {err}"))),
            },
            _ = handle.terminated() => {
                running.abort();
                Err(RemoteError::new(format!("task {id} was terminated")))
            }
        }
    }

    fn find(&self, id: &TaskId) -> Option<TaskHandle> {
        self.running.get(id).map(|running| running.handle.clone())
    }
}
