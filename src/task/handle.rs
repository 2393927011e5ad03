use std::future::Future;
use std::sync::Arc;

use super::interrupt::Interrupt;
use super::TaskId;

tokio::task_local! {
    static CURRENT_TASK: TaskHandle;
}

/// A reference to a running task
///
/// Handles are cheap to clone and every clone observes the same termination
/// flag. A handle becomes the ambient task context of a future through
/// [`TaskHandle::scope`]; dispatches started from within that future use it
/// as their parent.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    id: TaskId,
    name: String,
    interrupt: Interrupt,
}

impl TaskHandle {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        TaskHandle {
            inner: Arc::new(Inner {
                id,
                name: name.into(),
                interrupt: Interrupt::new(),
            }),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark the task as terminated, waking anything waiting on it.
    ///
    /// Terminating twice has no further effect.
    pub fn terminate(&self) {
        self.inner.interrupt.set();
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.interrupt.is_set()
    }

    /// Resolves once the task has been terminated
    pub async fn terminated(&self) {
        self.inner.interrupt.wait().await
    }

    /// Return the task in whose context the caller is running, if any
    pub fn current() -> Option<TaskHandle> {
        CURRENT_TASK.try_with(|task| task.clone()).ok()
    }

    /// Run `fut` with this task as the ambient task context
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_TASK.scope(self, fut).await
    }
}
