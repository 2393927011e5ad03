use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Identifies a running task.
///
/// Two ids are equal when their `id` parts are equal; the parent is carried
/// along for correlation only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskId {
    id: Uuid,
    parent: Option<Uuid>,
}

impl TaskId {
    pub fn new() -> Self {
        TaskId {
            id: Uuid::new_v4(),
            parent: None,
        }
    }

    /// Create the id used by a worker to run a task on behalf of `source`.
    ///
    /// The derivation is deterministic, every worker running a task for the
    /// same source task ends up with the same id, which is different from the
    /// source id itself.
    pub fn derive(source: &TaskId) -> Self {
        TaskId {
            id: Uuid::new_v5(&source.id, b"cluster-task"),
            parent: Some(source.id),
        }
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.id
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TaskId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TaskId {}

impl Hash for TaskId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parent {
            Some(parent) => write!(fmt, "{}<{}", self.id, parent),
            None => write!(fmt, "{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_ids_depend_only_on_source() {
        let source = TaskId::new();
        let other = TaskId::new();

        assert_eq!(TaskId::derive(&source), TaskId::derive(&source));
        assert_ne!(TaskId::derive(&source), TaskId::derive(&other));
        assert_ne!(TaskId::derive(&source), source);
        assert_eq!(TaskId::derive(&source).parent(), Some(*source.as_uuid()));
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }
}
