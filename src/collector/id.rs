use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlates the replies of workers with the collector waiting for them
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CollectorId(Uuid);

impl CollectorId {
    pub fn new() -> Self {
        CollectorId(Uuid::new_v4())
    }
}

impl Default for CollectorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CollectorId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(fmt)
    }
}
