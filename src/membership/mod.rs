//! Cluster membership and resolution of dispatch targets
use parking_lot::RwLock;
use std::collections::BTreeSet;
use thiserror::Error;

mod target;

pub use target::{TargetNodeSetFactory, TargetType};

use crate::node::NodeName;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no {0} node found in the cluster")]
    NodeNotFound(TargetType),

    #[error("cluster state is not known yet")]
    ClusterStateUnknown,
}

/// A view of the cluster members at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterState {
    master_node: Option<NodeName>,
    all_nodes: BTreeSet<NodeName>,
    enabled_nodes: BTreeSet<NodeName>,
    enabled_active_nodes: BTreeSet<NodeName>,
}

impl ClusterState {
    pub fn new() -> Self {
        ClusterState::default()
    }

    /// Add a member to the state
    ///
    /// A node can only be active if it is also enabled.
    pub fn node(self, name: impl Into<NodeName>, enabled: bool, active: bool) -> Self {
        let mut state = self;
        let name = name.into();
        if enabled {
            state.enabled_nodes.insert(name.clone());
            if active {
                state.enabled_active_nodes.insert(name.clone());
            }
        }
        state.all_nodes.insert(name);
        state
    }

    pub fn master(self, name: impl Into<NodeName>) -> Self {
        let mut state = self;
        state.master_node = Some(name.into());
        state
    }

    pub fn master_node(&self) -> Option<&NodeName> {
        self.master_node.as_ref()
    }

    pub fn all_nodes(&self) -> &BTreeSet<NodeName> {
        &self.all_nodes
    }

    pub fn enabled_nodes(&self) -> &BTreeSet<NodeName> {
        &self.enabled_nodes
    }

    pub fn enabled_active_nodes(&self) -> &BTreeSet<NodeName> {
        &self.enabled_active_nodes
    }
}

/// Provides the current cluster state
pub trait Membership: Send + Sync {
    /// Return the current state, or [`Error::ClusterStateUnknown`] if the
    /// cluster has not converged yet
    fn cluster_state(&self) -> Result<ClusterState, Error>;
}

/// A membership whose state is set explicitly
///
/// The state starts unknown until [`StaticMembership::set`] is called.
#[derive(Debug, Default)]
pub struct StaticMembership {
    state: RwLock<Option<ClusterState>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        StaticMembership::default()
    }

    pub fn with_state(state: ClusterState) -> Self {
        StaticMembership {
            state: RwLock::new(Some(state)),
        }
    }

    pub fn set(&self, state: ClusterState) {
        *self.state.write() = Some(state);
    }

    /// Forget the current state
    pub fn reset(&self) {
        *self.state.write() = None;
    }
}

impl Membership for StaticMembership {
    fn cluster_state(&self) -> Result<ClusterState, Error> {
        self.state.read().clone().ok_or(Error::ClusterStateUnknown)
    }
}
