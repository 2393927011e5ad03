use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{ClusterState, Error, Membership};
use crate::node::NodeName;

const UNKNOWN_STATE_WARNING_INTERVAL: Duration = Duration::from_secs(60);

/// Which members of the cluster a task should be sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetType {
    /// The master node only
    Master,
    /// Every node that is both enabled and active
    Active,
    /// Every enabled node, active or not
    Enabled,
    /// Every known node
    All,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetType::Master => "master",
            TargetType::Active => "active",
            TargetType::Enabled => "enabled",
            TargetType::All => "cluster",
        };
        f.write_str(name)
    }
}

/// Resolves target types into node sets using the live cluster state
///
/// The state is read on every call, nothing is cached between dispatches.
pub struct TargetNodeSetFactory {
    local_node: NodeName,
    membership: Arc<dyn Membership>,
    last_unknown_warning: Mutex<Option<Instant>>,
}

impl TargetNodeSetFactory {
    pub fn new(local_node: NodeName, membership: Arc<dyn Membership>) -> Self {
        TargetNodeSetFactory {
            local_node,
            membership,
            last_unknown_warning: Mutex::new(None),
        }
    }

    /// The node this factory runs on
    pub fn source_node(&self) -> &NodeName {
        &self.local_node
    }

    pub fn is_local(&self, node: &NodeName) -> bool {
        &self.local_node == node
    }

    pub fn is_cluster_state_initialised(&self) -> bool {
        self.membership.cluster_state().is_ok()
    }

    pub fn resolve(&self, target: TargetType) -> Result<BTreeSet<NodeName>, Error> {
        let state = self.cluster_state()?;
        let nodes = match target {
            TargetType::Master => state.master_node().cloned().into_iter().collect(),
            TargetType::Active => state.enabled_active_nodes().clone(),
            TargetType::Enabled => state.enabled_nodes().clone(),
            TargetType::All => state.all_nodes().clone(),
        };

        if nodes.is_empty() {
            debug!("no {target} node found");
            return Err(Error::NodeNotFound(target));
        }
        Ok(nodes)
    }

    pub fn master_node(&self) -> Result<NodeName, Error> {
        let mut nodes = self.resolve(TargetType::Master)?;
        nodes
            .pop_first()
            .ok_or(Error::NodeNotFound(TargetType::Master))
    }

    pub fn enabled_active_target_node_set(&self) -> Result<BTreeSet<NodeName>, Error> {
        self.resolve(TargetType::Active)
    }

    pub fn enabled_target_node_set(&self) -> Result<BTreeSet<NodeName>, Error> {
        self.resolve(TargetType::Enabled)
    }

    fn cluster_state(&self) -> Result<ClusterState, Error> {
        self.membership.cluster_state().inspect_err(|err| {
            if matches!(err, Error::ClusterStateUnknown) && self.should_warn_unknown_state() {
                warn!("{err}, target nodes cannot be resolved");
            }
        })
    }

    fn should_warn_unknown_state(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_unknown_warning.lock();
        match *last {
            Some(at) if now.saturating_duration_since(at) < UNKNOWN_STATE_WARNING_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::StaticMembership;
    use pretty_assertions::assert_eq;

    fn nodes(names: &[&str]) -> BTreeSet<NodeName> {
        names.iter().map(|n| NodeName::from(*n)).collect()
    }

    fn factory(state: Option<ClusterState>) -> TargetNodeSetFactory {
        let membership = match state {
            Some(state) => StaticMembership::with_state(state),
            None => StaticMembership::new(),
        };
        TargetNodeSetFactory::new("a".into(), Arc::new(membership))
    }

    fn cluster() -> ClusterState {
        ClusterState::new()
            .node("a", true, true)
            .node("b", true, false)
            .node("c", true, true)
            .node("d", false, false)
            .master("c")
    }

    #[test]
    fn test_resolve_target_types() {
        let factory = factory(Some(cluster()));

        assert_eq!(factory.resolve(TargetType::Master).unwrap(), nodes(&["c"]));
        assert_eq!(
            factory.resolve(TargetType::Active).unwrap(),
            nodes(&["a", "c"])
        );
        assert_eq!(
            factory.resolve(TargetType::Enabled).unwrap(),
            nodes(&["a", "b", "c"])
        );
        assert_eq!(
            factory.resolve(TargetType::All).unwrap(),
            nodes(&["a", "b", "c", "d"])
        );
        assert_eq!(factory.master_node().unwrap(), NodeName::from("c"));
    }

    #[test]
    fn test_missing_master_is_node_not_found() {
        let factory = factory(Some(ClusterState::new().node("a", true, true)));
        assert!(matches!(
            factory.resolve(TargetType::Master),
            Err(Error::NodeNotFound(TargetType::Master))
        ));
        assert!(factory.master_node().is_err());
    }

    #[test]
    fn test_empty_selection_is_node_not_found() {
        let factory = factory(Some(ClusterState::new().node("a", true, false)));
        assert!(matches!(
            factory.enabled_active_target_node_set(),
            Err(Error::NodeNotFound(TargetType::Active))
        ));
        assert_eq!(factory.enabled_target_node_set().unwrap(), nodes(&["a"]));

        let factory = self::factory(Some(ClusterState::new().node("a", false, false)));
        assert!(matches!(
            factory.enabled_target_node_set(),
            Err(Error::NodeNotFound(TargetType::Enabled))
        ));
    }

    #[test]
    fn test_unknown_state_is_distinct_from_no_nodes() {
        let factory = factory(None);
        assert!(!factory.is_cluster_state_initialised());
        for target in [
            TargetType::Master,
            TargetType::Active,
            TargetType::Enabled,
            TargetType::All,
        ] {
            assert!(matches!(
                factory.resolve(target),
                Err(Error::ClusterStateUnknown)
            ));
        }
    }

    #[test]
    fn test_state_is_read_on_every_call() {
        let membership = Arc::new(StaticMembership::new());
        let factory = TargetNodeSetFactory::new("a".into(), membership.clone());
        assert!(factory.resolve(TargetType::All).is_err());

        membership.set(ClusterState::new().node("a", true, true));
        assert_eq!(factory.resolve(TargetType::All).unwrap(), nodes(&["a"]));
        assert!(factory.is_local(&"a".into()));
        assert!(!factory.is_local(&"b".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_state_warning_is_rate_limited() {
        let factory = factory(None);

        assert!(factory.should_warn_unknown_state());
        assert!(!factory.should_warn_unknown_state());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!factory.should_warn_unknown_state());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(factory.should_warn_unknown_state());
    }
}
