use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// The name of a cluster member.
///
/// Node names are how the rest of the crate addresses a member: they key
/// per-node results in a collector, select targets from the membership and
/// route calls through the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        NodeName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        NodeName(s.to_string())
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        NodeName(s)
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for NodeName {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_node_names_are_ordered_by_name() {
        let nodes: BTreeSet<NodeName> = ["node-b", "node-a", "node-c", "node-a"]
            .into_iter()
            .map(NodeName::from)
            .collect();

        let names: Vec<&str> = nodes.iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["node-a", "node-b", "node-c"]);
    }

    #[test]
    fn test_node_name_serializes_as_plain_string() {
        let node = NodeName::from("node-1");
        assert_eq!(serde_json::to_string(&node).unwrap(), "\"node-1\"");
    }
}
