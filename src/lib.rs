//! Dispatch of tasks to the nodes of a cluster and collection of their results
//!
//! A source node sends a [`ClusterTask`](task::ClusterTask) to a set of
//! target nodes and gathers one result per node in a
//! [`ResultCollector`](collector::ResultCollector). Waiting for results uses
//! an inactivity timeout: every reply pushes the deadline back, so slow but
//! progressing dispatches are not cut short.
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::{json, Value};
//! use cluster_dispatch::cluster::{ClusterNode, LocalCluster};
//! use cluster_dispatch::config::Opts;
//! use cluster_dispatch::membership::{ClusterState, StaticMembership, TargetType};
//! use cluster_dispatch::task::{ClusterTask, LocalTaskManager};
//!
//! # tokio_test::block_on(async {
//! let cluster = Arc::new(LocalCluster::new());
//! let membership = Arc::new(StaticMembership::with_state(
//!     ClusterState::new().node("node-1", true, true).master("node-1"),
//! ));
//! let tasks = Arc::new(LocalTaskManager::new().handler("ping", |_| async { Ok(json!("pong")) }));
//!
//! let node = ClusterNode::new(
//!     "node-1".into(),
//!     cluster.clone(),
//!     membership,
//!     tasks.clone(),
//!     &Opts::default(),
//! );
//! node.join(&cluster);
//!
//! let collector = tasks
//!     .run("ping all", |_| {
//!         node.helper()
//!             .exec_async(ClusterTask::new("ping", Value::Null), TargetType::All)
//!     })
//!     .await
//!     .unwrap();
//!
//! let pong = collector.result(&"node-1".into()).unwrap();
//! assert_eq!(pong.result(), Some(&json!("pong")));
//! # })
//! ```
pub mod cluster;
pub mod collector;
pub mod config;
pub mod dispatch;
pub mod membership;
pub mod node;
pub mod registry;
pub mod retry;
pub mod task;

mod error;

pub use error::Error;
