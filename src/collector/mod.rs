//! Per-dispatch collection of node results
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

mod entry;
mod id;

pub use entry::{ClusterCallEntry, RemoteError};
pub use id::CollectorId;

use crate::node::NodeName;
use crate::task::ClusterTask;

/// How a wait on a collector ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Every target node reported a result
    Complete,
    /// The collector was terminated
    Terminated,
    /// Nothing was heard from the remaining nodes for a whole wait period
    TimedOut,
}

#[derive(Debug, Default)]
struct WaitState {
    /// The configured wait period, `None` waits forever
    duration: Option<Duration>,
    deadline: Option<Instant>,
    /// Something was received since the waiter last looked
    received: bool,
    /// The waiter gave up after the wait period passed without activity
    expired: bool,
}

/// Accumulates one result per target node of a dispatch
///
/// Results are recorded as they arrive from workers while the dispatching
/// task waits in [`ResultCollector::wait_to_complete`]. Nodes missing from
/// [`ResultCollector::results`] never replied, nodes that replied with a
/// failure have an entry holding the error.
#[derive(Debug)]
pub struct ResultCollector {
    id: CollectorId,
    task: ClusterTask,
    source_node: NodeName,
    target_nodes: BTreeSet<NodeName>,
    start: Instant,
    results: Mutex<BTreeMap<NodeName, ClusterCallEntry>>,
    wait: Mutex<WaitState>,
    terminated: AtomicBool,
    notify: Notify,
}

impl ResultCollector {
    pub fn new(task: ClusterTask, source_node: NodeName, target_nodes: BTreeSet<NodeName>) -> Self {
        ResultCollector {
            id: CollectorId::new(),
            task,
            source_node,
            target_nodes,
            start: Instant::now(),
            results: Mutex::new(BTreeMap::new()),
            wait: Mutex::new(WaitState::default()),
            terminated: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn id(&self) -> &CollectorId {
        &self.id
    }

    pub fn task(&self) -> &ClusterTask {
        &self.task
    }

    pub fn source_node(&self) -> &NodeName {
        &self.source_node
    }

    pub fn target_nodes(&self) -> &BTreeSet<NodeName> {
        &self.target_nodes
    }

    /// Signal that a reply has arrived and is about to be recorded
    ///
    /// Returns false if the waiter has already given up, in which case the
    /// reply should be dropped. The check is best effort: a waiter timing out
    /// concurrently may still miss a reply that was accepted here.
    pub fn on_receive(&self) -> bool {
        let mut wait = self.wait.lock();
        if wait.duration.is_some() && wait.expired {
            return false;
        }
        wait.received = true;
        true
    }

    pub fn on_success(&self, node: NodeName, result: Value) {
        self.record(node, Ok(result));
    }

    pub fn on_failure(&self, node: NodeName, error: RemoteError) {
        self.record(node, Err(error));
    }

    pub(crate) fn record(&self, node: NodeName, outcome: Result<Value, RemoteError>) {
        let entry = ClusterCallEntry::new(outcome, self.start.elapsed());
        self.results.lock().insert(node, entry);
        self.wait.lock().received = true;
        self.notify.notify_waiters();
    }

    /// Stop collecting, releasing any waiter immediately
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// True when every target node has an entry
    pub fn is_complete(&self) -> bool {
        let results = self.results.lock();
        self.target_nodes
            .iter()
            .all(|node| results.contains_key(node))
    }

    /// Wait until every node has reported, the collector is terminated or
    /// `duration` passes without any reply
    ///
    /// The wait period restarts every time a reply is received, so a
    /// dispatch whose nodes keep answering is never cut short. With no
    /// duration the wait only ends on completion or termination.
    pub async fn wait_to_complete(&self, duration: Option<Duration>) -> Completion {
        {
            let mut wait = self.wait.lock();
            wait.duration = duration;
            wait.deadline = deadline_after(duration);
            wait.received = false;
            wait.expired = false;
        }

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_terminated() {
                return Completion::Terminated;
            }
            if self.is_complete() {
                return Completion::Complete;
            }

            let deadline = {
                let mut wait = self.wait.lock();
                if wait.received {
                    wait.received = false;
                    wait.deadline = deadline_after(wait.duration);
                }
                match wait.deadline {
                    Some(deadline) if deadline <= Instant::now() => {
                        wait.expired = true;
                        return Completion::TimedOut;
                    }
                    deadline => deadline,
                }
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// A snapshot of the entries recorded so far
    pub fn results(&self) -> BTreeMap<NodeName, ClusterCallEntry> {
        self.results.lock().clone()
    }

    pub fn result(&self, node: &NodeName) -> Option<ClusterCallEntry> {
        self.results.lock().get(node).cloned()
    }

    /// Nodes that replied with a failure
    pub fn failures(&self) -> BTreeMap<NodeName, RemoteError> {
        self.results
            .lock()
            .iter()
            .filter_map(|(node, entry)| entry.error().map(|e| (node.clone(), e.clone())))
            .collect()
    }

    /// Target nodes that have not replied
    pub fn missing_nodes(&self) -> BTreeSet<NodeName> {
        let results = self.results.lock();
        self.target_nodes
            .iter()
            .filter(|node| !results.contains_key(*node))
            .cloned()
            .collect()
    }
}

/// The instant `duration` from now, or `None` if it is too far away to be
/// represented, in which case the wait has no deadline
fn deadline_after(duration: Option<Duration>) -> Option<Instant> {
    duration.and_then(|d| Instant::now().checked_add(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::time::sleep;

    fn nodes(names: &[&str]) -> BTreeSet<NodeName> {
        names.iter().map(|n| NodeName::from(*n)).collect()
    }

    fn collector(targets: &[&str]) -> Arc<ResultCollector> {
        Arc::new(ResultCollector::new(
            ClusterTask::new("test", Value::Null),
            NodeName::from("source"),
            nodes(targets),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_when_all_nodes_report() {
        let collector = collector(&["a", "b", "c"]);

        let reporter = Arc::clone(&collector);
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            reporter.on_success("a".into(), json!(1));
            reporter.on_failure("b".into(), RemoteError::new("failed"));
            reporter.on_success("c".into(), json!(3));
        });

        let start = Instant::now();
        let completion = collector
            .wait_to_complete(Some(Duration::from_secs(60)))
            .await;

        assert_eq!(completion, Completion::Complete);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert_eq!(collector.results().len(), 3);
        assert!(collector.missing_nodes().is_empty());
        assert_eq!(
            collector.failures(),
            BTreeMap::from([(NodeName::from("b"), RemoteError::new("failed"))])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_period_restarts_on_every_result() {
        let collector = collector(&["a", "b"]);
        let wait = Duration::from_secs(5);

        // the only result arrives just before the wait period would end
        let reporter = Arc::clone(&collector);
        tokio::spawn(async move {
            sleep(Duration::from_millis(4900)).await;
            reporter.on_success("a".into(), json!(1));
        });

        let start = Instant::now();
        let completion = collector.wait_to_complete(Some(wait)).await;

        assert_eq!(completion, Completion::TimedOut);
        // the wait ends a full period after the last result, not after
        // the first period
        assert_eq!(start.elapsed(), Duration::from_millis(9900));
        assert_eq!(collector.missing_nodes(), nodes(&["b"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_results() {
        let collector = collector(&["a"]);

        let start = Instant::now();
        let completion = collector
            .wait_to_complete(Some(Duration::from_secs(2)))
            .await;

        assert_eq!(completion, Completion::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(collector.results().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_releases_waiter_and_keeps_results() {
        let collector = collector(&["a", "b", "c"]);

        let reporter = Arc::clone(&collector);
        tokio::spawn(async move {
            reporter.on_success("a".into(), json!(1));
            sleep(Duration::from_secs(1)).await;
            reporter.terminate();
            reporter.terminate();
        });

        let start = Instant::now();
        let completion = collector
            .wait_to_complete(Some(Duration::from_secs(60)))
            .await;

        assert_eq!(completion, Completion::Terminated);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(collector.results().len(), 1);
        assert!(collector.result(&"a".into()).is_some());
    }

    #[tokio::test]
    async fn test_terminate_before_wait_returns_immediately() {
        let collector = collector(&["a"]);
        collector.terminate();

        let completion = collector.wait_to_complete(None).await;
        assert_eq!(completion, Completion::Terminated);
        assert!(collector.results().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_wait_has_no_deadline() {
        let forever = Some(Duration::from_secs(u64::MAX));

        let terminated = collector(&["a"]);
        terminated.terminate();
        assert_eq!(
            terminated.wait_to_complete(forever).await,
            Completion::Terminated
        );

        let collector = collector(&["a"]);
        let reporter = Arc::clone(&collector);
        tokio::spawn(async move {
            sleep(Duration::from_secs(3600)).await;
            reporter.on_success("a".into(), json!(1));
        });

        let start = Instant::now();
        assert_eq!(
            collector.wait_to_complete(forever).await,
            Completion::Complete
        );
        assert_eq!(start.elapsed(), Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_is_refused_after_timeout() {
        let collector = collector(&["a"]);

        // replies are accepted while nobody waits
        assert!(collector.on_receive());

        let completion = collector
            .wait_to_complete(Some(Duration::from_millis(10)))
            .await;
        assert_eq!(completion, Completion::TimedOut);
        assert!(!collector.on_receive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_receive_extends_the_wait() {
        let collector = collector(&["a"]);
        let wait = Duration::from_secs(1);

        let reporter = Arc::clone(&collector);
        tokio::spawn(async move {
            sleep(Duration::from_millis(900)).await;
            assert!(reporter.on_receive());
            // the payload takes a while to be recorded
            sleep(Duration::from_millis(500)).await;
            reporter.on_success("a".into(), json!("done"));
        });

        let completion = collector.wait_to_complete(Some(wait)).await;
        assert_eq!(completion, Completion::Complete);
    }

    #[tokio::test]
    async fn test_results_recorded_after_completion_are_kept() {
        let collector = collector(&["a"]);
        collector.on_success("a".into(), json!(1));
        assert_eq!(
            collector.wait_to_complete(None).await,
            Completion::Complete
        );

        collector.on_success("a".into(), json!(2));
        assert_eq!(
            collector.result(&"a".into()).and_then(|e| e.result().cloned()),
            Some(json!(2))
        );
    }
}
