//! Registry of the collectors waiting for replies on this node
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::collector::{CollectorId, ResultCollector};

#[derive(Debug, Error)]
pub enum Error {
    #[error("a collector with id {0} is already registered")]
    DuplicateKey(CollectorId),

    #[error("the collector registry has been shut down")]
    Closed,
}

#[derive(Debug)]
struct Registered {
    collector: Arc<ResultCollector>,
    last_access: Instant,
}

impl Registered {
    fn is_expired(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_access) > idle_timeout
    }
}

/// A bounded store of live collectors, keyed by collector id
///
/// Entries that are not accessed for longer than the idle timeout are
/// dropped, and when the registry grows past its maximum size the least
/// recently used entries are evicted. A dispatch whose collector was
/// evicted simply stops receiving results.
#[derive(Debug)]
pub struct CollectorRegistry {
    entries: DashMap<CollectorId, Registered>,
    idle_timeout: Duration,
    max_entries: usize,
    closed: AtomicBool,
}

impl CollectorRegistry {
    pub fn new(idle_timeout: Duration, max_entries: usize) -> Self {
        CollectorRegistry {
            entries: DashMap::new(),
            idle_timeout,
            max_entries: max_entries.max(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a collector, failing if the id is already taken or the
    /// registry is shut down
    pub fn put(&self, id: CollectorId, collector: Arc<ResultCollector>) -> Result<(), Error> {
        if self.is_shutdown() {
            return Err(Error::Closed);
        }

        let now = Instant::now();
        let registered = Registered {
            collector,
            last_access: now,
        };
        match self.entries.entry(id) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_expired(now, self.idle_timeout) {
                    return Err(Error::DuplicateKey(id));
                }
                entry.insert(registered);
            }
            Entry::Vacant(entry) => {
                entry.insert(registered);
            }
        }

        if self.entries.len() > self.max_entries {
            self.purge_expired();
            self.evict_to_capacity(&id);
        }

        Ok(())
    }

    /// Return the collector registered under `id`, if it is still live
    pub fn get(&self, id: &CollectorId) -> Option<Arc<ResultCollector>> {
        let now = Instant::now();
        let collector = {
            let mut entry = self.entries.get_mut(id)?;
            if entry.is_expired(now, self.idle_timeout) {
                None
            } else {
                entry.last_access = now;
                Some(Arc::clone(&entry.collector))
            }
        };

        if collector.is_none() {
            debug!(collector = %id, "collector expired");
            self.entries
                .remove_if(id, |_, entry| entry.is_expired(now, self.idle_timeout));
        }
        collector
    }

    /// Remove the collector for `id`. Removing an unknown id does nothing
    pub fn remove(&self, id: &CollectorId) {
        self.entries.remove(id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Refuse any further registration
    ///
    /// Collectors already registered stay available until removed or
    /// expired.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.is_expired(now, self.idle_timeout));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!("purged {purged} expired collectors");
        }
        purged
    }

    fn evict_to_capacity(&self, keep: &CollectorId) {
        while self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.value().last_access)
                .map(|entry| *entry.key());

            match oldest {
                Some(id) => {
                    debug!(collector = %id, "evicting collector, registry is full");
                    self.entries.remove(&id);
                }
                None => break,
            }
        }
    }
}
