use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Notify;

#[derive(Clone, Debug)]
/// A termination flag with notification capabilities
///
/// Whenever the flag is set, every task waiting on it is woken up.
pub(crate) struct Interrupt {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Sets the flag to true and notifies any waiters
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Checks if the flag has been set
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Waits asynchronously until the flag is set
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);

        // register interest before reading the flag so a `set` in between
        // is not lost
        notified.as_mut().enable();
        if self.is_set() {
            return;
        }

        notified.await;
    }
}
