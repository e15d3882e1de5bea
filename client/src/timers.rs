use std::{collections::HashMap, hash::Hash, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};

/// Single-shot timers keyed by kind. Each fires by sending a message back
/// to the owning actor; a kind has at most one armed timer.
pub struct TimerSet<K> {
    handles: HashMap<K, JoinHandle<()>>,
}

impl<K: Copy + Eq + Hash> TimerSet<K> {
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }

    /// Arms `kind`, replacing any timer of the same kind.
    pub fn start<M: Send + 'static>(
        &mut self,
        kind: K,
        after: Duration,
        tx: mpsc::UnboundedSender<M>,
        message: M,
    ) {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(message);
        });
        if let Some(previous) = self.handles.insert(kind, handle) {
            previous.abort();
        }
    }

    pub fn cancel(&mut self, kind: K) {
        if let Some(handle) = self.handles.remove(&kind) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }

    pub fn armed(&self) -> usize {
        self.handles
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl<K: Copy + Eq + Hash> Default for TimerSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for TimerSet<K> {
    fn drop(&mut self) {
        for handle in self.handles.values() {
            handle.abort();
        }
    }
}
