//! Typing-indicator debouncer.
//!
//! One timer per (sender, peer). Starting an already-running signal
//! replaces its timer silently. Only edges reach the change handler: the
//! not-typing → typing transition, and the typing → not-typing transition
//! from an explicit stop, a natural expiry or a sender-wide clear.
//!
//! The handler runs while the timer table is locked, so the edges it sees
//! for one key strictly alternate. It must not call back into the
//! debouncer.

use parking_lot::Mutex;
use parley_core::UserId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

type TimerKey = (UserId, UserId);
type ChangeHandler = Arc<dyn Fn(UserId, UserId, bool) + Send + Sync>;

struct TypingTimer {
    generation: u64,
    task: JoinHandle<()>,
}

/// Keyed expiry timers for typing signals.
pub struct TypingDebouncer {
    timeout: Duration,
    timers: Arc<Mutex<HashMap<TimerKey, TypingTimer>>>,
    generation: AtomicU64,
    on_change: ChangeHandler,
}

impl TypingDebouncer {
    /// `on_change(sender, peer, typing)` runs on every edge.
    pub fn new(
        timeout: Duration,
        on_change: impl Fn(UserId, UserId, bool) + Send + Sync + 'static,
    ) -> Self {
        Self {
            timeout,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            on_change: Arc::new(on_change),
        }
    }

    /// Start or refresh the signal. Returns true only on the transition
    /// into typing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, sender: UserId, peer: UserId) -> bool {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let task = self.spawn_expiry((sender, peer), generation);

        let mut timers = self.timers.lock();
        match timers.insert((sender, peer), TypingTimer { generation, task }) {
            Some(old) => {
                old.task.abort();
                false
            }
            None => {
                (self.on_change)(sender, peer, true);
                true
            }
        }
    }

    /// Cancel the signal. Returns true if it was active.
    pub fn stop(&self, sender: UserId, peer: UserId) -> bool {
        let mut timers = self.timers.lock();
        match timers.remove(&(sender, peer)) {
            Some(timer) => {
                timer.task.abort();
                (self.on_change)(sender, peer, false);
                true
            }
            None => false,
        }
    }

    /// Cancel every signal of `sender`, returning the peers it was typing to.
    pub fn clear_sender(&self, sender: UserId) -> Vec<UserId> {
        let mut timers = self.timers.lock();
        let keys: Vec<TimerKey> = timers.keys().filter(|(s, _)| *s == sender).copied().collect();
        keys.into_iter()
            .filter_map(|key| {
                let timer = timers.remove(&key)?;
                timer.task.abort();
                (self.on_change)(key.0, key.1, false);
                Some(key.1)
            })
            .collect()
    }

    pub fn is_typing(&self, sender: UserId, peer: UserId) -> bool {
        self.timers.lock().contains_key(&(sender, peer))
    }

    pub fn active_count(&self) -> usize {
        self.timers.lock().len()
    }

    fn spawn_expiry(&self, key: TimerKey, generation: u64) -> JoinHandle<()> {
        let timers = self.timers.clone();
        let on_change = self.on_change.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            // A refresh may have replaced this timer after the sleep finished.
            let mut timers = timers.lock();
            match timers.get(&key) {
                Some(timer) if timer.generation == generation => {
                    timers.remove(&key);
                    debug!(sender = %key.0, peer = %key.1, "Typing signal expired");
                    on_change(key.0, key.1, false);
                }
                _ => {}
            }
        })
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Edges = Arc<Mutex<Vec<(UserId, UserId, bool)>>>;

    fn recording(timeout_ms: u64) -> (TypingDebouncer, Edges) {
        let edges = Arc::new(Mutex::new(Vec::new()));
        let sink = edges.clone();
        let debouncer = TypingDebouncer::new(Duration::from_millis(timeout_ms), move |s, p, t| {
            sink.lock().push((s, p, t));
        });
        (debouncer, edges)
    }

    fn ids(a: i64, b: i64) -> (UserId, UserId) {
        (UserId::new(a), UserId::new(b))
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_first_start_is_an_edge() {
        let (debouncer, edges) = recording(3000);
        let (a, b) = ids(1, 2);

        let started: Vec<bool> = (0..5).map(|_| debouncer.start(a, b)).collect();
        assert_eq!(started, vec![true, false, false, false, false]);
        assert!(debouncer.is_typing(a, b));
        assert_eq!(*edges.lock(), vec![(a, b, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_once_after_timeout() {
        let (debouncer, edges) = recording(3000);
        let (a, b) = ids(1, 2);
        debouncer.start(a, b);

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(edges.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(*edges.lock(), vec![(a, b, true), (a, b, false)]);
        assert!(!debouncer.is_typing(a, b));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(edges.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_restarts_timer() {
        let (debouncer, edges) = recording(3000);
        let (a, b) = ids(1, 2);
        debouncer.start(a, b);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        debouncer.start(a, b);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(edges.lock().len(), 1, "refresh must not stack timers");

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(edges.lock().last(), Some(&(a, b, false)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_once_and_cancels_expiry() {
        let (debouncer, edges) = recording(3000);
        let (a, b) = ids(1, 2);
        debouncer.start(a, b);

        assert!(debouncer.stop(a, b));
        assert!(!debouncer.stop(a, b));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*edges.lock(), vec![(a, b, true), (a, b, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_sender() {
        let (debouncer, edges) = recording(3000);
        debouncer.start(UserId::new(1), UserId::new(2));
        debouncer.start(UserId::new(1), UserId::new(3));
        debouncer.start(UserId::new(4), UserId::new(1));

        let mut peers = debouncer.clear_sender(UserId::new(1));
        peers.sort();
        assert_eq!(peers, vec![UserId::new(2), UserId::new(3)]);
        assert_eq!(debouncer.active_count(), 1);

        let stopped = edges.lock().iter().filter(|(_, _, t)| !t).count();
        assert_eq!(stopped, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_edges_alternate_under_contention() {
        let (debouncer, edges) = recording(1);
        let debouncer = Arc::new(debouncer);
        let (a, b) = ids(1, 2);

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let debouncer = debouncer.clone();
                tokio::spawn(async move {
                    for n in 0..300 {
                        if (n + worker) % 7 == 0 {
                            debouncer.stop(a, b);
                        } else {
                            debouncer.start(a, b);
                        }
                        if n % 3 == 0 {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                        } else {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let edges = edges.lock();
        assert!(!edges.is_empty());
        for (i, (_, _, typing)) in edges.iter().enumerate() {
            assert_eq!(*typing, i % 2 == 0, "edge {} out of order: {:?}", i, edges);
        }
        assert_eq!(edges.last().map(|e| e.2), Some(false));
        assert!(!debouncer.is_typing(a, b));
    }
}
