//! Per-channel request/response arbitration.
//!
//! An [`Arbiter`] admits one holder at a time. Waiters queue in FIFO order
//! and ownership passes directly from the releasing holder to the oldest
//! waiter, so nobody can jump the queue in between.
//!
//! [`Arbiter::force_release`] is the escape hatch for tearing a channel down:
//! it wakes every waiter with [`Acquired::ForceReleased`] and unlocks. Any
//! guard issued before the force release becomes inert.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use plclink_transport::ChannelKey;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug)]
enum Wake {
    /// Ownership handed over; carries the epoch it is valid for.
    Handoff(u64),
    Forced,
}

#[derive(Debug, Default)]
struct State {
    locked: bool,
    epoch: u64,
    waiters: VecDeque<oneshot::Sender<Wake>>,
}

/// Mutual exclusion for one channel.
#[derive(Debug)]
pub struct Arbiter {
    key: ChannelKey,
    state: Mutex<State>,
}

/// Outcome of [`Arbiter::acquire`].
#[derive(Debug)]
#[must_use]
pub enum Acquired {
    /// The caller holds the channel until the guard drops.
    Held(ArbiterGuard),
    /// The arbiter was force-released while waiting. Nothing is held and the
    /// channel should be treated as invalid.
    ForceReleased,
}

impl Arbiter {
    pub fn new(key: ChannelKey) -> Self {
        Self {
            key,
            state: Mutex::new(State::default()),
        }
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Wait for exclusive access.
    pub async fn acquire(self: &Arc<Self>) -> Acquired {
        let rx = {
            let mut state = self.lock();
            if !state.locked {
                state.locked = true;
                return Acquired::Held(ArbiterGuard::new(Arc::clone(self), state.epoch));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(key = %self.key, waiting = state.waiters.len(), "waiting for channel");
            rx
        };

        let mut waiter = Waiter {
            arbiter: self,
            rx: Some(rx),
        };
        match waiter.wait().await {
            Some(Wake::Handoff(epoch)) => Acquired::Held(ArbiterGuard::new(Arc::clone(self), epoch)),
            Some(Wake::Forced) | None => Acquired::ForceReleased,
        }
    }

    /// Acquire only if nobody holds the channel.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ArbiterGuard> {
        let mut state = self.lock();
        if state.locked {
            return None;
        }
        state.locked = true;
        Some(ArbiterGuard::new(Arc::clone(self), state.epoch))
    }

    /// Wake every waiter with [`Acquired::ForceReleased`] and unlock.
    ///
    /// The current holder (if any) keeps running but its guard no longer
    /// releases anything. Returns the number of waiters woken.
    pub fn force_release(&self) -> usize {
        let waiters = {
            let mut state = self.lock();
            state.epoch = state.epoch.wrapping_add(1);
            state.locked = false;
            std::mem::take(&mut state.waiters)
        };

        let woken = waiters
            .into_iter()
            .filter_map(|tx| tx.send(Wake::Forced).ok())
            .count();
        warn!(key = %self.key, woken, "arbiter force-released");
        woken
    }

    pub fn is_locked(&self) -> bool {
        self.lock().locked
    }

    /// Number of queued waiters (including any that have since given up).
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    fn release(&self, epoch: u64) {
        let mut state = self.lock();
        if state.epoch != epoch {
            debug!(key = %self.key, "stale guard released after force release");
            return;
        }

        while let Some(tx) = state.waiters.pop_front() {
            if tx.send(Wake::Handoff(epoch)).is_ok() {
                return;
            }
        }
        state.locked = false;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Pending acquire. If dropped after ownership was handed to it, passes the
/// ownership on instead of leaking the lock.
struct Waiter<'a> {
    arbiter: &'a Arbiter,
    rx: Option<oneshot::Receiver<Wake>>,
}

impl Waiter<'_> {
    async fn wait(&mut self) -> Option<Wake> {
        let rx = self.rx.as_mut()?;
        let wake = rx.await.ok();
        self.rx = None;
        wake
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        rx.close();
        if let Ok(Wake::Handoff(epoch)) = rx.try_recv() {
            self.arbiter.release(epoch);
        }
    }
}

/// Exclusive hold on a channel; released on drop.
#[derive(Debug)]
pub struct ArbiterGuard {
    arbiter: Arc<Arbiter>,
    epoch: u64,
}

impl ArbiterGuard {
    fn new(arbiter: Arc<Arbiter>, epoch: u64) -> Self {
        Self { arbiter, epoch }
    }

    /// Whether the arbiter has been force-released since this guard was issued.
    pub fn is_stale(&self) -> bool {
        self.arbiter.lock().epoch != self.epoch
    }

    pub fn key(&self) -> &ChannelKey {
        &self.arbiter.key
    }

    /// Release explicitly.
    pub fn release(self) {}
}

impl Drop for ArbiterGuard {
    fn drop(&mut self) {
        self.arbiter.release(self.epoch);
    }
}

/// Arbiters keyed by channel, created on first use.
#[derive(Debug, Default)]
pub struct ArbiterRegistry {
    arbiters: Mutex<HashMap<ChannelKey, Arc<Arbiter>>>,
}

impl ArbiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The arbiter for `key`, creating it if needed.
    pub fn get(&self, key: &ChannelKey) -> Arc<Arbiter> {
        let mut arbiters = self
            .arbiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            arbiters
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Arbiter::new(key.clone()))),
        )
    }

    /// Force-release the arbiter for `key` if one exists.
    pub fn force_release(&self, key: &ChannelKey) -> usize {
        let arbiter = self
            .arbiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned();
        arbiter.map_or(0, |arbiter| arbiter.force_release())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use super::*;

    fn arbiter() -> Arc<Arbiter> {
        Arc::new(Arbiter::new(ChannelKey::from("plc")))
    }

    fn held(acquired: Acquired) -> ArbiterGuard {
        match acquired {
            Acquired::Held(guard) => guard,
            Acquired::ForceReleased => panic!("expected to hold the arbiter"),
        }
    }

    #[tokio::test]
    async fn second_acquire_waits_for_release() {
        let arbiter = arbiter();
        let first = held(arbiter.acquire().await);

        let contender = Arc::clone(&arbiter);
        let mut second = tokio::spawn(async move { held(contender.acquire().await) });
        assert!(timeout(Duration::from_millis(50), &mut second).await.is_err());

        drop(first);
        let second = timeout(Duration::from_secs(1), second).await.unwrap().unwrap();
        assert!(arbiter.is_locked());
        drop(second);
        assert!(!arbiter.is_locked());
    }

    #[tokio::test]
    async fn holders_never_overlap() {
        let arbiter = arbiter();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let arbiter = Arc::clone(&arbiter);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tasks.push(tokio::spawn(async move {
                let guard = held(arbiter.acquire().await);
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
                drop(guard);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(!arbiter.is_locked());
    }

    #[tokio::test]
    async fn ownership_passes_in_fifo_order() {
        let arbiter = arbiter();
        let first = held(arbiter.acquire().await);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for id in 0..4 {
            let contender = Arc::clone(&arbiter);
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let _guard = held(contender.acquire().await);
                order.lock().unwrap().push(id);
            }));
            // make sure each waiter is queued before the next one
            while arbiter.waiting() < id + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(first);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn force_release_wakes_every_waiter_once() {
        let arbiter = arbiter();
        let holder = held(arbiter.acquire().await);

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let arbiter = Arc::clone(&arbiter);
            tasks.push(tokio::spawn(async move { arbiter.acquire().await }));
        }
        while arbiter.waiting() < 3 {
            tokio::task::yield_now().await;
        }

        assert_eq!(arbiter.force_release(), 3);
        for task in tasks {
            let outcome = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
            assert!(matches!(outcome, Acquired::ForceReleased));
        }
        assert!(!arbiter.is_locked());
        assert!(holder.is_stale());

        // A fresh holder is not disturbed by the stale guard dropping.
        let fresh = held(arbiter.acquire().await);
        drop(holder);
        assert!(arbiter.is_locked());
        assert!(arbiter.try_acquire().is_none());
        drop(fresh);
        assert!(!arbiter.is_locked());
    }

    #[tokio::test]
    async fn abandoned_waiter_does_not_block_others() {
        let arbiter = arbiter();
        let first = held(arbiter.acquire().await);

        let gone = Arc::clone(&arbiter);
        let abandoned = tokio::spawn(async move { gone.acquire().await });
        while arbiter.waiting() < 1 {
            tokio::task::yield_now().await;
        }
        abandoned.abort();
        let _ = abandoned.await;

        let next = Arc::clone(&arbiter);
        let waiter = tokio::spawn(async move { held(next.acquire().await) });
        while arbiter.waiting() < 2 {
            tokio::task::yield_now().await;
        }

        drop(first);
        let guard = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        drop(guard);
        assert!(!arbiter.is_locked());
    }

    #[test]
    fn registry_returns_same_arbiter_per_key() {
        let registry = ArbiterRegistry::new();
        let a = registry.get(&ChannelKey::from("COM3"));
        let b = registry.get(&ChannelKey::from("COM3"));
        let c = registry.get(&ChannelKey::from("COM4"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.force_release(&ChannelKey::from("missing")), 0);
    }
}
