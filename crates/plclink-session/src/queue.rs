//! Client-side command queue.
//!
//! Serializes one client's logical operations: entries run one at a time in
//! FIFO order, each raced against its own timeout. A timed-out operation is
//! reported to its caller but left running in the background; channel-level
//! exclusion is the arbiter's job, not the queue's.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::{Result, SessionError};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Bounded FIFO of pending operations.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    config: QueueConfig,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    /// An entry has been taken off `pending` and is executing.
    active: bool,
    drain: Option<JoinHandle<()>>,
    generation: u64,
}

/// Completion handle for an enqueued operation.
///
/// Resolves to the operation's result, `Timeout`, or `QueueCleared`.
#[must_use = "a ticket does nothing unless awaited"]
pub struct Ticket<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Ticket<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SessionError::QueueCleared)))
    }
}

impl CommandQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Append an operation. Fails at once with `QueueFull` when the waiting
    /// entries plus the executing one already fill the capacity.
    ///
    /// `timeout` defaults to the queue's configured timeout. Must be called
    /// from within a Tokio runtime.
    pub fn enqueue<F, T>(&self, timeout: Option<Duration>, operation: F) -> Result<Ticket<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = timeout.unwrap_or(self.inner.config.default_timeout);
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::pin(async move {
            let task = tokio::spawn(operation);
            let outcome = match tokio::time::timeout(timeout, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => Err(SessionError::Internal(err.to_string())),
                Err(_) => {
                    // Dropping the handle detaches the task; it finishes on its own.
                    warn!(?timeout, "queued operation timed out");
                    Err(SessionError::Timeout(timeout))
                }
            };
            let _ = tx.send(outcome);
        });

        self.push(job)?;
        Ok(Ticket { rx })
    }

    /// Enqueue and wait for the result.
    pub async fn run<F, T>(&self, timeout: Option<Duration>, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(timeout, operation)?.await
    }

    /// Reject every pending entry with `QueueCleared` and reset the drain.
    ///
    /// The entry currently executing is abandoned; its caller also sees
    /// `QueueCleared`. Returns the number of entries discarded.
    pub fn clear(&self) -> usize {
        let (discarded, drain) = {
            let mut state = self.inner.lock();
            state.generation = state.generation.wrapping_add(1);
            state.active = false;
            (std::mem::take(&mut state.pending), state.drain.take())
        };
        if let Some(drain) = drain {
            drain.abort();
        }
        let count = discarded.len();
        drop(discarded);
        if count > 0 {
            debug!(count, "command queue cleared");
        }
        count
    }

    /// Entries waiting to run (excluding the one executing).
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entry is executing or waiting.
    pub fn is_busy(&self) -> bool {
        let state = self.inner.lock();
        state.drain.is_some() || !state.pending.is_empty()
    }

    fn push(&self, job: Job) -> Result<()> {
        let mut state = self.inner.lock();
        let capacity = self.inner.config.capacity;
        if state.pending.len() + usize::from(state.active) >= capacity {
            return Err(SessionError::QueueFull(capacity));
        }
        state.pending.push_back(job);

        if state.drain.is_none() {
            let generation = state.generation;
            state.drain = Some(tokio::spawn(drain(Arc::clone(&self.inner), generation)));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("config", &self.inner.config)
            .field("pending", &self.len())
            .finish()
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn drain(inner: Arc<QueueInner>, generation: u64) {
    loop {
        let job = {
            let mut state = inner.lock();
            if state.generation != generation {
                return;
            }
            match state.pending.pop_front() {
                Some(job) => {
                    state.active = true;
                    job
                }
                None => {
                    state.active = false;
                    state.drain = None;
                    return;
                }
            }
        };
        job.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::time::{sleep, Instant};

    use super::*;

    fn queue(capacity: usize) -> CommandQueue {
        CommandQueue::new(QueueConfig {
            capacity,
            default_timeout: Duration::from_secs(2),
        })
    }

    #[tokio::test]
    async fn entries_run_in_order_without_overlap() {
        let queue = queue(50);
        let spans = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut tickets = Vec::new();
        for id in 0..6u32 {
            let spans = Arc::clone(&spans);
            tickets.push(
                queue
                    .enqueue(None, async move {
                        let start = Instant::now();
                        sleep(Duration::from_millis(5)).await;
                        spans.lock().unwrap().push((id, start, Instant::now()));
                        Ok(id)
                    })
                    .unwrap(),
            );
        }
        for (expected, ticket) in tickets.into_iter().enumerate() {
            assert_eq!(ticket.await.unwrap(), expected as u32);
        }

        let spans = spans.lock().unwrap();
        let ids: Vec<u32> = spans.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        for pair in spans.windows(2) {
            assert!(pair[0].2 <= pair[1].1, "entries overlapped");
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_immediately() {
        let queue = queue(2);
        let gate = Arc::new(tokio::sync::Notify::new());

        // First entry is picked up by the drain and blocks it.
        let blocker = {
            let gate = Arc::clone(&gate);
            queue
                .enqueue(None, async move {
                    gate.notified().await;
                    Ok(())
                })
                .unwrap()
        };
        while queue.len() > 0 {
            tokio::task::yield_now().await;
        }

        // The executing entry counts against the capacity.
        let a = queue.enqueue(None, async { Ok(1) }).unwrap();
        assert!(matches!(
            queue.enqueue(None, async { Ok(2) }),
            Err(SessionError::QueueFull(2))
        ));

        gate.notify_one();
        blocker.await.unwrap();
        assert_eq!(a.await.unwrap(), 1);
        assert_eq!(queue.run(None, async { Ok(3) }).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn timeout_rejects_caller_but_lets_operation_finish() {
        let queue = queue(50);
        let finished = Arc::new(AtomicBool::new(false));

        let slow = {
            let finished = Arc::clone(&finished);
            queue
                .enqueue(Some(Duration::from_millis(20)), async move {
                    sleep(Duration::from_millis(60)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap()
        };
        let next = queue.enqueue(None, async { Ok("next") }).unwrap();

        assert!(matches!(slow.await, Err(SessionError::Timeout(_))));
        assert_eq!(next.await.unwrap(), "next");
        sleep(Duration::from_millis(100)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn clear_rejects_pending_and_queue_recovers() {
        let queue = queue(50);
        let blocker = queue
            .enqueue(None, async {
                sleep(Duration::from_secs(10)).await;
                Ok(0)
            })
            .unwrap();
        let pending = queue.enqueue(None, async { Ok(1) }).unwrap();
        while queue.len() > 1 {
            tokio::task::yield_now().await;
        }

        assert_eq!(queue.clear(), 1);
        assert!(matches!(blocker.await, Err(SessionError::QueueCleared)));
        assert!(matches!(pending.await, Err(SessionError::QueueCleared)));
        assert!(!queue.is_busy());

        assert_eq!(queue.run(None, async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn operation_error_is_returned_as_is() {
        let queue = queue(50);
        let result: Result<()> = queue
            .run(None, async { Err(SessionError::InvalidRequest("bad".into())) })
            .await;
        assert!(matches!(result, Err(SessionError::InvalidRequest(_))));
    }
}
