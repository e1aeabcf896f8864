//! Request deduplication.
//!
//! At most one upstream operation runs per key. The first caller for a key
//! starts the work and every caller, first or not, awaits the same shared
//! future, so all of them observe one identical outcome.
//!
//! The work runs on its own task, so it completes and clears its marker
//! even if every caller stops waiting.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::DataError;

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, DataError>>>;

struct InFlight<T> {
    id: u64,
    outcome: SharedOutcome<T>,
    waiters: Arc<AtomicUsize>,
}

/// Whether a caller started the request or joined one already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Waiter,
}

/// Decrements the waiter count when a caller stops waiting, including on cancellation.
struct WaiterGuard(Arc<AtomicUsize>);

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

type Registry<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

/// Clears the in-flight marker when the work ends, panics included, unless
/// shutdown already did or a newer request took the slot.
struct MarkerGuard<T> {
    registry: Registry<T>,
    key: String,
    id: u64,
}

impl<T> Drop for MarkerGuard<T> {
    fn drop(&mut self) {
        let mut in_flight = self.registry.lock();
        if in_flight.get(&self.key).map(|f| f.id) == Some(self.id) {
            in_flight.remove(&self.key);
        }
    }
}

pub struct RequestCoordinator<T> {
    in_flight: Registry<T>,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl<T> RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Run `make_work()` for `key` unless a request for `key` is already in
    /// flight, in which case wait for that one instead.
    pub async fn run<F, Fut>(&self, key: &str, make_work: F) -> Result<T, DataError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DataError>> + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(DataError::ManagerDestroyed);
        }
        let (outcome, guard, role) = self.begin(key, make_work);
        if role == Role::Waiter {
            debug!(key, "Joined in-flight request");
        }
        let result = outcome.await;
        drop(guard);
        result
    }

    /// Atomically join the in-flight request for `key` or register a new one.
    /// Must be called inside a tokio runtime.
    fn begin<F, Fut>(&self, key: &str, make_work: F) -> (SharedOutcome<T>, WaiterGuard, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DataError>> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock();

        if let Some(existing) = in_flight.get(key) {
            existing.waiters.fetch_add(1, Ordering::Relaxed);
            return (
                existing.outcome.clone(),
                WaiterGuard(Arc::clone(&existing.waiters)),
                Role::Waiter,
            );
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let work = make_work();
        let mut shutdown = self.shutdown.subscribe();
        let registry = Arc::clone(&self.in_flight);
        let owned_key = key.to_string();

        let task = tokio::spawn(async move {
            let destroyed = shutdown.wait_for(|destroyed| *destroyed).map(|_| ());
            let _marker = MarkerGuard {
                registry,
                key: owned_key,
                id,
            };
            tokio::select! {
                result = work => result,
                _ = destroyed => Err(DataError::ManagerDestroyed),
            }
        });

        let outcome = async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(DataError::ManagerDestroyed),
                Err(e) => {
                    error!(error = %e, "Coordinated request panicked");
                    Err(DataError::Internal(format!("request task failed: {}", e)))
                }
            }
        }
        .boxed()
        .shared();

        let waiters = Arc::new(AtomicUsize::new(1));
        in_flight.insert(
            key.to_string(),
            InFlight {
                id,
                outcome: outcome.clone(),
                waiters: Arc::clone(&waiters),
            },
        );
        (outcome, WaiterGuard(waiters), Role::Leader)
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Callers currently suspended on any in-flight request.
    pub fn waiter_count(&self) -> usize {
        self.in_flight
            .lock()
            .values()
            .map(|f| f.waiters.load(Ordering::Relaxed))
            .sum()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolve every pending caller with `ManagerDestroyed` and refuse new work.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let abandoned = {
            let mut in_flight = self.in_flight.lock();
            let count = in_flight.len();
            in_flight.clear();
            count
        };
        if abandoned > 0 {
            debug!(abandoned, "Coordinator shut down with requests in flight");
        }
    }
}

impl<T> Default for RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for RequestCoordinator<T> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let coordinator = Arc::new(RequestCoordinator::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                coordinator
                    .run("booking:get", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok(42)
                    })
                    .await
            }));
        }

        while coordinator.waiter_count() < 5 || calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(coordinator.in_flight_count(), 1);
        gate.notify_one();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_in_flight("booking:get"));
        assert_eq!(coordinator.waiter_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_fans_out_identically() {
        let coordinator = RequestCoordinator::<u32>::new();
        let work = || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(DataError::Validation("no segments".into()))
        };
        let (a, b, c) = tokio::join!(
            coordinator.run("k", work),
            coordinator.run("k", work),
            coordinator.run("k", work),
        );
        assert_eq!(a, Err(DataError::Validation("no segments".into())));
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[tokio::test]
    async fn test_marker_cleared_after_completion() {
        let coordinator = RequestCoordinator::<u32>::new();
        let calls = AtomicUsize::new(0);
        for expected in 1..=3 {
            let n = calls.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            let result = coordinator.run("k", || async move { Ok(n) }).await;
            assert_eq!(result, Ok(expected));
        }
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block_each_other() {
        let coordinator = Arc::new(RequestCoordinator::<&'static str>::new());
        let gate = Arc::new(Notify::new());

        let slow = {
            let coordinator = Arc::clone(&coordinator);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                coordinator
                    .run("slow", move || async move {
                        gate.notified().await;
                        Ok("slow")
                    })
                    .await
            })
        };
        while !coordinator.is_in_flight("slow") {
            tokio::task::yield_now().await;
        }

        let fast = coordinator.run("fast", || async { Ok("fast") }).await;
        assert_eq!(fast, Ok("fast"));
        assert!(coordinator.is_in_flight("slow"));

        gate.notify_one();
        assert_eq!(slow.await.unwrap(), Ok("slow"));
    }

    #[tokio::test]
    async fn test_shutdown_resolves_pending_waiters() {
        let coordinator = Arc::new(RequestCoordinator::<u32>::new());
        let mut handles = Vec::new();
        for _ in 0..3 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                coordinator
                    .run("k", || std::future::pending::<Result<u32, DataError>>())
                    .await
            }));
        }
        while coordinator.waiter_count() < 3 {
            tokio::task::yield_now().await;
        }

        coordinator.shutdown();
        for handle in handles {
            let result = tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("waiter hung after shutdown")
                .unwrap();
            assert_eq!(result, Err(DataError::ManagerDestroyed));
        }

        let after = coordinator.run("k", || async { Ok(1) }).await;
        assert_eq!(after, Err(DataError::ManagerDestroyed));
    }

    #[tokio::test]
    async fn test_cancelled_leader_does_not_cancel_waiters() {
        let coordinator = Arc::new(RequestCoordinator::<u32>::new());
        let gate = Arc::new(Notify::new());

        let leader = {
            let coordinator = Arc::clone(&coordinator);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                coordinator
                    .run("k", move || async move {
                        gate.notified().await;
                        Ok(7)
                    })
                    .await
            })
        };
        while !coordinator.is_in_flight("k") {
            tokio::task::yield_now().await;
        }
        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.run("k", || async { Ok(0) }).await })
        };
        while coordinator.waiter_count() < 2 {
            tokio::task::yield_now().await;
        }

        leader.abort();
        let _ = leader.await;
        gate.notify_one();
        assert_eq!(waiter.await.unwrap(), Ok(7));
    }

    #[tokio::test]
    async fn test_work_completes_after_only_caller_gives_up() {
        let coordinator = RequestCoordinator::<u32>::new();
        let gate = Arc::new(Notify::new());
        let finished = Arc::new(AtomicUsize::new(0));

        let work = {
            let gate = Arc::clone(&gate);
            let finished = Arc::clone(&finished);
            move || async move {
                gate.notified().await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(3)
            }
        };
        let gave_up =
            tokio::time::timeout(Duration::from_millis(20), coordinator.run("k", work)).await;
        assert!(gave_up.is_err());
        assert!(coordinator.is_in_flight("k"));
        assert_eq!(coordinator.waiter_count(), 0);

        gate.notify_one();
        tokio::time::timeout(Duration::from_secs(1), async {
            while coordinator.is_in_flight("k") {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("abandoned request never finished");
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_work_clears_marker() {
        async fn explode() -> Result<u32, DataError> {
            panic!("source blew up")
        }

        let coordinator = RequestCoordinator::<u32>::new();
        let result = coordinator.run("k", explode).await;
        assert!(matches!(result, Err(DataError::Internal(_))));
        assert!(!coordinator.is_in_flight("k"));

        assert_eq!(coordinator.run("k", || async { Ok(5) }).await, Ok(5));
    }
}
