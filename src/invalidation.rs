//! Restart-aware cache invalidation.
//!
//! A restart-class call answers before the daemon process has actually gone
//! down and come back, so refetching right away reads stale state or hits a
//! dead socket. Instead, every successful restart-class call arms one
//! delayed invalidate-all. Tasks are independent: two restarts in quick
//! succession produce two signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Delay between a restart-class call succeeding and the invalidate-all.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(2000);

/// What the cache layer should discard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// Every piece of daemon-derived data.
    All,
    /// Only the listed cache keys.
    Keys(Vec<String>),
}

/// The cache layer's side of the contract.
pub trait CacheInvalidator: Send + Sync + 'static {
    fn invalidate(&self, scope: &InvalidationScope);
}

impl<F> CacheInvalidator for F
where
    F: Fn(&InvalidationScope) + Send + Sync + 'static,
{
    fn invalidate(&self, scope: &InvalidationScope) {
        self(scope)
    }
}

impl CacheInvalidator for broadcast::Sender<InvalidationScope> {
    fn invalidate(&self, scope: &InvalidationScope) {
        if self.send(scope.clone()).is_err() {
            tracing::debug!(?scope, "no cache listeners for invalidation");
        }
    }
}

/// Arms delayed invalidation tasks.
#[derive(Clone)]
pub struct InvalidationCoordinator {
    invalidator: Arc<dyn CacheInvalidator>,
    restart_delay: Duration,
}

impl std::fmt::Debug for InvalidationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationCoordinator")
            .field("restart_delay", &self.restart_delay)
            .finish_non_exhaustive()
    }
}

impl InvalidationCoordinator {
    pub fn new(invalidator: impl CacheInvalidator, restart_delay: Duration) -> Self {
        Self {
            invalidator: Arc::new(invalidator),
            restart_delay,
        }
    }

    pub fn restart_delay(&self) -> Duration {
        self.restart_delay
    }

    /// Arms one invalidate-all if `result` is a success, passing the
    /// result through alongside the armed task.
    ///
    /// Failed restart-class calls arm nothing. Must be called from within a
    /// tokio runtime.
    pub fn after_restart<T, E>(&self, result: Result<T, E>) -> Result<(T, InvalidationTask), E> {
        match result {
            Ok(value) => Ok((value, self.schedule(InvalidationScope::All, self.restart_delay))),
            Err(err) => {
                tracing::debug!("restart-class call failed; no invalidation armed");
                Err(err)
            }
        }
    }

    /// Arms a task that signals `scope` once `delay` has elapsed.
    pub fn schedule(&self, scope: InvalidationScope, delay: Duration) -> InvalidationTask {
        let cancelled = Arc::new(AtomicBool::new(false));
        let armed_at = Instant::now();
        tracing::debug!(?scope, delay_ms = delay.as_millis() as u64, "invalidation armed");

        let handle = tokio::spawn({
            let invalidator = self.invalidator.clone();
            let cancelled = cancelled.clone();
            let scope = scope.clone();
            async move {
                tokio::time::sleep(delay).await;
                if cancelled.load(Ordering::Acquire) {
                    tracing::debug!(?scope, "invalidation cancelled");
                    return false;
                }
                tracing::info!(?scope, "invalidating daemon-derived caches");
                invalidator.invalidate(&scope);
                true
            }
        });

        InvalidationTask {
            armed_at,
            delay,
            scope,
            cancelled,
            handle,
        }
    }
}

/// One armed invalidation.
///
/// Dropping the task does not cancel it; the signal still fires.
#[derive(Debug)]
pub struct InvalidationTask {
    armed_at: Instant,
    delay: Duration,
    scope: InvalidationScope,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<bool>,
}

impl InvalidationTask {
    pub fn armed_at(&self) -> Instant {
        self.armed_at
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn fires_at(&self) -> Instant {
        self.armed_at + self.delay
    }

    pub fn scope(&self) -> &InvalidationScope {
        &self.scope
    }

    /// Prevents the signal if it has not fired yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Waits for the task to settle. Returns whether the signal fired.
    pub async fn wait(self) -> bool {
        self.handle.await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn counting() -> (InvalidationCoordinator, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let coordinator = InvalidationCoordinator::new(
            move |scope: &InvalidationScope| {
                assert_eq!(scope, &InvalidationScope::All);
                seen.fetch_add(1, Ordering::SeqCst);
            },
            DEFAULT_RESTART_DELAY,
        );
        (coordinator, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let (coordinator, count) = counting();
        let ((), task) = coordinator
            .after_restart(Ok::<(), ()>(()))
            .expect("armed on success");
        assert_eq!(task.delay(), Duration::from_millis(2000));

        sleep(Duration::from_millis(1999)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0, "must not fire early");

        assert!(task.wait().await, "signal should fire");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1, "fires exactly once");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_arms_nothing() {
        let (coordinator, count) = counting();
        let result: Result<(), &str> = Err("daemon refused");

        assert_eq!(
            coordinator.after_restart(result).expect_err("passed through"),
            "daemon refused"
        );
        sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_are_not_coalesced() {
        let (coordinator, count) = counting();
        let (_, first) = coordinator.after_restart(Ok::<u8, ()>(1)).expect("first");
        sleep(Duration::from_millis(500)).await;
        let (_, second) = coordinator.after_restart(Ok::<u8, ()>(2)).expect("second");

        assert!(first.wait().await);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(second.wait().await);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_does_not_fire() {
        let (coordinator, count) = counting();
        let ((), task) = coordinator.after_restart(Ok::<(), ()>(())).expect("armed");
        sleep(Duration::from_millis(100)).await;
        task.cancel();
        assert!(task.is_cancelled());

        assert!(!task.wait().await);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_task_still_fires() {
        let (coordinator, count) = counting();
        drop(coordinator.after_restart(Ok::<(), ()>(())));
        sleep(Duration::from_millis(2001)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_scoped_over_broadcast() {
        let (tx, mut rx) = broadcast::channel(4);
        let coordinator = InvalidationCoordinator::new(tx, Duration::from_millis(100));
        let scope = InvalidationScope::Keys(vec!["profiles".to_string()]);

        let task = coordinator.schedule(scope.clone(), Duration::from_millis(250));
        assert_eq!(task.scope(), &scope);
        assert_eq!(task.fires_at(), task.armed_at() + Duration::from_millis(250));

        assert_eq!(rx.recv().await.expect("signal"), scope);
        assert!(task.wait().await);
    }
}
