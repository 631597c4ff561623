use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::constants::{DEFAULT_REFRESH_INTERVAL_MS, MIN_REFRESH_INTERVAL_MS};
use crate::util::lock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshPolicy {
    interval_ms: u64,
    pub enabled: bool,
}

impl RefreshPolicy {
    pub fn new(interval_ms: u64, enabled: bool) -> Self {
        Self {
            interval_ms: interval_ms.max(MIN_REFRESH_INTERVAL_MS),
            enabled,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn with_interval(self, interval_ms: u64) -> Self {
        Self::new(interval_ms, self.enabled)
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_INTERVAL_MS, true)
    }
}

pub type Tick = Arc<dyn Fn() + Send + Sync>;

struct Running {
    handle: JoinHandle<()>,
    tick: Tick,
}

/// Repeating refresh timer plus one-shot deferred transitions. Ticks only
/// signal; overlap with outstanding fetch work is prevented by the caller's
/// in-flight guards, so a tick never waits on a previous one.
pub struct Scheduler {
    policy: Mutex<RefreshPolicy>,
    running: Mutex<Option<Running>>,
    deferred: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            policy: Mutex::new(policy),
            running: Mutex::new(None),
            deferred: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        *lock(&self.policy)
    }

    /// Records a policy without touching the timer.
    pub fn configure(&self, policy: RefreshPolicy) {
        *lock(&self.policy) = policy;
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Cancels any active timer, then starts a new one whose first tick is a
    /// full interval from now. A disabled policy only cancels.
    pub fn start(&self, policy: RefreshPolicy, tick: Tick) {
        *lock(&self.policy) = policy;
        let mut running = lock(&self.running);
        if let Some(prev) = running.take() {
            prev.handle.abort();
        }
        if !policy.enabled {
            debug!("auto-refresh disabled; timer not started");
            return;
        }

        let period = policy.interval();
        let task_tick = Arc::clone(&tick);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                task_tick();
            }
        });
        debug!(interval_ms = policy.interval_ms(), "refresh timer started");
        *running = Some(Running { handle, tick });
    }

    pub fn stop(&self) {
        if let Some(prev) = lock(&self.running).take() {
            prev.handle.abort();
            debug!("refresh timer stopped");
        }
        for handle in lock(&self.deferred).drain(..) {
            handle.abort();
        }
    }

    /// Restarts a running timer on the new cadence, measured from now. When
    /// stopped, only the policy changes.
    pub fn set_interval(&self, interval_ms: u64) {
        let policy = self.policy().with_interval(interval_ms);
        let tick = lock(&self.running)
            .as_ref()
            .map(|running| Arc::clone(&running.tick));
        match tick {
            Some(tick) => self.start(policy, tick),
            None => *lock(&self.policy) = policy,
        }
    }

    /// Runs `task` once after `delay` unless the scheduler is stopped first.
    pub fn defer<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        let mut deferred = lock(&self.deferred);
        deferred.retain(|handle| !handle.is_finished());
        deferred.push(handle);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_tick() -> (Tick, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let tick: Tick = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (tick, count)
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_leaves_one_timer() {
        let scheduler = Scheduler::new(RefreshPolicy::default());
        let (tick, count) = counting_tick();
        let policy = RefreshPolicy::new(5_000, true);
        scheduler.start(policy, Arc::clone(&tick));
        scheduler.start(policy, tick);

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_silences_ticks() {
        let scheduler = Scheduler::new(RefreshPolicy::default());
        scheduler.stop();

        let (tick, count) = counting_tick();
        scheduler.start(RefreshPolicy::new(1_000, true), tick);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        scheduler.stop();
        scheduler.stop();
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_policy_never_ticks() {
        let scheduler = Scheduler::new(RefreshPolicy::default());
        let (tick, count) = counting_tick();
        scheduler.start(RefreshPolicy::new(1_000, false), tick);
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn set_interval_while_stopped_only_records_policy() {
        let scheduler = Scheduler::new(RefreshPolicy::default());
        scheduler.set_interval(2_000);
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.policy().interval_ms(), 2_000);
    }

    #[test]
    fn zero_interval_is_clamped() {
        assert_eq!(RefreshPolicy::new(0, true).interval_ms(), MIN_REFRESH_INTERVAL_MS);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_task_is_cancelled_by_stop() {
        let scheduler = Scheduler::new(RefreshPolicy::default());
        let (tick, count) = counting_tick();
        let first = Arc::clone(&tick);
        scheduler.defer(Duration::from_millis(500), move || first());
        scheduler.defer(Duration::from_millis(2_000), move || tick());

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        scheduler.stop();
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
