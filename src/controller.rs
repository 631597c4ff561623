use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{Backend, FetchParams};
use crate::callbacks::Callbacks;
use crate::connectivity::{ConnectivityState, ConnectivityTracker};
use crate::constants::{
    BOT_SEQUENCE_DELAY_MS, DEFAULT_RANKING_LIMIT, DEFAULT_REQUEST_TIMEOUT_MS, MAX_RANKING_LIMIT,
};
use crate::error::{CommandError, ControllerError, FetchError};
use crate::inflight::{InFlightGuard, InFlightPermit};
use crate::models::{
    BotAction, BotKind, Command, CommandOutcome, LeaderboardEntry, Resource, Snapshot,
};
use crate::reconciler::{Origin, Reconciled, Reconciler, ViewEntry};
use crate::scheduler::{RefreshPolicy, Scheduler, Tick};
use crate::util::lock;

#[derive(Clone, Debug)]
pub struct ControllerOptions {
    pub policy: RefreshPolicy,
    /// Resources polled on every tick.
    pub resources: Vec<Resource>,
    pub fetch_timeout: Duration,
    pub ranking_limit: usize,
    /// Fetch every tracked resource as soon as `start()` is called instead of
    /// waiting for the first tick.
    pub refresh_on_start: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            policy: RefreshPolicy::default(),
            resources: vec![Resource::Status, Resource::BotStatus, Resource::Stats],
            fetch_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            ranking_limit: DEFAULT_RANKING_LIMIT,
            refresh_on_start: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Stopped,
}

#[derive(Clone, Debug)]
pub enum RefreshOutcome {
    Applied,
    Unchanged,
    Failed(FetchError),
    /// A fetch for the resource was already outstanding.
    Skipped,
    /// The response arrived after `stop()` or a backend swap.
    Discarded,
}

struct Inner<B: Backend> {
    backend: Mutex<Arc<B>>,
    connectivity: ConnectivityTracker,
    reconciler: Arc<Reconciler>,
    scheduler: Scheduler,
    in_flight: Arc<InFlightGuard>,
    callbacks: Arc<Callbacks>,
    tracked: Mutex<BTreeSet<Resource>>,
    ranking_limit: AtomicUsize,
    fetch_timeout: Duration,
    refresh_on_start: bool,
    generation: AtomicU64,
    started: AtomicBool,
    stopped: watch::Sender<bool>,
}

/// Keeps local view-state in sync with the panel API: periodic polling,
/// manual refreshes and push events all end in the same reconciler. One
/// instance per panel session; clones share state.
pub struct RefreshController<B: Backend> {
    inner: Arc<Inner<B>>,
}

impl<B: Backend> Clone for RefreshController<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> RefreshController<B> {
    pub fn new(backend: B, options: ControllerOptions, callbacks: Callbacks) -> Self {
        let callbacks = Arc::new(callbacks);
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&callbacks)));

        let hook_reconciler = Arc::clone(&reconciler);
        let hook_callbacks = Arc::clone(&callbacks);
        let connectivity = ConnectivityTracker::new().with_disconnect_hook(move || {
            hook_reconciler.mark_all_stale();
            hook_callbacks.emit_disconnect(&hook_reconciler.view());
        });

        let (stopped, _) = watch::channel(false);
        let inner = Inner {
            backend: Mutex::new(Arc::new(backend)),
            connectivity,
            reconciler,
            scheduler: Scheduler::new(options.policy),
            in_flight: InFlightGuard::new(),
            callbacks,
            tracked: Mutex::new(options.resources.into_iter().collect()),
            ranking_limit: AtomicUsize::new(clamp_ranking_limit(options.ranking_limit)),
            fetch_timeout: options.fetch_timeout,
            refresh_on_start: options.refresh_on_start,
            generation: AtomicU64::new(0),
            started: AtomicBool::new(false),
            stopped,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn start(&self) -> Result<(), ControllerError> {
        if self.is_stopped() {
            return Err(ControllerError::Stopped);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!("controller already started; restarting timer");
        } else {
            info!(
                backend = self.backend().name(),
                interval_ms = self.policy().interval_ms(),
                "refresh controller starting"
            );
        }

        if let Some(state) = self.inner.connectivity.begin_connecting() {
            self.inner.callbacks.emit_connectivity(state);
        }
        if self.inner.refresh_on_start {
            self.tick();
        }
        self.restart_timer(self.policy());
        Ok(())
    }

    /// Terminal teardown. Timers stop at once; fetches already in flight run
    /// to completion but their results are dropped.
    pub fn stop(&self) {
        if self.inner.stopped.send_replace(true) {
            return;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.scheduler.stop();
        self.inner.reconciler.fence();
        info!("refresh controller stopped");
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }

    /// Resolves once `stop()` has been called.
    pub async fn stopped(&self) {
        let mut rx = self.inner.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub fn state(&self) -> ControllerState {
        if self.is_stopped() {
            return ControllerState::Stopped;
        }
        if !self.inner.started.load(Ordering::SeqCst) {
            return ControllerState::Idle;
        }
        match self.inner.connectivity.get() {
            ConnectivityState::Unknown | ConnectivityState::Connecting => {
                ControllerState::Connecting
            }
            ConnectivityState::Connected => ControllerState::Connected,
            ConnectivityState::Disconnected => ControllerState::Disconnected,
        }
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.inner.connectivity.get()
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.inner.scheduler.policy()
    }

    pub fn set_interval(&self, interval_ms: u64) {
        if self.is_stopped() {
            return;
        }
        info!(interval_ms, "refresh interval changed");
        self.inner.scheduler.set_interval(interval_ms);
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        let policy = RefreshPolicy::new(self.policy().interval_ms(), enabled);
        self.apply_policy(policy);
    }

    /// Settings save: the timer restarts on the new policy (or is cancelled
    /// when auto-refresh is off).
    pub fn apply_policy(&self, policy: RefreshPolicy) {
        if self.is_stopped() {
            return;
        }
        if self.inner.started.load(Ordering::SeqCst) {
            self.restart_timer(policy);
        } else {
            self.inner.scheduler.configure(policy);
        }
    }

    pub fn tracked(&self) -> Vec<Resource> {
        lock(&self.inner.tracked).iter().copied().collect()
    }

    pub fn track(&self, resource: Resource) -> bool {
        lock(&self.inner.tracked).insert(resource)
    }

    pub fn untrack(&self, resource: Resource) -> bool {
        lock(&self.inner.tracked).remove(&resource)
    }

    /// Tab switch: the resource joins the polling set and is fetched now.
    pub async fn focus(&self, resource: Resource) -> RefreshOutcome {
        self.track(resource);
        self.refresh(resource).await
    }

    pub fn ranking_limit(&self) -> usize {
        self.inner.ranking_limit.load(Ordering::SeqCst)
    }

    pub fn set_ranking_limit(&self, limit: usize) {
        let limit = clamp_ranking_limit(limit);
        let prev = self.inner.ranking_limit.swap(limit, Ordering::SeqCst);
        if prev != limit && lock(&self.inner.tracked).contains(&Resource::Ranking) {
            self.spawn_refresh(Resource::Ranking);
        }
    }

    /// Swaps the data source after a settings change. Responses still in
    /// flight from the previous backend are discarded.
    pub fn replace_backend(&self, backend: B) {
        if self.is_stopped() {
            return;
        }
        {
            let mut current = lock(&self.inner.backend);
            *current = Arc::new(backend);
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.reconciler.fence();
        info!(backend = self.backend().name(), "backend replaced");
        if self.inner.started.load(Ordering::SeqCst) {
            self.tick();
        }
    }

    pub fn snapshot(&self, resource: Resource) -> Option<Snapshot> {
        self.inner.reconciler.latest(resource)
    }

    pub fn is_fresh(&self, resource: Resource) -> bool {
        self.inner.reconciler.is_fresh(resource)
    }

    pub fn view(&self) -> Vec<ViewEntry> {
        self.inner.reconciler.view()
    }

    pub fn is_in_flight(&self, resource: Resource) -> bool {
        self.inner.in_flight.is_in_flight(resource)
    }

    /// Fetches `resource` now unless a fetch for it is already outstanding.
    pub async fn refresh(&self, resource: Resource) -> RefreshOutcome {
        match self.acquire(resource) {
            Some(permit) => self.run_fetch(permit).await,
            None if self.is_stopped() => RefreshOutcome::Discarded,
            None => RefreshOutcome::Skipped,
        }
    }

    /// Fire-and-forget variant used by timer ticks. Returns whether a fetch
    /// was issued.
    pub fn spawn_refresh(&self, resource: Resource) -> bool {
        let permit = match self.acquire(resource) {
            Some(permit) => permit,
            None => return false,
        };
        let controller = self.clone();
        tokio::spawn(async move {
            controller.run_fetch(permit).await;
        });
        true
    }

    pub async fn refresh_all(&self) -> Vec<(Resource, RefreshOutcome)> {
        let resources = self.tracked();
        let outcomes = join_all(resources.iter().map(|resource| self.refresh(*resource))).await;
        resources.into_iter().zip(outcomes).collect()
    }

    /// Entry point for push events; identical to a successful poll from the
    /// reconciler's point of view.
    pub fn accept_push(&self, snapshot: Snapshot) -> Option<Reconciled> {
        let resource = snapshot.resource();
        let outcome = self
            .inner
            .reconciler
            .accept_if(snapshot, Origin::Push, || !self.is_stopped());
        if outcome.is_none() {
            debug!(resource = %resource, "ignoring push after stop");
        }
        outcome
    }

    /// The push channel dropped. Polling keeps running as the fallback.
    pub fn push_disconnected(&self) {
        if self.is_stopped() {
            return;
        }
        if let Some(state) = self.inner.connectivity.mark_disconnected() {
            self.inner.callbacks.emit_connectivity(state);
        }
    }

    pub fn relay_log(&self, line: &str) {
        if !self.is_stopped() {
            self.inner.callbacks.emit_log(line);
        }
    }

    /// Runs a user command once. Failures are returned as-is and never
    /// retried; success triggers a refresh of everything tracked.
    pub async fn execute(&self, command: Command) -> Result<CommandOutcome, CommandError> {
        if self.is_stopped() {
            return Err(CommandError::Stopped);
        }
        let command = command.validate()?;
        let backend = self.backend();
        info!(command = %command.describe(), backend = backend.name(), "executing command");

        match backend.execute(&command).await {
            Ok(outcome) => {
                info!(message = %outcome.message, total_points = ?outcome.total_points, "command succeeded");
                if !self.is_stopped() {
                    self.tick();
                }
                Ok(outcome)
            }
            Err(err) => {
                warn!(command = %command.describe(), %err, "command failed");
                Err(err)
            }
        }
    }

    /// Applies `action` to every bot in turn with a short pause between
    /// them, stopping at the first failure.
    pub async fn bot_action_all(
        &self,
        action: BotAction,
    ) -> Result<Vec<CommandOutcome>, CommandError> {
        let mut outcomes = Vec::with_capacity(BotKind::ALL.len());
        for (index, bot) in BotKind::ALL.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(Duration::from_millis(BOT_SEQUENCE_DELAY_MS)).await;
            }
            outcomes.push(self.execute(Command::Bot { bot, action }).await?);
        }
        Ok(outcomes)
    }

    /// Case-insensitive lookup in a fresh leaderboard. When the leaderboard
    /// is already being fetched, the last accepted copy is searched.
    pub async fn search_user(&self, username: &str) -> Result<Option<LeaderboardEntry>, CommandError> {
        if self.is_stopped() {
            return Err(CommandError::Stopped);
        }
        let needle = username.trim();
        if needle.is_empty() {
            return Err(CommandError::Invalid("username is required".to_string()));
        }

        match self.refresh(Resource::Leaderboard).await {
            RefreshOutcome::Failed(err) => return Err(CommandError::Fetch(err)),
            RefreshOutcome::Discarded if self.is_stopped() => return Err(CommandError::Stopped),
            _ => {}
        }

        match self.inner.reconciler.latest(Resource::Leaderboard) {
            Some(Snapshot::Leaderboard(rows)) => Ok(rows
                .into_iter()
                .find(|entry| entry.username.eq_ignore_ascii_case(needle))),
            _ => Err(CommandError::Busy(Resource::Leaderboard.as_str())),
        }
    }

    fn backend(&self) -> Arc<B> {
        Arc::clone(&lock(&self.inner.backend))
    }

    fn acquire(&self, resource: Resource) -> Option<InFlightPermit> {
        if self.is_stopped() {
            return None;
        }
        let permit = self.inner.in_flight.try_acquire(resource);
        if permit.is_none() {
            debug!(resource = %resource, "refresh skipped; previous fetch still in flight");
        }
        permit
    }

    fn tick(&self) {
        for resource in self.tracked() {
            self.spawn_refresh(resource);
        }
    }

    fn restart_timer(&self, policy: RefreshPolicy) {
        let weak = Arc::downgrade(&self.inner);
        let tick: Tick = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                RefreshController { inner }.tick();
            }
        });
        self.inner.scheduler.start(policy, tick);
    }

    async fn run_fetch(&self, permit: InFlightPermit) -> RefreshOutcome {
        let resource = permit.resource();
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let backend = self.backend();
        let params = FetchParams {
            ranking_limit: self.ranking_limit(),
        };

        let timeout = self.inner.fetch_timeout;
        let result = match tokio::time::timeout(timeout, backend.fetch(resource, params)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        };

        // The permit is held until the result is applied so that responses
        // for one resource are reconciled in issue order.
        let _permit = permit;

        // Rechecked under the reconciler lock; `stop()` fences on that lock.
        let current = || self.is_current(generation);
        if !current() {
            return self.discard(resource);
        }

        match result {
            Ok(snapshot) if snapshot.resource() == resource => {
                match self.inner.reconciler.accept_if(snapshot, Origin::Poll, current) {
                    Some(reconciled) => {
                        self.report(true);
                        match reconciled {
                            Reconciled::Applied => RefreshOutcome::Applied,
                            Reconciled::Unchanged => RefreshOutcome::Unchanged,
                        }
                    }
                    None => self.discard(resource),
                }
            }
            Ok(snapshot) => {
                let err = FetchError::Protocol(format!(
                    "expected {} snapshot, got {}",
                    resource,
                    snapshot.resource()
                ));
                self.fail(resource, err, current)
            }
            Err(err) => self.fail(resource, err, current),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.is_stopped() && self.inner.generation.load(Ordering::SeqCst) == generation
    }

    fn discard(&self, resource: Resource) -> RefreshOutcome {
        debug!(resource = %resource, "discarding late response");
        RefreshOutcome::Discarded
    }

    fn fail(
        &self,
        resource: Resource,
        err: FetchError,
        current: impl FnOnce() -> bool,
    ) -> RefreshOutcome {
        if !self.inner.reconciler.reject_if(resource, &err, current) {
            return self.discard(resource);
        }
        self.report(false);
        RefreshOutcome::Failed(err)
    }

    fn report(&self, success: bool) {
        if self.is_stopped() {
            return;
        }
        if let Some(state) = self.inner.connectivity.report(success) {
            self.inner.callbacks.emit_connectivity(state);
        }
    }
}

fn clamp_ranking_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_RANKING_LIMIT)
}
