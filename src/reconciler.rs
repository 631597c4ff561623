use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::callbacks::Callbacks;
use crate::error::FetchError;
use crate::models::{Resource, Snapshot};
use crate::util::{lock, now_ms};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Poll,
    Push,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciled {
    /// New data was stored and rendered.
    Applied,
    /// Identical to what was already fresh; nothing re-rendered.
    Unchanged,
}

#[derive(Clone, Debug)]
pub struct ViewEntry {
    pub resource: Resource,
    pub snapshot: Snapshot,
    pub fresh: bool,
    pub accepted_at_ms: u64,
    pub origin: Origin,
}

/// Local view-state: the last accepted snapshot per resource. Failed
/// fetches mark an entry stale but never remove or alter its data.
pub struct Reconciler {
    entries: Mutex<BTreeMap<Resource, ViewEntry>>,
    callbacks: Arc<Callbacks>,
}

impl Reconciler {
    pub fn new(callbacks: Arc<Callbacks>) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            callbacks,
        }
    }

    pub fn accept(&self, snapshot: Snapshot, origin: Origin) -> Reconciled {
        let outcome = Self::store(&mut lock(&self.entries), &snapshot, origin);
        self.announce(&snapshot, origin, outcome);
        outcome
    }

    /// Like `accept`, but `current` is checked under the entry lock and the
    /// snapshot is dropped when it returns false. Pairs with `fence`.
    pub fn accept_if(
        &self,
        snapshot: Snapshot,
        origin: Origin,
        current: impl FnOnce() -> bool,
    ) -> Option<Reconciled> {
        let outcome = {
            let mut entries = lock(&self.entries);
            if !current() {
                return None;
            }
            Self::store(&mut entries, &snapshot, origin)
        };
        self.announce(&snapshot, origin, outcome);
        Some(outcome)
    }

    pub fn reject(&self, resource: Resource, error: &FetchError) {
        self.reject_if(resource, error, || true);
    }

    pub fn reject_if(
        &self,
        resource: Resource,
        error: &FetchError,
        current: impl FnOnce() -> bool,
    ) -> bool {
        {
            let mut entries = lock(&self.entries);
            if !current() {
                return false;
            }
            if let Some(entry) = entries.get_mut(&resource) {
                entry.fresh = false;
            }
        }
        warn!(resource = %resource, kind = ?error.kind(), %error, "refresh failed; keeping last data");
        self.callbacks.emit_fetch_error(resource, error);
        true
    }

    /// Waits out any `accept_if`/`reject_if` that already passed its check.
    pub(crate) fn fence(&self) {
        drop(lock(&self.entries));
    }

    fn store(
        entries: &mut BTreeMap<Resource, ViewEntry>,
        snapshot: &Snapshot,
        origin: Origin,
    ) -> Reconciled {
        let resource = snapshot.resource();
        let now = now_ms();
        match entries.get_mut(&resource) {
            Some(entry) if entry.fresh && entry.snapshot == *snapshot => {
                entry.accepted_at_ms = now;
                entry.origin = origin;
                Reconciled::Unchanged
            }
            _ => {
                entries.insert(
                    resource,
                    ViewEntry {
                        resource,
                        snapshot: snapshot.clone(),
                        fresh: true,
                        accepted_at_ms: now,
                        origin,
                    },
                );
                Reconciled::Applied
            }
        }
    }

    fn announce(&self, snapshot: &Snapshot, origin: Origin, outcome: Reconciled) {
        let resource = snapshot.resource();
        match outcome {
            Reconciled::Applied => {
                debug!(resource = %resource, ?origin, "snapshot applied");
                self.callbacks.emit_snapshot(resource, snapshot);
            }
            Reconciled::Unchanged => {
                debug!(resource = %resource, ?origin, "snapshot unchanged");
            }
        }
    }

    pub fn latest(&self, resource: Resource) -> Option<Snapshot> {
        lock(&self.entries)
            .get(&resource)
            .map(|entry| entry.snapshot.clone())
    }

    pub fn is_fresh(&self, resource: Resource) -> bool {
        lock(&self.entries)
            .get(&resource)
            .map(|entry| entry.fresh)
            .unwrap_or(false)
    }

    pub fn view(&self) -> Vec<ViewEntry> {
        lock(&self.entries).values().cloned().collect()
    }

    /// Marks every entry stale, e.g. when the API became unreachable.
    pub(crate) fn mark_all_stale(&self) {
        for entry in lock(&self.entries).values_mut() {
            entry.fresh = false;
        }
    }
}
