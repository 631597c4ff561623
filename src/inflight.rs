use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::Resource;

/// One flag per resource; set while a fetch for it is outstanding.
pub struct InFlightGuard {
    flags: [AtomicBool; Resource::ALL.len()],
}

impl InFlightGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            flags: Default::default(),
        })
    }

    /// `None` when a fetch for `resource` is already outstanding.
    pub fn try_acquire(self: &Arc<Self>, resource: Resource) -> Option<InFlightPermit> {
        self.flags[resource.index()]
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(InFlightPermit {
            guard: Arc::clone(self),
            resource,
        })
    }

    pub fn is_in_flight(&self, resource: Resource) -> bool {
        self.flags[resource.index()].load(Ordering::SeqCst)
    }
}

/// Clears the resource's flag when dropped, whatever the fetch outcome.
pub struct InFlightPermit {
    guard: Arc<InFlightGuard>,
    resource: Resource,
}

impl InFlightPermit {
    pub fn resource(&self) -> Resource {
        self.resource
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.guard.flags[self.resource.index()].store(false, Ordering::SeqCst);
    }
}
