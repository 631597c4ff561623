use crate::connectivity::ConnectivityState;
use crate::error::FetchError;
use crate::models::{Resource, Snapshot};
use crate::reconciler::ViewEntry;

type SnapshotFn = Box<dyn Fn(Resource, &Snapshot) + Send + Sync>;
type ConnectivityFn = Box<dyn Fn(ConnectivityState) + Send + Sync>;
type FetchErrorFn = Box<dyn Fn(Resource, &FetchError) + Send + Sync>;
type LogFn = Box<dyn Fn(&str) + Send + Sync>;
type DisconnectFn = Box<dyn Fn(&[ViewEntry]) + Send + Sync>;

/// Render-layer registrations. The controller only ever talks to the
/// presentation through these.
#[derive(Default)]
pub struct Callbacks {
    snapshot: Vec<SnapshotFn>,
    connectivity: Vec<ConnectivityFn>,
    fetch_error: Vec<FetchErrorFn>,
    log: Vec<LogFn>,
    disconnect: Vec<DisconnectFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_snapshot(mut self, f: impl Fn(Resource, &Snapshot) + Send + Sync + 'static) -> Self {
        self.snapshot.push(Box::new(f));
        self
    }

    pub fn on_connectivity_change(
        mut self,
        f: impl Fn(ConnectivityState) + Send + Sync + 'static,
    ) -> Self {
        self.connectivity.push(Box::new(f));
        self
    }

    pub fn on_fetch_error(
        mut self,
        f: impl Fn(Resource, &FetchError) + Send + Sync + 'static,
    ) -> Self {
        self.fetch_error.push(Box::new(f));
        self
    }

    /// Server log lines relayed by the push channel.
    pub fn on_log(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.log.push(Box::new(f));
        self
    }

    /// Runs when the API becomes unreachable, with everything rendered so
    /// far (now stale) so it can be presented as fallback data.
    pub fn on_disconnect(mut self, f: impl Fn(&[ViewEntry]) + Send + Sync + 'static) -> Self {
        self.disconnect.push(Box::new(f));
        self
    }

    pub(crate) fn emit_snapshot(&self, resource: Resource, snapshot: &Snapshot) {
        for f in &self.snapshot {
            f(resource, snapshot);
        }
    }

    pub(crate) fn emit_connectivity(&self, state: ConnectivityState) {
        for f in &self.connectivity {
            f(state);
        }
    }

    pub(crate) fn emit_fetch_error(&self, resource: Resource, error: &FetchError) {
        for f in &self.fetch_error {
            f(resource, error);
        }
    }

    pub(crate) fn emit_log(&self, line: &str) {
        for f in &self.log {
            f(line);
        }
    }

    pub(crate) fn emit_disconnect(&self, view: &[ViewEntry]) {
        for f in &self.disconnect {
            f(view);
        }
    }
}
