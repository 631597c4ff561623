use std::fmt;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::util::lock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityState {
    Unknown,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectivityState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectivityState::Unknown => "unknown",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type DisconnectHook = Box<dyn Fn() + Send + Sync>;

/// Reachability of the panel API, driven purely by fetch outcomes. Retrying
/// is the scheduler's job.
pub struct ConnectivityTracker {
    state: Mutex<ConnectivityState>,
    on_disconnect: Option<DisconnectHook>,
}

impl ConnectivityTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectivityState::Unknown),
            on_disconnect: None,
        }
    }

    /// Runs on every transition into `Disconnected`, after the state changed.
    pub fn with_disconnect_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Box::new(hook));
        self
    }

    pub fn get(&self) -> ConnectivityState {
        *lock(&self.state)
    }

    /// `Unknown -> Connecting`; any other state is left alone.
    pub fn begin_connecting(&self) -> Option<ConnectivityState> {
        let mut state = lock(&self.state);
        if *state != ConnectivityState::Unknown {
            return None;
        }
        *state = ConnectivityState::Connecting;
        Some(ConnectivityState::Connecting)
    }

    /// Returns the new state when the report changed it.
    pub fn report(&self, success: bool) -> Option<ConnectivityState> {
        let next = if success {
            ConnectivityState::Connected
        } else {
            ConnectivityState::Disconnected
        };
        self.transition(next)
    }

    pub fn mark_disconnected(&self) -> Option<ConnectivityState> {
        self.transition(ConnectivityState::Disconnected)
    }

    fn transition(&self, next: ConnectivityState) -> Option<ConnectivityState> {
        let prev = {
            let mut state = lock(&self.state);
            let prev = *state;
            if prev == next {
                return None;
            }
            *state = next;
            prev
        };

        match next {
            ConnectivityState::Disconnected => {
                warn!(from = %prev, "panel API unreachable");
                if let Some(hook) = &self.on_disconnect {
                    hook();
                }
            }
            ConnectivityState::Connected => info!(from = %prev, "panel API reachable"),
            _ => {}
        }
        Some(next)
    }
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self::new()
    }
}
