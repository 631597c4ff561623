use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::constants::{PUSH_BACKOFF_BASE_MS, PUSH_BACKOFF_MAX_MS};
use crate::controller::RefreshController;
use crate::models::{BotsStatus, PanelStats, ServerStatus, Snapshot};
use crate::push::{PushHandler, PushTransport, DISCONNECT_EVENT};

/// Routes push events from a transport into a controller and keeps the
/// transport connected while the controller is alive.
pub struct EventBridge<B: Backend, T: PushTransport> {
    controller: RefreshController<B>,
    transport: Arc<T>,
    lost: Arc<Notify>,
}

impl<B: Backend, T: PushTransport> EventBridge<B, T> {
    pub fn attach(controller: RefreshController<B>, transport: Arc<T>) -> Self {
        let lost = Arc::new(Notify::new());

        let c = controller.clone();
        transport.on(
            "bot_status_update",
            handler(move |data| match decode::<BotsStatus>(&data) {
                Some(bots) => {
                    c.accept_push(Snapshot::BotStatus(bots));
                }
                // The panel also pushes the short `{twitch, discord}` form.
                None => match decode::<ServerStatus>(&data) {
                    Some(status) => {
                        c.accept_push(Snapshot::Status(status));
                    }
                    None => warn!(event = "bot_status_update", "unrecognised payload"),
                },
            }),
        );

        let c = controller.clone();
        transport.on(
            "stats_update",
            handler(move |data| match decode::<PanelStats>(&data) {
                Some(stats) => {
                    c.accept_push(Snapshot::Stats(stats));
                }
                None => warn!(event = "stats_update", "unrecognised payload"),
            }),
        );

        let c = controller.clone();
        transport.on(
            "status_update",
            handler(move |data| match decode::<ServerStatus>(&data) {
                Some(status) => {
                    c.accept_push(Snapshot::Status(status));
                }
                None => warn!(event = "status_update", "unrecognised payload"),
            }),
        );

        for event in ["log_message", "new_log"] {
            let c = controller.clone();
            transport.on(
                event,
                handler(move |data| {
                    if let Some(line) = log_line(&data) {
                        c.relay_log(&line);
                    }
                }),
            );
        }

        let c = controller.clone();
        let notify = Arc::clone(&lost);
        transport.on(
            DISCONNECT_EVENT,
            handler(move |reason| {
                debug!(?reason, "push channel lost");
                c.push_disconnected();
                notify.notify_one();
            }),
        );

        Self {
            controller,
            transport,
            lost,
        }
    }

    /// Connects, waits for the session to drop, and reconnects with
    /// exponential backoff until the controller stops.
    pub async fn run(&self) {
        let base = Duration::from_millis(PUSH_BACKOFF_BASE_MS);
        let max_backoff = Duration::from_millis(PUSH_BACKOFF_MAX_MS);
        let mut backoff = base;

        while !self.controller.is_stopped() {
            let connected = tokio::select! {
                result = self.transport.connect() => result,
                _ = self.controller.stopped() => break,
            };
            match connected {
                Ok(()) => {
                    backoff = base;
                    tokio::select! {
                        _ = self.lost.notified() => {
                            info!("push channel dropped; polling continues");
                        }
                        _ = self.controller.stopped() => break,
                    }
                }
                Err(err) => {
                    warn!(%err, backoff_ms = backoff.as_millis() as u64, "push connect failed; retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.controller.stopped() => break,
                    }
                    backoff = std::cmp::min(backoff * 2, max_backoff);
                }
            }
        }

        self.transport.disconnect().await;
        debug!("event bridge finished");
    }
}

fn handler(f: impl Fn(Value) + Send + Sync + 'static) -> PushHandler {
    Arc::new(f)
}

fn decode<T: DeserializeOwned>(data: &Value) -> Option<T> {
    T::deserialize(data).ok()
}

fn log_line(data: &Value) -> Option<String> {
    match data {
        Value::String(line) => Some(line.clone()),
        Value::Object(fields) => {
            let message = fields.get("message")?.as_str()?;
            match fields.get("level").and_then(Value::as_str) {
                Some(level) => Some(format!("[{}] {}", level, message)),
                None => Some(message.to_string()),
            }
        }
        _ => None,
    }
}
