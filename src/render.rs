use tracing::{info, warn};

use crate::callbacks::Callbacks;
use crate::connectivity::ConnectivityState;
use crate::error::FetchError;
use crate::models::{BotKind, Resource, Snapshot};
use crate::reconciler::ViewEntry;
use crate::util::{format_thousands, or_dash};

/// Callbacks that print the dashboard through `tracing`, one event per
/// accepted snapshot.
pub fn log_callbacks() -> Callbacks {
    Callbacks::new()
        .on_snapshot(render_snapshot)
        .on_connectivity_change(render_connectivity)
        .on_fetch_error(render_fetch_error)
        .on_log(|line| info!(target: "panel_sync::server_log", "{}", line))
        .on_disconnect(render_fallback)
}

pub fn render_snapshot(resource: Resource, snapshot: &Snapshot) {
    match snapshot {
        Snapshot::Status(status) => info!(
            %resource,
            twitch = on_off(status.twitch),
            discord = on_off(status.discord),
            "server status"
        ),
        Snapshot::BotStatus(bots) => {
            for bot in BotKind::ALL {
                let process = bots.get(bot);
                info!(
                    %bot,
                    status = process.status.label(),
                    pid = %or_dash(process.pid),
                    uptime = %or_dash(process.uptime.as_deref()),
                    "bot"
                );
            }
        }
        Snapshot::Stats(stats) => info!(
            followers = %or_dash(stats.twitch.followers.map(format_thousands)),
            subscribers = %or_dash(stats.twitch.subscribers.map(format_thousands)),
            vips = stats.twitch.vips.count(),
            moderators = stats.twitch.moderators.count(),
            total_users = %or_dash(stats.database.total_users.map(format_thousands)),
            total_points = %or_dash(stats.database.total_points.map(format_thousands)),
            total_messages = %or_dash(stats.database.total_messages.map(format_thousands)),
            top_user = %or_dash(stats.database.top_user.as_deref()),
            "stats"
        ),
        Snapshot::Ranking(ranking) => {
            info!(entries = ranking.ranking.len(), "ranking");
            for entry in &ranking.ranking {
                info!(
                    "  #{:<3} {:<24} {:>10} pts {:>6} msgs",
                    entry.position,
                    entry.username,
                    format_thousands(entry.points),
                    entry.messages
                );
            }
        }
        Snapshot::Leaderboard(rows) => {
            info!(entries = rows.len(), "leaderboard");
            for row in rows {
                info!(
                    "  #{:<3} {:<24} {:>10} pts {}",
                    row.rank,
                    row.username,
                    format_thousands(row.points),
                    if row.is_follower { "follower" } else { "" }
                );
            }
        }
    }
}

fn render_connectivity(state: ConnectivityState) {
    match state {
        ConnectivityState::Disconnected => warn!(%state, "panel API unreachable"),
        _ => info!(%state, "connectivity"),
    }
}

fn render_fetch_error(resource: Resource, err: &FetchError) {
    warn!(%resource, kind = ?err.kind(), %err, "fetch failed");
}

fn render_fallback(view: &[ViewEntry]) {
    if view.is_empty() {
        warn!("no data received yet; waiting for the panel API");
        return;
    }
    for entry in view {
        warn!(
            resource = %entry.resource,
            accepted_at_ms = entry.accepted_at_ms,
            "showing stale data"
        );
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "online"
    } else {
        "offline"
    }
}
