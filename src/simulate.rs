use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::backend::{Backend, FetchParams};
use crate::constants::{DEMO_ACTION_DELAY_MS, DEMO_FETCH_DELAY_MS, DEMO_RESTART_DELAY_MS};
use crate::error::{CommandError, FetchError};
use crate::models::{
    BotAction, BotKind, BotProcess, BotRunState, BotsStatus, ClearScope, Command, CommandOutcome,
    DatabaseStats, LeaderboardEntry, PanelStats, Ranking, RankingEntry, Resource, ServerStatus,
    Snapshot, TwitchStats, UserGroup,
};
use crate::scheduler::{RefreshPolicy, Scheduler};
use crate::util::lock;

struct DemoState {
    bots: BotsStatus,
    stats: PanelStats,
    leaderboard: Vec<LeaderboardEntry>,
}

impl DemoState {
    fn seeded() -> Self {
        let leaderboard = [
            ("KranikUser", 5_400, 812, true),
            ("stream_fan", 3_120, 455, true),
            ("nocny_marek", 2_760, 390, false),
            ("pixelowa", 1_980, 301, true),
            ("lurker42", 640, 12, false),
        ]
        .into_iter()
        .enumerate()
        .map(|(index, (username, points, messages, is_follower))| LeaderboardEntry {
            rank: index as u32 + 1,
            username: username.to_string(),
            points,
            messages,
            last_seen: None,
            is_follower,
        })
        .collect();

        Self {
            bots: BotsStatus {
                twitch: BotProcess::offline(),
                discord: BotProcess::offline(),
            },
            stats: PanelStats {
                twitch: TwitchStats {
                    followers: Some(1_234),
                    subscribers: Some(56),
                    vips: UserGroup::Count(12),
                    moderators: UserGroup::Count(8),
                },
                database: DatabaseStats {
                    total_users: Some(2_345),
                    total_points: Some(123_456),
                    top_user: Some("KranikUser".to_string()),
                    ..DatabaseStats::default()
                },
            },
            leaderboard,
        }
    }

    fn rerank(&mut self) {
        self.leaderboard
            .sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.username.cmp(&b.username)));
        for (index, entry) in self.leaderboard.iter_mut().enumerate() {
            entry.rank = index as u32 + 1;
        }
        self.stats.database.top_user = self
            .leaderboard
            .first()
            .map(|entry| entry.username.clone());
    }

    fn user_mut(&mut self, username: &str) -> Result<&mut LeaderboardEntry, CommandError> {
        self.leaderboard
            .iter_mut()
            .find(|entry| entry.username.eq_ignore_ascii_case(username))
            .ok_or_else(|| CommandError::Rejected(format!("user {} does not exist", username)))
    }

    fn adjust_total(&mut self, delta: i64) {
        if let Some(total) = self.stats.database.total_points.as_mut() {
            *total = total.saturating_add(delta).max(0);
        }
    }

    fn snapshot(&self, resource: Resource, params: FetchParams) -> Snapshot {
        match resource {
            Resource::Status => Snapshot::Status(ServerStatus {
                twitch: self.bots.twitch.status == BotRunState::Online,
                discord: self.bots.discord.status == BotRunState::Online,
                timestamp: None,
            }),
            Resource::BotStatus => Snapshot::BotStatus(self.bots.clone()),
            Resource::Stats => Snapshot::Stats(self.stats.clone()),
            Resource::Ranking => Snapshot::Ranking(Ranking {
                success: true,
                ranking: self
                    .leaderboard
                    .iter()
                    .take(params.ranking_limit)
                    .map(|entry| RankingEntry {
                        position: entry.rank,
                        username: entry.username.clone(),
                        points: entry.points,
                        messages: entry.messages,
                    })
                    .collect(),
            }),
            Resource::Leaderboard => Snapshot::Leaderboard(self.leaderboard.clone()),
        }
    }
}

/// Offline demo backend: every fetch succeeds after a fixed delay and
/// commands mutate in-memory state. Bot restarts pass through `starting`
/// and come back online via a deferred transition.
pub struct SimulatedBackend {
    state: Arc<Mutex<DemoState>>,
    transitions: Scheduler,
    fetch_delay: Duration,
    action_delay: Duration,
    restart_delay: Duration,
    next_pid: Arc<AtomicU32>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::with_delays(
            Duration::from_millis(DEMO_FETCH_DELAY_MS),
            Duration::from_millis(DEMO_ACTION_DELAY_MS),
            Duration::from_millis(DEMO_RESTART_DELAY_MS),
        )
    }

    pub fn with_delays(fetch_delay: Duration, action_delay: Duration, restart_delay: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(DemoState::seeded())),
            transitions: Scheduler::new(RefreshPolicy::default()),
            fetch_delay,
            action_delay,
            restart_delay,
            next_pid: Arc::new(AtomicU32::new(4_100)),
        }
    }

    fn bring_online(state: &Mutex<DemoState>, next_pid: &AtomicU32, bot: BotKind) {
        let pid = next_pid.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(state);
        *state.bots.get_mut(bot) = BotProcess {
            status: BotRunState::Online,
            pid: Some(pid),
            uptime: Some("00:00:01".to_string()),
        };
    }

    fn control(&self, bot: BotKind, action: BotAction) -> CommandOutcome {
        let label = bot.as_str().to_uppercase();
        let message = match action {
            BotAction::Start => {
                Self::bring_online(&self.state, &self.next_pid, bot);
                format!("{} Bot started (demo)", label)
            }
            BotAction::Stop => {
                *lock(&self.state).bots.get_mut(bot) = BotProcess::offline();
                format!("{} Bot stopped (demo)", label)
            }
            BotAction::Restart => {
                *lock(&self.state).bots.get_mut(bot) = BotProcess {
                    status: BotRunState::Starting,
                    pid: None,
                    uptime: Some("00:00:00".to_string()),
                };
                let state = Arc::clone(&self.state);
                let next_pid = Arc::clone(&self.next_pid);
                self.transitions.defer(self.restart_delay, move || {
                    Self::bring_online(&state, &next_pid, bot);
                    info!(bot = %bot, "demo bot back online after restart");
                });
                format!("{} Bot restarting (demo)", label)
            }
        };
        CommandOutcome {
            message,
            ..CommandOutcome::default()
        }
    }

    fn points(&self, command: &Command) -> Result<CommandOutcome, CommandError> {
        let mut state = lock(&self.state);
        let (message, delta, total) = match command {
            Command::AddPoints { username, points } => {
                let entry = state.user_mut(username)?;
                let delta = i64::try_from(*points).unwrap_or(i64::MAX);
                entry.points = entry.points.saturating_add(delta);
                (
                    format!("Added {} points to {}", points, entry.username),
                    delta,
                    entry.points,
                )
            }
            Command::RemovePoints { username, points } => {
                let entry = state.user_mut(username)?;
                let before = entry.points;
                entry.points = entry
                    .points
                    .saturating_sub(i64::try_from(*points).unwrap_or(i64::MAX))
                    .max(0);
                (
                    format!("Removed {} points from {}", points, entry.username),
                    entry.points - before,
                    entry.points,
                )
            }
            Command::ClearUserPoints { username } => {
                let entry = state.user_mut(username)?;
                let before = entry.points;
                entry.points = 0;
                (
                    format!("Cleared all points of {}", entry.username),
                    -before,
                    0,
                )
            }
            _ => return Err(CommandError::Invalid(command.describe())),
        };
        state.adjust_total(delta);
        state.rerank();
        Ok(CommandOutcome {
            message,
            total_points: Some(total),
            affected: Some(1),
        })
    }

    fn clear_all(&self, scope: ClearScope) -> CommandOutcome {
        let mut state = lock(&self.state);
        let mut removed = 0i64;
        let mut affected = 0u64;
        for entry in state.leaderboard.iter_mut() {
            if scope == ClearScope::NonFollowers && entry.is_follower {
                continue;
            }
            removed += entry.points;
            entry.points = 0;
            affected += 1;
        }
        state.adjust_total(-removed);
        state.rerank();
        CommandOutcome {
            message: format!("Cleared points of {} users (demo)", affected),
            total_points: None,
            affected: Some(affected),
        }
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    async fn fetch(&self, resource: Resource, params: FetchParams) -> Result<Snapshot, FetchError> {
        tokio::time::sleep(self.fetch_delay).await;
        Ok(lock(&self.state).snapshot(resource, params))
    }

    async fn execute(&self, command: &Command) -> Result<CommandOutcome, CommandError> {
        tokio::time::sleep(self.action_delay).await;
        match command {
            Command::Bot { bot, action } => Ok(self.control(*bot, *action)),
            Command::ClearAllPoints { scope } => Ok(self.clear_all(*scope)),
            other => self.points(other),
        }
    }

    fn name(&self) -> &str {
        "demo"
    }
}
