use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// A category of remote data, fetched and reconciled independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Status,
    BotStatus,
    Stats,
    Ranking,
    Leaderboard,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Status,
        Resource::BotStatus,
        Resource::Stats,
        Resource::Ranking,
        Resource::Leaderboard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Status => "status",
            Resource::BotStatus => "bot_status",
            Resource::Stats => "stats",
            Resource::Ranking => "ranking",
            Resource::Leaderboard => "leaderboard",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn parse(value: &str) -> Option<Self> {
        Resource::ALL
            .into_iter()
            .find(|resource| resource.as_str() == value.trim())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted payload for one resource. Replaced whole on every accept.
#[derive(Clone, Debug, PartialEq)]
pub enum Snapshot {
    Status(ServerStatus),
    BotStatus(BotsStatus),
    Stats(PanelStats),
    Ranking(Ranking),
    Leaderboard(Vec<LeaderboardEntry>),
}

impl Snapshot {
    pub fn resource(&self) -> Resource {
        match self {
            Snapshot::Status(_) => Resource::Status,
            Snapshot::BotStatus(_) => Resource::BotStatus,
            Snapshot::Stats(_) => Resource::Stats,
            Snapshot::Ranking(_) => Resource::Ranking,
            Snapshot::Leaderboard(_) => Resource::Leaderboard,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub twitch: bool,
    pub discord: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotRunState {
    Online,
    Offline,
    Starting,
    #[serde(other)]
    Unknown,
}

impl BotRunState {
    pub fn label(self) -> &'static str {
        match self {
            BotRunState::Online => "online",
            BotRunState::Offline => "offline",
            BotRunState::Starting => "starting",
            BotRunState::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotProcess {
    pub status: BotRunState,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub uptime: Option<String>,
}

impl BotProcess {
    pub fn offline() -> Self {
        Self {
            status: BotRunState::Offline,
            pid: None,
            uptime: Some("00:00:00".to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotsStatus {
    pub twitch: BotProcess,
    pub discord: BotProcess,
}

impl BotsStatus {
    pub fn get(&self, bot: BotKind) -> &BotProcess {
        match bot {
            BotKind::Twitch => &self.twitch,
            BotKind::Discord => &self.discord,
        }
    }

    pub fn get_mut(&mut self, bot: BotKind) -> &mut BotProcess {
        match bot {
            BotKind::Twitch => &mut self.twitch,
            BotKind::Discord => &mut self.discord,
        }
    }
}

/// VIP and moderator fields arrive either as a list of names or as a count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserGroup {
    Names(Vec<String>),
    Count(u64),
}

impl UserGroup {
    pub fn count(&self) -> u64 {
        match self {
            UserGroup::Names(names) => names.len() as u64,
            UserGroup::Count(count) => *count,
        }
    }

    pub fn names(&self) -> &[String] {
        match self {
            UserGroup::Names(names) => names,
            UserGroup::Count(_) => &[],
        }
    }
}

impl Default for UserGroup {
    fn default() -> Self {
        UserGroup::Count(0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TwitchStats {
    #[serde(default)]
    pub followers: Option<u64>,
    #[serde(default)]
    pub subscribers: Option<u64>,
    #[serde(default)]
    pub vips: UserGroup,
    #[serde(default)]
    pub moderators: UserGroup,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    #[serde(default)]
    pub total_users: Option<u64>,
    #[serde(default)]
    pub total_points: Option<i64>,
    #[serde(default)]
    pub total_messages: Option<u64>,
    #[serde(default)]
    pub avg_points: Option<f64>,
    #[serde(default)]
    pub top_user: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_users: Vec<TopUser>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopUser {
    pub username: String,
    pub points: i64,
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub last_seen: Option<String>,
}

/// Accepts both the nested `{twitch, database}` form and the flat
/// database-only form the panel pushes on `stats_update`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StatsWire")]
pub struct PanelStats {
    pub twitch: TwitchStats,
    pub database: DatabaseStats,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatsWire {
    Nested {
        twitch: TwitchStats,
        database: DatabaseStats,
    },
    Flat(FlatStats),
}

#[derive(Deserialize)]
struct FlatStats {
    total_users: u64,
    #[serde(default)]
    total_points: Option<i64>,
    #[serde(default)]
    total_messages: Option<u64>,
    #[serde(default)]
    avg_points: Option<f64>,
    #[serde(default)]
    top_users: Vec<TopUser>,
}

impl From<StatsWire> for PanelStats {
    fn from(wire: StatsWire) -> Self {
        match wire {
            StatsWire::Nested { twitch, database } => Self { twitch, database },
            StatsWire::Flat(flat) => Self {
                twitch: TwitchStats::default(),
                database: DatabaseStats {
                    total_users: Some(flat.total_users),
                    total_points: flat.total_points,
                    total_messages: flat.total_messages,
                    avg_points: flat.avg_points,
                    top_user: flat.top_users.first().map(|user| user.username.clone()),
                    top_users: flat.top_users,
                },
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub position: u32,
    pub username: String,
    pub points: i64,
    #[serde(default)]
    pub messages: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub ranking: Vec<RankingEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub username: String,
    pub points: i64,
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub is_follower: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotKind {
    Twitch,
    Discord,
}

impl BotKind {
    pub const ALL: [BotKind; 2] = [BotKind::Twitch, BotKind::Discord];

    pub fn as_str(self) -> &'static str {
        match self {
            BotKind::Twitch => "twitch",
            BotKind::Discord => "discord",
        }
    }
}

impl fmt::Display for BotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotAction {
    Start,
    Stop,
    Restart,
}

impl BotAction {
    pub fn as_str(self) -> &'static str {
        match self {
            BotAction::Start => "start",
            BotAction::Stop => "stop",
            BotAction::Restart => "restart",
        }
    }
}

impl fmt::Display for BotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearScope {
    All,
    NonFollowers,
}

impl ClearScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ClearScope::All => "all",
            ClearScope::NonFollowers => "non_followers",
        }
    }
}

/// An imperative request against the panel API. Never retried.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Bot { bot: BotKind, action: BotAction },
    AddPoints { username: String, points: u64 },
    RemovePoints { username: String, points: u64 },
    ClearUserPoints { username: String },
    ClearAllPoints { scope: ClearScope },
}

impl Command {
    /// Rejects commands the server would refuse anyway, and trims usernames.
    pub fn validate(self) -> Result<Self, CommandError> {
        match self {
            Command::AddPoints { username, points } => Ok(Command::AddPoints {
                username: require_username(&username)?,
                points: require_points(points)?,
            }),
            Command::RemovePoints { username, points } => Ok(Command::RemovePoints {
                username: require_username(&username)?,
                points: require_points(points)?,
            }),
            Command::ClearUserPoints { username } => Ok(Command::ClearUserPoints {
                username: require_username(&username)?,
            }),
            other => Ok(other),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Command::Bot { bot, action } => format!("{} {} bot", action, bot),
            Command::AddPoints { username, points } => {
                format!("add {} points to {}", points, username)
            }
            Command::RemovePoints { username, points } => {
                format!("remove {} points from {}", points, username)
            }
            Command::ClearUserPoints { username } => format!("clear all points of {}", username),
            Command::ClearAllPoints { scope } => format!("clear points ({})", scope.as_str()),
        }
    }
}

fn require_username(username: &str) -> Result<String, CommandError> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Invalid("username is required".to_string()));
    }
    Ok(trimmed.to_string())
}

fn require_points(points: u64) -> Result<u64, CommandError> {
    if points == 0 {
        return Err(CommandError::Invalid(
            "points must be greater than zero; use a clear command to remove all points"
                .to_string(),
        ));
    }
    Ok(points)
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandOutcome {
    pub message: String,
    pub total_points: Option<i64>,
    pub affected: Option<u64>,
}

#[derive(Serialize)]
pub(crate) struct ActionRequest<'a> {
    pub(crate) action: &'a str,
}

#[derive(Serialize)]
pub(crate) struct PointsRequest<'a> {
    pub(crate) username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) points: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub(crate) clear_all: bool,
}

#[derive(Serialize)]
pub(crate) struct ClearRequest<'a> {
    #[serde(rename = "type")]
    pub(crate) scope: &'a str,
}

/// Shape shared by every command response: `{message}` or `{error}` plus
/// optional counters.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CommandReply {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) total_points: Option<i64>,
    #[serde(default)]
    pub(crate) affected: Option<u64>,
}
