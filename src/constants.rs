pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 5_000;
pub const MIN_REFRESH_INTERVAL_MS: u64 = 100;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RANKING_LIMIT: usize = 10;
pub const MAX_RANKING_LIMIT: usize = 100;

pub const BOT_SEQUENCE_DELAY_MS: u64 = 1_000;

pub const PUSH_BACKOFF_BASE_MS: u64 = 1_000;
pub const PUSH_BACKOFF_MAX_MS: u64 = 30_000;

pub const DEMO_FETCH_DELAY_MS: u64 = 150;
pub const DEMO_ACTION_DELAY_MS: u64 = 1_000;
pub const DEMO_RESTART_DELAY_MS: u64 = 2_000;

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_DIR_NAME: &str = "panel-sync";
