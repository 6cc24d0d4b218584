use std::env;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub storage_path: String,
    pub jwt_secret: String,
    pub git_bin: String,
    pub git_verify_remote: bool,
    pub sync: SyncSettings,
}

/// Timing knobs for the background sync subsystem.
#[derive(Clone, Debug)]
pub struct SyncSettings {
    /// How often the scheduler looks for due projects.
    pub tick: Duration,
    /// Upper bound on a single fetch + scan.
    pub timeout: Duration,
    /// A `doing` lease older than this is considered abandoned.
    pub stale_after: Duration,
    /// Cap on the failure backoff between scheduled attempts.
    pub max_backoff: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(30),
            timeout: Duration::from_secs(300),
            stale_after: Duration::from_secs(900),
            max_backoff: Duration::from_secs(86_400),
        }
    }
}

/// Shortest scheduler tick; `tokio::time::interval` rejects zero.
const MIN_TICK: Duration = Duration::from_secs(1);

fn parse_secs(raw: Option<&str>, default: Duration) -> Duration {
    raw.and_then(|v| v.trim().parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    parse_secs(env::var(key).ok().as_deref(), default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = SyncSettings::default();
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./data/gitran.db?mode=rwc".to_string()),
            storage_path: env::var("STORAGE_PATH")
                .unwrap_or_else(|_| "./data/checkouts".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "development-secret-change-in-production".to_string()),
            git_bin: env::var("GIT_BIN").unwrap_or_else(|_| "git".to_string()),
            git_verify_remote: env::var("GIT_VERIFY_REMOTE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            sync: SyncSettings {
                tick: env_secs("SYNC_TICK_SECS", defaults.tick).max(MIN_TICK),
                timeout: env_secs("SYNC_TIMEOUT_SECS", defaults.timeout),
                stale_after: env_secs("SYNC_STALE_AFTER_SECS", defaults.stale_after),
                max_backoff: env_secs("SYNC_MAX_BACKOFF_SECS", defaults.max_backoff),
            },
        }
    }
}
