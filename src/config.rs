use std::env;
use std::str::FromStr;

// --- CONFIGURATION ---

#[derive(Debug, Clone)]
pub struct Config {
    /// Alert log appended by the intrusion-detection daemon.
    pub alerts_file: String,
    /// Embedded store location.
    pub db_file: String,
    /// Rows kept in the store after pruning.
    pub retention_limit: i64,
    /// Replay batch size and in-memory ring size.
    pub startup_load_limit: usize,
    /// Alerts processed between prunes.
    pub prune_interval: u64,
    /// Sliding correlation window length.
    pub correlation_window_seconds: i64,
    /// Events per key needed to trigger a correlation alert.
    pub correlation_threshold: usize,
    /// HTTP bind port.
    pub listen_port: u16,
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            alerts_file: env::var("ALERTS_FILE")
                .unwrap_or_else(|_| "/var/ossec/logs/alerts/alerts.json".to_string()),
            db_file: env::var("DB_FILE")
                .unwrap_or_else(|_| "/opt/siem-backend/alerts.db".to_string()),
            retention_limit: env_or("RETENTION_LIMIT", 10_000),
            startup_load_limit: env_or("STARTUP_LOAD_LIMIT", 50),
            prune_interval: env_or("PRUNE_INTERVAL", 100),
            correlation_window_seconds: env_or("CORRELATION_WINDOW_SECONDS", 300),
            correlation_threshold: env_or("CORRELATION_THRESHOLD", 5),
            listen_port: env_or("LISTEN_PORT", 9001),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
