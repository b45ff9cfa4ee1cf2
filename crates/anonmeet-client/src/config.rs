use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the room gateway.
    pub gateway_url: String,
    /// Path of the local SQLite store.
    pub db_path: PathBuf,
    /// Path of the resumable session record.
    pub session_path: PathBuf,
    /// Linear backoff unit: attempt N waits `base_delay * N`.
    pub base_delay: Duration,
    /// Consecutive failed dials before the connection manager gives up.
    pub max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: "ws://127.0.0.1:3000/gateway".into(),
            db_path: PathBuf::from("anonmeet.db"),
            session_path: PathBuf::from("anonmeet_session.json"),
            base_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl ClientConfig {
    /// Read config from the environment (a `.env` file is honored if
    /// present), falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let base_delay_ms: u64 = match std::env::var("ANONMEET_RECONNECT_BASE_MS") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.base_delay.as_millis() as u64,
        };
        let max_attempts: u32 = match std::env::var("ANONMEET_MAX_CONNECT_ATTEMPTS") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.max_attempts,
        };

        Ok(Self {
            gateway_url: std::env::var("ANONMEET_GATEWAY_URL")
                .unwrap_or(defaults.gateway_url),
            db_path: std::env::var("ANONMEET_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            session_path: std::env::var("ANONMEET_SESSION_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_path),
            base_delay: Duration::from_millis(base_delay_ms),
            max_attempts,
        })
    }
}
