use std::env;
use std::time::Duration;

use crate::sync::{ListSyncConfig, RetryPolicy};

/// Ledgerview client configuration, loaded from environment variables with
/// CLI overrides applied on top by the binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Websocket URL of the reconciliation backend.
    pub server_url: String,
    /// Rows assumed visible before a consumer reports a real viewport.
    pub viewport: u64,
    /// Rows prefetched on each side of the visible range.
    pub prefetch_margin: u64,
    pub retry_base: Duration,
    pub retry_cap: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Self {
            server_url: env::var("LEDGERVIEW_SERVER").unwrap_or(defaults.server_url),
            viewport: env_u64("LEDGERVIEW_VIEWPORT", defaults.viewport),
            prefetch_margin: env_u64("LEDGERVIEW_PREFETCH", defaults.prefetch_margin),
            retry_base: Duration::from_millis(env_u64(
                "LEDGERVIEW_RETRY_BASE_MS",
                defaults.retry_base.as_millis() as u64,
            )),
            retry_cap: Duration::from_millis(env_u64(
                "LEDGERVIEW_RETRY_CAP_MS",
                defaults.retry_cap.as_millis() as u64,
            )),
        }
    }

    /// Per-list sync configuration derived from this config.
    pub fn list_sync(&self) -> ListSyncConfig {
        ListSyncConfig {
            viewport: self.viewport,
            prefetch_margin: self.prefetch_margin,
            retry: RetryPolicy {
                base: self.retry_base,
                cap: self.retry_cap,
                ..RetryPolicy::default()
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8101/ws".to_string(),
            viewport: 20,
            prefetch_margin: 20,
            retry_base: Duration::from_millis(250),
            retry_cap: Duration::from_secs(4),
        }
    }
}

fn env_u64(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
