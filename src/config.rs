use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, merged from defaults, an optional
/// `docker-hostsd.toml` next to the working directory, environment
/// variables prefixed `DOCKER_HOSTSD_`, and finally CLI flags.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Hosts file to manage.
    pub hosts_path: PathBuf,
    /// Suffix appended to every derived hostname.
    pub tld: String,
    /// Report intended content without writing.
    pub dry_run: bool,
    /// Keep running and react to container events.
    pub listen: bool,
    /// Coalescing window for bursts of change notifications.
    pub debounce_ms: u64,
    /// Delay between reconnect attempts when the Docker daemon is
    /// unreachable in listen mode.
    pub retry_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts_path: PathBuf::from("/etc/hosts"),
            tld: "localhost".into(),
            dry_run: false,
            listen: false,
            debounce_ms: 300,
            retry_interval_secs: 5,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("docker-hostsd.toml"))
            .merge(Env::prefixed("DOCKER_HOSTSD_"))
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}
