use serde::Deserialize;
use std::path::Path;
use tracing::info;

const DEFAULT_PORT: u16 = 9000;
const DEFAULT_CONSUL_ADDRESS: &str = "http://127.0.0.1:8500";
const DEFAULT_KV_PREFIX: &str = "flockd";
const DEFAULT_CHANGE_THRESHOLD_SECS: u64 = 60;
const DEFAULT_REMINDER_TICK_SECS: u64 = 300;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── ConsulConfig ─────────────────────────────────────────────────────────────

/// Coordination-service connection (`[consul]` in flockd.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// Base URL of the local agent's HTTP API.
    pub address: String,
    /// KV prefix under which flockd keeps its settings, profiles,
    /// blacklist and reminders.
    pub kv_prefix: String,
    /// Optional datacenter, passed as `dc=` on every request.
    pub datacenter: Option<String>,
    /// ACL token. The `FLOCKD_CONSUL_TOKEN` env var overrides this.
    pub token: Option<String>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_CONSUL_ADDRESS.to_string(),
            kv_prefix: DEFAULT_KV_PREFIX.to_string(),
            datacenter: None,
            token: None,
        }
    }
}

// ─── AlertsConfig ─────────────────────────────────────────────────────────────

/// Fallback alerting knobs (`[alerts]`), used when the cluster KV carries
/// no `config/settings` document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Settle-wait duration in seconds before diffing a changed check set.
    pub change_threshold_secs: u64,
    /// Whether check processing starts enabled.
    pub checks_enabled: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            change_threshold_secs: DEFAULT_CHANGE_THRESHOLD_SECS,
            checks_enabled: true,
        }
    }
}

// ─── RemindersConfig ──────────────────────────────────────────────────────────

/// Reminder loop cadence (`[reminders]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemindersConfig {
    pub tick_secs: u64,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_REMINDER_TICK_SECS,
        }
    }
}

// ─── LeaderConfig ─────────────────────────────────────────────────────────────

/// Leadership wiring (`[leader]`).
///
/// Election itself is external to flockd. With `assume = true` this node
/// treats itself as the leader — for single-node deployments. Otherwise the
/// embedder (or the Consul leader poll) drives the leadership flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LeaderConfig {
    pub assume: bool,
}

// ─── DaemonConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub port: u16,
    pub bind_address: String,
    /// Default log filter; `RUST_LOG` and `--log` override.
    pub log: Option<String>,
    pub consul: ConsulConfig,
    pub alerts: AlertsConfig,
    pub reminders: RemindersConfig,
    pub leader: LeaderConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: default_bind_address(),
            log: None,
            consul: ConsulConfig::default(),
            alerts: AlertsConfig::default(),
            reminders: RemindersConfig::default(),
            leader: LeaderConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from `path`, or `flockd.toml` in the working directory if that
    /// exists, or defaults. A missing explicit path is an error; a missing
    /// implicit one is not.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", p.display()))?;
                let config: DaemonConfig = toml::from_str(&raw)?;
                info!(path = %p.display(), "loaded config");
                config
            }
            None => {
                let implicit = Path::new("flockd.toml");
                if implicit.exists() {
                    let raw = std::fs::read_to_string(implicit)?;
                    let config: DaemonConfig = toml::from_str(&raw)?;
                    info!("loaded config from ./flockd.toml");
                    config
                } else {
                    DaemonConfig::default()
                }
            }
        };

        if let Ok(token) = std::env::var("FLOCKD_CONSUL_TOKEN") {
            if !token.is_empty() {
                config.consul.token = Some(token);
            }
        }
        Ok(config)
    }
}
