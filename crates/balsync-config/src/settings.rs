//! Typed configuration decoded from the merged YAML tree.
//!
//! Every field has a default so a process can boot from an empty config plus
//! the database env var. `validate()` runs once in [`SyncConfig::from_json`];
//! downstream crates receive an already-checked value.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    pub database: DatabaseSettings,
    pub sync: SyncSettings,
    pub daemon: DaemonSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Name of the env var holding the Postgres URL. The URL itself never
    /// appears in config (see the secret-literal guard).
    pub url_env: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url_env: "BALSYNC_DATABASE_URL".to_string(),
            max_connections: 10,
            min_connections: 5,
            acquire_timeout_ms: 30_000,
            idle_timeout_ms: 600_000,
        }
    }
}

impl DatabaseSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Periodic Flush of attached entities. 0 disables it.
    pub auto_save_interval_secs: u64,
    /// Periodic external-change poll. 0 disables it.
    pub poll_interval_secs: u64,
    pub offline_scan_interval_secs: u64,
    pub attach_delay_ms: u64,
    pub flush_on_detach: bool,
    pub reset_on_attach: bool,
    pub monitor_offline_changes: bool,
    pub notify_on_external_change: bool,
    pub starting_balance: Decimal,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_save_interval_secs: 60,
            poll_interval_secs: 10,
            offline_scan_interval_secs: 30,
            attach_delay_ms: 2_000,
            flush_on_detach: true,
            reset_on_attach: false,
            monitor_offline_changes: true,
            notify_on_external_change: true,
            starting_balance: Decimal::new(10_000, 2),
        }
    }
}

impl SyncSettings {
    pub fn auto_save_interval(&self) -> Option<Duration> {
        non_zero_secs(self.auto_save_interval_secs)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        non_zero_secs(self.poll_interval_secs)
    }

    /// `None` when offline monitoring is off or the interval is 0.
    pub fn offline_scan_interval(&self) -> Option<Duration> {
        if !self.monitor_offline_changes {
            return None;
        }
        non_zero_secs(self.offline_scan_interval_secs)
    }

    pub fn attach_delay(&self) -> Duration {
        Duration::from_millis(self.attach_delay_ms)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub bind_addr: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8899".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: SyncConfig =
            serde_json::from_value(v.clone()).context("config does not match SyncConfig")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let db = &self.database;
        if db.url_env.trim().is_empty() {
            bail!("CONFIG_INVALID database.url_env must name an env var");
        }
        if db.max_connections == 0 {
            bail!("CONFIG_INVALID database.max_connections must be > 0");
        }
        if db.min_connections > db.max_connections {
            bail!(
                "CONFIG_INVALID database.min_connections ({}) exceeds max_connections ({})",
                db.min_connections,
                db.max_connections
            );
        }

        let s = &self.sync;
        if s.starting_balance.round_dp(2) != s.starting_balance {
            bail!(
                "CONFIG_INVALID sync.starting_balance {} has more than 2 fractional digits",
                s.starting_balance
            );
        }
        if s.monitor_offline_changes && s.offline_scan_interval_secs == 0 {
            bail!("CONFIG_INVALID sync.offline_scan_interval_secs must be > 0 when monitoring is on");
        }

        if self.daemon.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            bail!(
                "CONFIG_INVALID daemon.bind_addr '{}' is not a socket address",
                self.daemon.bind_addr
            );
        }
        Ok(())
    }
}
