//! Control plane configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::cloud::{MockSettings, StaticSettings};

/// Default cap on log and artifact bodies: 16 MiB.
pub const DEFAULT_MAX_LOG_BYTES: usize = 16 * 1024 * 1024;

/// Longest accepted value for any interval or timeout setting: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Settings rejected at start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is {value}s, above the {max}s limit")]
    OutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },
}

/// Control plane configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub bind_addr: String,

    /// How long a request waits for the global lock (seconds).
    pub lock_timeout_secs: u64,

    /// Upper bound on any single cloud provider call (seconds).
    pub provider_timeout_secs: u64,

    /// Heartbeat silence after which a task's host is flagged (seconds).
    pub heartbeat_timeout_secs: u64,

    /// Interval between host monitor passes (seconds).
    pub monitor_interval_secs: u64,

    /// Largest accepted log/artifact body in bytes.
    pub max_log_bytes: usize,

    /// Private key used for SSH checks against hosts.
    pub ssh_key_path: String,

    /// Base URL of the UI, used in admin notifications.
    pub ui_url: String,

    /// Webhook that receives admin notifications; log only when unset.
    pub admin_webhook_url: Option<String>,

    /// JSON file with distros, hosts, tasks and project context to load at start-up.
    pub seed_path: Option<PathBuf>,

    /// Settings for the `static` provider.
    pub static_provider: StaticSettings,

    /// Settings for the `mock` provider.
    pub mock_provider: MockSettings,
}

impl Config {
    /// Reject timings the background tasks cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("lock_timeout_secs", self.lock_timeout_secs, false),
            ("provider_timeout_secs", self.provider_timeout_secs, true),
            ("heartbeat_timeout_secs", self.heartbeat_timeout_secs, true),
            ("monitor_interval_secs", self.monitor_interval_secs, true),
        ];
        for (field, value, nonzero) in durations {
            if nonzero && value == 0 {
                return Err(ConfigError::Zero { field });
            }
            if value > MAX_DURATION_SECS {
                return Err(ConfigError::OutOfRange {
                    field,
                    value,
                    max: MAX_DURATION_SECS,
                });
            }
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            lock_timeout_secs: 30,
            provider_timeout_secs: 60,
            heartbeat_timeout_secs: 420,
            monitor_interval_secs: 60,
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
            ssh_key_path: "~/.ssh/fleet.pem".to_string(),
            ui_url: "http://localhost:9090".to_string(),
            admin_webhook_url: None,
            seed_path: None,
            static_provider: StaticSettings::default(),
            mock_provider: MockSettings::default(),
        }
    }
}

/// Fleet control plane server.
#[derive(Parser, Debug)]
#[command(name = "fleet-control-plane", about = "Fleet control plane server")]
pub struct Args {
    /// HTTP server address
    #[arg(long, env = "FLEET_BIND_ADDR", default_value = "127.0.0.1:9090")]
    pub bind_addr: String,

    /// Seconds to wait for the global lock
    #[arg(long, env = "FLEET_LOCK_TIMEOUT_SECS", default_value = "30")]
    pub lock_timeout_secs: u64,

    /// Seconds allowed per cloud provider call
    #[arg(long, env = "FLEET_PROVIDER_TIMEOUT_SECS", default_value = "60")]
    pub provider_timeout_secs: u64,

    /// Seconds of heartbeat silence before a host is flagged
    #[arg(long, env = "FLEET_HEARTBEAT_TIMEOUT_SECS", default_value = "420")]
    pub heartbeat_timeout_secs: u64,

    /// Seconds between host monitor passes
    #[arg(long, env = "FLEET_MONITOR_INTERVAL_SECS", default_value = "60")]
    pub monitor_interval_secs: u64,

    /// Largest accepted log body in bytes
    #[arg(long, env = "FLEET_MAX_LOG_BYTES", default_value_t = DEFAULT_MAX_LOG_BYTES)]
    pub max_log_bytes: usize,

    /// SSH private key used to reach hosts
    #[arg(long, env = "FLEET_SSH_KEY", default_value = "~/.ssh/fleet.pem")]
    pub ssh_key_path: String,

    /// UI base URL used in notification links
    #[arg(long, env = "FLEET_UI_URL", default_value = "http://localhost:9090")]
    pub ui_url: String,

    /// Webhook receiving admin notifications
    #[arg(long, env = "FLEET_ADMIN_WEBHOOK")]
    pub admin_webhook_url: Option<String>,

    /// Seed file (JSON) loaded into the store at start-up
    #[arg(long, env = "FLEET_SEED")]
    pub seed: Option<PathBuf>,

    /// Hostnames the static provider manages (repeatable)
    #[arg(long = "static-host")]
    pub static_hosts: Vec<String>,

    /// Hourly price the mock provider charges per instance
    #[arg(long, default_value = "0.0")]
    pub mock_hourly_cost: f64,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: args.bind_addr,
            lock_timeout_secs: args.lock_timeout_secs,
            provider_timeout_secs: args.provider_timeout_secs,
            heartbeat_timeout_secs: args.heartbeat_timeout_secs,
            monitor_interval_secs: args.monitor_interval_secs,
            max_log_bytes: args.max_log_bytes,
            ssh_key_path: args.ssh_key_path,
            ui_url: args.ui_url,
            admin_webhook_url: args.admin_webhook_url,
            seed_path: args.seed,
            static_provider: StaticSettings {
                hosts: args.static_hosts,
            },
            mock_provider: MockSettings {
                hourly_cost: args.mock_hourly_cost,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_cap_is_16_mib() {
        assert_eq!(Config::default().max_log_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_unusable_timings() {
        assert!(Config::default().validate().is_ok());

        let zero_interval = Config::from(Args::parse_from([
            "fleet-control-plane",
            "--monitor-interval-secs",
            "0",
        ]));
        assert!(matches!(
            zero_interval.validate(),
            Err(ConfigError::Zero {
                field: "monitor_interval_secs"
            })
        ));

        let huge_heartbeat = Config {
            heartbeat_timeout_secs: u64::MAX,
            ..Config::default()
        };
        assert!(matches!(
            huge_heartbeat.validate(),
            Err(ConfigError::OutOfRange {
                field: "heartbeat_timeout_secs",
                ..
            })
        ));

        // Zero lock timeout means a single try.
        let no_wait = Config {
            lock_timeout_secs: 0,
            ..Config::default()
        };
        assert!(no_wait.validate().is_ok());
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "fleet-control-plane",
            "--lock-timeout-secs",
            "5",
            "--static-host",
            "build1.example.com",
            "--static-host",
            "build2.example.com",
        ]);
        let config = Config::from(args);

        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.static_provider.hosts.len(), 2);
        assert!(config.admin_webhook_url.is_none());
    }
}
