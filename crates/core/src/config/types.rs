use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub tabs: TabConfig,
    #[serde(default)]
    pub page: PageConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    8787
}

/// Admission queue configuration.
///
/// The release interval should match the forum's flood-control cadence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Pause between the end of one report task and the next release (milliseconds).
    #[serde(default = "default_release_interval")]
    pub release_interval_ms: u64,
    /// Maximum number of pending tickets.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Expected upper bound of a single report task (milliseconds).
    /// Only used to derive the default entry timeout.
    #[serde(default = "default_max_task_duration")]
    pub max_task_duration_ms: u64,
    /// How long a ticket may wait for release before it is abandoned (milliseconds).
    /// Defaults to `capacity * (release_interval_ms + max_task_duration_ms)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_timeout_ms: Option<u64>,
}

fn default_release_interval() -> u64 {
    1100
}

fn default_capacity() -> usize {
    100
}

fn default_max_task_duration() -> u64 {
    10_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            release_interval_ms: default_release_interval(),
            capacity: default_capacity(),
            max_task_duration_ms: default_max_task_duration(),
            entry_timeout_ms: None,
        }
    }
}

impl QueueConfig {
    pub fn release_interval(&self) -> Duration {
        Duration::from_millis(self.release_interval_ms)
    }

    pub fn entry_timeout(&self) -> Duration {
        let millis = self.entry_timeout_ms.unwrap_or_else(|| {
            (self.capacity as u64)
                .saturating_mul(self.release_interval_ms.saturating_add(self.max_task_duration_ms))
        });
        Duration::from_millis(millis)
    }
}

/// Tab lifecycle configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TabConfig {
    /// How long to wait for a report tab to finish loading (milliseconds).
    #[serde(default = "default_load_timeout")]
    pub load_timeout_ms: u64,
}

fn default_load_timeout() -> u64 {
    60_000
}

impl Default for TabConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: default_load_timeout(),
        }
    }
}

impl TabConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// Page script configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PageConfig {
    /// Dwell the page script observes before acknowledging an auto-submit (milliseconds).
    /// A report counts as a post for the forum's throttling.
    #[serde(default = "default_submit_dwell")]
    pub submit_dwell_ms: u64,
    /// How long to wait for the page script's acknowledgement (milliseconds).
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
}

fn default_submit_dwell() -> u64 {
    4000
}

fn default_ack_timeout() -> u64 {
    30_000
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            submit_dwell_ms: default_submit_dwell(),
            ack_timeout_ms: default_ack_timeout(),
        }
    }
}

impl PageConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Browser bridge configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    /// Timeout for tab commands relayed to the browser shim (milliseconds).
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

fn default_command_timeout() -> u64 {
    10_000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout(),
        }
    }
}

impl BridgeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}
