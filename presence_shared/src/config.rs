//! Configuration system.
//!
//! Loads client configuration from JSON strings (file IO left to app).
//! Every field has a default, so `{}` is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::math::{FieldSize, Position, WorldSize};

/// Root configuration for a field client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Field session endpoint, e.g. `wss://host/ws`.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// World bounds used to clamp the local avatar.
    #[serde(default)]
    pub world: WorldSize,
    /// Local avatar easing timer rate.
    #[serde(default = "default_hz")]
    pub avatar_hz: u32,
    /// Render tick rate driving remote actor easing and sweeps.
    #[serde(default = "default_hz")]
    pub render_hz: u32,
    /// Minimum spacing between position reports; `None` reports every step.
    #[serde(default)]
    pub report_throttle_ms: Option<u64>,
    #[serde(default)]
    pub sweep: SweepPolicy,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Starting world position; defaults to the field center.
    #[serde(default)]
    pub initial_position: Option<Position>,
    #[serde(default)]
    pub field_size: FieldSize,
}

fn default_server_url() -> String {
    "ws://localhost:8000/ws".to_string()
}

fn default_hz() -> u32 {
    60
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            world: WorldSize::default(),
            avatar_hz: default_hz(),
            render_hz: default_hz(),
            report_throttle_ms: None,
            sweep: SweepPolicy::default(),
            retry: RetryPolicy::default(),
            initial_position: None,
            field_size: FieldSize::default(),
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn avatar_period(&self) -> Duration {
        period(self.avatar_hz)
    }

    pub fn render_period(&self) -> Duration {
        period(self.render_hz)
    }

    pub fn report_throttle(&self) -> Option<Duration> {
        self.report_throttle_ms.map(Duration::from_millis)
    }

    /// Where the local avatar starts before any click.
    pub fn start_position(&self) -> Position {
        self.initial_position
            .map(|p| self.world.clamp(p))
            .unwrap_or_else(|| self.field_size.center())
    }
}

fn period(hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(hz.max(1)))
}

/// When stored messages and reactions are checked for expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SweepPolicy {
    /// Only while applying an inbound frame.
    #[default]
    OnFrame,
    /// On every inbound frame and additionally on a fixed interval.
    Periodic { interval_ms: u64 },
    /// Never; entries live until replaced.
    Disabled,
}

/// Reconnect behavior after the field session drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Reconnect attempts after a failure; 0 ends sync on the first failure.
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before reconnect attempt `attempt` (0-based),
    /// before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}
