// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Arbiter configuration.
//!
//! Loaded from TOML. Every field has a default so an empty file (or no
//! file at all) yields a working setup.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::field::FieldDimensions;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    /// Persisted robot assignments
    #[serde(default = "default_robots_file")]
    pub robots_file: PathBuf,

    /// Run against the built-in simulator instead of real robots
    #[serde(default)]
    pub simulated: bool,

    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub wifi: WifiConfig,

    #[serde(default)]
    pub serial: SerialConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub referee: RefereeConfig,

    #[serde(default)]
    pub field: FieldDimensions,
}

/// Control RPC endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    #[serde(default = "default_rpc_port")]
    pub port: u16,

    /// Per-request read timeout
    #[serde(default = "default_rpc_read_timeout")]
    pub read_timeout_ms: u64,
}

/// Position feed input and output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// UDP port receiving perception frames (0 disables the listener)
    #[serde(default = "default_feed_port")]
    pub listen_port: u16,

    /// Subscribers receiving the published frames, as `ip:port`
    #[serde(default)]
    pub subscribers: Vec<String>,

    #[serde(default = "default_publish_hz")]
    pub publish_hz: f64,
}

/// Shared WiFi socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiConfig {
    #[serde(default = "default_wifi_port")]
    pub port: u16,

    #[serde(default = "default_wifi_hz")]
    pub loop_hz: f64,

    /// When set, all robots share one datagram sent to this address
    #[serde(default)]
    pub broadcast_address: Option<IpAddr>,

    #[serde(default = "default_availability")]
    pub availability_timeout_secs: f64,

    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_secs: f64,
}

/// Serial links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_serial_read_timeout")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_reconnect")]
    pub reconnect_timeout_secs: f64,

    #[serde(default = "default_monitor_resend")]
    pub monitor_resend_secs: f64,

    /// Telemetry rate requested from robots
    #[serde(default = "default_monitor_hz")]
    pub monitor_hz: u32,
}

/// Task scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_period_ms: u64,
}

/// Referee timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefereeConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_period_ms: u64,

    #[serde(default = "default_game_duration")]
    pub game_duration_secs: f64,

    #[serde(default = "default_halftime")]
    pub halftime_duration_secs: f64,

    #[serde(default = "default_penalty")]
    pub penalty_secs: f64,

    #[serde(default = "default_grace")]
    pub grace_secs: f64,

    /// Time a robot may spend in the timed circle around the ball
    #[serde(default = "default_timed_circle")]
    pub timed_circle_secs: f64,

    /// Ball must rest at the wait position this long before play resumes
    #[serde(default = "default_resume_hold")]
    pub resume_hold_secs: f64,

    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Penalty spots stay reserved this long after assignment
    #[serde(default = "default_spot_lock")]
    pub spot_lock_secs: f64,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_rpc_port() -> u16 {
    7558
}

fn default_rpc_read_timeout() -> u64 {
    1000
}

fn default_feed_port() -> u16 {
    7557
}

fn default_publish_hz() -> f64 {
    30.0
}

fn default_wifi_port() -> u16 {
    7600
}

fn default_wifi_hz() -> f64 {
    60.0
}

fn default_availability() -> f64 {
    10.0
}

fn default_heartbeat() -> f64 {
    1.0
}

fn default_serial_read_timeout() -> u64 {
    20
}

fn default_reconnect() -> f64 {
    5.0
}

fn default_monitor_resend() -> f64 {
    1.0
}

fn default_monitor_hz() -> u32 {
    5
}

fn default_tick_ms() -> u64 {
    10
}

fn default_game_duration() -> f64 {
    300.0
}

fn default_halftime() -> f64 {
    120.0
}

fn default_penalty() -> f64 {
    5.0
}

fn default_grace() -> f64 {
    3.0
}

fn default_timed_circle() -> f64 {
    3.0
}

fn default_resume_hold() -> f64 {
    1.0
}

fn default_history_size() -> usize {
    3
}

fn default_spot_lock() -> f64 {
    1.0
}

fn default_robots_file() -> PathBuf {
    PathBuf::from("robots.json")
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            robots_file: default_robots_file(),
            simulated: false,
            rpc: RpcConfig::default(),
            feed: FeedConfig::default(),
            wifi: WifiConfig::default(),
            serial: SerialConfig::default(),
            control: ControlConfig::default(),
            referee: RefereeConfig::default(),
            field: FieldDimensions::default(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_rpc_port(),
            read_timeout_ms: default_rpc_read_timeout(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            listen_port: default_feed_port(),
            subscribers: Vec::new(),
            publish_hz: default_publish_hz(),
        }
    }
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            port: default_wifi_port(),
            loop_hz: default_wifi_hz(),
            broadcast_address: None,
            availability_timeout_secs: default_availability(),
            heartbeat_interval_secs: default_heartbeat(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_serial_read_timeout(),
            reconnect_timeout_secs: default_reconnect(),
            monitor_resend_secs: default_monitor_resend(),
            monitor_hz: default_monitor_hz(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_ms(),
        }
    }
}

impl Default for RefereeConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_ms(),
            game_duration_secs: default_game_duration(),
            halftime_duration_secs: default_halftime(),
            penalty_secs: default_penalty(),
            grace_secs: default_grace(),
            timed_circle_secs: default_timed_circle(),
            resume_hold_secs: default_resume_hold(),
            history_size: default_history_size(),
            spot_lock_secs: default_spot_lock(),
        }
    }
}

impl ArbiterConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.port == 0 {
            return Err(ConfigError::Invalid("rpc.port cannot be 0".into()));
        }
        if self.wifi.loop_hz <= 0.0 || self.feed.publish_hz <= 0.0 {
            return Err(ConfigError::Invalid("loop frequencies must be positive".into()));
        }
        if self.control.tick_period_ms == 0 || self.referee.tick_period_ms == 0 {
            return Err(ConfigError::Invalid("tick periods cannot be 0".into()));
        }
        if self.referee.history_size == 0 {
            return Err(ConfigError::Invalid("referee.history_size cannot be 0".into()));
        }
        if self.field.length <= 0.0 || self.field.width <= 0.0 {
            return Err(ConfigError::Invalid("field dimensions must be positive".into()));
        }
        if self.field.goal_width > self.field.width {
            return Err(ConfigError::Invalid(
                "field.goal_width cannot exceed field.width".into(),
            ));
        }
        Ok(())
    }
}

impl RpcConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl WifiConfig {
    pub fn loop_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.loop_hz)
    }

    pub fn availability_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.availability_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_interval_secs)
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_timeout_secs)
    }

    pub fn monitor_resend(&self) -> Duration {
        Duration::from_secs_f64(self.monitor_resend_secs)
    }
}

impl FeedConfig {
    pub fn publish_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.publish_hz)
    }
}

impl ControlConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}

impl RefereeConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ArbiterConfig::default();
        assert_eq!(config.rpc.port, 7558);
        assert_eq!(config.feed.listen_port, 7557);
        assert_eq!(config.wifi.port, 7600);
        assert_eq!(config.referee.history_size, 3);
        assert_eq!(config.field.length, 1.84);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = ArbiterConfig::from_toml(
            r#"
            simulated = true

            [rpc]
            port = 9000

            [field]
            length = 1.9
            "#,
        )
        .unwrap();

        assert!(config.simulated);
        assert_eq!(config.rpc.port, 9000);
        assert_eq!(config.rpc.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.field.length, 1.9);
        assert_eq!(config.field.width, 1.23);
        assert_eq!(config.wifi.loop_hz, 60.0);
    }

    #[test]
    fn test_validation() {
        let err = ArbiterConfig::from_toml("[rpc]\nport = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ArbiterConfig::from_toml("[field]\ngoal_width = 5.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arbiter.toml");

        let mut config = ArbiterConfig::default();
        config.referee.penalty_secs = 7.5;
        config.feed.subscribers.push("127.0.0.1:9999".into());
        config.to_file(&path).unwrap();

        let loaded = ArbiterConfig::from_file(&path).unwrap();
        assert_eq!(loaded.referee.penalty_secs, 7.5);
        assert_eq!(loaded.feed.subscribers, vec!["127.0.0.1:9999".to_string()]);
    }
}
