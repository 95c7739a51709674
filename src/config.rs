// Startup configuration: serial link, encoder geometry, loop rates, topics
use clap::Parser;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::motor::channel::{DEFAULT_BAUDRATE, DEFAULT_PORT, DEFAULT_TIMEOUT_MS};
use crate::motor::SerialEndpoint;

// Overall loop rate: should be faster than the fastest sensor rate
pub const DEFAULT_POLL_HZ: u32 = 50;

// Zenoh key prefix; topics hang off it
pub const DEFAULT_KEY_PREFIX: &str = "serial_motor";
pub const TOPIC_MOTOR_COMMAND: &str = "motor_command"; // commands
pub const TOPIC_MOTOR_VELS: &str = "motor_vels"; // derived wheel velocities
pub const TOPIC_ENCODER_VALS: &str = "encoder_vals"; // raw counters
pub const TOPIC_HEALTH: &str = "health"; // health status

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("encoder_cpr must be greater than zero")]
    ZeroCountsPerRevolution,

    #[error("poll_rate_hz must be greater than zero")]
    ZeroPollRate,

    #[error("baud_rate must be greater than zero")]
    ZeroBaudRate,

    #[error("read_timeout_ms must be greater than zero")]
    ZeroReadTimeout,
}

/// Bridge a line-protocol motor controller on a serial port to zenoh
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct BridgeConfig {
    /// Serial device of the motor controller
    #[arg(long, env = "SERIAL_PORT", default_value = DEFAULT_PORT)]
    pub serial_port: String,

    #[arg(long, env = "BAUD_RATE", default_value_t = DEFAULT_BAUDRATE)]
    pub baud_rate: u32,

    /// Per-byte read timeout
    #[arg(long, env = "READ_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub read_timeout_ms: u64,

    /// Encoder counts per wheel revolution
    #[arg(long, env = "ENCODER_CPR")]
    pub encoder_cpr: u32,

    /// Encoder poll rate
    #[arg(long, env = "POLL_RATE_HZ", default_value_t = DEFAULT_POLL_HZ)]
    pub poll_rate_hz: u32,

    /// Log every frame sent and received
    #[arg(long, env = "SERIAL_DEBUG")]
    pub serial_debug: bool,

    #[arg(long, env = "KEY_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
    pub key_prefix: String,

    /// Stop the motors when no command arrives for this long (0 disables)
    #[arg(long, env = "COMMAND_TIMEOUT_MS", default_value_t = 0)]
    pub command_timeout_ms: u64,
}

impl BridgeConfig {
    /// Defaults for everything except the encoder resolution
    pub fn with_encoder_cpr(encoder_cpr: u32) -> Self {
        Self {
            serial_port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUDRATE,
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            encoder_cpr,
            poll_rate_hz: DEFAULT_POLL_HZ,
            serial_debug: false,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            command_timeout_ms: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.counts_per_rev()?;
        if self.poll_rate_hz == 0 {
            return Err(ConfigError::ZeroPollRate);
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::ZeroReadTimeout);
        }
        Ok(())
    }

    pub fn counts_per_rev(&self) -> Result<NonZeroU32, ConfigError> {
        NonZeroU32::new(self.encoder_cpr).ok_or(ConfigError::ZeroCountsPerRevolution)
    }

    pub fn endpoint(&self) -> SerialEndpoint {
        SerialEndpoint::new(
            self.serial_port.clone(),
            self.baud_rate,
            Duration::from_millis(self.read_timeout_ms),
        )
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.poll_rate_hz.max(1)))
    }

    /// Watchdog window, `None` when disabled
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_ms > 0).then(|| Duration::from_millis(self.command_timeout_ms))
    }

    pub fn topic(&self, name: &str) -> String {
        format!("{}/{}", self.key_prefix.trim_end_matches('/'), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let config = BridgeConfig::try_parse_from(["bridge", "--encoder-cpr", "3440"]).unwrap();
        assert_eq!(config.serial_port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 57_600);
        assert_eq!(config.encoder_cpr, 3440);
        assert_eq!(config.poll_rate_hz, 50);
        assert!(!config.serial_debug);
        assert_eq!(config.command_timeout(), None);
        assert_eq!(config.endpoint().read_timeout, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_encoder_cpr_required() {
        // env fallback would mask a missing flag
        if std::env::var_os("ENCODER_CPR").is_none() {
            assert!(BridgeConfig::try_parse_from(["bridge"]).is_err());
        }
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        let config = BridgeConfig::with_encoder_cpr(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroCountsPerRevolution));

        let mut config = BridgeConfig::with_encoder_cpr(200);
        config.poll_rate_hz = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroPollRate));

        let mut config = BridgeConfig::with_encoder_cpr(200);
        config.baud_rate = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroBaudRate));

        let mut config = BridgeConfig::with_encoder_cpr(200);
        config.read_timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroReadTimeout));
    }

    #[test]
    fn test_topics_and_periods() {
        let mut config = BridgeConfig::with_encoder_cpr(200);
        config.key_prefix = "robot/base/".to_string();
        config.poll_rate_hz = 20;
        config.command_timeout_ms = 250;
        assert_eq!(config.topic(TOPIC_MOTOR_VELS), "robot/base/motor_vels");
        assert_eq!(config.poll_period(), Duration::from_millis(50));
        assert_eq!(config.command_timeout(), Some(Duration::from_millis(250)));
    }
}
