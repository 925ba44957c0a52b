//! Configuration for the VFD bridge.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use raptor_common::config::{LoggingConfig, ZenohConfig};
use raptor_common::{DEFAULT_ROOT, Format, TopicBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::{SpeedLimits, WheelSettings};
use crate::link::{DriveEndpoint, DriveRole, LinkTimeouts};
use crate::registers::{CoilMap, WritePolicy};
use crate::status::DriveAddresses;

/// Modbus-TCP port used when an address has none.
pub const DEFAULT_MODBUS_PORT: u16 = 502;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Common(#[from] raptor_common::Error),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VfdBridgeConfig {
    /// Zenoh connection settings
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Site name, second topic segment
    #[serde(default = "default_site")]
    pub site: String,

    /// Device name, third topic segment
    #[serde(default = "default_device")]
    pub device: String,

    /// Topic root (default: "raptor")
    #[serde(default = "default_root")]
    pub root: String,

    #[serde(default)]
    pub drives: DrivesConfig,

    #[serde(default)]
    pub control: ControlConfig,

    /// Soft-PLC coils, 1-based
    #[serde(default)]
    pub coils: CoilMap,

    #[serde(default)]
    pub poll: PollConfig,

    /// Payload format of published snapshots
    #[serde(default)]
    pub format: Format,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_site() -> String {
    "shop".to_string()
}

fn default_device() -> String {
    "revpi-135593".to_string()
}

fn default_root() -> String {
    DEFAULT_ROOT.to_string()
}

/// Drive addresses and link timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrivesConfig {
    /// Main (chain) drive, `host[:port]`
    #[serde(default = "default_main_addr")]
    pub main: String,

    /// Inner wheel child drive
    #[serde(default = "default_inner_addr")]
    pub inner_wheel: String,

    /// Outer wheel child drive
    #[serde(default = "default_outer_addr")]
    pub outer_wheel: String,

    /// Modbus unit ID of every drive (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and read timeout for telemetry and coil reads
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Connect and write timeout for register and coil writes
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for DrivesConfig {
    fn default() -> Self {
        Self {
            main: default_main_addr(),
            inner_wheel: default_inner_addr(),
            outer_wheel: default_outer_addr(),
            unit_id: default_unit_id(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

fn default_main_addr() -> String {
    "192.168.1.152:502".to_string()
}

fn default_inner_addr() -> String {
    "192.168.1.153:502".to_string()
}

fn default_outer_addr() -> String {
    "192.168.1.151:502".to_string()
}

fn default_unit_id() -> u8 {
    1
}

fn default_read_timeout_ms() -> u64 {
    3000
}

fn default_write_timeout_ms() -> u64 {
    5000
}

/// A speed range with its startup value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedConfig {
    pub min: u16,
    pub max: u16,
    pub default: u16,
}

impl SpeedConfig {
    pub fn limits(&self) -> SpeedLimits {
        SpeedLimits {
            min: self.min,
            max: self.max,
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.min > self.max {
            return Err(ConfigError::Validation(format!(
                "{}: min {} is above max {}",
                name, self.min, self.max
            )));
        }
        if !self.limits().contains(self.default) {
            return Err(ConfigError::Validation(format!(
                "{}: default {} outside {}..={}",
                name, self.default, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Command handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Allow writes to the direction register. Off by default: writing it
    /// can switch the drive's command source away from the panel switches.
    #[serde(default)]
    pub direction_enabled: bool,

    #[serde(default = "default_wheel_speed")]
    pub wheel_speed: SpeedConfig,

    #[serde(default = "default_chain_speed")]
    pub chain_speed: SpeedConfig,

    /// Outer wheel speed as a fraction of the inner wheel speed
    #[serde(default = "default_outer_ratio")]
    pub outer_ratio: f64,

    /// Command queue depth
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            direction_enabled: false,
            wheel_speed: default_wheel_speed(),
            chain_speed: default_chain_speed(),
            outer_ratio: default_outer_ratio(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_wheel_speed() -> SpeedConfig {
    SpeedConfig {
        min: 100,
        max: 1500,
        default: 600,
    }
}

fn default_chain_speed() -> SpeedConfig {
    SpeedConfig {
        min: 100,
        max: 1200,
        default: 420,
    }
}

fn default_outer_ratio() -> f64 {
    0.9167
}

fn default_queue_capacity() -> usize {
    crate::command::QUEUE_CAPACITY
}

/// Poll loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    2000
}

impl Default for VfdBridgeConfig {
    fn default() -> Self {
        Self {
            zenoh: ZenohConfig::default(),
            site: default_site(),
            device: default_device(),
            root: default_root(),
            drives: DrivesConfig::default(),
            control: ControlConfig::default(),
            coils: CoilMap::default(),
            poll: PollConfig::default(),
            format: Format::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Parse `host`, `host:port`, `ip`, `ip:port` or `[ipv6]:port` into a host
/// and port. Hostnames are kept as given and resolved at connect time.
pub fn parse_drive_addr(value: &str) -> Result<(String, u16), ConfigError> {
    let value = value.trim();
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok((addr.ip().to_string(), addr.port()));
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Ok((ip.to_string(), DEFAULT_MODBUS_PORT));
    }

    let invalid = || {
        ConfigError::Validation(format!(
            "invalid drive address '{}' (expected host or host:port)",
            value
        ))
    };
    let (host, port) = match value.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (value, DEFAULT_MODBUS_PORT),
    };
    if host.is_empty() || host.contains(|c: char| c.is_whitespace() || c == ':' || c == '/') {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl VfdBridgeConfig {
    /// Load configuration from a JSON5 file, apply environment overrides,
    /// and validate the result.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config: VfdBridgeConfig = raptor_common::load_config(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides. Unset and empty variables are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(site) = var("RAPTOR_SITE") {
            self.site = site;
        }
        if let Some(device) = var("RAPTOR_DEVICE") {
            self.device = device;
        }
        if let Some(addr) = var("MODBUS_ADDR") {
            self.drives.main = addr;
        }
        if let Some(addr) = var("MODBUS_ADDR_CHILD1") {
            self.drives.inner_wheel = addr;
        }
        if let Some(addr) = var("MODBUS_ADDR_CHILD2") {
            self.drives.outer_wheel = addr;
        }
        if let Some(connect) = var("ZENOH_CONNECT") {
            self.zenoh.connect = connect
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(user) = var("ZENOH_USER") {
            self.zenoh.username = Some(user);
        }
        if let Some(pass) = var("ZENOH_PASS") {
            self.zenoh.password = Some(pass);
        }
        if let Some(flag) = var("RAPTOR_DIRECTION_CONTROL") {
            self.control.direction_enabled = parse_flag(&flag);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.topics()?;

        if !(1..=247).contains(&self.drives.unit_id) {
            return Err(ConfigError::Validation(
                "drives.unit_id must be 1-247".to_string(),
            ));
        }
        if self.drives.read_timeout_ms == 0 || self.drives.write_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "drive timeouts must be non-zero".to_string(),
            ));
        }

        let [main, inner, outer] = self.endpoints()?;
        if main.same_target(&inner) || main.same_target(&outer) || inner.same_target(&outer) {
            return Err(ConfigError::Validation(
                "main, inner_wheel and outer_wheel must be distinct drives".to_string(),
            ));
        }

        self.control.wheel_speed.validate("control.wheel_speed")?;
        self.control.chain_speed.validate("control.chain_speed")?;

        let ratio = self.control.outer_ratio;
        if !(ratio > 0.0 && ratio <= 2.0) {
            return Err(ConfigError::Validation(format!(
                "control.outer_ratio {} must be in (0, 2]",
                ratio
            )));
        }
        if self.control.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "control.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.poll.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "poll.interval_ms must be non-zero".to_string(),
            ));
        }

        for (name, coil) in [
            ("wheels_run", self.coils.wheels_run),
            ("chain_run", self.coils.chain_run),
            ("wheels_status", self.coils.wheels_status),
            ("chain_status", self.coils.chain_status),
        ] {
            if coil.0 == 0 {
                return Err(ConfigError::Validation(format!(
                    "coils.{}: coil numbers are 1-based",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn topics(&self) -> Result<TopicBuilder, ConfigError> {
        Ok(TopicBuilder::with_root(
            &self.root,
            &self.site,
            &self.device,
        )?)
    }

    /// Main, inner wheel and outer wheel endpoints.
    pub fn endpoints(&self) -> Result<[DriveEndpoint; 3], ConfigError> {
        let unit_id = self.drives.unit_id;
        let endpoint = |role, value: &str| {
            parse_drive_addr(value).map(|(host, port)| DriveEndpoint::new(role, host, port, unit_id))
        };
        Ok([
            endpoint(DriveRole::Main, &self.drives.main)?,
            endpoint(DriveRole::InnerWheel, &self.drives.inner_wheel)?,
            endpoint(DriveRole::OuterWheel, &self.drives.outer_wheel)?,
        ])
    }

    pub fn read_timeouts(&self) -> LinkTimeouts {
        LinkTimeouts::uniform(Duration::from_millis(self.drives.read_timeout_ms))
    }

    pub fn write_timeouts(&self) -> LinkTimeouts {
        LinkTimeouts::uniform(Duration::from_millis(self.drives.write_timeout_ms))
    }

    pub fn write_policy(&self) -> WritePolicy {
        WritePolicy::with_direction_control(self.control.direction_enabled)
    }

    pub fn wheel_settings(&self) -> WheelSettings {
        WheelSettings {
            limits: self.control.wheel_speed.limits(),
            outer_ratio: self.control.outer_ratio,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }

    pub fn drive_addresses(&self) -> DriveAddresses {
        DriveAddresses {
            main: self.drives.main.clone(),
            inner_wheel: self.drives.inner_wheel.clone(),
            outer_wheel: self.drives.outer_wheel.clone(),
        }
    }
}
