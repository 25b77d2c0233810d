//! Configuration management.

use anyhow::{Context, Result};
use dlpc900_hw::{DisplayMode, PatternTiming, DMD_PID, DMD_VID};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Display mode set before a sequence is loaded
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Controller connection
    #[serde(default)]
    pub device: DeviceConfig,

    /// Pattern defaults
    #[serde(default)]
    pub pattern: PatternConfig,
}

/// USB binding used to reach the controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// HID interface (works without extra drivers)
    #[default]
    Hid,
    /// Bulk endpoints via libusb
    Bulk,
}

/// Controller connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB binding
    #[serde(default)]
    pub transport: TransportKind,

    /// USB vendor id
    #[serde(default = "default_vid")]
    pub vid: u16,

    /// USB product id
    #[serde(default = "default_pid")]
    pub pid: u16,

    /// HID device path, selects one controller when several are attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Reply timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            vid: default_vid(),
            pid: default_pid(),
            path: None,
            timeout: default_timeout(),
        }
    }
}

/// Defaults applied to every pattern of a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Exposure time in microseconds
    #[serde(default = "default_exposure")]
    pub exposure: u32,

    /// Dark time in microseconds
    #[serde(default)]
    pub dark: u32,

    /// Wait for an external trigger
    #[serde(default)]
    pub trigger_in: bool,

    /// Drive the trigger output
    #[serde(default = "default_trigger_out")]
    pub trigger_out: bool,

    /// LUT repeat count (0 loops forever)
    #[serde(default)]
    pub repeat: u32,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            exposure: default_exposure(),
            dark: 0,
            trigger_in: false,
            trigger_out: default_trigger_out(),
            repeat: 0,
        }
    }
}

// Default value functions
fn default_mode() -> String {
    "on-the-fly".to_string()
}

fn default_vid() -> u16 {
    DMD_VID
}

fn default_pid() -> u16 {
    DMD_PID
}

fn default_timeout() -> u64 {
    1000
}

fn default_exposure() -> u32 {
    1_000_000
}

fn default_trigger_out() -> bool {
    true
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read configuration file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse configuration")?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    #[allow(dead_code)]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path.as_ref(), content).context("Failed to write configuration file")?;
        Ok(())
    }

    /// Parses the configured display mode.
    pub fn display_mode(&self) -> Result<DisplayMode> {
        self.mode
            .parse::<DisplayMode>()
            .map_err(anyhow::Error::msg)
            .context("Invalid display mode in configuration")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            device: DeviceConfig::default(),
            pattern: PatternConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Reply timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

impl PatternConfig {
    /// Timing shared by every pattern.
    pub fn timing(&self) -> PatternTiming {
        PatternTiming {
            exposure_us: self.exposure,
            dark_time_us: self.dark,
            trigger_in: self.trigger_in,
            trigger_out: self.trigger_out,
        }
    }
}
