//! Configuration management for padlink.
//!
//! Settings come from an optional JSON file named by `PADLINK_CONFIG`, then
//! individual environment variables, then command-line flags (applied by the
//! binary). Every field has a default, so no file is needed.

use std::{fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    error::{Error, Result},
    esp32::reset::{Fixed, NamePatternClassifier, PortClassifier, ResetStrategy},
    tracing::prelude::*,
};

/// Path of the JSON configuration file
pub const CONFIG_ENV: &str = "PADLINK_CONFIG";
pub const BACKEND_ENV: &str = "PADLINK_BACKEND";
pub const REGISTER_FALLBACK_ENV: &str = "PADLINK_REGISTER_FALLBACK";
pub const ESPTOOL_PYTHON_ENV: &str = "PADLINK_ESPTOOL_PYTHON";

#[cfg(windows)]
const DEFAULT_PYTHON: &str = "python";
#[cfg(not(windows))]
const DEFAULT_PYTHON: &str = "python3";

/// How the ESP32 MAC is obtained.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Backend {
    /// Speak the ROM bootloader protocol directly
    #[default]
    Native,
    /// Run the external `esptool` module
    Esptool,
}

/// What a register read yields once its retries are spent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegisterFallback {
    /// Fail with `RegisterReadFailed`
    #[default]
    Error,
    /// Substitute 0, which yields a MAC with zeroed octets
    Zero,
}

/// How the reset sequence is chosen for a port.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClassifierChoice {
    /// Guess from the port name
    #[default]
    Name,
    Bridge,
    UsbNative,
}

impl ClassifierChoice {
    pub fn classifier(self) -> Box<dyn PortClassifier> {
        match self {
            Self::Name => Box::new(NamePatternClassifier),
            Self::Bridge => Box::new(Fixed(ResetStrategy::Bridge)),
            Self::UsbNative => Box::new(Fixed(ResetStrategy::UsbNative)),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub backend: Backend,

    pub register_fallback: RegisterFallback,

    pub port_classifier: ClassifierChoice,

    /// Interpreter used to run esptool
    pub esptool_python: String,

    /// Ports to try instead of discovering them
    pub ports: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            register_fallback: RegisterFallback::default(),
            port_classifier: ClassifierChoice::default(),
            esptool_python: DEFAULT_PYTHON.to_string(),
            ports: None,
        }
    }
}

impl Config {
    /// Load from `$PADLINK_CONFIG` if set, then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// [`Config::load`] with an explicit environment lookup.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let config = serde_json::from_str(&text)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply the single-value environment overrides.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(BACKEND_ENV) {
            self.backend = parse_override(BACKEND_ENV, &value)?;
        }
        if let Some(value) = lookup(REGISTER_FALLBACK_ENV) {
            self.register_fallback = parse_override(REGISTER_FALLBACK_ENV, &value)?;
        }
        if let Some(python) = lookup(ESPTOOL_PYTHON_ENV) {
            self.esptool_python = python;
        }
        Ok(())
    }
}

fn parse_override<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: unrecognized value {value:?}")))
}
