//! Configuration.
//!
//! Layered the same way the rest of this ecosystem loads configuration:
//! built-in defaults, then an optional TOML file, then environment
//! variables prefixed `PIXELSTAGE_`, each overriding the last.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub static DEFAULT_FILENAME: &str = "pixelstage.toml";

/// A loaded, layered configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) inner: config::Config,
}

impl Config {
    /// Create a configuration from a TOML string. Useful for tests.
    pub fn from_toml(toml: &str) -> Self {
        let inner = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .expect("failed to build the configuration");
        Self { inner }
    }

    /// Load the configuration from an optional explicit file path, then the
    /// environment.
    ///
    /// # Errors
    ///
    /// If the specified file cannot be read or parsed, or the environment
    /// overrides do not deserialize into the requested shape.
    pub fn load(file_path: Option<&PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file_path {
            builder = builder.add_source(config::File::from(path.clone()));
        } else if std::fs::metadata(DEFAULT_FILENAME).is_ok() {
            builder = builder.add_source(config::File::with_name(DEFAULT_FILENAME));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PIXELSTAGE")
                .separator("__")
                .try_parsing(true),
        );

        Ok(Self {
            inner: builder.build()?,
        })
    }

    /// Deserialize the whole configuration into [`Settings`].
    ///
    /// # Errors
    ///
    /// If the configuration does not match the shape of [`Settings`].
    pub fn settings(&self) -> Result<Settings> {
        Ok(self.inner.clone().try_deserialize()?)
    }
}

/// The set of devices and tunables this process is responsible for.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,

    #[serde(default = "default_mock_push_ms")]
    pub mock_push_duration_ms: u64,

    #[serde(default)]
    pub media_dir: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_push_timeout_ms() -> u64 {
    5_000
}

fn default_mock_push_ms() -> u64 {
    0
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Static description of one device, as read from configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub host: String,
    pub width: u32,
    pub height: u32,

    #[serde(default)]
    pub driver: DriverKind,

    /// Real-device address (IP or hostname), required when `driver = real`.
    #[serde(default)]
    pub address: Option<String>,
}

/// Which transport backs a device.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Real,
    #[default]
    Mock,
}
