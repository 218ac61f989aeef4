//! Bootstrap configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration that selects any fp64-capable device and runs `square`.
//!
//! ```toml
//! [selection]
//! required_extension = "cl_khr_fp64"
//! device_kind = "gpu"
//!
//! [kernel]
//! source = "demos/square.cl"
//! entry_point = "square"
//! ```

use clboot_types::{DeviceKind, FP64_EXTENSION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value '{key}': {value} - {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub kernel: KernelConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Device eligibility policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Extension every eligible device must advertise.
    #[serde(default = "default_required_extension")]
    pub required_extension: String,

    /// Also skip devices reporting `CL_DEVICE_AVAILABLE = false`.
    #[serde(default)]
    pub require_available: bool,

    #[serde(default)]
    pub device_kind: DeviceKind,
}

fn default_required_extension() -> String {
    FP64_EXTENSION.to_string()
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            required_extension: default_required_extension(),
            require_available: false,
            device_kind: DeviceKind::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BuildConfig {
    /// Options string handed to the program build.
    #[serde(default)]
    pub options: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default = "default_source")]
    pub source: PathBuf,

    #[serde(default = "default_entry_point")]
    pub entry_point: String,
}

fn default_source() -> PathBuf {
    PathBuf::from("demos/square.cl")
}

fn default_entry_point() -> String {
    "square".to_string()
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            entry_point: default_entry_point(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_true")]
    pub print_devices: bool,

    #[serde(default)]
    pub print_extensions: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            print_devices: true,
            print_extensions: false,
        }
    }
}

impl BootstrapConfig {
    /// Load and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ext = &self.selection.required_extension;
        if ext.is_empty() {
            return Err(invalid("selection.required_extension", ext, "must not be empty"));
        }
        if ext.chars().any(char::is_whitespace) {
            return Err(invalid(
                "selection.required_extension",
                ext,
                "must be a single extension name",
            ));
        }
        if self.kernel.entry_point.trim().is_empty() {
            return Err(invalid(
                "kernel.entry_point",
                &self.kernel.entry_point,
                "must not be empty",
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
