use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compression::CompressionSetting;
use crate::error::{IoResultExt, Result};
use crate::safe_write::{WriteOptions, DEFAULT_STREAM_THRESHOLD};

/// package tool configuration stored as toml
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub write: WriteConfig,
    pub package: PackageDefaults,
}

/// how packages are persisted
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    /// images above this many bytes are streamed to disk
    pub stream_threshold: u64,
    /// fsync the staged file and its directory before reporting success
    pub sync: bool,
    pub compression: CompressionSetting,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            stream_threshold: DEFAULT_STREAM_THRESHOLD,
            sync: true,
            compression: CompressionSetting::Auto,
        }
    }
}

impl WriteConfig {
    pub fn options(&self, overwrite: bool) -> WriteOptions {
        WriteOptions {
            overwrite,
            stream_threshold: self.stream_threshold,
            sync: self.sync,
        }
    }
}

/// identifiers stamped on newly created packages
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageDefaults {
    pub vendor_id: u32,
    pub app_id: u64,
}

impl Config {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// load config if the file exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }
}
