//! Configuration loading from scriptguard.toml.

use policy::PresetCatalog;
use runtime::{BufferConfig, ChannelConfig, RuntimeConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Top-level configuration. Every field has a default, so an empty or
/// missing file is valid.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filter used when `SCRIPTGUARD_LOG` is not set.
    pub log_level: String,

    /// TOML file of additional `[[preset]]` tables.
    pub presets_file: Option<PathBuf>,

    pub storage: StorageConfig,
    pub buffer: BufferConfig,
    pub channel: ChannelConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database location. Defaults to the platform data directory.
    pub path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            presets_file: None,
            storage: StorageConfig::default(),
            buffer: BufferConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Load the file if it exists, defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            buffer: self.buffer.clone(),
            channel: self.channel.clone(),
        }
    }

    /// Custom presets, or an empty catalog when none are configured.
    pub fn presets(&self) -> Result<PresetCatalog> {
        match &self.presets_file {
            Some(path) => Ok(PresetCatalog::load(path)?),
            None => Ok(PresetCatalog::empty()),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage.path.clone().unwrap_or_else(|| {
            dirs_data_dir()
                .unwrap_or_else(|| ".scriptguard".into())
                .join("scriptguard.db")
        })
    }
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/scriptguard"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("scriptguard"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("scriptguard"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}
