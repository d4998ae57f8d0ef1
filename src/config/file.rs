//! TOML configuration file loading
//!
//! Supports `~/.config/warden/loader.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::plugins::LoadPolicy;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct WardenConfigFile {
    /// Shared secret controllers must present
    #[serde(default)]
    pub owner_key: Option<String>,

    /// Controller listener configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Plugin loading configuration
    #[serde(default)]
    pub plugins: PluginsFileConfig,
}

/// Controller listener configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Listen address (e.g. "127.0.0.1")
    pub address: Option<String>,

    /// Listen port
    pub port: Option<u16>,

    /// Answer each command with a JSON outcome line
    pub acknowledge: Option<bool>,
}

/// Plugin loading configuration
#[derive(Debug, Default, Deserialize)]
pub struct PluginsFileConfig {
    /// Plugin file or directory loaded at startup
    pub path: Option<PathBuf>,

    /// What to do when one module in a batch fails to load
    pub load_policy: Option<LoadPolicy>,

    /// Open copies of library files instead of the originals
    pub shadow_copy: Option<bool>,

    /// Abort plugins still running this long after being killed
    pub kill_timeout_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `WardenConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> WardenConfigFile {
    config_file_path().map_or_else(WardenConfigFile::default, |path| load_config_file_from(&path))
}

/// Load the TOML config file at `path`
///
/// Returns `WardenConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_from(path: &Path) -> WardenConfigFile {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file");
        return WardenConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                WardenConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            WardenConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/warden/loader.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("warden").join("loader.toml"))
}
