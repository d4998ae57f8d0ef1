//! Configuration management for the Warden loader

pub mod file;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use self::file::WardenConfigFile;
use crate::plugins::LoadPolicy;
use crate::{Error, Result};

/// Default controller listener port
pub const DEFAULT_PORT: u16 = 8050;

/// Default controller listener address
pub const DEFAULT_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Warden loader configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Plugin file or directory loaded at startup
    pub plugin_path: PathBuf,

    /// Shared secret controllers must present
    pub owner_key: SecretString,

    /// Controller listener configuration
    pub server: ServerConfig,

    /// Plugin loading configuration
    pub plugins: PluginsConfig,
}

/// Controller listener configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind
    pub address: IpAddr,

    /// Port to listen on
    pub port: u16,

    /// Answer each command with a JSON outcome line
    pub acknowledge: bool,
}

impl ServerConfig {
    /// Socket address to bind
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            port: DEFAULT_PORT,
            acknowledge: false,
        }
    }
}

/// Plugin loading configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginsConfig {
    /// Batch failure handling
    pub load_policy: LoadPolicy,

    /// Open copies of library files so rebuilt libraries are re-read
    pub shadow_copy: bool,

    /// Abort plugins still running this long after being killed
    pub kill_timeout: Option<Duration>,
}

/// Values supplied on the command line or through the environment
///
/// These take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--plugins` / `WARDEN_PLUGIN_PATH`
    pub plugin_path: Option<PathBuf>,
    /// `--owner-key` / `WARDEN_OWNER_KEY`
    pub owner_key: Option<String>,
    /// `--address` / `WARDEN_ADDRESS`
    pub address: Option<IpAddr>,
    /// `--port` / `WARDEN_PORT`
    pub port: Option<u16>,
    /// `--config`
    pub config_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the config file and `overrides`
    ///
    /// # Errors
    ///
    /// Returns error if the owner key or plugin path is missing, or the
    /// configured address is not an IP address
    pub fn load(overrides: Overrides) -> Result<Self> {
        let file = match &overrides.config_file {
            Some(path) => file::load_config_file_from(path),
            None => file::load_config_file(),
        };
        Self::resolve(overrides, file)
    }

    /// Merge `overrides` over `file` over defaults
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load)
    pub fn resolve(overrides: Overrides, file: WardenConfigFile) -> Result<Self> {
        let plugin_path = overrides
            .plugin_path
            .or(file.plugins.path)
            .ok_or_else(|| Error::Config("no plugin path configured (--plugins or WARDEN_PLUGIN_PATH)".to_string()))?;

        let owner_key = overrides
            .owner_key
            .or(file.owner_key)
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| Error::Config("no owner key configured (--owner-key or WARDEN_OWNER_KEY)".to_string()))?;

        let file_address = file
            .server
            .address
            .map(|a| {
                a.parse::<IpAddr>()
                    .map_err(|e| Error::Config(format!("invalid server address {a:?}: {e}")))
            })
            .transpose()?;

        let server = ServerConfig {
            address: overrides.address.or(file_address).unwrap_or(DEFAULT_ADDRESS),
            port: overrides.port.or(file.server.port).unwrap_or(DEFAULT_PORT),
            acknowledge: file.server.acknowledge.unwrap_or(false),
        };

        let plugins = PluginsConfig {
            load_policy: file.plugins.load_policy.unwrap_or_default(),
            shadow_copy: file.plugins.shadow_copy.unwrap_or(false),
            kill_timeout: file.plugins.kill_timeout_secs.map(Duration::from_secs),
        };

        Ok(Self {
            plugin_path,
            owner_key,
            server,
            plugins,
        })
    }
}
