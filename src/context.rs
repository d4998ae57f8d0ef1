//! Host context shared by the manager, the connector and the daemon

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::Config;
use crate::plugins::{LibraryLoader, PluginEvent, PluginManager, UnitLoader};

/// Everything the host needs, built once at startup
#[derive(Clone)]
pub struct HostContext {
    /// Resolved configuration
    pub config: Arc<Config>,

    /// Primitive used to turn paths into code units
    pub loader: Arc<dyn UnitLoader>,

    /// Cancelled when the host should stop
    pub shutdown: CancellationToken,
}

impl HostContext {
    /// Build a context that loads plugins from shared libraries
    ///
    /// # Errors
    ///
    /// Returns error if shadow copies are enabled and the shadow directory
    /// cannot be created
    pub fn new(config: Config) -> Result<Self> {
        let mut loader = LibraryLoader::new(config.plugins.load_policy);
        if config.plugins.shadow_copy {
            loader = loader.with_shadow_copies()?;
        }
        tracing::debug!(
            load_policy = %config.plugins.load_policy,
            shadow_copy = config.plugins.shadow_copy,
            "created library loader"
        );

        Ok(Self::with_loader(config, Arc::new(loader)))
    }

    /// Build a context around a custom loader
    #[must_use]
    pub fn with_loader(config: Config, loader: Arc<dyn UnitLoader>) -> Self {
        Self {
            config: Arc::new(config),
            loader,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a plugin manager over this context's loader
    #[must_use]
    pub fn plugin_manager(&self) -> (PluginManager, tokio::sync::mpsc::UnboundedReceiver<PluginEvent>) {
        let (manager, events) = PluginManager::new(Arc::clone(&self.loader));
        (manager.with_kill_timeout(self.config.plugins.kill_timeout), events)
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
