//! Plugin capability and the self-registration entry point
//!
//! A loadable module exposes exactly one well-known symbol,
//! [`ENTRY_SYMBOL`], with the [`PluginEntry`] signature. The host calls it
//! once per load with a [`PluginRegistrar`]; the module registers one
//! [`PluginFactory`] per plugin type it exports.
//!
//! ```rust,ignore
//! use warden_loader::plugins::Plugin;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Default)]
//! struct Heartbeat;
//!
//! #[async_trait::async_trait]
//! impl Plugin for Heartbeat {
//!     async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
//!         cancel.cancelled().await;
//!         Ok(())
//!     }
//! }
//!
//! warden_loader::export_plugins!(Heartbeat);
//! ```

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Name of the symbol every plugin module must export
pub const ENTRY_SYMBOL: &str = "warden_plugin_register";

/// Signature of the exported entry point
pub type PluginEntry = fn(&mut PluginRegistrar);

/// Constructs one plugin instance
pub type Constructor = fn() -> anyhow::Result<Box<dyn Plugin>>;

/// The plugin capability: a single cancellable run operation
///
/// Cancellation is cooperative. The host signals `cancel` and stops
/// tracking the execution; it is up to the body to observe the token and
/// return.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Run until finished or until `cancel` is observed
    ///
    /// # Errors
    ///
    /// Returned errors are reported on the host's plugin event channel
    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// An exported plugin type and how to construct it
#[derive(Clone)]
pub struct PluginFactory {
    type_name: String,
    construct: Constructor,
}

impl PluginFactory {
    /// Create a factory for `type_name`
    pub fn new(type_name: impl Into<String>, construct: Constructor) -> Self {
        Self {
            type_name: type_name.into(),
            construct,
        }
    }

    /// Factory that default-constructs `P`, keyed by its type name
    #[must_use]
    pub fn of<P: Plugin + Default>() -> Self {
        Self::new(std::any::type_name::<P>(), construct_default::<P>)
    }

    /// Type identity of the plugin this factory builds
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Build a new instance
    ///
    /// # Errors
    ///
    /// Returns the constructor's error unchanged
    pub fn construct(&self) -> anyhow::Result<Box<dyn Plugin>> {
        (self.construct)()
    }
}

impl fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginFactory")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::unnecessary_wraps)]
fn construct_default<P: Plugin + Default>() -> anyhow::Result<Box<dyn Plugin>> {
    Ok(Box::new(P::default()))
}

/// Collects the factories a module exports
#[derive(Debug, Default)]
pub struct PluginRegistrar {
    factories: Vec<PluginFactory>,
}

impl PluginRegistrar {
    /// Create an empty registrar
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a default-constructible plugin type
    pub fn register<P: Plugin + Default>(&mut self) -> &mut Self {
        self.factories.push(PluginFactory::of::<P>());
        self
    }

    /// Register a plugin type with a fallible constructor
    pub fn register_with(&mut self, type_name: impl Into<String>, construct: Constructor) -> &mut Self {
        self.factories.push(PluginFactory::new(type_name, construct));
        self
    }

    /// Number of registered factories
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether nothing was registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Consume the registrar, yielding its factories in registration order
    #[must_use]
    pub fn into_factories(self) -> Vec<PluginFactory> {
        self.factories
    }
}

/// Generate the [`ENTRY_SYMBOL`] entry point for a plugin crate
///
/// Every listed type must implement [`Plugin`] and [`Default`].
#[macro_export]
macro_rules! export_plugins {
    ($($plugin:ty),* $(,)?) => {
        #[allow(unsafe_code)]
        #[unsafe(no_mangle)]
        pub fn warden_plugin_register(registrar: &mut $crate::plugins::PluginRegistrar) {
            $( registrar.register::<$plugin>(); )*
        }
    };
}
