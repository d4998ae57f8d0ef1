//! Warden Loader - dynamic plugin execution host
//!
//! This library provides the core functionality for the Warden loader:
//! - Loading plugin code units from shared libraries
//! - Discovering and instantiating the plugin types a unit exports
//! - Running plugins concurrently with cooperative cancellation
//! - A key-authenticated TCP command surface for remote control
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Controllers                       │
//! │   LoadPlugin  │  ReloadPlugin  │  UnloadPlugin │ Kill │
//! └────────────────────┬────────────────────────────────┘
//!                      │ TCP (key, then JSON command)
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Warden Loader                        │
//! │   Connector  │  Daemon  │  PluginManager            │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │            Plugin libraries                          │
//! │   warden_plugin_register  →  Plugin::run            │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod connector;
pub mod context;
pub mod daemon;
pub mod error;
pub mod plugins;

pub use config::Config;
pub use connector::{CommandOutcome, ControlCommand, ControlRequest, Connector};
pub use context::HostContext;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use plugins::{
    CodeUnit, KillSelector, LibraryLoader, LoadPolicy, Plugin, PluginEvent, PluginFactory, PluginId,
    PluginManager, PluginRegistrar, PluginStatus, UnitId, UnitLoader,
};
