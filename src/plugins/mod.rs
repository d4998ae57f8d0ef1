//! Plugin system for the Warden loader
//!
//! Plugins live in shared libraries. Each library exports one entry point
//! that registers the plugin types it provides; the host instantiates each
//! type, runs the instances concurrently and tracks them until they finish
//! or are killed.
//!
//! ```text
//! path ──► UnitLoader ──► CodeUnit ──► discover ──► PluginDescriptor
//!                                                        │
//!                           PluginManager ◄── registry ◄─┘
//! ```

pub mod api;
pub mod descriptor;
pub mod discovery;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod unit;

pub use api::{Constructor, ENTRY_SYMBOL, Plugin, PluginEntry, PluginFactory, PluginRegistrar};
pub use descriptor::{PluginDescriptor, PluginId};
pub use discovery::{discover, discover_usable};
pub use loader::{LIBRARY_EXTENSION, LibraryLoader, LoadPolicy, UnitLoader, expand_path};
pub use manager::{KillSelector, PluginEvent, PluginManager, PluginStatus};
pub use registry::{PluginRegistry, RunningEntry};
pub use unit::{CodeUnit, UnitId};
