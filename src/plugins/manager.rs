//! Plugin lifecycle manager
//!
//! Orchestrates load → discover → register → run, and exposes kill and
//! reload. Plugin executions run as independent tokio tasks; their
//! outcomes are reported as [`PluginEvent`]s.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;

use super::descriptor::{PluginDescriptor, PluginId};
use super::discovery::{discover_usable, panic_message};
use super::loader::UnitLoader;
use super::registry::{PluginRegistry, RunningEntry};
use super::unit::UnitId;
use crate::{Error, Result};

/// Outcome notifications for plugin executions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    /// Execution started
    Started(PluginId),
    /// Run body returned successfully
    Finished {
        /// Plugin that finished
        id: PluginId,
        /// Whether cancellation had been requested
        cancelled: bool,
    },
    /// Run body returned an error
    Failed {
        /// Plugin that failed
        id: PluginId,
        /// Error chain
        error: String,
    },
    /// Run body panicked
    Panicked {
        /// Plugin that panicked
        id: PluginId,
        /// Panic message
        message: String,
    },
    /// Execution ignored cancellation past the kill timeout and was aborted
    Aborted(PluginId),
}

impl PluginEvent {
    /// Plugin the event is about
    #[must_use]
    pub const fn id(&self) -> &PluginId {
        match self {
            Self::Started(id)
            | Self::Aborted(id)
            | Self::Finished { id, .. }
            | Self::Failed { id, .. }
            | Self::Panicked { id, .. } => id,
        }
    }
}

/// Which plugins a kill or unload applies to
///
/// Matches by source path across all loads of that path, and optionally by
/// type name. A directory path selects the modules directly inside it, the
/// same ones a load of that directory picks up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSelector {
    path: PathBuf,
    type_name: Option<String>,
}

impl KillSelector {
    /// Select every plugin loaded from `path`
    pub fn path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            path: path.canonicalize().unwrap_or_else(|_| path.to_path_buf()),
            type_name: None,
        }
    }

    /// Narrow the selection to one plugin type
    #[must_use]
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    fn matches(&self, id: &PluginId) -> bool {
        id.matches(&self.path, self.type_name.as_deref())
    }
}

impl fmt::Display for KillSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(t) => write!(f, "{}::{t}", self.path.display()),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// Status row for one registered plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginStatus {
    /// Source path of the unit
    pub path: PathBuf,
    /// Load generation of the unit
    pub generation: u64,
    /// Plugin type
    pub type_name: String,
    /// Whether an execution is tracked as running
    pub running: bool,
}

/// Plugin lifecycle manager
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct PluginManager {
    loader: Arc<dyn UnitLoader>,
    registry: Arc<PluginRegistry>,
    events: mpsc::UnboundedSender<PluginEvent>,
    kill_timeout: Option<Duration>,
}

impl PluginManager {
    /// Create a manager and the receiving end of its event channel
    #[must_use]
    pub fn new(loader: Arc<dyn UnitLoader>) -> (Self, mpsc::UnboundedReceiver<PluginEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Self {
            loader,
            registry: Arc::new(PluginRegistry::new()),
            events,
            kill_timeout: None,
        };
        (manager, rx)
    }

    /// Abort executions that are still alive `timeout` after being killed
    #[must_use]
    pub fn with_kill_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.kill_timeout = timeout;
        self
    }

    /// Shared registry
    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Load, discover and instantiate every plugin under `path`
    fn descriptors_from_path(&self, path: &Path) -> Result<Vec<PluginDescriptor>> {
        let files = match self.loader.expand(path) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read plugin path");
                return Err(Error::NoPluginsFound(path.to_path_buf()));
            }
        };

        let units: Vec<_> = self.loader.load(&files)?.into_iter().flatten().collect();
        if units.is_empty() {
            return Err(Error::NoPluginsFound(path.to_path_buf()));
        }

        let descriptors: Vec<PluginDescriptor> = units.iter().flat_map(discover_usable).collect();
        if descriptors.is_empty() {
            return Err(Error::NoPluginsFound(path.to_path_buf()));
        }

        tracing::debug!(
            path = %path.display(),
            units = units.len(),
            plugins = descriptors.len(),
            "discovered plugins"
        );
        Ok(descriptors)
    }

    /// Load plugins from `path` and merge them into the catalog
    ///
    /// Returns the ids newly registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPluginsFound`] if no unit loaded or no plugin was
    /// discovered, or the loader's error under a fail-fast policy
    pub fn load_from_path(&self, path: &Path) -> Result<Vec<PluginId>> {
        let descriptors = self.descriptors_from_path(path)?;
        let added = self.registry.register(descriptors);

        tracing::info!(path = %path.display(), count = added.len(), "registered plugins");
        Ok(added)
    }

    /// Re-discover `path`, replacing any older load of the same plugins
    ///
    /// Running executions of a logical plugin that is rediscovered are
    /// cancelled before the new descriptor is registered. New descriptors
    /// are not started; call [`run`](Self::run).
    ///
    /// # Errors
    ///
    /// Same as [`load_from_path`](Self::load_from_path); on error the
    /// registry is left untouched
    pub fn reload(&self, path: &Path) -> Result<Vec<PluginId>> {
        let descriptors = self.descriptors_from_path(path)?;
        let (added, displaced) = self.registry.replace(descriptors);

        for (id, _) in &displaced {
            tracing::info!(plugin = %id, "cancelled previous instance for reload");
        }
        self.supervise(displaced);

        tracing::info!(path = %path.display(), count = added.len(), "reloaded plugins");
        Ok(added)
    }

    /// Start every registered plugin that is not already running
    ///
    /// Does not wait for completion. Returns the ids started.
    pub fn run(&self) -> Vec<PluginId> {
        let idle: Vec<PluginId> = self.registry.idle().iter().map(|d| d.id().clone()).collect();
        self.start(&idle)
    }

    /// Start the given plugins, skipping unregistered or running ones
    ///
    /// Returns the ids started.
    pub fn start(&self, ids: &[PluginId]) -> Vec<PluginId> {
        let mut started = Vec::new();

        for id in ids {
            let registry = Arc::clone(&self.registry);
            let events = self.events.clone();

            let spawned = self.registry.start(id, |descriptor, run, cancel| {
                let descriptor = descriptor.clone();
                let _ = events.send(PluginEvent::Started(descriptor.id().clone()));
                tokio::spawn(async move {
                    let id = descriptor.id().clone();
                    let outcome = std::panic::AssertUnwindSafe(descriptor.instance().run(cancel.clone()))
                        .catch_unwind()
                        .await;

                    registry.finish(&id, run);

                    let event = match outcome {
                        Ok(Ok(())) => PluginEvent::Finished {
                            id,
                            cancelled: cancel.is_cancelled(),
                        },
                        Ok(Err(e)) => PluginEvent::Failed {
                            id,
                            error: format!("{e:#}"),
                        },
                        Err(panic) => PluginEvent::Panicked {
                            id,
                            message: panic_message(panic.as_ref()),
                        },
                    };
                    let _ = events.send(event);
                })
            });

            if spawned {
                tracing::debug!(plugin = %id, "started plugin");
                started.push(id.clone());
            }
        }

        started
    }

    /// Cancel running plugins matching `selector`
    ///
    /// Entries are removed immediately without waiting for the executions
    /// to stop. The catalog is untouched. Returns the number cancelled.
    pub fn kill(&self, selector: &KillSelector) -> usize {
        let killed = self.registry.cancel_where(|id| selector.matches(id));
        tracing::info!(target_plugins = %selector, count = killed.len(), "killed plugins");
        self.finish_kill(killed)
    }

    /// Cancel plugins matching `selector` and drop them from the catalog
    ///
    /// Unlike [`kill`](Self::kill), unloaded plugins are not restarted by a
    /// later [`run`](Self::run). Returns the number of catalog entries
    /// removed.
    pub fn unload(&self, selector: &KillSelector) -> usize {
        let (removed, cancelled) = self.registry.remove_where(|id| selector.matches(id));
        tracing::info!(
            target_plugins = %selector,
            removed = removed.len(),
            cancelled = cancelled.len(),
            "unloaded plugins"
        );
        self.supervise(cancelled);
        removed.len()
    }

    /// Cancel running plugins from one exact unit load
    pub fn kill_unit(&self, unit: &UnitId, type_name: Option<&str>) -> usize {
        let killed = self.registry.cancel_where(|id| {
            id.unit() == unit && type_name.is_none_or(|t| id.type_name() == t)
        });
        tracing::info!(unit = %unit, count = killed.len(), "killed plugins");
        self.finish_kill(killed)
    }

    /// Cancel every running plugin
    pub fn shutdown(&self) -> usize {
        let killed = self.registry.cancel_where(|_| true);
        tracing::info!(count = killed.len(), "cancelled all plugins");
        self.finish_kill(killed)
    }

    fn finish_kill(&self, killed: Vec<(PluginId, RunningEntry)>) -> usize {
        let count = killed.len();
        self.supervise(killed);
        count
    }

    /// Arm the kill timeout for cancelled executions
    fn supervise(&self, killed: Vec<(PluginId, RunningEntry)>) {
        let Some(timeout) = self.kill_timeout else {
            return;
        };

        for (id, entry) in killed {
            let task = entry.into_task();
            let events = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if !task.is_finished() {
                    tracing::warn!(plugin = %id, ?timeout, "plugin ignored cancellation, aborting");
                    task.abort();
                    let _ = events.send(PluginEvent::Aborted(id));
                }
            });
        }
    }

    /// Status of every registered plugin
    #[must_use]
    pub fn list(&self) -> Vec<PluginStatus> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|(id, running)| PluginStatus {
                path: id.unit().path().to_path_buf(),
                generation: id.unit().generation(),
                type_name: id.type_name().to_string(),
                running,
            })
            .collect()
    }

    /// Ids currently running
    #[must_use]
    pub fn running(&self) -> Vec<PluginId> {
        self.registry.running_ids()
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("registry", &self.registry)
            .field("kill_timeout", &self.kill_timeout)
            .finish_non_exhaustive()
    }
}
