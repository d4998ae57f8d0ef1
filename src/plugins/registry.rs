//! Plugin registry - the catalog of known plugins and the set running now
//!
//! All bookkeeping sits behind one lock. It is mutated both by the control
//! path and by completion continuations of running plugins.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::descriptor::{PluginDescriptor, PluginId};

/// Bookkeeping for one running execution
#[derive(Debug)]
pub struct RunningEntry {
    run: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningEntry {
    /// Cancellation handle for the execution
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Consume the entry, yielding the execution handle
    #[must_use]
    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

#[derive(Debug, Default)]
struct Inner {
    catalog: HashMap<PluginId, PluginDescriptor>,
    running: HashMap<PluginId, RunningEntry>,
    next_run: u64,
}

impl Inner {
    /// Remove and cancel every running entry matching `pred`
    fn cancel_where(&mut self, pred: impl Fn(&PluginId) -> bool) -> Vec<(PluginId, RunningEntry)> {
        let ids: Vec<PluginId> = self.running.keys().filter(|id| pred(id)).cloned().collect();

        ids.into_iter()
            .filter_map(|id| {
                let entry = self.running.remove(&id)?;
                entry.cancel.cancel();
                Some((id, entry))
            })
            .collect()
    }
}

/// Catalog and running set under a single lock
///
/// Invariant: every running id is also in the catalog.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    inner: Mutex<Inner>,
}

impl PluginRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Add descriptors to the catalog, skipping ids already present
    ///
    /// Returns the ids that were newly added
    pub fn register(&self, descriptors: impl IntoIterator<Item = PluginDescriptor>) -> Vec<PluginId> {
        let mut inner = self.lock();
        let mut added = Vec::new();

        for descriptor in descriptors {
            let id = descriptor.id().clone();
            if inner.catalog.contains_key(&id) {
                tracing::debug!(plugin = %id, "plugin already registered, skipping");
                continue;
            }
            inner.catalog.insert(id.clone(), descriptor);
            added.push(id);
        }

        added
    }

    /// Register descriptors, displacing older loads of the same logical plugin
    ///
    /// For each descriptor, running entries of the same logical plugin are
    /// cancelled and removed, and their catalog entries dropped, before the
    /// new descriptor is inserted. Returns the new ids and the displaced
    /// running entries.
    pub fn replace(
        &self,
        descriptors: impl IntoIterator<Item = PluginDescriptor>,
    ) -> (Vec<PluginId>, Vec<(PluginId, RunningEntry)>) {
        let mut inner = self.lock();
        let mut added = Vec::new();
        let mut displaced = Vec::new();

        for descriptor in descriptors {
            let id = descriptor.id().clone();

            displaced.extend(inner.cancel_where(|running| running != &id && running.same_logical(&id)));
            inner
                .catalog
                .retain(|known, _| known == &id || !known.same_logical(&id));

            if inner.catalog.insert(id.clone(), descriptor).is_none() {
                added.push(id);
            }
        }

        (added, displaced)
    }

    /// Start `id` if it is registered and not already running
    ///
    /// `spawn` receives the run sequence number and a fresh cancellation
    /// token and must start the execution. It is called with the registry
    /// locked, so the execution's completion cannot observe the registry
    /// before its entry exists.
    pub fn start(
        &self,
        id: &PluginId,
        spawn: impl FnOnce(&PluginDescriptor, u64, CancellationToken) -> JoinHandle<()>,
    ) -> bool {
        let mut inner = self.lock();

        if inner.running.contains_key(id) {
            return false;
        }
        let Some(descriptor) = inner.catalog.get(id).cloned() else {
            return false;
        };

        inner.next_run += 1;
        let run = inner.next_run;
        let cancel = CancellationToken::new();
        let task = spawn(&descriptor, run, cancel.clone());

        inner.running.insert(id.clone(), RunningEntry { run, cancel, task });
        true
    }

    /// Completion continuation: drop the entry for `id` if it is still `run`
    ///
    /// Safe to call after a kill already removed the entry, or after the
    /// plugin was started again under a newer run.
    pub fn finish(&self, id: &PluginId, run: u64) -> bool {
        let mut inner = self.lock();

        if inner.running.get(id).is_some_and(|entry| entry.run == run) {
            inner.running.remove(id);
            true
        } else {
            false
        }
    }

    /// Cancel and remove every running entry matching `pred`
    ///
    /// Does not wait for the executions to stop. The catalog is untouched.
    pub fn cancel_where(&self, pred: impl Fn(&PluginId) -> bool) -> Vec<(PluginId, RunningEntry)> {
        self.lock().cancel_where(pred)
    }

    /// Cancel running entries matching `pred` and drop them from the catalog
    ///
    /// Returns the removed catalog ids, sorted, and the cancelled running
    /// entries. Once the executions finish, nothing holds their units.
    pub fn remove_where(
        &self,
        pred: impl Fn(&PluginId) -> bool,
    ) -> (Vec<PluginId>, Vec<(PluginId, RunningEntry)>) {
        let mut inner = self.lock();
        let cancelled = inner.cancel_where(&pred);

        let mut removed: Vec<PluginId> = inner.catalog.keys().filter(|id| pred(id)).cloned().collect();
        for id in &removed {
            inner.catalog.remove(id);
        }
        removed.sort();

        (removed, cancelled)
    }

    /// Registered descriptors that are not running
    #[must_use]
    pub fn idle(&self) -> Vec<PluginDescriptor> {
        let inner = self.lock();
        let mut idle: Vec<PluginDescriptor> = inner
            .catalog
            .values()
            .filter(|d| !inner.running.contains_key(d.id()))
            .cloned()
            .collect();
        idle.sort_by(|a, b| a.id().cmp(b.id()));
        idle
    }

    /// Snapshot of the catalog as `(id, running)` pairs, sorted by id
    #[must_use]
    pub fn snapshot(&self) -> Vec<(PluginId, bool)> {
        let inner = self.lock();
        let mut all: Vec<(PluginId, bool)> = inner
            .catalog
            .keys()
            .map(|id| (id.clone(), inner.running.contains_key(id)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Ids currently running, sorted
    #[must_use]
    pub fn running_ids(&self) -> Vec<PluginId> {
        let mut ids: Vec<PluginId> = self.lock().running.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `id` has a running entry
    #[must_use]
    pub fn is_running(&self, id: &PluginId) -> bool {
        self.lock().running.contains_key(id)
    }

    /// Number of registered plugins
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().catalog.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().catalog.is_empty()
    }

    /// Number of running entries
    #[must_use]
    pub fn running_len(&self) -> usize {
        self.lock().running.len()
    }
}
