//! Loaded code units

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use libloading::Library;

use super::api::PluginFactory;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Identity of one load of a code unit
///
/// Two independent loads of the same path get distinct generations and are
/// therefore distinct units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId {
    path: PathBuf,
    generation: u64,
}

impl UnitId {
    /// Allocate a fresh identity for a new load of `path`
    pub fn next(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Source path the unit was loaded from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Process-unique load generation
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path.display(), self.generation)
    }
}

/// A loaded module and the plugin types it exports
///
/// Cloning is cheap; clones share the exported type list and keep the
/// underlying library mapped.
#[derive(Clone)]
pub struct CodeUnit {
    id: UnitId,
    exports: Arc<[PluginFactory]>,
    library: Option<Arc<Library>>,
}

impl CodeUnit {
    /// Create a unit that is not backed by a shared library
    ///
    /// Used by in-process loaders where the factories live in the host binary.
    pub fn new(path: impl Into<PathBuf>, exports: Vec<PluginFactory>) -> Self {
        Self {
            id: UnitId::next(path),
            exports: exports.into(),
            library: None,
        }
    }

    pub(crate) fn from_library(id: UnitId, exports: Vec<PluginFactory>, library: Library) -> Self {
        Self {
            id,
            exports: exports.into(),
            library: Some(Arc::new(library)),
        }
    }

    /// Unit identity
    #[must_use]
    pub const fn id(&self) -> &UnitId {
        &self.id
    }

    /// Source path
    #[must_use]
    pub fn path(&self) -> &Path {
        self.id.path()
    }

    /// Exported plugin types, fixed at load time
    #[must_use]
    pub fn exports(&self) -> &[PluginFactory] {
        &self.exports
    }

    /// Whether the unit is backed by a mapped shared library
    #[must_use]
    pub const fn is_library(&self) -> bool {
        self.library.is_some()
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeUnit")
            .field("id", &self.id)
            .field(
                "exports",
                &self.exports.iter().map(PluginFactory::type_name).collect::<Vec<_>>(),
            )
            .field("library", &self.library.is_some())
            .finish()
    }
}
