//! Plugin descriptors and their identity

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use super::api::Plugin;
use super::unit::{CodeUnit, UnitId};

/// Descriptor identity: one code unit load paired with one plugin type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId {
    unit: UnitId,
    type_name: String,
}

impl PluginId {
    /// Pair a unit identity with a type identity
    pub fn new(unit: UnitId, type_name: impl Into<String>) -> Self {
        Self {
            unit,
            type_name: type_name.into(),
        }
    }

    /// Unit the plugin was discovered in
    #[must_use]
    pub const fn unit(&self) -> &UnitId {
        &self.unit
    }

    /// Type identity
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Whether this id belongs to the same logical plugin as `other`
    ///
    /// Logical plugins are addressed by source path and type, across loads.
    #[must_use]
    pub fn same_logical(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.unit.path() == other.unit.path()
    }

    /// Whether this id was loaded from `path` and, if given, has `type_name`
    ///
    /// `path` is either the unit's own file or the directory holding it, as
    /// directory loads expand to the modules directly inside. `type_name`
    /// may be the full type path or its last segment.
    #[must_use]
    pub fn matches(&self, path: &Path, type_name: Option<&str>) -> bool {
        let source = self.unit.path();
        let loaded_from = source == path || source.parent() == Some(path);
        loaded_from && type_name.is_none_or(|t| self.has_type(t))
    }

    fn has_type(&self, name: &str) -> bool {
        self.type_name == name || self.type_name.rsplit("::").next() == Some(name)
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.type_name, self.unit)
    }
}

/// A discovered plugin: its identity and a constructed instance
#[derive(Clone)]
pub struct PluginDescriptor {
    id: PluginId,
    // Declared before `unit` so the instance drops before its library can unmap
    instance: Arc<dyn Plugin>,
    unit: CodeUnit,
}

impl PluginDescriptor {
    /// Pair an instance with the unit that produced it
    pub fn new(unit: CodeUnit, type_name: impl Into<String>, instance: Arc<dyn Plugin>) -> Self {
        Self {
            id: PluginId::new(unit.id().clone(), type_name),
            instance,
            unit,
        }
    }

    /// Descriptor identity
    #[must_use]
    pub const fn id(&self) -> &PluginId {
        &self.id
    }

    /// The plugin instance
    #[must_use]
    pub fn instance(&self) -> &Arc<dyn Plugin> {
        &self.instance
    }

    /// Owning code unit
    #[must_use]
    pub const fn unit(&self) -> &CodeUnit {
        &self.unit
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
