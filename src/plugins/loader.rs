//! Code unit loading from shared libraries
//!
//! Each plugin module is a shared library (`.so` / `.dylib` / `.dll`)
//! exporting [`ENTRY_SYMBOL`](super::api::ENTRY_SYMBOL).

// This module needs unsafe for FFI.
#![allow(unsafe_code)]

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use libloading::Library;
use serde::Deserialize;
use tempfile::TempDir;

use super::api::{ENTRY_SYMBOL, PluginEntry, PluginRegistrar};
use super::unit::{CodeUnit, UnitId};
use crate::{Error, Result};

/// Platform-specific library extension
pub const LIBRARY_EXTENSION: &str = std::env::consts::DLL_EXTENSION;

/// What to do when one path of a batch fails to load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Skip the failing path and keep the rest of the batch
    #[default]
    Skip,
    /// Fail the whole batch on the first failing path
    FailFast,
}

impl std::fmt::Display for LoadPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::FailFast => write!(f, "fail_fast"),
        }
    }
}

/// Platform primitive that turns a path into a loaded code unit
pub trait UnitLoader: Send + Sync {
    /// Load a single module file, all or nothing
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] if the module cannot be opened or has no entry point
    fn load_unit(&self, path: &Path) -> Result<CodeUnit>;

    /// Batch failure policy
    fn policy(&self) -> LoadPolicy {
        LoadPolicy::Skip
    }

    /// Expand a user-supplied path into the module files it names
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] if the path does not exist or cannot be read
    fn expand(&self, path: &Path) -> Result<Vec<PathBuf>> {
        expand_path(path, LIBRARY_EXTENSION)
    }

    /// Load every path, yielding `None` for each path that failed
    ///
    /// Results are in input order. Under [`LoadPolicy::FailFast`] the first
    /// failure is returned instead.
    ///
    /// # Errors
    ///
    /// Only under [`LoadPolicy::FailFast`]
    fn load(&self, paths: &[PathBuf]) -> Result<Vec<Option<CodeUnit>>> {
        let mut units = Vec::with_capacity(paths.len());

        for path in paths {
            match self.load_unit(path) {
                Ok(unit) => {
                    tracing::debug!(
                        unit = %unit.id(),
                        exports = unit.exports().len(),
                        "loaded code unit"
                    );
                    units.push(Some(unit));
                }
                Err(e) if self.policy() == LoadPolicy::Skip => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unloadable module");
                    units.push(None);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(units)
    }
}

/// Expand `path` into module files
///
/// A directory yields the files directly inside it whose extension is
/// `extension`, sorted by name. Any other path is returned unchanged.
///
/// # Errors
///
/// Returns [`Error::Load`] if `path` does not exist or the directory cannot be read
pub fn expand_path(path: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let metadata = std::fs::metadata(path).map_err(|e| Error::load(path, e))?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let entries = std::fs::read_dir(path).map_err(|e| Error::load(path, e))?;
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort();

    tracing::debug!(path = %path.display(), modules = files.len(), "expanded plugin directory");
    Ok(files)
}

/// Loads code units from shared libraries on disk
#[derive(Debug)]
pub struct LibraryLoader {
    policy: LoadPolicy,
    shadow_dir: Option<TempDir>,
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new(LoadPolicy::Skip)
    }
}

impl LibraryLoader {
    /// Create a loader that opens libraries in place
    #[must_use]
    pub const fn new(policy: LoadPolicy) -> Self {
        Self {
            policy,
            shadow_dir: None,
        }
    }

    /// Open a copy of each library instead of the file itself
    ///
    /// Without shadow copies the platform loader hands back the already
    /// mapped image for a path, so a rebuilt library is never re-read.
    ///
    /// # Errors
    ///
    /// Returns error if the shadow directory cannot be created
    pub fn with_shadow_copies(mut self) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("warden-shadow-").tempdir()?;
        tracing::debug!(path = %dir.path().display(), "created shadow copy directory");
        self.shadow_dir = Some(dir);
        Ok(self)
    }

    /// Directory holding shadow copies, if enabled
    #[must_use]
    pub fn shadow_dir(&self) -> Option<&Path> {
        self.shadow_dir.as_ref().map(TempDir::path)
    }

    fn shadow_copy(dir: &Path, source: &Path, generation: u64) -> Result<PathBuf> {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("plugin");
        let target = dir.join(format!("{stem}-{generation}.{LIBRARY_EXTENSION}"));
        std::fs::copy(source, &target).map_err(|e| Error::load(source, e))?;
        Ok(target)
    }
}

impl UnitLoader for LibraryLoader {
    fn load_unit(&self, path: &Path) -> Result<CodeUnit> {
        let source = path.canonicalize().map_err(|e| Error::load(path, e))?;
        let id = UnitId::next(source.clone());

        let open_path = match self.shadow_dir() {
            Some(dir) => Self::shadow_copy(dir, &source, id.generation())?,
            None => source.clone(),
        };

        // SAFETY: Loading a plugin library runs its initializers; plugins are trusted.
        let library = unsafe { Library::new(&open_path) }.map_err(|e| Error::load(&source, e))?;

        // SAFETY: The entry symbol's type is fixed by the plugin ABI contract.
        let entry: PluginEntry = *unsafe { library.get::<PluginEntry>(ENTRY_SYMBOL.as_bytes()) }
            .map_err(|e| Error::load(&source, format!("missing entry symbol `{ENTRY_SYMBOL}`: {e}")))?;

        let mut registrar = PluginRegistrar::new();
        std::panic::catch_unwind(AssertUnwindSafe(|| entry(&mut registrar)))
            .map_err(|_| Error::load(&source, "entry point panicked"))?;

        Ok(CodeUnit::from_library(id, registrar.into_factories(), library))
    }

    fn policy(&self) -> LoadPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn expand_file_returns_itself() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(dir.path(), &format!("one.{LIBRARY_EXTENSION}"));

        let expanded = expand_path(&file, LIBRARY_EXTENSION).unwrap();
        assert_eq!(expanded, vec![file]);
    }

    #[test]
    fn expand_directory_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let b = touch(dir.path(), &format!("b.{LIBRARY_EXTENSION}"));
        let a = touch(dir.path(), &format!("a.{LIBRARY_EXTENSION}"));
        touch(dir.path(), "notes.txt");
        std::fs::create_dir(dir.path().join(format!("nested.{LIBRARY_EXTENSION}"))).unwrap();

        let expanded = expand_path(dir.path(), LIBRARY_EXTENSION).unwrap();
        assert_eq!(expanded, vec![a, b]);
    }

    #[test]
    fn expand_missing_path_is_load_error() {
        let err = expand_path(Path::new("/nonexistent/plugins"), LIBRARY_EXTENSION).unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }

    #[test]
    fn invalid_library_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join(format!("bogus.{LIBRARY_EXTENSION}"));
        std::fs::write(&bogus, b"not a shared library").unwrap();

        let loader = LibraryLoader::default();
        let err = loader.load_unit(&bogus).unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }

    #[test]
    fn skip_policy_keeps_batch_positions() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = touch(dir.path(), &format!("bogus.{LIBRARY_EXTENSION}"));

        let loader = LibraryLoader::new(LoadPolicy::Skip);
        let units = loader
            .load(&[bogus.clone(), dir.path().join("missing.so"), bogus])
            .unwrap();

        assert_eq!(units.len(), 3);
        assert!(units.iter().all(Option::is_none));
    }

    #[test]
    fn fail_fast_policy_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = touch(dir.path(), &format!("bogus.{LIBRARY_EXTENSION}"));

        let loader = LibraryLoader::new(LoadPolicy::FailFast);
        assert!(loader.load(&[bogus]).is_err());
    }

    #[test]
    fn shadow_copies_use_generation_names() {
        let loader = LibraryLoader::default().with_shadow_copies().unwrap();
        let shadow = loader.shadow_dir().unwrap().to_path_buf();

        let dir = tempfile::tempdir().unwrap();
        let source = touch(dir.path(), &format!("echo.{LIBRARY_EXTENSION}"));

        let copy = LibraryLoader::shadow_copy(&shadow, &source, 42).unwrap();
        assert_eq!(copy, shadow.join(format!("echo-42.{LIBRARY_EXTENSION}")));
        assert!(copy.exists());
    }

    #[test]
    fn policy_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: LoadPolicy,
        }

        let w: Wrapper = toml::from_str(r#"policy = "fail_fast""#).unwrap();
        assert_eq!(w.policy, LoadPolicy::FailFast);
    }
}
