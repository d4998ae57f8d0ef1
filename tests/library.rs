//! `LibraryLoader` against real shared libraries
//!
//! Fixtures are compiled with `rustc` against the artifacts of this test
//! build, so the plugin and the host share one toolchain and one copy of
//! every dependency's metadata.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use warden_loader::plugins::{LIBRARY_EXTENSION, discover};
use warden_loader::{Error, KillSelector, LibraryLoader, LoadPolicy, PluginEvent, PluginManager, UnitLoader};

/// Directory holding this test binary and the rlibs it was linked from
fn deps_dir() -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    exe.parent().unwrap().to_path_buf()
}

/// Most recent `{prefix}{name}-*.{ext}` artifact in `deps`
fn artifact(deps: &Path, prefix: &str, name: &str, ext: &str) -> PathBuf {
    let stem = format!("{prefix}{name}-");
    std::fs::read_dir(deps)
        .unwrap()
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|e| e == ext)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&stem))
        })
        .max_by_key(|path| path.metadata().and_then(|m| m.modified()).ok())
        .unwrap_or_else(|| panic!("no {stem}*.{ext} in {}", deps.display()))
}

/// Compile `source` into `{out}/{name}.{LIBRARY_EXTENSION}` as a cdylib
fn compile_cdylib(source: &Path, name: &str, out: &Path, externs: &[(&str, PathBuf)]) -> PathBuf {
    let library = out.join(format!("{name}.{LIBRARY_EXTENSION}"));
    let mut search = OsString::from("dependency=");
    search.push(deps_dir());

    let mut rustc = Command::new(std::env::var_os("RUSTC").unwrap_or_else(|| "rustc".into()));
    rustc
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .args(["--edition", "2021", "--crate-type", "cdylib", "--crate-name", name])
        .arg("-L")
        .arg(search)
        .arg("-o")
        .arg(&library)
        .arg(source);
    for (crate_name, path) in externs {
        let mut arg = OsString::from(format!("{crate_name}="));
        arg.push(path);
        rustc.arg("--extern").arg(arg);
    }

    let output = rustc.output().expect("failed to run rustc");
    assert!(
        output.status.success(),
        "rustc failed for {}:\n{}",
        source.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    library
}

/// Build `tests/fixtures/echo_plugin.rs` into `out`
fn build_echo_plugin(out: &Path) -> PathBuf {
    let deps = deps_dir();
    let source = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/echo_plugin.rs");
    let externs = [
        ("warden_loader", artifact(&deps, "lib", "warden_loader", "rlib")),
        ("anyhow", artifact(&deps, "lib", "anyhow", "rlib")),
        ("tokio_util", artifact(&deps, "lib", "tokio_util", "rlib")),
        (
            "async_trait",
            artifact(&deps, std::env::consts::DLL_PREFIX, "async_trait", std::env::consts::DLL_EXTENSION),
        ),
    ];
    compile_cdylib(&source, "echo_plugin", out, &externs)
}

async fn next_event(rx: &mut tokio::sync::mpsc::UnboundedReceiver<PluginEvent>) -> PluginEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for plugin event")
        .expect("event channel closed")
}

#[test]
fn library_without_entry_symbol_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("unrelated.rs");
    std::fs::write(&source, "#[no_mangle]\npub extern \"C\" fn unrelated() -> u32 {\n    7\n}\n").unwrap();
    let library = compile_cdylib(&source, "unrelated", dir.path(), &[]);

    match LibraryLoader::new(LoadPolicy::Skip).load_unit(&library) {
        Err(Error::Load { path, reason }) => {
            assert_eq!(path, library.canonicalize().unwrap());
            assert!(reason.contains("missing entry symbol"), "{reason}");
        }
        other => panic!("expected a load error, got {other:?}"),
    }
}

#[test]
fn exported_plugins_are_registered_and_discovered() {
    let dir = tempfile::tempdir().unwrap();
    let library = build_echo_plugin(dir.path());

    for loader in [
        LibraryLoader::new(LoadPolicy::FailFast),
        LibraryLoader::new(LoadPolicy::FailFast).with_shadow_copies().unwrap(),
    ] {
        let unit = loader.load_unit(&library).unwrap();
        assert!(unit.is_library());

        let mut names: Vec<&str> = unit.exports().iter().map(|f| f.type_name()).collect();
        names.sort_unstable();
        assert_eq!(names, ["echo_plugin::Echo", "echo_plugin::Ping"]);

        let descriptors: Vec<_> = discover(&unit).into_iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(descriptors.len(), 2);
    }
}

#[tokio::test]
async fn library_plugins_run_and_observe_kill() {
    let dir = tempfile::tempdir().unwrap();
    build_echo_plugin(dir.path());

    let (manager, mut rx) = PluginManager::new(Arc::new(LibraryLoader::new(LoadPolicy::Skip)));
    let ids = manager.load_from_path(dir.path()).unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(manager.run().len(), 2);

    let echo = ids.iter().find(|id| id.type_name().ends_with("Echo")).unwrap().clone();
    let ping = ids.iter().find(|id| id.type_name().ends_with("Ping")).unwrap().clone();

    let mut ping_finished = false;
    while !ping_finished {
        match next_event(&mut rx).await {
            PluginEvent::Started(_) => {}
            PluginEvent::Finished { id, cancelled } if id == ping => {
                assert!(!cancelled);
                ping_finished = true;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(manager.running(), vec![echo.clone()]);

    assert_eq!(manager.unload(&KillSelector::path(dir.path()).with_type("Echo")), 1);
    loop {
        match next_event(&mut rx).await {
            PluginEvent::Finished { id, cancelled } if id == echo => {
                assert!(cancelled);
                break;
            }
            PluginEvent::Started(_) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(manager.running().is_empty());
    assert_eq!(manager.list().len(), 1);
}
