//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use warden_loader::config::Overrides;
use warden_loader::config::file::{ServerFileConfig, WardenConfigFile};
use warden_loader::plugins::LIBRARY_EXTENSION;
use warden_loader::{
    CodeUnit, CommandOutcome, Config, Error, LoadPolicy, Plugin, PluginFactory, Result, UnitLoader,
};

pub const OWNER_KEY: &str = "test-owner-key";

/// Runs until cancelled
#[derive(Default)]
pub struct Heartbeat;

#[async_trait]
impl Plugin for Heartbeat {
    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }
    }
}

/// Returns immediately
#[derive(Default)]
pub struct Oneshot;

#[async_trait]
impl Plugin for Oneshot {
    async fn run(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-process loader keyed by module file stem
///
/// Module files must exist on disk so directory expansion sees them; the
/// loader then serves the factories registered for the file's stem. Files
/// with an unknown stem fail to load.
#[derive(Default)]
pub struct FakeLoader {
    modules: HashMap<String, Vec<PluginFactory>>,
    policy: LoadPolicy,
    loads: Mutex<HashMap<String, usize>>,
    attempts: AtomicUsize,
}

impl FakeLoader {
    pub fn new(policy: LoadPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn module(mut self, stem: &str, exports: Vec<PluginFactory>) -> Self {
        self.modules.insert(stem.to_string(), exports);
        self
    }

    /// Successful loads of the module with this stem
    pub fn loads_of(&self, stem: &str) -> usize {
        self.loads
            .lock()
            .unwrap()
            .get(stem)
            .copied()
            .unwrap_or(0)
    }

    /// Every load attempt, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl UnitLoader for FakeLoader {
    fn load_unit(&self, path: &Path) -> Result<CodeUnit> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let source = path.canonicalize().map_err(|e| Error::load(path, e))?;
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let exports = self
            .modules
            .get(&stem)
            .cloned()
            .ok_or_else(|| Error::load(&source, "not a plugin library"))?;

        *self.loads.lock().unwrap().entry(stem).or_default() += 1;
        Ok(CodeUnit::new(source, exports))
    }

    fn policy(&self) -> LoadPolicy {
        self.policy
    }
}

/// Create an (empty) module file named `{stem}.{ext}` in `dir`
pub fn write_module(dir: &Path, stem: &str) -> PathBuf {
    let path = dir.join(format!("{stem}.{LIBRARY_EXTENSION}"));
    std::fs::write(&path, b"").unwrap();
    path
}

/// Configuration listening on an ephemeral localhost port
pub fn test_config(plugin_path: &Path, acknowledge: bool) -> Config {
    let file = WardenConfigFile {
        server: ServerFileConfig {
            acknowledge: Some(acknowledge),
            ..ServerFileConfig::default()
        },
        ..WardenConfigFile::default()
    };

    Config::resolve(
        Overrides {
            plugin_path: Some(plugin_path.to_path_buf()),
            owner_key: Some(OWNER_KEY.to_string()),
            address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port: Some(0),
            config_file: None,
        },
        file,
    )
    .unwrap()
}

/// A controller connection speaking the key-then-command protocol
pub struct Controller {
    reader: BufReader<TcpStream>,
}

impl Controller {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        stream.set_nodelay(true).unwrap();
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Write one frame and pause so the server reads it on its own
    pub async fn send(&mut self, frame: &str) {
        let stream = self.reader.get_mut();
        stream.write_all(frame.as_bytes()).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    /// Authenticate and send one command
    pub async fn command(&mut self, key: &str, command: &str, args: &[&str]) {
        let payload = serde_json::json!({ "Command": command, "Args": args });
        self.send(key).await;
        self.send(&payload.to_string()).await;
    }

    /// Read one acknowledgement line
    pub async fn outcome(&mut self) -> CommandOutcome {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for acknowledgement")
            .unwrap();
        serde_json::from_str(line.trim_end()).unwrap()
    }

    /// Whether the server has closed the connection
    pub async fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line)).await,
            Ok(Ok(0) | Err(_))
        )
    }
}

/// Factories for a module exporting `P`
pub fn exports<P: Plugin + Default>() -> Vec<PluginFactory> {
    vec![PluginFactory::of::<P>()]
}

/// Wrap a loader for a host context, keeping a typed handle
pub fn shared(loader: FakeLoader) -> (Arc<FakeLoader>, Arc<dyn UnitLoader>) {
    let loader = Arc::new(loader);
    let dynamic: Arc<dyn UnitLoader> = loader.clone();
    (loader, dynamic)
}
