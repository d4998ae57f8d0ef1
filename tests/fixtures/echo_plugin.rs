//! Plugin library compiled by `tests/library.rs`

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use warden_loader::Plugin;

/// Runs until cancelled
#[derive(Default)]
pub struct Echo;

#[async_trait]
impl Plugin for Echo {
    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        cancel.cancelled().await;
        Ok(())
    }
}

/// Returns straight away
#[derive(Default)]
pub struct Ping;

#[async_trait]
impl Plugin for Ping {
    async fn run(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }
}

warden_loader::export_plugins!(Echo, Ping);
