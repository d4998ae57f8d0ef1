//! Daemon - the loader's control loop
//!
//! Loads the startup plugins, binds the controller listener, then applies
//! controller commands to the plugin manager until killed.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::Result;
use crate::connector::{CommandOutcome, Connector, ControlCommand, ControlRequest};
use crate::context::HostContext;
use crate::plugins::{KillSelector, PluginEvent, PluginManager};

/// Depth of the connector → control loop queue
const REQUEST_QUEUE: usize = 32;

/// The Warden daemon
#[derive(Debug)]
pub struct Daemon {
    ctx: HostContext,
    manager: PluginManager,
    events: mpsc::UnboundedReceiver<PluginEvent>,
    requests: mpsc::Receiver<ControlRequest>,
    connector: Connector,
    local_addr: SocketAddr,
}

impl Daemon {
    /// Load and start the startup plugins, then bind the listener
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NoPluginsFound`] if the configured plugin
    /// path yields no plugins, or an I/O error if the listener cannot bind
    pub async fn bind(ctx: HostContext) -> Result<Self> {
        let (manager, events) = ctx.plugin_manager();

        let path = &ctx.config.plugin_path;
        let registered = manager.load_from_path(path)?;
        let started = manager.run();
        tracing::info!(
            path = %path.display(),
            registered = registered.len(),
            started = started.len(),
            "startup plugins running"
        );

        let (tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let server = &ctx.config.server;
        let connector =
            Connector::bind(server.socket_addr(), ctx.config.owner_key.clone(), server.acknowledge, tx).await?;
        let local_addr = connector.local_addr()?;

        Ok(Self {
            ctx,
            manager,
            events,
            requests,
            connector,
            local_addr,
        })
    }

    /// Address the controller listener is bound to
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Plugin manager driven by this daemon
    #[must_use]
    pub const fn manager(&self) -> &PluginManager {
        &self.manager
    }

    /// Run until a `Kill` command, ctrl-c or the context's shutdown token
    ///
    /// All plugins are cancelled before returning.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; the signature leaves room for
    /// listener failures
    pub async fn run(self) -> Result<()> {
        let Self {
            ctx,
            manager,
            mut events,
            mut requests,
            connector,
            local_addr,
        } = self;

        let shutdown = ctx.shutdown.clone();
        let listener = tokio::spawn(connector.serve(shutdown.clone()));
        tracing::info!(addr = %local_addr, "warden loader ready");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        tracing::warn!(error = %e, "failed to listen for ctrl-c");
                    }
                    tracing::info!("interrupted");
                    shutdown.cancel();
                    break;
                }
                Some(request) = requests.recv() => handle_request(&manager, &ctx, request),
                Some(event) = events.recv() => log_event(&event),
            }
        }

        let cancelled = manager.shutdown();
        if let Err(e) = listener.await {
            tracing::warn!(error = %e, "controller listener task failed");
        }

        tracing::info!(cancelled, "warden loader stopped");
        Ok(())
    }
}

/// Apply one controller command and answer it
fn handle_request(manager: &PluginManager, ctx: &HostContext, request: ControlRequest) {
    let outcome = apply(manager, ctx, &request.command);
    request.respond(outcome);
}

fn apply(manager: &PluginManager, ctx: &HostContext, command: &ControlCommand) -> CommandOutcome {
    match command {
        ControlCommand::LoadPlugin { path } | ControlCommand::ReloadPlugin { path } => {
            match manager.reload(path) {
                Ok(registered) => {
                    // Start only what this path provided
                    let started = manager.start(&registered);
                    tracing::info!(
                        command = command.name(),
                        path = %path.display(),
                        registered = registered.len(),
                        started = started.len(),
                        "plugins loaded"
                    );
                    CommandOutcome::ok(format!(
                        "registered {} plugins, started {}",
                        registered.len(),
                        started.len()
                    ))
                }
                Err(e) => {
                    tracing::warn!(
                        command = command.name(),
                        path = %path.display(),
                        error = %e,
                        "load failed"
                    );
                    CommandOutcome::error(e.to_string())
                }
            }
        }
        ControlCommand::UnloadPlugin { path, type_name } => {
            let mut selector = KillSelector::path(path);
            if let Some(type_name) = type_name {
                selector = selector.with_type(type_name.clone());
            }
            let removed = manager.unload(&selector);
            CommandOutcome::ok(format!("unloaded {removed} plugins"))
        }
        ControlCommand::ListPlugins => CommandOutcome::listing(manager.list()),
        ControlCommand::Kill => {
            tracing::info!("kill requested by controller");
            ctx.shutdown.cancel();
            CommandOutcome::ok("shutting down")
        }
    }
}

fn log_event(event: &PluginEvent) {
    match event {
        PluginEvent::Started(id) => tracing::debug!(plugin = %id, "plugin started"),
        PluginEvent::Finished { id, cancelled } => {
            tracing::info!(plugin = %id, cancelled, "plugin finished");
        }
        PluginEvent::Failed { id, error } => tracing::warn!(plugin = %id, error = %error, "plugin failed"),
        PluginEvent::Panicked { id, message } => {
            tracing::error!(plugin = %id, panic = %message, "plugin panicked");
        }
        PluginEvent::Aborted(id) => tracing::warn!(plugin = %id, "plugin aborted after kill timeout"),
    }
}
