//! Remote command wire format
//!
//! Controllers send `{"Command": "...", "Args": ["..."]}`. Recognized
//! commands are decoded into [`ControlCommand`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::plugins::PluginStatus;
use crate::{Error, Result};

/// Raw command payload as sent by a controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPayload {
    /// Command name
    #[serde(rename = "Command")]
    pub command: String,

    /// Positional arguments
    #[serde(rename = "Args", default)]
    pub args: Vec<String>,
}

/// A decoded control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Load plugins from a file or directory and start them
    LoadPlugin {
        /// Module file or directory
        path: PathBuf,
    },
    /// Re-discover a path, replacing running instances
    ReloadPlugin {
        /// Module file or directory
        path: PathBuf,
    },
    /// Cancel running plugins from a path
    UnloadPlugin {
        /// Module file the plugins were loaded from
        path: PathBuf,
        /// Restrict to one plugin type
        type_name: Option<String>,
    },
    /// Report the catalog (only meaningful with acknowledgements)
    ListPlugins,
    /// Stop the listener and the process
    Kill,
}

impl ControlCommand {
    /// Decode a text payload
    ///
    /// Returns `Ok(None)` for well-formed payloads naming an unknown command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the payload is not a command object or a
    /// known command has the wrong arguments
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let payload: CommandPayload = serde_json::from_str(text.trim_end_matches('\0').trim())
            .map_err(|e| Error::Protocol(format!("malformed command payload: {e}")))?;
        Self::from_payload(payload)
    }

    /// Decode an already parsed payload
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on an argument count mismatch
    pub fn from_payload(payload: CommandPayload) -> Result<Option<Self>> {
        let CommandPayload { command, mut args } = payload;

        let parsed = match (command.as_str(), args.len()) {
            ("LoadPlugin", 1) => Self::LoadPlugin {
                path: PathBuf::from(args.remove(0)),
            },
            ("ReloadPlugin", 1) => Self::ReloadPlugin {
                path: PathBuf::from(args.remove(0)),
            },
            ("UnloadPlugin", 1) => Self::UnloadPlugin {
                path: PathBuf::from(args.remove(0)),
                type_name: None,
            },
            ("UnloadPlugin", 2) => {
                let type_name = args.pop();
                Self::UnloadPlugin {
                    path: PathBuf::from(args.remove(0)),
                    type_name,
                }
            }
            ("ListPlugins", _) => Self::ListPlugins,
            ("Kill", _) => Self::Kill,
            ("LoadPlugin" | "ReloadPlugin" | "UnloadPlugin", n) => {
                return Err(Error::Protocol(format!(
                    "{command} takes {} arguments, got {n}",
                    if command == "UnloadPlugin" { "1 or 2" } else { "1" }
                )));
            }
            _ => return Ok(None),
        };

        Ok(Some(parsed))
    }

    /// Command name as it appears on the wire
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::LoadPlugin { .. } => "LoadPlugin",
            Self::ReloadPlugin { .. } => "ReloadPlugin",
            Self::UnloadPlugin { .. } => "UnloadPlugin",
            Self::ListPlugins => "ListPlugins",
            Self::Kill => "Kill",
        }
    }
}

/// Result of a command, sent back when acknowledgements are enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Whether the command succeeded
    #[serde(rename = "Ok")]
    pub ok: bool,

    /// Human-readable detail
    #[serde(rename = "Message")]
    pub message: String,

    /// Catalog snapshot, for `ListPlugins`
    #[serde(rename = "Plugins", skip_serializing_if = "Vec::is_empty", skip_deserializing)]
    pub plugins: Vec<PluginStatus>,
}

impl CommandOutcome {
    /// Successful outcome
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            plugins: Vec::new(),
        }
    }

    /// Successful `ListPlugins` outcome
    #[must_use]
    pub fn listing(plugins: Vec<PluginStatus>) -> Self {
        Self {
            ok: true,
            message: format!("{} plugins", plugins.len()),
            plugins,
        }
    }

    /// Failed outcome
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            plugins: Vec::new(),
        }
    }
}

/// A command on its way from the network to the control loop
#[derive(Debug)]
pub struct ControlRequest {
    /// The decoded command
    pub command: ControlCommand,
    /// Where to send the outcome, when the controller expects one
    pub reply: Option<oneshot::Sender<CommandOutcome>>,
}

impl ControlRequest {
    /// A request nobody waits on
    #[must_use]
    pub const fn fire_and_forget(command: ControlCommand) -> Self {
        Self {
            command,
            reply: None,
        }
    }

    /// Deliver `outcome` to the waiting controller, if any
    pub fn respond(self, outcome: CommandOutcome) {
        if let Some(reply) = self.reply {
            let _ = reply.send(outcome);
        }
    }
}
