//! Text control messages exchanged over the WebSocket transport.
//!
//! Audio travels as raw binary frames (s16le PCM outbound, encoded audio
//! blobs inbound); everything else is a small JSON object.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Message has no command field")]
    MissingCommand,
}

/// Client → server commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    RefreshConnector,
    StopAgent,
    /// Recognized as a command, but not one this server handles
    Unknown(String),
}

#[derive(Deserialize)]
struct CommandEnvelope {
    command: Option<String>,
}

impl ClientCommand {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: CommandEnvelope = serde_json::from_str(text)?;
        let command = envelope.command.ok_or(ProtocolError::MissingCommand)?;

        Ok(match command.as_str() {
            // refresh_zapier is the legacy spelling
            "refresh_connector" | "refresh_zapier" => Self::RefreshConnector,
            "stop_agent" => Self::StopAgent,
            _ => Self::Unknown(command),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Success,
    Failed,
}

impl From<bool> for RefreshStatus {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Success
        } else {
            Self::Failed
        }
    }
}

/// Server → client messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status { message: String },
    Error { message: String },
    AudioStreamEnd,
    ConnectorRefreshed { status: RefreshStatus },
    AgentStopped,
}

impl ServerMessage {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
