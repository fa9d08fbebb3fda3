use thiserror::Error;

use crate::audio::AudioError;
use crate::config::ConfigError;
use crate::connector::ConnectorError;
use crate::pipeline::PipelineError;
use crate::protocol::ProtocolError;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Decode error: {0}")]
    Decode(#[from] AudioError),

    #[error("Connect error: {0}")]
    Connect(#[from] ConnectorError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Agent not ready")]
    NotReady,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
