pub mod agent;
pub mod audio;
pub mod audio_sink;
pub mod audio_source;
pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod http_server;
pub mod lifecycle;
pub mod pipeline;
pub mod protocol;
pub mod relay;
pub mod ws_server;

pub use error::{AgentError, Result};
