//! Voice pipeline boundary.
//!
//! A pipeline takes one utterance of PCM audio plus the current agent and
//! returns a lazy, ordered, single-pass stream of [`VoiceStreamEvent`]s.

pub mod hosted;

pub use hosted::{HostedPipelineConfig, HostedVoicePipeline};

use crate::agent::AgentDescriptor;
use crate::audio::{AudioError, PcmAudio};
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use strum::Display;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Response parsing error: {0}")]
    Parse(String),
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("Input audio is empty")]
    EmptyInput,
}

/// Turn boundaries reported by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleEvent {
    TurnStarted,
    TurnEnded,
    SessionEnded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceStreamEvent {
    /// Mono s16 PCM at the pipeline sample rate
    AudioChunk(Vec<i16>),
    Lifecycle(LifecycleEvent),
    /// A failure the pipeline reports in-band
    Error(String),
    StreamEnd,
}

pub type VoiceEventStream =
    Pin<Box<dyn Stream<Item = Result<VoiceStreamEvent, PipelineError>> + Send>>;

#[async_trait]
pub trait VoicePipeline: Send + Sync {
    /// Start processing one utterance. Work happens as the stream is polled.
    async fn run(
        &self,
        input: PcmAudio,
        agent: Arc<AgentDescriptor>,
    ) -> Result<VoiceEventStream, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_names() {
        assert_eq!(LifecycleEvent::TurnStarted.to_string(), "turn_started");
        assert_eq!(LifecycleEvent::TurnEnded.to_string(), "turn_ended");
        assert_eq!(LifecycleEvent::SessionEnded.to_string(), "session_ended");
    }
}
