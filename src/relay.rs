//! Request handling and event relay.
//!
//! One [`RequestHandler`] is shared by every front-end. For each unit of
//! work it makes sure an agent is published, normalizes the audio, runs the
//! voice pipeline and relays the resulting events, in order, into a
//! [`RelaySink`]. A per-request [`CancellationToken`] is checked before every
//! audio chunk.

use crate::agent::AgentDescriptor;
use crate::audio::{normalize, AudioError, PcmAudio};
use crate::config::PIPELINE_SAMPLE_RATE;
use crate::error::AgentError;
use crate::lifecycle::ConnectorLifecycleManager;
use crate::pipeline::{LifecycleEvent, VoiceEventStream, VoicePipeline, VoiceStreamEvent};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use strum::Display;
use tokio_util::sync::CancellationToken;

pub const NOT_READY_MESSAGE: &str = "Agent not ready";

/// Outbound side of a transport
#[async_trait]
pub trait RelaySink: Send {
    async fn send_audio(&mut self, samples: &[i16]) -> Result<(), AgentError>;

    async fn send_lifecycle(&mut self, event: LifecycleEvent) -> Result<(), AgentError>;

    /// Sent exactly once, on normal completion
    async fn send_stream_end(&mut self) -> Result<(), AgentError>;

    async fn send_error(&mut self, message: &str) -> Result<(), AgentError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed { chunks: usize },
    Cancelled { chunks: usize },
    Errored { chunks: usize, cause: String },
}

impl RelayOutcome {
    pub fn chunks(&self) -> usize {
        match self {
            Self::Completed { chunks }
            | Self::Cancelled { chunks }
            | Self::Errored { chunks, .. } => *chunks,
        }
    }

    fn terminal_state(&self) -> SessionState {
        match self {
            Self::Completed { .. } => SessionState::Completed,
            Self::Cancelled { .. } => SessionState::Cancelled,
            Self::Errored { .. } => SessionState::Errored,
        }
    }
}

/// Forward pipeline events into `sink` until the stream ends, fails, or
/// `cancel` fires.
///
/// Cancellation is checked before pulling each event and again right before
/// each audio chunk is sent. A cancelled relay sends no end marker. Pipeline
/// failures become one error message; only sink failures are returned as
/// `Err`.
pub async fn relay_events(
    mut stream: VoiceEventStream,
    sink: &mut dyn RelaySink,
    cancel: &CancellationToken,
) -> Result<RelayOutcome, AgentError> {
    let mut chunks = 0;

    loop {
        if cancel.is_cancelled() {
            log::info!("⏹️  Relay cancelled after {} chunk(s)", chunks);
            return Ok(RelayOutcome::Cancelled { chunks });
        }

        let event = match stream.next().await {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                log::error!("❌ Pipeline failed: {}", e);
                sink.send_error(&format!("Agent processing failed: {}", e))
                    .await?;
                return Ok(RelayOutcome::Errored {
                    chunks,
                    cause: e.to_string(),
                });
            }
            None => {
                sink.send_stream_end().await?;
                return Ok(RelayOutcome::Completed { chunks });
            }
        };

        match event {
            VoiceStreamEvent::AudioChunk(samples) => {
                if samples.is_empty() {
                    continue;
                }
                if cancel.is_cancelled() {
                    log::info!("⏹️  Relay cancelled after {} chunk(s)", chunks);
                    return Ok(RelayOutcome::Cancelled { chunks });
                }
                sink.send_audio(&samples).await?;
                chunks += 1;
            }
            VoiceStreamEvent::Lifecycle(event) => {
                log::debug!("Lifecycle event: {}", event);
                sink.send_lifecycle(event).await?;
            }
            VoiceStreamEvent::Error(cause) => {
                log::error!("❌ Pipeline reported an error: {}", cause);
                sink.send_error(&format!("Agent processing failed: {}", cause))
                    .await?;
                return Ok(RelayOutcome::Errored { chunks, cause });
            }
            VoiceStreamEvent::StreamEnd => {
                sink.send_stream_end().await?;
                return Ok(RelayOutcome::Completed { chunks });
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingAgent,
    Streaming,
    Completed,
    Cancelled,
    Errored,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, AwaitingAgent)
                | (AwaitingAgent, Streaming)
                | (AwaitingAgent, Cancelled)
                | (AwaitingAgent, Errored)
                | (Streaming, Completed)
                | (Streaming, Cancelled)
                | (Streaming, Errored)
                | (Completed, Idle)
                | (Cancelled, Idle)
                | (Errored, Idle)
        )
    }

    pub fn is_busy(self) -> bool {
        matches!(self, SessionState::AwaitingAgent | SessionState::Streaming)
    }
}

#[derive(Debug, Default)]
struct SessionInner {
    state: SessionState,
    cancel: Option<CancellationToken>,
}

/// Per-client state. Lives as long as the connection; resets per request.
#[derive(Debug)]
pub struct Session {
    client_id: String,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            inner: Mutex::new(SessionInner::default()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Cancel the request in flight. Returns whether there was one.
    pub fn stop(&self) -> bool {
        let inner = self.lock();
        match &inner.cancel {
            Some(token) if inner.state.is_busy() => {
                token.cancel();
                log::info!("🛑 Stop requested by {}", self.client_id);
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, next: SessionState) {
        let mut inner = self.lock();
        if inner.state.can_transition_to(next) {
            log::debug!("[{}] {} → {}", self.client_id, inner.state, next);
            inner.state = next;
        } else {
            log::warn!(
                "[{}] Ignoring invalid transition {} → {}",
                self.client_id,
                inner.state,
                next
            );
        }
    }

    fn begin_request(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut inner = self.lock();
        if inner.state != SessionState::Idle {
            log::warn!("[{}] Request started while {}", self.client_id, inner.state);
        }
        inner.state = SessionState::AwaitingAgent;
        inner.cancel = Some(token.clone());
        token
    }

    fn finish(&self, terminal: SessionState) {
        self.transition(terminal);
        let mut inner = self.lock();
        inner.cancel = None;
        inner.state = SessionState::Idle;
    }
}

pub struct RequestHandler {
    manager: Arc<ConnectorLifecycleManager>,
    pipeline: Arc<dyn VoicePipeline>,
    sample_rate: u32,
}

impl RequestHandler {
    pub fn new(manager: Arc<ConnectorLifecycleManager>, pipeline: Arc<dyn VoicePipeline>) -> Self {
        Self {
            manager,
            pipeline,
            sample_rate: PIPELINE_SAMPLE_RATE,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectorLifecycleManager> {
        &self.manager
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current agent, refreshing once if none is published
    pub async fn ensure_agent(&self) -> Option<Arc<AgentDescriptor>> {
        if let Some(agent) = self.manager.current_agent() {
            return Some(agent);
        }
        log::info!("Agent not initialized, attempting refresh...");
        self.manager.refresh().await;
        self.manager.current_agent()
    }

    /// Handle one encoded audio blob from a client
    pub async fn handle_audio(
        &self,
        session: &Session,
        bytes: Vec<u8>,
        sink: &mut dyn RelaySink,
    ) -> Result<RelayOutcome, AgentError> {
        log::info!("📥 [{}] Received {} bytes of audio", session.client_id(), bytes.len());
        let cancel = session.begin_request();
        let result = self.process_audio(session, bytes, sink, &cancel).await;
        Self::finish(session, &result);
        result
    }

    /// Handle audio that is already mono PCM at the pipeline rate
    pub async fn handle_pcm(
        &self,
        session: &Session,
        pcm: PcmAudio,
        sink: &mut dyn RelaySink,
    ) -> Result<RelayOutcome, AgentError> {
        let cancel = session.begin_request();
        let result = match self.require_agent(sink).await {
            Ok(Some(agent)) => self.run(session, agent, pcm, sink, &cancel).await,
            Ok(None) => Ok(Self::not_ready()),
            Err(e) => Err(e),
        };
        Self::finish(session, &result);
        result
    }

    async fn process_audio(
        &self,
        session: &Session,
        bytes: Vec<u8>,
        sink: &mut dyn RelaySink,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, AgentError> {
        let Some(agent) = self.require_agent(sink).await? else {
            return Ok(Self::not_ready());
        };

        let rate = self.sample_rate;
        let decoded = tokio::task::spawn_blocking(move || normalize(&bytes, rate))
            .await
            .unwrap_or_else(|e| Err(AudioError::Decode(format!("decoder task failed: {}", e))));

        let pcm = match decoded {
            Ok(pcm) => pcm,
            Err(e) => {
                log::error!("❌ [{}] Failed to decode audio: {}", session.client_id(), e);
                sink.send_error(&format!("Failed to process audio: {}", e))
                    .await?;
                return Ok(RelayOutcome::Errored {
                    chunks: 0,
                    cause: e.to_string(),
                });
            }
        };

        log::info!(
            "🎵 [{}] Decoded {:.2}s of audio",
            session.client_id(),
            pcm.duration_secs()
        );
        self.run(session, agent, pcm, sink, cancel).await
    }

    /// Reports "not ready" to the sink and returns `None` when no agent
    /// could be obtained
    async fn require_agent(
        &self,
        sink: &mut dyn RelaySink,
    ) -> Result<Option<Arc<AgentDescriptor>>, AgentError> {
        let agent = self.ensure_agent().await;
        if agent.is_none() {
            log::error!("❌ {}", NOT_READY_MESSAGE);
            sink.send_error(NOT_READY_MESSAGE).await?;
        }
        Ok(agent)
    }

    fn not_ready() -> RelayOutcome {
        RelayOutcome::Errored {
            chunks: 0,
            cause: AgentError::NotReady.to_string(),
        }
    }

    async fn run(
        &self,
        session: &Session,
        agent: Arc<AgentDescriptor>,
        pcm: PcmAudio,
        sink: &mut dyn RelaySink,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, AgentError> {
        if cancel.is_cancelled() {
            return Ok(RelayOutcome::Cancelled { chunks: 0 });
        }

        let stream = match self.pipeline.run(pcm, agent).await {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("❌ [{}] Pipeline failed to start: {}", session.client_id(), e);
                sink.send_error(&format!("Agent processing failed: {}", e))
                    .await?;
                return Ok(RelayOutcome::Errored {
                    chunks: 0,
                    cause: e.to_string(),
                });
            }
        };

        session.transition(SessionState::Streaming);
        let outcome = relay_events(stream, sink, cancel).await?;
        log::info!(
            "📤 [{}] Relayed {} chunk(s): {:?}",
            session.client_id(),
            outcome.chunks(),
            outcome
        );
        Ok(outcome)
    }

    fn finish(session: &Session, result: &Result<RelayOutcome, AgentError>) {
        let terminal = match result {
            Ok(outcome) => outcome.terminal_state(),
            Err(_) => SessionState::Errored,
        };
        session.finish(terminal);
    }
}

/// Sink that buffers everything, for front-ends that answer in one piece
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub samples: Vec<i16>,
    pub chunks: usize,
    pub lifecycle: Vec<LifecycleEvent>,
    pub errors: Vec<String>,
    pub stream_ends: usize,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelaySink for CollectingSink {
    async fn send_audio(&mut self, samples: &[i16]) -> Result<(), AgentError> {
        self.samples.extend_from_slice(samples);
        self.chunks += 1;
        Ok(())
    }

    async fn send_lifecycle(&mut self, event: LifecycleEvent) -> Result<(), AgentError> {
        self.lifecycle.push(event);
        Ok(())
    }

    async fn send_stream_end(&mut self) -> Result<(), AgentError> {
        self.stream_ends += 1;
        Ok(())
    }

    async fn send_error(&mut self, message: &str) -> Result<(), AgentError> {
        self.errors.push(message.to_string());
        Ok(())
    }
}
