#![allow(dead_code)]

use agent_voice_rs::agent::{AgentDescriptor, AgentTemplate, Tool};
use agent_voice_rs::audio::PcmAudio;
use agent_voice_rs::connector::{ConnectionState, Connector, ConnectorError, ConnectorFactory};
use agent_voice_rs::lifecycle::{ConnectorLifecycleManager, LifecycleConfig};
use agent_voice_rs::pipeline::{
    LifecycleEvent, PipelineError, VoiceEventStream, VoicePipeline, VoiceStreamEvent,
};
use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Emits a fixed turn: N chunks between turn lifecycle events
pub struct ScriptedPipeline {
    pub chunks: usize,
    pub chunk_len: usize,
    pub delay: Duration,
    pub runs: AtomicUsize,
}

impl ScriptedPipeline {
    pub fn new(chunks: usize, chunk_len: usize) -> Self {
        Self {
            chunks,
            chunk_len,
            delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl VoicePipeline for ScriptedPipeline {
    async fn run(
        &self,
        input: PcmAudio,
        _agent: Arc<AgentDescriptor>,
    ) -> Result<VoiceEventStream, PipelineError> {
        if input.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        self.runs.fetch_add(1, Ordering::SeqCst);

        Ok(Box::pin(script(self.chunks, self.chunk_len, self.delay)))
    }
}

fn script(
    chunks: usize,
    chunk_len: usize,
    delay: Duration,
) -> impl Stream<Item = Result<VoiceStreamEvent, PipelineError>> + Send {
    async_stream::stream! {
        yield Ok(VoiceStreamEvent::Lifecycle(LifecycleEvent::TurnStarted));
        for i in 0..chunks {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            yield Ok(VoiceStreamEvent::AudioChunk(vec![i as i16; chunk_len]));
        }
        yield Ok(VoiceStreamEvent::Lifecycle(LifecycleEvent::TurnEnded));
        yield Ok(VoiceStreamEvent::Lifecycle(LifecycleEvent::SessionEnded));
        yield Ok(VoiceStreamEvent::StreamEnd);
    }
}

/// Shared record of connector activity across handles
#[derive(Default)]
pub struct Ledger {
    pub events: Mutex<Vec<String>>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub created: AtomicUsize,
    pub handles: Mutex<Vec<Arc<RecordingConnector>>>,
}

impl Ledger {
    pub fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn handle(&self, index: usize) -> Arc<RecordingConnector> {
        Arc::clone(&self.handles.lock().unwrap()[index])
    }
}

pub struct RecordingConnector {
    id: usize,
    url: String,
    fail: bool,
    connect_delay: Duration,
    state: Mutex<ConnectionState>,
    ledger: Arc<Ledger>,
}

impl RecordingConnector {
    /// Simulate the remote end dropping the session
    pub fn lose_session(&self) {
        self.ledger.record(format!("lost:{}", self.id));
        *self.state.lock().unwrap() = ConnectionState::Failed;
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    fn endpoint_url(&self) -> &str {
        &self.url
    }

    fn display_name(&self) -> &str {
        "RecordingServer"
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    fn tools(&self) -> Vec<Tool> {
        vec![Tool::remote("create_task", "Create a task", "RecordingServer")]
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        let active = self.ledger.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger.max_active.fetch_max(active, Ordering::SeqCst);
        self.ledger.record(format!("connect:{}", self.id));
        *self.state.lock().unwrap() = ConnectionState::Connecting;

        tokio::time::sleep(self.connect_delay).await;
        self.ledger.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            *self.state.lock().unwrap() = ConnectionState::Failed;
            return Err(ConnectorError::Handshake("unreachable".to_string()));
        }
        *self.state.lock().unwrap() = ConnectionState::Connected;
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), ConnectorError> {
        self.ledger.record(format!("cleanup:{}", self.id));
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
        Ok(())
    }

    async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<Value, ConnectorError> {
        Ok(Value::Bool(true))
    }
}

pub struct RecordingFactory {
    pub ledger: Arc<Ledger>,
    pub fail: bool,
    pub connect_delay: Duration,
}

impl RecordingFactory {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            fail: false,
            connect_delay: Duration::from_millis(20),
        }
    }
}

impl ConnectorFactory for RecordingFactory {
    fn create(&self, endpoint_url: &str) -> Arc<dyn Connector> {
        let id = self.ledger.created.fetch_add(1, Ordering::SeqCst) + 1;
        let connector = Arc::new(RecordingConnector {
            id,
            url: endpoint_url.to_string(),
            fail: self.fail,
            connect_delay: self.connect_delay,
            state: Mutex::new(ConnectionState::Disconnected),
            ledger: Arc::clone(&self.ledger),
        });
        self.ledger.handles.lock().unwrap().push(Arc::clone(&connector));
        connector
    }
}

pub fn manager_with(
    url: Option<&str>,
    template: AgentTemplate,
    factory: Arc<dyn ConnectorFactory>,
) -> Arc<ConnectorLifecycleManager> {
    Arc::new(ConnectorLifecycleManager::new(
        LifecycleConfig {
            endpoint_url: url.map(str::to_string),
            connect_timeout: None,
        },
        template,
        factory,
    ))
}

pub fn manager(url: Option<&str>) -> Arc<ConnectorLifecycleManager> {
    manager_with(
        url,
        AgentTemplate::voice_assistant("gpt-4o-mini"),
        Arc::new(RecordingFactory::new(Arc::new(Ledger::default()))),
    )
}

/// A short 24kHz tone, WAV encoded
pub fn tone_wav(secs: f32) -> Vec<u8> {
    let rate = 24_000;
    let samples: Vec<i16> = (0..(rate as f32 * secs) as usize)
        .map(|i| ((i as f32 * 0.1).sin() * 6000.0) as i16)
        .collect();
    agent_voice_rs::audio::encode_wav(&samples, rate).unwrap()
}
