mod common;

use agent_voice_rs::agent::AgentTemplate;
use agent_voice_rs::audio::PcmAudio;
use agent_voice_rs::error::AgentError;
use agent_voice_rs::pipeline::LifecycleEvent;
use agent_voice_rs::relay::{
    CollectingSink, RelayOutcome, RelaySink, RequestHandler, Session, SessionState,
};
use async_trait::async_trait;
use common::{manager, manager_with, tone_wav, Ledger, RecordingFactory, ScriptedPipeline};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use test_log::test;

/// Stops the session after a given number of audio chunks, or as soon as the
/// turn starts when the limit is zero
struct StoppingSink {
    session: Arc<Session>,
    stop_after: usize,
    inner: CollectingSink,
}

impl StoppingSink {
    fn new(session: Arc<Session>, stop_after: usize) -> Self {
        Self {
            session,
            stop_after,
            inner: CollectingSink::new(),
        }
    }
}

#[async_trait]
impl RelaySink for StoppingSink {
    async fn send_audio(&mut self, samples: &[i16]) -> Result<(), AgentError> {
        self.inner.send_audio(samples).await?;
        if self.inner.chunks == self.stop_after {
            assert!(self.session.stop());
        }
        Ok(())
    }

    async fn send_lifecycle(&mut self, event: LifecycleEvent) -> Result<(), AgentError> {
        if event == LifecycleEvent::TurnStarted && self.stop_after == 0 {
            assert!(self.session.stop());
        }
        self.inner.send_lifecycle(event).await
    }

    async fn send_stream_end(&mut self) -> Result<(), AgentError> {
        self.inner.send_stream_end().await
    }

    async fn send_error(&mut self, message: &str) -> Result<(), AgentError> {
        self.inner.send_error(message).await
    }
}

fn handler(chunks: usize) -> RequestHandler {
    RequestHandler::new(manager(None), Arc::new(ScriptedPipeline::new(chunks, 240)))
}

#[test(tokio::test)]
async fn test_uninitialized_agent_is_refreshed_on_first_request() {
    let handler = handler(3);
    assert!(!handler.manager().is_initialized());

    let session = Session::new("test");
    let mut sink = CollectingSink::new();
    let outcome = handler
        .handle_audio(&session, tone_wav(0.2), &mut sink)
        .await
        .unwrap();

    assert_eq!(outcome, RelayOutcome::Completed { chunks: 3 });
    assert!(handler.manager().is_initialized());
    assert_eq!(sink.chunks, 3);
    assert_eq!(sink.samples.len(), 720);
    assert_eq!(sink.stream_ends, 1);
    assert!(sink.errors.is_empty());
    assert_eq!(session.state(), SessionState::Idle);
}

#[test(tokio::test)]
async fn test_cancel_before_any_chunk() {
    let handler = handler(5);
    let session = Arc::new(Session::new("test"));
    let mut sink = StoppingSink::new(Arc::clone(&session), 0);

    let outcome = handler
        .handle_pcm(&session, PcmAudio::new(vec![1; 480], 24_000), &mut sink)
        .await
        .unwrap();

    assert_eq!(outcome, RelayOutcome::Cancelled { chunks: 0 });
    assert_eq!(sink.inner.chunks, 0);
    assert_eq!(sink.inner.stream_ends, 0);
    assert!(sink.inner.errors.is_empty());
}

#[test(tokio::test)]
async fn test_cancel_after_n_chunks() {
    for n in 1..=3 {
        let handler = handler(10);
        let session = Arc::new(Session::new("test"));
        let mut sink = StoppingSink::new(Arc::clone(&session), n);

        let outcome = handler
            .handle_pcm(&session, PcmAudio::new(vec![1; 480], 24_000), &mut sink)
            .await
            .unwrap();

        assert_eq!(outcome, RelayOutcome::Cancelled { chunks: n });
        assert_eq!(sink.inner.chunks, n);
        assert_eq!(sink.inner.stream_ends, 0);
        assert!(sink.inner.errors.is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }
}

#[test(tokio::test)]
async fn test_stop_does_not_leak_into_next_request() {
    let handler = handler(4);
    let session = Arc::new(Session::new("test"));

    let mut stopping = StoppingSink::new(Arc::clone(&session), 1);
    handler
        .handle_pcm(&session, PcmAudio::new(vec![1; 480], 24_000), &mut stopping)
        .await
        .unwrap();

    let mut sink = CollectingSink::new();
    let outcome = handler
        .handle_pcm(&session, PcmAudio::new(vec![1; 480], 24_000), &mut sink)
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Completed { chunks: 4 });
}

#[test(tokio::test)]
async fn test_undecodable_audio_reports_error() {
    let pipeline = Arc::new(ScriptedPipeline::new(2, 10));
    let handler = RequestHandler::new(manager(None), pipeline.clone());
    let session = Session::new("test");
    let mut sink = CollectingSink::new();

    let outcome = handler
        .handle_audio(&session, b"definitely not audio".to_vec(), &mut sink)
        .await
        .unwrap();

    assert!(matches!(outcome, RelayOutcome::Errored { chunks: 0, .. }));
    assert_eq!(sink.errors.len(), 1);
    assert!(sink.errors[0].starts_with("Failed to process audio"));
    assert_eq!(sink.stream_ends, 0);
    assert_eq!(pipeline.runs.load(Ordering::SeqCst), 0);
}

#[test(tokio::test)]
async fn test_agent_not_ready_reports_error() {
    let handler = RequestHandler::new(
        manager_with(
            None,
            AgentTemplate::voice_assistant(""),
            Arc::new(RecordingFactory::new(Arc::new(Ledger::default()))),
        ),
        Arc::new(ScriptedPipeline::new(2, 10)),
    );
    let session = Session::new("test");
    let mut sink = CollectingSink::new();

    let outcome = handler
        .handle_audio(&session, tone_wav(0.1), &mut sink)
        .await
        .unwrap();

    assert!(matches!(outcome, RelayOutcome::Errored { .. }));
    assert_eq!(sink.errors, vec!["Agent not ready".to_string()]);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test(tokio::test)]
async fn test_pipeline_start_failure_reports_error() {
    let handler = handler(2);
    let session = Session::new("test");
    let mut sink = CollectingSink::new();

    // The scripted pipeline refuses empty input
    let outcome = handler
        .handle_pcm(&session, PcmAudio::new(Vec::new(), 24_000), &mut sink)
        .await
        .unwrap();

    assert!(matches!(outcome, RelayOutcome::Errored { .. }));
    assert_eq!(sink.errors.len(), 1);
    assert!(sink.errors[0].starts_with("Agent processing failed"));
}
