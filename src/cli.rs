//! Terminal front-end: push-to-talk loop, or one-shot WAV file processing.

use crate::audio::{encode_wav, PcmAudio};
use crate::audio_sink::Speaker;
use crate::audio_source::Microphone;
use crate::error::AgentError;
use crate::pipeline::LifecycleEvent;
use crate::relay::{CollectingSink, RelayOutcome, RelaySink, RequestHandler, Session};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Default)]
pub struct TalkOptions {
    /// Process this audio file once instead of recording
    pub input: Option<PathBuf>,
    /// Write replies here instead of playing them
    pub output: Option<PathBuf>,
}

/// Collects the reply and echoes lifecycle events to the terminal
#[derive(Default)]
struct TerminalSink {
    collected: CollectingSink,
}

#[async_trait]
impl RelaySink for TerminalSink {
    async fn send_audio(&mut self, samples: &[i16]) -> Result<(), AgentError> {
        self.collected.send_audio(samples).await
    }

    async fn send_lifecycle(&mut self, event: LifecycleEvent) -> Result<(), AgentError> {
        println!("[lifecycle] {}", event);
        self.collected.send_lifecycle(event).await
    }

    async fn send_stream_end(&mut self) -> Result<(), AgentError> {
        self.collected.send_stream_end().await
    }

    async fn send_error(&mut self, message: &str) -> Result<(), AgentError> {
        eprintln!("❌ {}", message);
        self.collected.send_error(message).await
    }
}

pub async fn run(handler: Arc<RequestHandler>, options: TalkOptions) -> Result<(), AgentError> {
    if handler.ensure_agent().await.is_none() {
        eprintln!("⚠️  Agent is not ready yet, will retry on first request");
    }

    let session = Session::new("terminal");

    if let Some(input) = &options.input {
        let bytes = tokio::fs::read(input).await?;
        println!("📂 Processing {}", input.display());
        let reply = respond(&handler, &session, Request::Encoded(bytes)).await?;
        return deliver(reply, options.output.as_ref()).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("\nPress Enter to start recording (type 'esc' then Enter to exit)...");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().eq_ignore_ascii_case("esc") {
            println!("Exiting...");
            break;
        }

        let pcm = match record(&mut lines, handler.sample_rate()).await {
            Ok(pcm) => pcm,
            Err(e) => {
                eprintln!("❌ Recording failed: {}", e);
                continue;
            }
        };
        if pcm.is_empty() {
            println!("No audio recorded.");
            continue;
        }

        let reply = respond(&handler, &session, Request::Pcm(pcm)).await?;
        deliver(reply, options.output.as_ref()).await?;
    }

    Ok(())
}

enum Request {
    Encoded(Vec<u8>),
    Pcm(PcmAudio),
}

async fn respond(
    handler: &RequestHandler,
    session: &Session,
    request: Request,
) -> Result<Option<PcmAudio>, AgentError> {
    let mut sink = TerminalSink::default();
    let outcome = match request {
        Request::Encoded(bytes) => handler.handle_audio(session, bytes, &mut sink).await?,
        Request::Pcm(pcm) => handler.handle_pcm(session, pcm, &mut sink).await?,
    };

    match outcome {
        RelayOutcome::Completed { chunks } => {
            log::info!("Reply complete: {} chunk(s)", chunks);
            Ok(Some(PcmAudio::new(sink.collected.samples, handler.sample_rate())))
        }
        RelayOutcome::Cancelled { .. } | RelayOutcome::Errored { .. } => Ok(None),
    }
}

async fn record(
    lines: &mut Lines<BufReader<Stdin>>,
    sample_rate: u32,
) -> Result<PcmAudio, AgentError> {
    let (stop_tx, stop_rx) = oneshot::channel();
    let recording = tokio::task::spawn_blocking(move || {
        Microphone::open(sample_rate)?.record_until(stop_rx)
    });

    println!("🎙️  Recording... press Enter to stop.");
    lines.next_line().await?;
    let _ = stop_tx.send(());

    recording
        .await
        .map_err(|e| AgentError::Agent(format!("recording task failed: {}", e)))?
        .map_err(AgentError::from)
}

async fn deliver(reply: Option<PcmAudio>, output: Option<&PathBuf>) -> Result<(), AgentError> {
    let Some(reply) = reply else {
        return Ok(());
    };
    if reply.is_empty() {
        println!("(no spoken reply)");
        return Ok(());
    }

    match output {
        Some(path) => {
            let wav = encode_wav(&reply.samples, reply.sample_rate)?;
            tokio::fs::write(path, wav).await?;
            println!("💾 Reply written to {}", path.display());
        }
        None => {
            tokio::task::spawn_blocking(move || Speaker::open()?.play(&reply))
                .await
                .map_err(|e| AgentError::Agent(format!("playback task failed: {}", e)))??;
        }
    }
    Ok(())
}
