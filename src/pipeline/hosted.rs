use super::{LifecycleEvent, PipelineError, VoiceEventStream, VoicePipeline, VoiceStreamEvent};
use crate::agent::{tool_definitions, AgentDescriptor};
use crate::audio::{encode_wav, pcm_from_le_bytes, PcmAudio};
use crate::config::{AppConfig, DEFAULT_BASE_URL, DEFAULT_VOICE};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{multipart, Client};
use secrecy::{ExposeSecret, SecretBox};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct HostedPipelineConfig {
    pub api_key: SecretBox<String>,
    pub base_url: String,
    pub stt_model: String,
    pub tts_model: String,
    pub voice: String,
    /// Speaking style passed to speech synthesis
    pub tts_instructions: Option<String>,
    /// Longest wait for the next bytes of any response
    pub read_timeout: Duration,
}

impl HostedPipelineConfig {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: SecretBox::new(Box::new(api_key.to_string())),
            base_url: DEFAULT_BASE_URL.to_string(),
            stt_model: "gpt-4o-transcribe".to_string(),
            tts_model: "gpt-4o-mini-tts".to_string(),
            voice: DEFAULT_VOICE.to_string(),
            tts_instructions: None,
            read_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            voice: config.voice.clone(),
            ..Self::new(config.openai_key())
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_tts_instructions(mut self, instructions: &str) -> Self {
        self.tts_instructions = Some(instructions.to_string());
        self
    }
}

/// Speech-to-text, one model response (plus at most one tool follow-up) and
/// streamed speech synthesis against an OpenAI-compatible HTTP API.
pub struct HostedVoicePipeline {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    config: HostedPipelineConfig,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ModelResponse {
    id: String,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    OutputText {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl ModelResponse {
    fn text(&self) -> String {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Message { content } => Some(content),
                _ => None,
            })
            .flatten()
            .filter_map(|part| match part {
                ContentPart::OutputText { text } => Some(text.as_str()),
                ContentPart::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    fn function_calls(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.output.iter().filter_map(|item| match item {
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => Some((call_id.as_str(), name.as_str(), arguments.as_str())),
            _ => None,
        })
    }
}

impl HostedVoicePipeline {
    pub fn new(config: HostedPipelineConfig) -> Result<Self, PipelineError> {
        // No total deadline: speech streams for as long as the reply lasts
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(config.read_timeout)
            .build()?;
        Ok(Self {
            inner: Arc::new(Inner { client, config }),
        })
    }
}

impl Inner {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, PipelineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(PipelineError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn transcribe(&self, input: &PcmAudio) -> Result<String, PipelineError> {
        let wav = encode_wav(&input.samples, input.sample_rate)?;
        let file = multipart::Part::bytes(wav)
            .file_name("input.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new()
            .text("model", self.config.stt_model.clone())
            .part("file", file);

        let response = self
            .client
            .post(self.url("audio/transcriptions"))
            .bearer_auth(self.config.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        let transcription: TranscriptionResponse = Self::check(response).await?.json().await?;
        Ok(transcription.text.trim().to_string())
    }

    async fn respond(&self, body: Value) -> Result<ModelResponse, PipelineError> {
        let response = self
            .client
            .post(self.url("responses"))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let text = Self::check(response).await?.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| PipelineError::Parse(format!("invalid model response: {}", e)))
    }

    /// One model response; if it asks for tools, run each call once and ask
    /// for exactly one follow-up.
    async fn reply(&self, agent: &AgentDescriptor, transcript: &str) -> Result<String, PipelineError> {
        let tools = tool_definitions(
            &agent
                .available_tools()
                .into_iter()
                .cloned()
                .collect::<Vec<_>>(),
        );

        let first = self
            .respond(json!({
                "model": agent.model_id,
                "instructions": agent.instructions,
                "input": transcript,
                "tools": tools,
            }))
            .await?;

        let mut outputs = Vec::new();
        for (call_id, name, arguments) in first.function_calls() {
            let output = self.call_tool(agent, name, arguments).await;
            outputs.push(json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            }));
        }

        if outputs.is_empty() {
            return Ok(first.text());
        }

        let follow_up = self
            .respond(json!({
                "model": agent.model_id,
                "instructions": agent.instructions,
                "previous_response_id": first.id,
                "input": outputs,
                "tools": tools,
            }))
            .await?;
        Ok(follow_up.text())
    }

    /// Tool failures are handed back to the model as text
    async fn call_tool(&self, agent: &AgentDescriptor, name: &str, arguments: &str) -> String {
        let Some(binding) = agent.connector_for(name) else {
            log::warn!("Model requested unknown tool '{}'", name);
            return json!({"error": format!("Unknown tool: {}", name)}).to_string();
        };

        let arguments: Value = match serde_json::from_str(arguments) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Invalid arguments for '{}': {}", name, e);
                return json!({"error": format!("Invalid arguments: {}", e)}).to_string();
            }
        };

        match binding.call_tool(name, arguments).await {
            Ok(result) => result.to_string(),
            Err(e) => {
                log::error!("Tool '{}' failed: {}", name, e);
                json!({"error": e.to_string()}).to_string()
            }
        }
    }

    async fn synthesize(&self, text: &str) -> Result<reqwest::Response, PipelineError> {
        let mut body = json!({
            "model": self.config.tts_model,
            "voice": self.config.voice,
            "input": text,
            "response_format": "pcm",
        });
        if let Some(instructions) = &self.config.tts_instructions {
            body["instructions"] = json!(instructions);
        }

        let response = self
            .client
            .post(self.url("audio/speech"))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        Self::check(response).await
    }
}

#[async_trait]
impl VoicePipeline for HostedVoicePipeline {
    async fn run(
        &self,
        input: PcmAudio,
        agent: Arc<AgentDescriptor>,
    ) -> Result<VoiceEventStream, PipelineError> {
        if input.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        Ok(Box::pin(turn(Arc::clone(&self.inner), input, agent)))
    }
}

/// One conversational turn, performed lazily as the stream is polled
fn turn(
    inner: Arc<Inner>,
    input: PcmAudio,
    agent: Arc<AgentDescriptor>,
) -> impl Stream<Item = Result<VoiceStreamEvent, PipelineError>> + Send {
    try_stream! {
        let transcript = inner.transcribe(&input).await?;
        if transcript.is_empty() {
            log::info!("Empty transcript, nothing to answer");
            yield VoiceStreamEvent::Lifecycle(LifecycleEvent::SessionEnded);
            yield VoiceStreamEvent::StreamEnd;
            return;
        }
        log::info!("🗣️  Transcript: {}", transcript);

        yield VoiceStreamEvent::Lifecycle(LifecycleEvent::TurnStarted);

        let text = inner.reply(&agent, &transcript).await?;
        log::info!("🤖 {}: {}", agent.name, text);

        if !text.trim().is_empty() {
            let response = inner.synthesize(&text).await?;
            let mut bytes = response.bytes_stream();
            let mut carry: Option<u8> = None;

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk?;
                let mut samples = Vec::with_capacity(chunk.len() / 2 + 1);
                let mut data = chunk.as_ref();

                if let Some(low) = carry.take() {
                    if let Some((&high, rest)) = data.split_first() {
                        samples.push(i16::from_le_bytes([low, high]));
                        data = rest;
                    } else {
                        carry = Some(low);
                    }
                }

                samples.extend(pcm_from_le_bytes(data));
                if data.len() % 2 == 1 {
                    carry = data.last().copied();
                }

                if !samples.is_empty() {
                    yield VoiceStreamEvent::AudioChunk(samples);
                }
            }
        }

        yield VoiceStreamEvent::Lifecycle(LifecycleEvent::TurnEnded);
        yield VoiceStreamEvent::Lifecycle(LifecycleEvent::SessionEnded);
        yield VoiceStreamEvent::StreamEnd;
    }
}
