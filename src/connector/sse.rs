//! Connector speaking the MCP HTTP+SSE transport.
//!
//! The endpoint URL serves a server-sent event stream. The first `endpoint`
//! event names the URL that JSON-RPC requests are POSTed to; replies arrive
//! back on the event stream as `message` events and are matched by id.

use super::{ConnectionState, Connector, ConnectorError, ConnectorFactory};
use crate::agent::Tool;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

const PROTOCOL_VERSION: &str = "2024-11-05";
// Replies may race ahead of their request, but only by a few
const MAX_UNCLAIMED: usize = 32;

type RpcReply = Result<Value, (i64, String)>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Parse one blank-line-terminated SSE block.
pub(crate) fn parse_sse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }

    Some(SseEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}

/// Split every complete event off the front of `buffer`, leaving any partial tail.
pub(crate) fn drain_events(buffer: &mut Vec<u8>) -> Vec<SseEvent> {
    let mut events = Vec::new();
    while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
        let block: Vec<u8> = buffer.drain(..pos + 2).collect();
        if let Some(event) = parse_sse_block(&String::from_utf8_lossy(&block)) {
            events.push(event);
        }
    }
    events
}

#[derive(Default)]
struct SessionShared {
    state: ConnectionState,
    cleaned: bool,
    messages_url: Option<Url>,
    tools: Vec<Tool>,
    pending: HashMap<u64, oneshot::Sender<RpcReply>>,
    // Replies that arrived before their request was registered
    unclaimed: HashMap<u64, RpcReply>,
    stream_closed: bool,
    endpoint_tx: Option<oneshot::Sender<String>>,
    reader: Option<JoinHandle<()>>,
}

fn lock(shared: &Mutex<SessionShared>) -> MutexGuard<'_, SessionShared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SseConnector {
    endpoint_url: String,
    display_name: String,
    client: Client,
    shared: Arc<Mutex<SessionShared>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl SseConnector {
    pub fn new(endpoint_url: &str, display_name: &str) -> Self {
        Self::with_client(Client::new(), endpoint_url, display_name)
    }

    pub fn with_client(client: Client, endpoint_url: &str, display_name: &str) -> Self {
        Self {
            endpoint_url: endpoint_url.to_string(),
            display_name: display_name.to_string(),
            client,
            shared: Arc::new(Mutex::new(SessionShared::default())),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        lock(&self.shared).state = state;
    }

    async fn handshake(&self) -> Result<Vec<Tool>, ConnectorError> {
        let response = self
            .client
            .get(&self.endpoint_url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ConnectorError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        lock(&self.shared).endpoint_tx = Some(endpoint_tx);

        let reader = tokio::spawn(read_events(
            response,
            Arc::clone(&self.shared),
            self.shutdown.clone(),
        ));
        lock(&self.shared).reader = Some(reader);

        let endpoint = endpoint_rx.await.map_err(|_| {
            ConnectorError::Handshake("event stream closed before announcing an endpoint".to_string())
        })?;
        let messages_url = Url::parse(&self.endpoint_url)?.join(&endpoint)?;
        log::debug!("🔌 {} message endpoint: {}", self.display_name, messages_url);
        lock(&self.shared).messages_url = Some(messages_url);

        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        )
        .await?;
        self.notify("notifications/initialized").await?;

        let listed = self.request("tools/list", json!({})).await?;
        Ok(parse_tools(&listed, &self.display_name))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ConnectorError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        let (messages_url, early) = {
            let mut shared = lock(&self.shared);
            let url = shared
                .messages_url
                .clone()
                .ok_or(ConnectorError::NotConnected)?;
            let early = shared.unclaimed.remove(&id);
            if early.is_none() {
                if shared.stream_closed {
                    return Err(ConnectorError::StreamClosed);
                }
                shared.pending.insert(id, tx);
            }
            (url, early)
        };

        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        if let Err(e) = self.post(&messages_url, &body).await {
            lock(&self.shared).pending.remove(&id);
            return Err(e);
        }

        let reply = match early {
            Some(reply) => reply,
            None => rx.await.map_err(|_| ConnectorError::StreamClosed)?,
        };
        reply.map_err(|(code, message)| ConnectorError::Rpc { code, message })
    }

    async fn notify(&self, method: &str) -> Result<(), ConnectorError> {
        let messages_url = lock(&self.shared)
            .messages_url
            .clone()
            .ok_or(ConnectorError::NotConnected)?;
        self.post(&messages_url, &json!({"jsonrpc": "2.0", "method": method}))
            .await
    }

    async fn post(&self, url: &Url, body: &Value) -> Result<(), ConnectorError> {
        let response = self.client.post(url.clone()).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ConnectorError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

impl Drop for SseConnector {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Connector for SseConnector {
    fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn state(&self) -> ConnectionState {
        lock(&self.shared).state
    }

    fn tools(&self) -> Vec<Tool> {
        lock(&self.shared).tools.clone()
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        self.set_state(ConnectionState::Connecting);
        log::info!("🔌 Connecting to {}...", self.display_name);

        match self.handshake().await {
            Ok(tools) => {
                let mut shared = lock(&self.shared);
                if shared.stream_closed {
                    shared.state = ConnectionState::Failed;
                    return Err(ConnectorError::StreamClosed);
                }
                log::info!(
                    "🔌 {} connected ({} tools available)",
                    self.display_name,
                    tools.len()
                );
                shared.tools = tools;
                shared.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.shutdown.cancel();
                self.set_state(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    async fn cleanup(&self) -> Result<(), ConnectorError> {
        let reader = {
            let mut shared = lock(&self.shared);
            if shared.cleaned {
                return Err(ConnectorError::AlreadyClosed);
            }
            shared.cleaned = true;
            shared.state = ConnectionState::Disconnected;
            shared.messages_url = None;
            shared.pending.clear();
            shared.reader.take()
        };

        self.shutdown.cancel();
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                if !e.is_cancelled() {
                    log::warn!("🔌 {} event reader ended abnormally: {}", self.display_name, e);
                }
            }
        }

        log::info!("🔌 {} connection closed", self.display_name);
        Ok(())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ConnectorError> {
        if self.state() != ConnectionState::Connected {
            return Err(ConnectorError::NotConnected);
        }
        log::info!("🛠️  Calling {} on {}", name, self.display_name);
        self.request("tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }
}

async fn read_events(
    response: reqwest::Response,
    shared: Arc<Mutex<SessionShared>>,
    shutdown: CancellationToken,
) {
    let mut stream = response.bytes_stream();
    let mut buffer = Vec::new();

    loop {
        let chunk = tokio::select! {
            _ = shutdown.cancelled() => break,
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
                for event in drain_events(&mut buffer) {
                    dispatch(&shared, event);
                }
            }
            Some(Err(e)) => {
                log::warn!("🔌 Connector event stream error: {}", e);
                break;
            }
            None => break,
        }
    }

    let mut state = lock(&shared);
    state.stream_closed = true;
    state.endpoint_tx = None;
    // Dropping the senders wakes every waiting request with StreamClosed
    state.pending.clear();
    state.unclaimed.clear();
    if state.cleaned {
        log::debug!("🔌 Connector event stream finished");
    } else {
        if state.state == ConnectionState::Connected {
            log::warn!("🔌 Connector event stream lost, session is gone");
        }
        state.state = ConnectionState::Failed;
    }
}

fn dispatch(shared: &Mutex<SessionShared>, event: SseEvent) {
    let mut state = lock(shared);
    match event.event.as_str() {
        "endpoint" => {
            if let Some(tx) = state.endpoint_tx.take() {
                let _ = tx.send(event.data.trim().to_string());
            }
        }
        "message" => match serde_json::from_str::<Value>(&event.data) {
            Ok(message) => route_reply(&mut state, message),
            Err(e) => log::warn!("🔌 Ignoring malformed connector message: {}", e),
        },
        other => log::debug!("🔌 Ignoring connector event '{}'", other),
    }
}

fn route_reply(state: &mut SessionShared, message: Value) {
    let Some(id) = message.get("id").and_then(Value::as_u64) else {
        log::debug!("🔌 Connector notification: {}", message);
        return;
    };

    let reply = match message.get("error") {
        Some(error) => Err((
            error.get("code").and_then(Value::as_i64).unwrap_or(0),
            error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        )),
        None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
    };

    match state.pending.remove(&id) {
        Some(tx) => {
            let _ = tx.send(reply);
        }
        None if state.unclaimed.len() >= MAX_UNCLAIMED => {
            log::warn!("🔌 Dropping connector reply {} nobody asked for", id);
        }
        None => {
            state.unclaimed.insert(id, reply);
        }
    }
}

fn parse_tools(listed: &Value, server: &str) -> Vec<Tool> {
    let Some(entries) = listed.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?;
            if !Tool::is_valid_name(name) {
                log::warn!("🔌 Skipping tool with unusable name '{}' from {}", name, server);
                return None;
            }
            let description = entry
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let parameters = entry
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
            Some(Tool::remote(name, description, server).with_parameters(parameters))
        })
        .collect()
}

/// Creates [`SseConnector`] handles sharing one HTTP client.
pub struct SseConnectorFactory {
    client: Client,
    display_name: String,
}

impl SseConnectorFactory {
    pub fn new(display_name: &str) -> Self {
        Self {
            client: Client::new(),
            display_name: display_name.to_string(),
        }
    }
}

impl ConnectorFactory for SseConnectorFactory {
    fn create(&self, endpoint_url: &str) -> Arc<dyn Connector> {
        Arc::new(SseConnector::with_client(
            self.client.clone(),
            endpoint_url,
            &self.display_name,
        ))
    }
}
