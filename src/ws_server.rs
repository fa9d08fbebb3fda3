//! WebSocket front-end.
//!
//! Binary frames in are encoded audio blobs, one utterance each. Binary
//! frames out are s16le PCM at the pipeline rate. Text frames carry the JSON
//! control messages from [`crate::protocol`].

use crate::audio::pcm_to_le_bytes;
use crate::error::AgentError;
use crate::pipeline::LifecycleEvent;
use crate::protocol::{ClientCommand, RefreshStatus, ServerMessage};
use crate::relay::{RelaySink, RequestHandler, Session};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const OUTBOUND_BUFFER: usize = 64;
const PENDING_REQUESTS: usize = 8;

/// Writes relay output onto one client's outbound queue
pub struct WsSink {
    outbound: mpsc::Sender<Message>,
}

impl WsSink {
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self { outbound }
    }

    async fn send(&self, message: Message) -> Result<(), AgentError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| AgentError::Transport("client disconnected".to_string()))
    }

    async fn send_json(&self, message: &ServerMessage) -> Result<(), AgentError> {
        self.send(Message::Text(message.to_json()?.into())).await
    }
}

#[async_trait]
impl RelaySink for WsSink {
    async fn send_audio(&mut self, samples: &[i16]) -> Result<(), AgentError> {
        self.send(Message::Binary(pcm_to_le_bytes(samples).into()))
            .await
    }

    async fn send_lifecycle(&mut self, event: LifecycleEvent) -> Result<(), AgentError> {
        // Not part of the wire protocol
        log::debug!("Lifecycle: {}", event);
        Ok(())
    }

    async fn send_stream_end(&mut self) -> Result<(), AgentError> {
        self.send_json(&ServerMessage::AudioStreamEnd).await
    }

    async fn send_error(&mut self, message: &str) -> Result<(), AgentError> {
        self.send_json(&ServerMessage::error(message)).await
    }
}

pub struct WsServer {
    handler: Arc<RequestHandler>,
    shutdown: CancellationToken,
}

impl WsServer {
    pub fn new(handler: Arc<RequestHandler>, shutdown: CancellationToken) -> Self {
        Self { handler, shutdown }
    }

    pub async fn bind(&self, address: &str) -> Result<TcpListener, AgentError> {
        log::info!("🎯 Starting WebSocket server on {}", address);
        Ok(TcpListener::bind(address).await?)
    }

    /// Accept clients until the shutdown token fires
    pub async fn serve(&self, listener: TcpListener) -> Result<(), AgentError> {
        log::info!("🎯 WebSocket server listening on ws://{}", listener.local_addr()?);

        loop {
            let (stream, addr) = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    log::info!("🛑 WebSocket server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::error!("❌ Error accepting connection: {}", e);
                        continue;
                    }
                },
            };

            let handler = Arc::clone(&self.handler);
            let shutdown = self.shutdown.child_token();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handler, shutdown).await {
                    log::error!("❌ Connection {} ended with error: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: Arc<RequestHandler>,
    shutdown: CancellationToken,
) -> Result<(), AgentError> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| AgentError::Transport(format!("handshake failed: {}", e)))?;

    let client_id = format!("{}-{}", addr, &Uuid::new_v4().to_string()[..8]);
    log::info!("🔌 Client {} connected", client_id);

    let (mut write, mut read) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = write.send(message).await {
                log::debug!("Write failed, dropping outbound queue: {}", e);
                break;
            }
        }
        let _ = write.close().await;
    });

    let control = WsSink::new(out_tx.clone());
    let greeting = match handler.ensure_agent().await {
        Some(_) => ServerMessage::status("Agent ready"),
        None => ServerMessage::error("Agent initialization failed"),
    };
    control.send_json(&greeting).await?;

    let session = Arc::new(Session::new(client_id.clone()));
    let (job_tx, mut job_rx) = mpsc::channel::<Vec<u8>>(PENDING_REQUESTS);

    let worker = {
        let handler = Arc::clone(&handler);
        let session = Arc::clone(&session);
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(bytes) = job_rx.recv().await {
                let mut sink = WsSink::new(out_tx.clone());
                if let Err(e) = handler.handle_audio(&session, bytes, &mut sink).await {
                    log::warn!("[{}] Request aborted: {}", session.client_id(), e);
                    break;
                }
            }
        })
    };

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read.next() => frame,
        };

        match frame {
            Some(Ok(Message::Binary(data))) => {
                if job_tx.send(data.as_slice().to_vec()).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Text(text))) => {
                handle_command(&text.to_string(), &handler, &session, &control).await?;
            }
            Some(Ok(Message::Close(frame))) => {
                log::info!("Client {} closed connection: {:?}", client_id, frame);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::warn!("Client {} transport error: {}", client_id, e);
                break;
            }
            None => break,
        }
    }

    // Abandon whatever is still queued or streaming for this client
    drop(job_tx);
    session.stop();
    if let Err(e) = worker.await {
        log::error!("Worker for {} panicked: {}", client_id, e);
    }

    drop(control);
    drop(out_tx);
    let _ = writer.await;

    log::info!("🔌 Client {} disconnected", client_id);
    Ok(())
}

async fn handle_command(
    text: &str,
    handler: &Arc<RequestHandler>,
    session: &Session,
    control: &WsSink,
) -> Result<(), AgentError> {
    let command = match ClientCommand::parse(text) {
        Ok(command) => command,
        Err(e) => {
            log::warn!("Ignoring malformed message from {}: {}", session.client_id(), e);
            return Ok(());
        }
    };

    match command {
        ClientCommand::RefreshConnector => {
            log::info!("Received refresh command from {}", session.client_id());
            control
                .send_json(&ServerMessage::status("Connector refresh started..."))
                .await?;

            let handler = Arc::clone(handler);
            let outbound = control.outbound.clone();
            tokio::spawn(async move {
                let ok = handler.manager().refresh().await;
                let reply = ServerMessage::ConnectorRefreshed {
                    status: RefreshStatus::from(ok),
                };
                if let Err(e) = WsSink::new(outbound).send_json(&reply).await {
                    log::debug!("Could not report refresh result: {}", e);
                }
            });
        }
        ClientCommand::StopAgent => {
            if session.stop() {
                control.send_json(&ServerMessage::AgentStopped).await?;
            } else {
                log::info!("No active response to stop for {}", session.client_id());
            }
        }
        ClientCommand::Unknown(name) => {
            log::warn!("Unknown command from {}: {}", session.client_id(), name);
        }
    }
    Ok(())
}
