mod common;

use agent_voice_rs::relay::RequestHandler;
use agent_voice_rs::ws_server::WsServer;
use common::{manager, tone_wav, ScriptedPipeline};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use test_log::test;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(pipeline: ScriptedPipeline) -> (SocketAddr, CancellationToken) {
    let handler = Arc::new(RequestHandler::new(manager(None), Arc::new(pipeline)));
    let shutdown = CancellationToken::new();
    let server = WsServer::new(handler, shutdown.clone());
    let listener = server.bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener).await });
    (addr, shutdown)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    client
}

enum Frame {
    Audio(usize),
    Json(Value),
}

async fn next_frame(client: &mut Client) -> Option<Frame> {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .ok()??;
        match next.ok()? {
            Message::Binary(data) => return Some(Frame::Audio(data.len())),
            Message::Text(text) => {
                return Some(Frame::Json(serde_json::from_str(&text.to_string()).unwrap()))
            }
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        match next_frame(client).await {
            Some(Frame::Json(value)) => return value,
            Some(Frame::Audio(_)) => continue,
            None => panic!("connection closed while waiting for a message"),
        }
    }
}

async fn send_command(client: &mut Client, command: &str) {
    let text = json!({ "command": command }).to_string();
    client.send(Message::Text(text.into())).await.unwrap();
}

/// Returns (binary frame sizes, terminating control message)
async fn read_reply(client: &mut Client) -> (Vec<usize>, Value) {
    let mut frames = Vec::new();
    loop {
        match next_frame(client).await {
            Some(Frame::Audio(len)) => frames.push(len),
            Some(Frame::Json(value)) => return (frames, value),
            None => panic!("connection closed mid-reply"),
        }
    }
}

#[test(tokio::test)]
async fn test_greeting_and_audio_round_trip() {
    let (addr, shutdown) = start(ScriptedPipeline::new(3, 240)).await;
    let mut client = connect(addr).await;

    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "status", "message": "Agent ready"})
    );

    client
        .send(Message::Binary(tone_wav(0.2).into()))
        .await
        .unwrap();
    let (frames, end) = read_reply(&mut client).await;
    assert_eq!(frames, vec![480, 480, 480]);
    assert_eq!(end, json!({"type": "audio_stream_end"}));

    shutdown.cancel();
}

#[test(tokio::test)]
async fn test_refresh_command_reports_result() {
    let (addr, shutdown) = start(ScriptedPipeline::new(1, 10)).await;
    let mut client = connect(addr).await;
    next_json(&mut client).await;

    send_command(&mut client, "refresh_connector").await;
    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "status", "message": "Connector refresh started..."})
    );
    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "connector_refreshed", "status": "success"})
    );

    // Legacy spelling
    send_command(&mut client, "refresh_zapier").await;
    next_json(&mut client).await;
    assert_eq!(next_json(&mut client).await["type"], "connector_refreshed");

    shutdown.cancel();
}

#[test(tokio::test)]
async fn test_bad_commands_keep_connection_open() {
    let (addr, shutdown) = start(ScriptedPipeline::new(2, 10)).await;
    let mut client = connect(addr).await;
    next_json(&mut client).await;

    send_command(&mut client, "dance").await;
    client
        .send(Message::Text("not json at all".to_string().into()))
        .await
        .unwrap();
    // Nothing in flight, so nothing to acknowledge
    send_command(&mut client, "stop_agent").await;

    client
        .send(Message::Binary(tone_wav(0.1).into()))
        .await
        .unwrap();
    let (frames, end) = read_reply(&mut client).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(end, json!({"type": "audio_stream_end"}));

    shutdown.cancel();
}

#[test(tokio::test)]
async fn test_stop_agent_truncates_reply() {
    let pipeline = ScriptedPipeline::new(40, 240).with_delay(Duration::from_millis(25));
    let (addr, shutdown) = start(pipeline).await;
    let mut client = connect(addr).await;
    next_json(&mut client).await;

    client
        .send(Message::Binary(tone_wav(0.1).into()))
        .await
        .unwrap();

    let mut audio_frames = 0;
    match next_frame(&mut client).await {
        Some(Frame::Audio(_)) => audio_frames += 1,
        _ => panic!("expected audio before stopping"),
    }
    send_command(&mut client, "stop_agent").await;

    let mut stopped = false;
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_millis(500), next_frame(&mut client)).await
    {
        match frame {
            Frame::Audio(_) => audio_frames += 1,
            Frame::Json(value) => {
                assert_ne!(value["type"], "audio_stream_end");
                if value == json!({"type": "agent_stopped"}) {
                    stopped = true;
                }
            }
        }
    }

    assert!(stopped);
    assert!(audio_frames < 40, "relay was not truncated");

    shutdown.cancel();
}

#[test(tokio::test)]
async fn test_undecodable_audio_yields_error_event() {
    let (addr, shutdown) = start(ScriptedPipeline::new(2, 10)).await;
    let mut client = connect(addr).await;
    next_json(&mut client).await;

    client
        .send(Message::Binary(b"garbage bytes".to_vec().into()))
        .await
        .unwrap();
    let (frames, message) = read_reply(&mut client).await;
    assert!(frames.is_empty());
    assert_eq!(message["type"], "error");
    assert!(message["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to process audio"));

    shutdown.cancel();
}
