//! Tool connectors: live sessions to external tool-invocation endpoints.
//!
//! A [`Connector`] is owned by the lifecycle manager for its whole life. The
//! agent descriptor only holds a [`ConnectorBinding`], a snapshot of the
//! connector taken when it was published, plus a handle for invoking tools.

pub mod sse;

pub use sse::{SseConnector, SseConnectorFactory};

use crate::agent::Tool;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Endpoint rejected connection: {status} - {message}")]
    Rejected { status: u16, message: String },
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Remote error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connector is not connected")]
    NotConnected,
    #[error("Connector was already cleaned up")]
    AlreadyClosed,
    #[error("Event stream closed")]
    StreamClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// A connection to one external tool-calling endpoint.
///
/// `connect` and `cleanup` are each called at most once per handle.
#[async_trait]
pub trait Connector: Send + Sync {
    fn endpoint_url(&self) -> &str;

    fn display_name(&self) -> &str;

    fn state(&self) -> ConnectionState;

    /// Tools advertised by the endpoint, known once connected.
    fn tools(&self) -> Vec<Tool>;

    async fn connect(&self) -> Result<(), ConnectorError>;

    async fn cleanup(&self) -> Result<(), ConnectorError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ConnectorError>;
}

/// Builds a fresh, unconnected handle for every refresh.
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, endpoint_url: &str) -> Arc<dyn Connector>;
}

/// Immutable view of a connected connector as published with an agent.
#[derive(Clone)]
pub struct ConnectorBinding {
    pub display_name: String,
    pub endpoint_url: String,
    /// State observed when the binding was published.
    pub state: ConnectionState,
    pub tools: Vec<Tool>,
    handle: Arc<dyn Connector>,
}

impl ConnectorBinding {
    pub fn snapshot(handle: Arc<dyn Connector>) -> Self {
        Self {
            display_name: handle.display_name().to_string(),
            endpoint_url: handle.endpoint_url().to_string(),
            state: handle.state(),
            tools: handle.tools(),
            handle,
        }
    }

    /// State of the underlying connector right now, which may have moved on
    /// since publication.
    pub fn live_state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn provides(&self, tool_name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name == tool_name)
    }

    /// Invoke a tool on the underlying connector.
    ///
    /// Fails with [`ConnectorError::NotConnected`] once a later refresh has
    /// torn the connector down.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ConnectorError> {
        if self.live_state() != ConnectionState::Connected {
            return Err(ConnectorError::NotConnected);
        }
        self.handle.call_tool(name, arguments).await
    }
}

impl fmt::Debug for ConnectorBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorBinding")
            .field("display_name", &self.display_name)
            .field("endpoint_url", &self.endpoint_url)
            .field("state", &self.state)
            .field("tools", &self.tools.len())
            .finish()
    }
}
