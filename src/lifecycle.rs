//! Connector lifecycle manager.
//!
//! Owns the single current connector and the agent descriptor built on top
//! of it. All replacement goes through [`ConnectorLifecycleManager::refresh`],
//! which holds an exclusive lock for its whole duration so refreshes are
//! totally ordered. Readers never take that lock: the current descriptor is
//! published through a watch channel and swapped in one step.

use crate::agent::{AgentDescriptor, AgentTemplate};
use crate::connector::{ConnectionState, Connector, ConnectorBinding, ConnectorError, ConnectorFactory};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone, Default)]
pub struct LifecycleConfig {
    /// Connector endpoint. `None` or blank means "run without a connector".
    pub endpoint_url: Option<String>,
    /// Bound on one connect attempt. `None` waits as long as the endpoint does.
    pub connect_timeout: Option<Duration>,
}

pub struct ConnectorLifecycleManager {
    config: LifecycleConfig,
    template: AgentTemplate,
    factory: Arc<dyn ConnectorFactory>,
    // Held for the whole of refresh() and shutdown()
    connector: Mutex<Option<Arc<dyn Connector>>>,
    published: watch::Sender<Option<Arc<AgentDescriptor>>>,
    generation: AtomicU64,
}

impl ConnectorLifecycleManager {
    /// Create a manager in the uninitialized state. Nothing connects until
    /// the first `refresh()`.
    pub fn new(
        config: LifecycleConfig,
        template: AgentTemplate,
        factory: Arc<dyn ConnectorFactory>,
    ) -> Self {
        let (published, _) = watch::channel(None);
        Self {
            config,
            template,
            factory,
            connector: Mutex::new(None),
            published,
            generation: AtomicU64::new(0),
        }
    }

    /// Current agent, or `None` if no refresh has succeeded yet.
    ///
    /// A connector that dropped after publication, or is being torn down by
    /// a refresh in progress, is left out of the returned descriptor.
    pub fn current_agent(&self) -> Option<Arc<AgentDescriptor>> {
        let agent = self.published.borrow().clone()?;
        if agent.connectors_live() {
            return Some(agent);
        }
        log::debug!(
            "Connector of agent generation {} is no longer connected, withholding it",
            agent.generation
        );
        Some(Arc::new(agent.retain_live_connectors()))
    }

    pub fn is_initialized(&self) -> bool {
        self.published.borrow().is_some()
    }

    /// Watch for descriptor replacements.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AgentDescriptor>>> {
        self.published.subscribe()
    }

    /// Tear down the current connector, connect a new one and rebuild the
    /// agent. Returns whether an agent is published afterwards.
    pub async fn refresh(&self) -> bool {
        let mut slot = self.connector.lock().await;
        log::info!("--- Refreshing connector and agent ---");

        if let Some(old) = slot.take() {
            Self::teardown(old.as_ref()).await;
        }

        let connector = match self.config.endpoint_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => self.establish(url).await,
            _ => {
                log::info!("No connector endpoint configured, continuing without one");
                None
            }
        };

        let bindings: Vec<ConnectorBinding> = connector
            .iter()
            .map(|c| ConnectorBinding::snapshot(Arc::clone(c)))
            .collect();
        *slot = connector;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("Initializing agent (generation {})...", generation);

        let initialized = match self.template.build(bindings, generation) {
            Ok(descriptor) => {
                log::info!(
                    "✅ Agent '{}' ready with {} tool(s) and {} connector(s)",
                    descriptor.name,
                    descriptor.available_tools().len(),
                    descriptor.connectors.len()
                );
                self.published.send_replace(Some(Arc::new(descriptor)));
                true
            }
            Err(e) => {
                log::error!("❌ Error initializing agent: {}", e);
                self.published.send_replace(None);
                false
            }
        };

        log::info!("---------------------------------------");
        initialized
    }

    /// Best-effort teardown of the current connector. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let mut slot = self.connector.lock().await;
        match slot.take() {
            Some(connector) => Self::teardown(connector.as_ref()).await,
            None => log::debug!("No connector to clean up"),
        }
    }

    async fn teardown(connector: &dyn Connector) {
        log::info!("Cleaning up {} connection...", connector.display_name());
        match connector.cleanup().await {
            Ok(()) => log::info!("{} cleanup complete", connector.display_name()),
            // The handle is dropped either way; a half-closed session is never reused
            Err(e) => log::error!("Error cleaning up {}: {}", connector.display_name(), e),
        }
    }

    async fn establish(&self, url: &str) -> Option<Arc<dyn Connector>> {
        let connector = self.factory.create(url);
        log::info!("Connecting to {}...", connector.display_name());

        let attempt = connector.connect();
        let result = match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or(Err(ConnectorError::Timeout(limit))),
            None => attempt.await,
        };

        match result {
            Ok(()) if connector.state() == ConnectionState::Connected => {
                log::info!("{} connected", connector.display_name());
                Some(connector)
            }
            Ok(()) => {
                log::error!(
                    "{} reported success but is {}, proceeding without it",
                    connector.display_name(),
                    connector.state()
                );
                None
            }
            Err(e) => {
                log::error!(
                    "Error connecting to {}: {}. Proceeding without it.",
                    connector.display_name(),
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Tool;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;

    struct FlakyConnector {
        url: String,
        fail: bool,
        state: StdMutex<ConnectionState>,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        fn endpoint_url(&self) -> &str {
            &self.url
        }
        fn display_name(&self) -> &str {
            "FlakyServer"
        }
        fn state(&self) -> ConnectionState {
            *self.state.lock().unwrap()
        }
        fn tools(&self) -> Vec<Tool> {
            vec![Tool::remote("create_task", "Create a task", "FlakyServer")]
        }
        async fn connect(&self) -> std::result::Result<(), ConnectorError> {
            if self.fail {
                *self.state.lock().unwrap() = ConnectionState::Failed;
                return Err(ConnectorError::Handshake("refused".to_string()));
            }
            *self.state.lock().unwrap() = ConnectionState::Connected;
            Ok(())
        }
        async fn cleanup(&self) -> std::result::Result<(), ConnectorError> {
            *self.state.lock().unwrap() = ConnectionState::Disconnected;
            Ok(())
        }
        async fn call_tool(&self, _: &str, _: Value) -> std::result::Result<Value, ConnectorError> {
            Ok(Value::Null)
        }
    }

    struct FlakyFactory {
        fail: bool,
    }

    impl ConnectorFactory for FlakyFactory {
        fn create(&self, endpoint_url: &str) -> Arc<dyn Connector> {
            Arc::new(FlakyConnector {
                url: endpoint_url.to_string(),
                fail: self.fail,
                state: StdMutex::new(ConnectionState::Disconnected),
            })
        }
    }

    fn manager(url: Option<&str>, fail: bool) -> ConnectorLifecycleManager {
        ConnectorLifecycleManager::new(
            LifecycleConfig {
                endpoint_url: url.map(str::to_string),
                connect_timeout: None,
            },
            AgentTemplate::voice_assistant("gpt-4o-mini"),
            Arc::new(FlakyFactory { fail }),
        )
    }

    #[tokio::test]
    async fn test_starts_uninitialized() {
        let manager = manager(None, false);
        assert!(!manager.is_initialized());
        assert!(manager.current_agent().is_none());
    }

    #[tokio::test]
    async fn test_blank_url_counts_as_unset() {
        let manager = manager(Some("   "), false);
        assert!(manager.refresh().await);
        assert!(manager.current_agent().unwrap().connectors.is_empty());
    }

    #[tokio::test]
    async fn test_connector_tools_are_published() {
        let manager = manager(Some("http://tools.local/sse"), false);
        assert!(manager.refresh().await);

        let agent = manager.current_agent().unwrap();
        assert_eq!(agent.connectors.len(), 1);
        assert_eq!(agent.connectors[0].state, ConnectionState::Connected);
        assert!(agent.connector_for("create_task").is_some());
    }

    #[tokio::test]
    async fn test_failed_connect_degrades() {
        let manager = manager(Some("http://tools.local/sse"), true);
        assert!(manager.refresh().await);
        assert!(!manager.current_agent().unwrap().has_connector());
    }

    #[tokio::test]
    async fn test_invalid_template_unpublishes() {
        let manager = ConnectorLifecycleManager::new(
            LifecycleConfig::default(),
            AgentTemplate::voice_assistant(""),
            Arc::new(FlakyFactory { fail: false }),
        );
        assert!(!manager.refresh().await);
        assert!(!manager.is_initialized());
        assert!(manager.current_agent().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let manager = manager(Some("http://tools.local/sse"), false);
        assert!(manager.refresh().await);
        let binding = manager.current_agent().unwrap().connectors[0].clone();

        manager.shutdown().await;
        manager.shutdown().await;
        assert!(!manager.current_agent().unwrap().has_connector());
        assert!(matches!(
            binding.call_tool("create_task", Value::Null).await,
            Err(ConnectorError::NotConnected)
        ));
    }
}
