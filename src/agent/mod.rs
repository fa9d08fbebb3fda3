//! Agent configuration: the static template and the immutable descriptor
//! rebuilt from it on every connector refresh.

pub mod prompts;
pub mod tools;

pub use prompts::{SystemPrompts, VoiceStyles};
pub use tools::{tool_definitions, Tool, ToolSource};

use crate::connector::{ConnectionState, ConnectorBinding};
use crate::error::{AgentError, Result};
use std::collections::HashSet;

/// Static part of the agent: everything except the connectors.
#[derive(Debug, Clone)]
pub struct AgentTemplate {
    pub name: String,
    pub instructions: String,
    pub tools: Vec<Tool>,
    pub model_id: String,
}

impl AgentTemplate {
    pub fn voice_assistant(model_id: &str) -> Self {
        Self {
            name: "Habeebi".to_string(),
            instructions: SystemPrompts::voice_assistant().to_string(),
            tools: vec![Tool::web_search()],
            model_id: model_id.to_string(),
        }
    }

    /// Build a descriptor bound to `connectors` (zero or one entries).
    pub fn build(
        &self,
        connectors: Vec<ConnectorBinding>,
        generation: u64,
    ) -> Result<AgentDescriptor> {
        if self.name.trim().is_empty() {
            return Err(AgentError::Agent("agent name must not be empty".to_string()));
        }
        if self.model_id.trim().is_empty() {
            return Err(AgentError::Agent("model identifier must not be empty".to_string()));
        }
        if self.instructions.trim().is_empty() {
            return Err(AgentError::Agent("instructions must not be empty".to_string()));
        }
        if connectors.len() > 1 {
            return Err(AgentError::Agent(format!(
                "at most one connector is supported, got {}",
                connectors.len()
            )));
        }

        Ok(AgentDescriptor {
            name: self.name.clone(),
            instructions: self.instructions.clone(),
            tools: self.tools.clone(),
            connectors,
            model_id: self.model_id.clone(),
            generation,
        })
    }
}

/// One published agent configuration. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    pub name: String,
    pub instructions: String,
    pub tools: Vec<Tool>,
    pub connectors: Vec<ConnectorBinding>,
    pub model_id: String,
    /// Refresh that produced this descriptor, starting at 1.
    pub generation: u64,
}

impl AgentDescriptor {
    pub fn has_connector(&self) -> bool {
        !self.connectors.is_empty()
    }

    /// Declared tools followed by connector tools, first name wins.
    pub fn available_tools(&self) -> Vec<&Tool> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        let connector_tools = self.connectors.iter().flat_map(|c| c.tools.iter());

        for tool in self.tools.iter().chain(connector_tools) {
            if seen.insert(tool.name.as_str()) {
                result.push(tool);
            } else {
                log::warn!("Tool '{}' declared twice, keeping the first", tool.name);
            }
        }
        result
    }

    pub fn connector_for(&self, tool_name: &str) -> Option<&ConnectorBinding> {
        self.connectors.iter().find(|c| c.provides(tool_name))
    }

    /// Whether every bound connector is still connected.
    pub fn connectors_live(&self) -> bool {
        self.connectors
            .iter()
            .all(|c| c.live_state() == ConnectionState::Connected)
    }

    /// Copy of this descriptor without the connectors that are no longer
    /// connected. Their tools go with them.
    pub fn retain_live_connectors(&self) -> AgentDescriptor {
        AgentDescriptor {
            connectors: self
                .connectors
                .iter()
                .filter(|c| c.live_state() == ConnectionState::Connected)
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_assistant_template() {
        let template = AgentTemplate::voice_assistant("gpt-4o-mini");
        let agent = template.build(Vec::new(), 1).unwrap();

        assert_eq!(agent.name, "Habeebi");
        assert_eq!(agent.model_id, "gpt-4o-mini");
        assert_eq!(agent.generation, 1);
        assert!(!agent.has_connector());
        assert_eq!(agent.available_tools().len(), 1);
        assert_eq!(agent.available_tools()[0].name, "web_search");
        assert!(agent.connector_for("web_search").is_none());
    }

    #[test]
    fn test_build_rejects_incomplete_template() {
        let mut template = AgentTemplate::voice_assistant("");
        assert!(template.build(Vec::new(), 1).is_err());

        template.model_id = "gpt-4o-mini".to_string();
        template.name = "  ".to_string();
        assert!(template.build(Vec::new(), 1).is_err());
    }
}
