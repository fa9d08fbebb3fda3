use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

static TOOL_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").expect("tool name pattern is a valid regex")
});

/// Where a tool is executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSource {
    /// Executed by the hosted model runtime itself
    Hosted,
    /// Executed through the named connector
    Connector(String),
}

#[derive(Debug, Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub source: ToolSource,
}

impl Tool {
    /// Web search, run by the hosted runtime
    pub fn web_search() -> Self {
        Self {
            name: "web_search".to_string(),
            description: "Search the web for current information".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
            source: ToolSource::Hosted,
        }
    }

    /// A tool advertised by a connector endpoint
    pub fn remote(name: &str, description: &str, connector: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({"type": "object", "properties": {}}),
            source: ToolSource::Connector(connector.to_string()),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn is_valid_name(name: &str) -> bool {
        TOOL_NAME.is_match(name)
    }

    /// Tool definition in the hosted runtime's request format
    pub fn definition(&self) -> Value {
        match self.source {
            ToolSource::Hosted => json!({"type": "web_search_preview"}),
            ToolSource::Connector(_) => json!({
                "type": "function",
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }),
        }
    }
}

/// Get tool definitions for LLM function calling
pub fn tool_definitions(tools: &[Tool]) -> Vec<Value> {
    tools.iter().map(Tool::definition).collect()
}
