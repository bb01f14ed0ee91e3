//! Tool abstraction shared by the MCP and HTTP surfaces.
//!
//! A [`Tool`] has a name, a description, a JSON Schema for its parameters,
//! and an async `execute`. Tools live in a [`ToolRegistry`]; both the MCP
//! bridge and `POST /tools/{name}` dispatch through it, so the two surfaces
//! always expose the same tool set.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::ToolConfig;
use crate::orchestrator::{QueryOrchestrator, SearchArgs};

/// Handles a tool needs at execution time.
#[derive(Clone)]
pub struct ToolContext {
    orchestrator: Arc<QueryOrchestrator>,
}

impl ToolContext {
    pub fn new(orchestrator: Arc<QueryOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &QueryOrchestrator {
        &self.orchestrator
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name (`POST /tools/{name}`) and MCP tool name.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema with `type: "object"`, `properties` and `required`.
    fn parameters_schema(&self) -> Value;

    /// A string result is sent to callers as plain text; anything else is
    /// serialized as JSON.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Tool metadata as listed by `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn from_tool(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }
}

/// The documentation search tool.
pub struct SearchDocsTool {
    name: String,
    description: String,
}

impl SearchDocsTool {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
        }
    }
}

#[async_trait]
impl Tool for SearchDocsTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search terms. Supports \"quoted phrases\", +required, -excluded, AND, NOT. Mention gen1 or gen2 to pick a documentation generation."
                },
                "page": { "type": "integer", "description": "Result page, starting at 1", "default": 1 },
                "includeContent": { "type": "boolean", "description": "Include full file content for each result", "default": false },
                "maxResults": { "type": "integer", "description": "Maximum files per page" },
                "filesOnly": { "type": "boolean", "description": "Only list matching file paths", "default": false },
                "useJson": { "type": "boolean", "description": "Return structured JSON", "default": false },
                "sessionId": { "type": "string", "description": "Conversation id; adds related sections to the response" },
                "fullContent": { "type": "boolean", "description": "With filePath, return the whole file without truncation", "default": false },
                "filePath": { "type": "string", "description": "Return this corpus file instead of searching" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let args: SearchArgs = match serde_json::from_value(params) {
            Ok(args) => args,
            Err(e) => bail!("invalid arguments: {}", e),
        };
        let text = ctx.orchestrator().try_execute(&args).await?;
        Ok(Value::String(text))
    }
}

/// Checks `params` against the `required` and `properties[*].type` parts of a
/// tool schema. Returns the params as an object.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let Some(object) = params.as_object() else {
        bail!("invalid arguments: expected a JSON object");
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(field) {
                bail!("missing required parameter: {}", field);
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, prop) in properties {
            let (Some(value), Some(expected)) =
                (object.get(name), prop.get("type").and_then(Value::as_str))
            else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_u64() || value.is_i64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "object" => value.is_object(),
                "array" => value.is_array(),
                _ => true,
            } || value.is_null();
            if !ok {
                bail!("invalid parameter '{}': expected {}", name, expected);
            }
        }
    }
    Ok(Value::Object(object.clone()))
}

/// Named tools, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the configured search tool.
    pub fn with_search(config: &ToolConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchDocsTool::new(config)));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}
