//! Capability manifest captured at handshake.
//!
//! Everything here is built once, when a session finishes its handshake, and
//! never mutated afterwards. Picking up a changed tool list means
//! reconnecting.

use serde::Serialize;
use serde_json::Value;

use crate::protocol::{
    InitializeResult, McpPromptDefinition, McpResourceDefinition, McpToolDefinition, ServerInfo,
};
use crate::schema::InputSchema;

/// A tool declared by a server.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Structural form used for call validation.
    pub schema: InputSchema,
    /// The JSON Schema exactly as the server sent it.
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Build from a `tools/list` entry. Fails on a malformed input schema.
    pub fn from_definition(def: McpToolDefinition) -> Result<Self, String> {
        if def.name.trim().is_empty() {
            return Err("tool declared with an empty name".to_string());
        }
        let schema = InputSchema::from_json_schema(&def.input_schema)
            .map_err(|e| format!("tool '{}': {}", def.name, e))?;

        Ok(Self {
            name: def.name,
            description: def.description,
            schema,
            input_schema: def.input_schema,
        })
    }
}

/// A resource declared by a server.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl From<McpResourceDefinition> for ResourceDescriptor {
    fn from(def: McpResourceDefinition) -> Self {
        Self {
            uri: def.uri,
            name: def.name,
            description: def.description,
            mime_type: def.mime_type,
        }
    }
}

/// One named prompt argument.
#[derive(Debug, Clone, Serialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
}

/// An argument-templated prompt declared by a server.
#[derive(Debug, Clone, Serialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
}

impl PromptDescriptor {
    pub fn argument(&self, name: &str) -> Option<&PromptArgument> {
        self.arguments.iter().find(|a| a.name == name)
    }

    pub fn required_arguments(&self) -> impl Iterator<Item = &PromptArgument> {
        self.arguments.iter().filter(|a| a.required)
    }
}

impl From<McpPromptDefinition> for PromptDescriptor {
    fn from(def: McpPromptDefinition) -> Self {
        Self {
            name: def.name,
            description: def.description,
            arguments: def
                .arguments
                .into_iter()
                .map(|a| PromptArgument {
                    name: a.name,
                    description: a.description,
                    required: a.required,
                })
                .collect(),
        }
    }
}

/// What a server actually offered at handshake.
///
/// A capability family the server did not advertise is `None`; an advertised
/// family with nothing in it is an empty list.
#[derive(Debug, Clone, Serialize)]
pub struct NegotiatedCapabilities {
    pub protocol_version: String,
    pub server_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    pub tools: Option<Vec<ToolDescriptor>>,
    pub resources: Option<Vec<ResourceDescriptor>>,
    pub prompts: Option<Vec<PromptDescriptor>>,
}

impl NegotiatedCapabilities {
    /// Start from the `initialize` result; lists are filled in afterwards.
    pub fn from_initialize(result: &InitializeResult) -> Self {
        let ServerInfo { name, version } = result.server_info.clone();
        Self {
            protocol_version: result.protocol_version.clone(),
            server_name: name,
            server_version: version,
            tools: result.capabilities.tools.as_ref().map(|_| Vec::new()),
            resources: result.capabilities.resources.as_ref().map(|_| Vec::new()),
            prompts: result.capabilities.prompts.as_ref().map(|_| Vec::new()),
        }
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        self.tools.as_deref().unwrap_or_default()
    }

    pub fn resources(&self) -> &[ResourceDescriptor] {
        self.resources.as_deref().unwrap_or_default()
    }

    pub fn prompts(&self) -> &[PromptDescriptor] {
        self.prompts.as_deref().unwrap_or_default()
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools().iter().find(|t| t.name == name)
    }

    pub fn resource(&self, uri: &str) -> Option<&ResourceDescriptor> {
        self.resources().iter().find(|r| r.uri == uri)
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptDescriptor> {
        self.prompts().iter().find(|p| p.name == name)
    }

    pub fn supports_resources(&self) -> bool {
        self.resources.is_some()
    }

    pub fn supports_prompts(&self) -> bool {
        self.prompts.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn init_result(capabilities: Value) -> InitializeResult {
        serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": capabilities,
            "serverInfo": {"name": "demo", "version": "0.3.1"}
        }))
        .unwrap()
    }

    #[test]
    fn test_from_initialize_marks_advertised_families() {
        let caps = NegotiatedCapabilities::from_initialize(&init_result(json!({"tools": {}})));
        assert_eq!(caps.server_name, "demo");
        assert_eq!(caps.server_version.as_deref(), Some("0.3.1"));
        assert!(caps.tools.is_some());
        assert!(!caps.supports_resources());
        assert!(!caps.supports_prompts());
        assert!(caps.resources().is_empty());
    }

    #[test]
    fn test_tool_descriptor_from_definition() {
        let def: McpToolDefinition = serde_json::from_value(json!({
            "name": "echo",
            "description": "Echo text back",
            "inputSchema": {
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }
        }))
        .unwrap();

        let tool = ToolDescriptor::from_definition(def).unwrap();
        assert_eq!(tool.name, "echo");
        assert!(tool.schema.param("text").unwrap().required);
    }

    #[test]
    fn test_malformed_tool_schema_is_rejected() {
        let def: McpToolDefinition = serde_json::from_value(json!({
            "name": "broken",
            "inputSchema": {"type": "object", "required": "text"}
        }))
        .unwrap();

        let err = ToolDescriptor::from_definition(def).unwrap_err();
        assert!(err.contains("broken"));
    }

    #[test]
    fn test_prompt_required_arguments() {
        let def: McpPromptDefinition = serde_json::from_value(json!({
            "name": "summarize",
            "arguments": [{"name": "topic", "required": true}, {"name": "tone"}]
        }))
        .unwrap();

        let prompt = PromptDescriptor::from(def);
        let required: Vec<_> = prompt.required_arguments().map(|a| a.name.as_str()).collect();
        assert_eq!(required, vec!["topic"]);
        assert!(prompt.argument("tone").is_some());
    }
}
