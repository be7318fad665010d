//! Tool-invocation boundary
//!
//! A tool-capable backend answers with zero or more named operations instead
//! of free text. Two shapes exist: tool calls (an operation name plus JSON
//! arguments) and resource reads (a request for named read-only data).
//! Resource reads travel as calls to [`READ_RESOURCE`] and are separated out
//! by [`ToolRequest::classify`].

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::types::TokenUsage;

/// Operation that writes one artifact: `{ "path": ..., "content": ... }`
pub const WRITE_ARTIFACT: &str = "write_artifact";

/// Operation that asks for a named resource: `{ "name": ... }`
pub const READ_RESOURCE: &str = "read_resource";

/// Resource holding the living requirement document of the run
pub const CURRENT_SPECIFICATION: &str = "current_specification";

/// Declaration of an operation offered to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolSpec {
    #[must_use]
    pub fn write_artifact() -> Self {
        Self {
            name: WRITE_ARTIFACT.to_string(),
            description: "Write a file. Provide the relative path and the complete content."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative file path" },
                    "content": { "type": "string", "description": "Complete file content" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    #[must_use]
    pub fn read_resource(available: &[String]) -> Self {
        Self {
            name: READ_RESOURCE.to_string(),
            description: format!(
                "Read a named read-only resource. Available: {}",
                available.join(", ")
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "enum": available }
                },
                "required": ["name"]
            }),
        }
    }
}

/// A named operation returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, when the provider has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    #[must_use]
    pub fn write_artifact(path: &str, content: &str) -> Self {
        Self::new(WRITE_ARTIFACT, json!({ "path": path, "content": content }))
    }

    /// String argument by key
    #[must_use]
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(serde_json::Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    Call(ToolCall),
    ReadResource { name: String },
}

impl ToolRequest {
    #[must_use]
    pub fn classify(call: ToolCall) -> Self {
        if call.name == READ_RESOURCE
            && let Some(name) = call.str_arg("name")
        {
            return Self::ReadResource {
                name: name.to_string(),
            };
        }
        Self::Call(call)
    }
}

/// Reply on the tool-invocation path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolResponse {
    pub calls: Vec<ToolCall>,
    /// Any accompanying free text
    pub text: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Source of named read-only data for resource reads
pub trait ResourceProvider: Send + Sync {
    fn resource_names(&self) -> Vec<String>;

    fn read_resource(&self, name: &str) -> Option<String>;
}
