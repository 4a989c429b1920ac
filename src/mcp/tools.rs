//! MCP tool definitions and results.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const SEND_MESSAGE: &str = "send_message";
pub const GET_STATUS: &str = "get_status";
pub const CLEAR_CONVERSATION: &str = "clear_conversation";
pub const CLOSE_SESSION: &str = "close_session";

/// Tool definition following MCP schema
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for input parameters
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Tool result content type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

/// Tool call result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    /// Create a pretty-printed JSON result
    pub fn json_pretty<T: Serialize>(value: &T) -> Self {
        let text = serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string());
        ToolResult::text(text)
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        ToolResult {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: Some(true),
        }
    }

    /// Concatenated text of all content blocks
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|ToolContent::Text { text }| text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}

/// Generate all tool definitions
pub fn all_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            SEND_MESSAGE,
            "Send a message to Gemini and wait for its reply. `@path` references to existing files are expanded to absolute paths.",
            json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Message for Gemini"
                    },
                    "working_directory": {
                        "type": "string",
                        "description": "Directory that @file references resolve against (default: server working directory)"
                    },
                    "timeout_seconds": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Seconds to wait for the reply (default depends on whether the message looks like a web search)"
                    },
                    "permission": {
                        "type": "string",
                        "enum": ["once", "always", "decline"],
                        "description": "Answer to Gemini permission prompts during this message"
                    }
                },
                "required": ["message"]
            }),
        ),
        ToolDefinition::new(
            GET_STATUS,
            "Report whether the Gemini session is running, what it is doing, and optionally its transcript",
            json!({
                "type": "object",
                "properties": {
                    "tail_lines": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Include the last N transcript lines"
                    },
                    "full_transcript": {
                        "type": "boolean",
                        "description": "Include the whole captured transcript"
                    }
                }
            }),
        ),
        ToolDefinition::new(
            CLEAR_CONVERSATION,
            "Clear Gemini's conversation history and report message counts before and after",
            json!({ "type": "object", "properties": {} }),
        ),
        ToolDefinition::new(
            CLOSE_SESSION,
            "Terminate the Gemini session",
            json!({ "type": "object", "properties": {} }),
        ),
    ]
}

/// Get a tool definition by name
pub fn get_tool(name: &str) -> Option<ToolDefinition> {
    all_tools().into_iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_tools_have_object_schemas() {
        let tools = all_tools();
        assert_eq!(tools.len(), 4);
        for tool in &tools {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }

    #[test]
    fn test_get_tool() {
        assert!(get_tool(SEND_MESSAGE).is_some());
        assert!(get_tool("run_shell").is_none());
    }

    #[test]
    fn test_tool_result_serialization() {
        let value = serde_json::to_value(ToolResult::error("boom")).unwrap();
        assert_eq!(value["isError"], true);
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "boom");

        let value = serde_json::to_value(ToolResult::text("ok")).unwrap();
        assert!(value.get("isError").is_none());
    }

    #[test]
    fn test_definition_uses_camel_case_schema_key() {
        let value = serde_json::to_value(get_tool(GET_STATUS).unwrap()).unwrap();
        assert!(value.get("inputSchema").is_some());
    }
}
