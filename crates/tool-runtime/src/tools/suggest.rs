use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

/// Records follow-up suggestions into the request's accumulator.
///
/// Register with `ToolRegistry::register_hidden`: the suggestions reach the
/// client as a single `suggestions` event, never as tool traffic.
pub struct SuggestActionsTool;

#[async_trait]
impl Tool for SuggestActionsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "suggest_actions".to_string(),
            description:
                "Suggest 2-3 follow-up actions the user might want. Call this after answering questions."
                    .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "suggestions": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Array of 2-3 short suggestions (under 40 chars each)"
                    }
                },
                "required": ["suggestions"]
            }),
        }
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let suggestions: Vec<String> = input
            .get("suggestions")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ToolError::InvalidInput("missing 'suggestions' array".to_string()))?
            .iter()
            .filter_map(|s| s.as_str().map(str::to_string))
            .collect();

        debug!(count = suggestions.len(), request_id = %context.request_id, "suggest_actions");
        context.suggestions.record(suggestions);
        Ok(ToolResult::ok("Suggestions recorded"))
    }
}
