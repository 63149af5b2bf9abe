//! Page through a result that was too long to return in one piece.

use async_trait::async_trait;
use deckhand_core::error::ToolError;
use deckhand_core::tool::{Tool, ToolContext};
use serde::Deserialize;

use crate::parse_args;

#[derive(Debug, Deserialize)]
struct ReadMoreArgs {
    result_id: String,
    page: usize,
}

/// Reads pages from the registry that dispatched the call.
pub struct ReadMoreTool;

#[async_trait]
impl Tool for ReadMoreTool {
    fn name(&self) -> &str {
        "read_more"
    }

    fn description(&self) -> &str {
        "Read the next page of a tool result that was truncated. \
         Use the result_id and page number given at the end of the truncated output."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "result_id": {
                    "type": "string",
                    "description": "Result id from the truncation notice"
                },
                "page": {
                    "type": "integer",
                    "description": "Page number, starting at 1"
                }
            },
            "required": ["result_id", "page"]
        })
    }

    fn paginates(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<serde_json::Value, ToolError> {
        let args: ReadMoreArgs = parse_args(arguments)?;
        // Unknown ids and bad pages go back to the model as plain text.
        let text = match ctx.registry.read_more(&args.result_id, args.page) {
            Ok(page) => page,
            Err(e) => format!("Error: {e}"),
        };
        Ok(serde_json::Value::String(text))
    }
}
