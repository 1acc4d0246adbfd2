pub mod stdio;
pub mod tooling;

use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use crate::core::error::ToolError;
use crate::core::types::QueryDocsRequest;
use crate::core::AppState;
use crate::tools;

/// Dispatch one tool call by name.
///
/// Each tool parses its own arguments from the JSON object and returns a
/// JSON result; failures come back as `ToolError` so the transport can map
/// them to JSON-RPC codes.
pub async fn call_tool(
    state: &Arc<AppState>,
    name: &str,
    arguments: Value,
) -> Result<Value, ToolError> {
    match name {
        "list_available_docs" => {
            let base_path = arguments
                .get("base_path")
                .and_then(|v| v.as_str())
                .map(String::from);
            let response = tools::list_available_docs(base_path.as_deref());
            serde_json::to_value(response)
                .map_err(|e| ToolError::Internal(format!("serialize response: {e}")))
        }
        "query_docs" => {
            let request: QueryDocsRequest = serde_json::from_value(arguments)
                .map_err(|e| ToolError::InvalidParams(e.to_string()))?;
            match tools::query_docs(state, &request).await {
                Ok(response) => serde_json::to_value(response)
                    .map_err(|e| ToolError::Internal(format!("serialize response: {e}"))),
                // Retrieval failures are returned as a structured object
                // with an empty sources list, not a transport error.
                Err(ToolError::Retrieval(reason)) => {
                    error!("query_docs failed: {reason}");
                    Ok(serde_json::json!({
                        "error": reason,
                        "answer": null,
                        "sources": [],
                        "source_count": 0
                    }))
                }
                Err(other) => Err(other),
            }
        }
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

/// Wrap a tool result in the MCP `tools/call` content envelope.
pub fn tool_result_envelope(result: &Value) -> Value {
    let text = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
    serde_json::json!({
        "content": [{"type": "text", "text": text}],
        "isError": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let state = Arc::new(AppState::new());
        let err = call_tool(&state, "nope", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
        assert_eq!(err.jsonrpc_code(), -32601);
    }

    #[tokio::test]
    async fn list_docs_never_errors() {
        let state = Arc::new(AppState::new());
        let dir = tempfile::tempdir().unwrap();
        let value = call_tool(
            &state,
            "list_available_docs",
            serde_json::json!({"base_path": dir.path().to_str().unwrap()}),
        )
        .await
        .unwrap();
        assert_eq!(value["count"], 0);
    }

    #[tokio::test]
    async fn query_docs_with_bad_params_is_invalid() {
        let state = Arc::new(AppState::new());
        let err = call_tool(&state, "query_docs", serde_json::json!({"question": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn query_docs_on_missing_index_returns_structured_error() {
        let state = Arc::new(AppState::new());
        let value = call_tool(
            &state,
            "query_docs",
            serde_json::json!({
                "question": "how?",
                "persist_dir": "/definitely/not/here"
            }),
        )
        .await
        .unwrap();
        assert!(value["error"].is_string());
        assert_eq!(value["source_count"], 0);
    }

    #[test]
    fn envelope_wraps_text_content() {
        let wrapped = tool_result_envelope(&serde_json::json!({"count": 1}));
        assert_eq!(wrapped["isError"], false);
        assert!(wrapped["content"][0]["text"].as_str().unwrap().contains("count"));
    }
}
