use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::config::claude_desktop_mode;
use crate::core::AppState;
use crate::mcp::{call_tool, tool_result_envelope, tooling};

#[derive(Clone)]
pub struct McpService {
    pub state: Arc<AppState>,
}

impl McpService {
    pub fn new() -> Self {
        // stdout belongs to JSON-RPC; logs go to stderr.
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init()
            .ok();

        info!("Starting MCP service");
        Self {
            state: Arc::new(AppState::new()),
        }
    }
}

impl Default for McpService {
    fn default() -> Self {
        Self::new()
    }
}

fn jsonrpc_error(id: &Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message.into()
        }
    })
}

fn jsonrpc_result(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

async fn handle_tools_call(service: &McpService, id: &Value, params: &Value) -> Value {
    let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
        return jsonrpc_error(id, -32602, "Missing required field: params.name");
    };
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| json!({}));

    match call_tool(&service.state, name, arguments).await {
        Ok(result) => jsonrpc_result(id, tool_result_envelope(&result)),
        Err(e) => jsonrpc_error(id, e.jsonrpc_code(), e.to_string()),
    }
}

type SharedWriter = Arc<Mutex<tokio::io::Stdout>>;

async fn write_response(stdout: &SharedWriter, response: &Value) -> anyhow::Result<()> {
    let out = serde_json::to_string(response).unwrap_or_else(|e| {
        serde_json::to_string(&jsonrpc_error(&Value::Null, -32603, format!("serialize error: {e}")))
            .unwrap_or_else(|_| {
                "{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{\"code\":-32603,\"message\":\"serialize error\"}}"
                    .to_string()
            })
    });
    let mut stdout = stdout.lock().await;
    stdout.write_all(out.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

/// JSON-RPC loop over stdin/stdout.
///
/// Tool calls normally run on spawned tasks so a slow query cannot block
/// `tools/list`; `THINKMARK_CLAUDE_DESKTOP=1` forces synchronous in-loop
/// dispatch for clients that cannot handle interleaved responses.
pub async fn run() -> anyhow::Result<()> {
    let service = McpService::new();
    let synchronous = claude_desktop_mode();
    info!(
        "MCP stdio server initialized (dispatch: {}); waiting for client session",
        if synchronous { "sync" } else { "concurrent" }
    );

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let stdout: SharedWriter = Arc::new(Mutex::new(tokio::io::stdout()));

    let mut has_initialize = false;
    let mut is_initialized = false;
    let mut shutdown_requested = false;

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(msg) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };

        let method = msg.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let id = msg.get("id").cloned().unwrap_or(Value::Null);
        let is_request = msg.get("id").is_some();
        let params = msg.get("params").cloned().unwrap_or(Value::Null);

        // Notifications
        if !is_request {
            match method {
                "initialized" | "notifications/initialized" => {
                    has_initialize = true;
                    is_initialized = true;
                    continue;
                }
                "exit" => {
                    if shutdown_requested {
                        break;
                    }
                    continue;
                }
                _ => continue,
            }
        }

        // Requests
        match method {
            "initialize" => {
                has_initialize = true;
                let response = jsonrpc_result(
                    &id,
                    json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {}},
                        "serverInfo": {
                            "name": "thinkmark",
                            "title": "ThinkMark Documentation Tools",
                            "version": env!("CARGO_PKG_VERSION")
                        }
                    }),
                );
                write_response(&stdout, &response).await?;
            }
            "shutdown" => {
                shutdown_requested = true;
                write_response(&stdout, &jsonrpc_result(&id, Value::Null)).await?;
            }
            "tools/list" => {
                let response = if !has_initialize || !is_initialized {
                    jsonrpc_error(&id, -32002, "Server not initialized")
                } else {
                    jsonrpc_result(&id, tooling::tools_list_json())
                };
                write_response(&stdout, &response).await?;
            }
            "tools/call" => {
                if !has_initialize || !is_initialized {
                    write_response(&stdout, &jsonrpc_error(&id, -32002, "Server not initialized"))
                        .await?;
                    continue;
                }
                if synchronous {
                    let response = handle_tools_call(&service, &id, &params).await;
                    write_response(&stdout, &response).await?;
                } else {
                    let service = service.clone();
                    let stdout = Arc::clone(&stdout);
                    tokio::spawn(async move {
                        let response = handle_tools_call(&service, &id, &params).await;
                        if let Err(e) = write_response(&stdout, &response).await {
                            warn!("failed to write tool response: {e}");
                        }
                    });
                }
            }
            other => {
                write_response(
                    &stdout,
                    &jsonrpc_error(&id, -32601, format!("Method not found: {other}")),
                )
                .await?;
            }
        }
    }

    warn!("MCP stdio server stopped");
    Ok(())
}
