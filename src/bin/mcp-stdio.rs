//! MCP stdio entry point: JSON-RPC on stdin/stdout, logs on stderr.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    thinkmark::mcp::stdio::run().await
}
