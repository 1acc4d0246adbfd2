use std::path::PathBuf;
use thiserror::Error;

/// Stage-level failure taxonomy.
///
/// Per-document failures never surface as these; stages log and continue.
/// A `PipelineError` escaping a stage means the whole run cannot proceed
/// (bad config, or an index rebuild that failed twice).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Startup-only: missing storage path, invalid URL, unreadable config.
    #[error("configuration error: {0}")]
    Config(String),

    /// Per-URL network failure that was promoted to fatal (start URL only).
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// Vector index corruption that survived one rebuild attempt.
    #[error("vector index error at {dir}: {reason}")]
    Index { dir: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl PipelineError {
    /// CLI exit code: 1 for user/config errors, 2 for runtime failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => 1,
            _ => 2,
        }
    }
}

/// Annotation failures are non-fatal; the orchestrator maps every variant
/// to "keep the original document".
#[derive(Debug, Error)]
pub enum AnnotateError {
    /// The summarizer returned its FAIL sentinel.
    #[error("summarizer declined the document")]
    SummaryFail,

    #[error("no API key configured for annotation")]
    MissingApiKey,

    #[error("llm request failed: {0}")]
    Request(String),
}

/// Errors surfaced through the tool dispatch registry.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    /// JSON-RPC error code for the stdio transport.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            ToolError::UnknownTool(_) => -32601,
            ToolError::InvalidParams(_) => -32602,
            ToolError::Retrieval(_) | ToolError::Internal(_) => -32603,
        }
    }
}
