use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Tool payloads — the JSON shapes exposed over the MCP surface
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ListDocsRequest {
    #[serde(default)]
    pub base_path: Option<String>,
}

/// One discovered documentation set (a directory holding a valid
/// `vector_index/`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsetInfo {
    pub name: String,
    pub path: String,
    pub relative_path: String,
    pub files: Vec<String>,
}

/// `list_available_docs` never raises; failures land in `error` with an
/// empty `docs` list.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ListDocsResponse {
    pub docs: Vec<DocsetInfo>,
    pub count: usize,
    pub base_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryDocsRequest {
    pub question: String,
    pub persist_dir: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default)]
    pub content_filter: Option<String>,
    #[serde(default = "default_use_hybrid")]
    pub use_hybrid_search: bool,
}

fn default_top_k() -> usize {
    3
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_use_hybrid() -> bool {
    true
}

/// One retrieved chunk with its provenance intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHit {
    pub text: String,
    pub score: f32,
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub breadcrumb: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryDocsResponse {
    /// Synthesized answer when a query engine is configured; sources-only
    /// responses leave it unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub sources: Vec<SourceHit>,
    pub source_count: usize,
    pub search_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Pipeline summaries returned by the CLI / ingest tooling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub processed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineReport {
    pub site_url: String,
    pub output_dir: String,
    pub documents: usize,
    pub stages: Vec<StageReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_index_dir: Option<String>,
}
