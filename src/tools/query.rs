use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::annotate::client::LlmClient;
use crate::core::config::LlmConfig;
use crate::core::error::ToolError;
use crate::core::types::{QueryDocsRequest, QueryDocsResponse, SourceHit};
use crate::core::AppState;
use crate::index::retriever::{retrieve, RetrievalOptions};
use crate::index::store::VectorIndex;

/// Load an index through the shared cache so repeated queries against the
/// same docset skip disk entirely.
async fn load_cached_index(
    state: &Arc<AppState>,
    persist_dir: &str,
) -> Result<Arc<VectorIndex>, ToolError> {
    let key = Path::new(persist_dir)
        .canonicalize()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| persist_dir.to_string());

    state
        .index_cache
        .try_get_with(key.clone(), async {
            VectorIndex::load(Path::new(persist_dir)).await.map(Arc::new)
        })
        .await
        .map_err(|e| ToolError::Retrieval(format!("cannot load index at {persist_dir}: {e}")))
}

/// Run a retrieval query against a persisted index.
///
/// Answer synthesis is delegated to an opaque LLM engine; when no API key
/// is configured (or the engine fails) the response is sources-only.
pub async fn query_docs(
    state: &Arc<AppState>,
    request: &QueryDocsRequest,
) -> Result<QueryDocsResponse, ToolError> {
    if request.question.trim().is_empty() {
        return Err(ToolError::InvalidParams("question must not be empty".to_string()));
    }

    info!(
        "Querying index at {} ('{}', top_k={}, hybrid={})",
        request.persist_dir, request.question, request.top_k, request.use_hybrid_search
    );
    let index = load_cached_index(state, &request.persist_dir).await?;

    let options = RetrievalOptions {
        top_k: request.top_k,
        use_hybrid: request.use_hybrid_search,
        content_filter: request.content_filter.clone(),
        min_score: request.similarity_threshold,
    };
    let hits = retrieve(&index, state.embedder.as_ref(), &request.question, &options).await?;

    let sources: Vec<SourceHit> = hits
        .into_iter()
        .map(|hit| {
            let get = |key: &str| {
                hit.node
                    .metadata
                    .get(key)
                    .and_then(|v| v.as_str())
                    .map(String::from)
            };
            let section = get("parent_section").or_else(|| get("doc_section"));
            SourceHit {
                text: hit.node.text.clone(),
                score: hit.score,
                breadcrumb: get("breadcrumb"),
                section,
                file_path: get("file_path"),
                metadata: hit.node.metadata,
            }
        })
        .collect();

    // Answer synthesis is opaque and best-effort: without an API key (or
    // on any failure) the response is sources-only.
    let answer = match LlmClient::new(state.http_client.clone(), &LlmConfig::default()) {
        Ok(client) => {
            let excerpts: Vec<String> = sources.iter().map(|s| s.text.clone()).collect();
            match client.synthesize_answer(&request.question, &excerpts).await {
                Ok(answer) => Some(answer),
                Err(e) => {
                    debug!("no synthesized answer: {e}");
                    None
                }
            }
        }
        Err(_) => None,
    };

    let search_type = if request.use_hybrid_search { "hybrid" } else { "vector" };
    info!("Query complete. Found {} relevant chunks.", sources.len());
    Ok(QueryDocsResponse {
        answer,
        source_count: sources.len(),
        sources,
        search_type: search_type.to_string(),
    })
}
