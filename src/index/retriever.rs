use std::collections::HashMap;

use tracing::debug;

use crate::chunker::ChunkNode;
use crate::core::error::ToolError;
use crate::index::bm25::Bm25Index;
use crate::index::embedder::Embedder;
use crate::index::store::VectorIndex;

/// Reciprocal-rank-fusion constant; the literature default.
pub const RRF_C: f32 = 60.0;

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub use_hybrid: bool,
    /// Equality filter on `metadata["content_type"]`.
    pub content_filter: Option<String>,
    /// Minimum (normalized) score for a hit to survive.
    pub min_score: f32,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 3,
            use_hybrid: true,
            content_filter: None,
            min_score: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievedNode {
    pub node: ChunkNode,
    pub score: f32,
}

/// Dense + BM25 retrieval with reciprocal rank fusion.
///
/// Each retriever contributes `1/(rank + C)` per node; fused scores are
/// normalized so a node ranked first by every retriever scores 1.0, which
/// keeps user-facing thresholds meaningful. With `use_hybrid=false` the
/// BM25 leg and fusion are skipped and raw cosine similarity is the score.
pub async fn retrieve(
    index: &VectorIndex,
    embedder: &dyn Embedder,
    question: &str,
    options: &RetrievalOptions,
) -> Result<Vec<RetrievedNode>, ToolError> {
    let top_k = options.top_k.max(1);

    let query_vec = embedder
        .embed(question)
        .await
        .map_err(|e| ToolError::Retrieval(format!("query embedding failed: {e}")))?;
    let dense = index.dense_search(&query_vec, top_k).await;

    let fused: Vec<(String, f32)> = if options.use_hybrid {
        let bm25 = Bm25Index::build(
            index
                .nodes
                .iter()
                .map(|(id, node)| (id, node.text.as_str())),
        );
        let sparse = bm25.search(question, top_k);
        debug!(
            "hybrid retrieval: {} dense hits, {} sparse hits",
            dense.len(),
            sparse.len()
        );
        fuse_reciprocal_rank(&[dense, sparse], top_k)
    } else {
        dense
    };

    let mut results = Vec::new();
    for (id, score) in fused {
        if score < options.min_score {
            continue;
        }
        let Some(node) = index.nodes.get(&id) else {
            continue;
        };
        if let Some(filter) = &options.content_filter {
            let matches = node
                .metadata
                .get("content_type")
                .and_then(|v| v.as_str())
                .map(|ct| ct == filter)
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }
        results.push(RetrievedNode {
            node: node.clone(),
            score,
        });
    }
    results.truncate(top_k);
    Ok(results)
}

/// Sum `1/(rank + C)` across ranked lists, normalized by the best score a
/// node could reach (first place in every list). Rank is 1-based.
pub fn fuse_reciprocal_rank(lists: &[Vec<(String, f32)>], top_k: usize) -> Vec<(String, f32)> {
    let active = lists.iter().filter(|l| !l.is_empty()).count().max(1);
    let max_possible = active as f32 / (1.0 + RRF_C);

    let mut fused: HashMap<&str, f32> = HashMap::new();
    for list in lists {
        for (rank, (id, _)) in list.iter().enumerate() {
            *fused.entry(id.as_str()).or_insert(0.0) += 1.0 / (rank as f32 + 1.0 + RRF_C);
        }
    }

    let mut scored: Vec<(String, f32)> = fused
        .into_iter()
        .map(|(id, score)| (id.to_string(), score / max_possible))
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(ids: &[&str]) -> Vec<(String, f32)> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| (id.to_string(), 1.0 - i as f32 * 0.1))
            .collect()
    }

    #[test]
    fn node_ranked_first_everywhere_scores_one() {
        let fused = fuse_reciprocal_rank(&[list(&["a", "b"]), list(&["a", "c"])], 3);
        assert_eq!(fused[0].0, "a");
        assert!((fused[0].1 - 1.0).abs() < 1e-6);
        assert!(fused[1].1 < 1.0);
    }

    #[test]
    fn agreement_beats_single_list_rank() {
        // "b" is second in both lists; "x"/"y" are first in one each.
        let fused = fuse_reciprocal_rank(&[list(&["x", "b"]), list(&["y", "b"])], 4);
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn empty_lists_are_ignored() {
        let fused = fuse_reciprocal_rank(&[list(&["a"]), Vec::new()], 3);
        assert_eq!(fused[0].0, "a");
        assert!((fused[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn fusion_is_deterministic_on_ties() {
        let a = fuse_reciprocal_rank(&[list(&["b", "a"]), list(&["a", "b"])], 2);
        let b = fuse_reciprocal_rank(&[list(&["b", "a"]), list(&["a", "b"])], 2);
        assert_eq!(a, b);
    }
}
