use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use arrow_array::{Array, Float32Array, RecordBatch, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chunker::ChunkNode;
use crate::core::error::PipelineError;

pub const DOCSTORE_FILE: &str = "docstore.json";
pub const INDEX_STORE_FILE: &str = "index_store.json";
pub const VECTOR_STORE_FILE: &str = "default_vector_store.json";
pub const LANCE_DIR: &str = "lance";
pub const LANCE_TABLE: &str = "chunks";

/// Index-level metadata persisted as `index_store.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub embed_model: String,
    pub dimension: usize,
    pub node_count: usize,
    pub created_at: String,
    pub source_dir: String,
}

/// A loaded vector index: node docstore, id→embedding map, and (when
/// available) the LanceDB table used for dense search.
///
/// The JSON sidecars are the portable artifact; the Lance table is the
/// query-optimized binary beside them. Docstore and vector store always
/// hold exactly the same id set.
pub struct VectorIndex {
    pub persist_dir: PathBuf,
    pub nodes: HashMap<String, ChunkNode>,
    pub embeddings: HashMap<String, Vec<f32>>,
    pub meta: IndexMeta,
    table: Option<lancedb::Table>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("persist_dir", &self.persist_dir)
            .field("nodes", &self.nodes.len())
            .field("dimension", &self.meta.dimension)
            .field("lance", &self.table.is_some())
            .finish()
    }
}

impl VectorIndex {
    pub fn new(
        persist_dir: PathBuf,
        nodes: HashMap<String, ChunkNode>,
        embeddings: HashMap<String, Vec<f32>>,
        meta: IndexMeta,
    ) -> Self {
        Self {
            persist_dir,
            nodes,
            embeddings,
            meta,
            table: None,
        }
    }

    pub(crate) fn set_table(&mut self, table: lancedb::Table) {
        self.table = Some(table);
    }

    /// Write the JSON sidecars. The caller is responsible for the Lance
    /// table.
    pub fn save_sidecars(&self) -> Result<(), PipelineError> {
        std::fs::create_dir_all(&self.persist_dir)?;
        let write_json = |name: &str, value: &serde_json::Value| -> Result<(), PipelineError> {
            let text = serde_json::to_string_pretty(value)
                .map_err(|e| PipelineError::Internal(format!("serialize {name}: {e}")))?;
            std::fs::write(self.persist_dir.join(name), text)?;
            Ok(())
        };

        let docstore = serde_json::to_value(&self.nodes)
            .map_err(|e| PipelineError::Internal(format!("docstore: {e}")))?;
        write_json(DOCSTORE_FILE, &docstore)?;

        let index_store = serde_json::to_value(&self.meta)
            .map_err(|e| PipelineError::Internal(format!("index_store: {e}")))?;
        write_json(INDEX_STORE_FILE, &index_store)?;

        let vector_store = serde_json::to_value(&self.embeddings)
            .map_err(|e| PipelineError::Internal(format!("vector_store: {e}")))?;
        write_json(VECTOR_STORE_FILE, &vector_store)?;
        Ok(())
    }

    /// Load an index from disk, verifying sidecar consistency.
    ///
    /// `docstore.json` is the minimum viable probe; mismatched id sets or
    /// embedding dimensions are corruption.
    pub async fn load(persist_dir: &Path) -> Result<Self, PipelineError> {
        let docstore_path = persist_dir.join(DOCSTORE_FILE);
        if !docstore_path.exists() {
            return Err(PipelineError::Index {
                dir: persist_dir.to_path_buf(),
                reason: format!("missing {DOCSTORE_FILE}"),
            });
        }
        let corrupt = |reason: String| PipelineError::Index {
            dir: persist_dir.to_path_buf(),
            reason,
        };

        let nodes: HashMap<String, ChunkNode> =
            serde_json::from_str(&std::fs::read_to_string(&docstore_path)?)
                .map_err(|e| corrupt(format!("unreadable {DOCSTORE_FILE}: {e}")))?;
        let meta: IndexMeta = serde_json::from_str(
            &std::fs::read_to_string(persist_dir.join(INDEX_STORE_FILE))
                .map_err(|e| corrupt(format!("missing {INDEX_STORE_FILE}: {e}")))?,
        )
        .map_err(|e| corrupt(format!("unreadable {INDEX_STORE_FILE}: {e}")))?;
        let embeddings: HashMap<String, Vec<f32>> = serde_json::from_str(
            &std::fs::read_to_string(persist_dir.join(VECTOR_STORE_FILE))
                .map_err(|e| corrupt(format!("missing {VECTOR_STORE_FILE}: {e}")))?,
        )
        .map_err(|e| corrupt(format!("unreadable {VECTOR_STORE_FILE}: {e}")))?;

        let node_ids: HashSet<&String> = nodes.keys().collect();
        let vector_ids: HashSet<&String> = embeddings.keys().collect();
        if node_ids != vector_ids {
            return Err(corrupt(format!(
                "docstore/vector_store id mismatch ({} vs {})",
                node_ids.len(),
                vector_ids.len()
            )));
        }
        if let Some(bad) = embeddings.values().find(|v| v.len() != meta.dimension) {
            return Err(corrupt(format!(
                "embedding dimension {} does not match index dimension {}",
                bad.len(),
                meta.dimension
            )));
        }

        let mut index = Self::new(persist_dir.to_path_buf(), nodes, embeddings, meta);

        // The Lance table is an optimization; a missing one degrades to a
        // flat scan over the sidecar vectors.
        let lance_dir = persist_dir.join(LANCE_DIR);
        if lance_dir.exists() {
            match open_lance_table(&lance_dir).await {
                Ok(table) => index.table = Some(table),
                Err(e) => warn!("lance table unavailable, using flat scan: {e}"),
            }
        }
        Ok(index)
    }

    /// Dense retrieval: cosine similarity, best first.
    pub async fn dense_search(&self, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
        if let Some(table) = &self.table {
            match lance_search(table, query, top_k).await {
                Ok(hits) => return hits,
                Err(e) => debug!("lance search failed, falling back to flat scan: {e}"),
            }
        }
        self.flat_search(query, top_k)
    }

    fn flat_search(&self, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .embeddings
            .iter()
            .map(|(id, v)| (id.clone(), cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

async fn open_lance_table(lance_dir: &Path) -> anyhow::Result<lancedb::Table> {
    let db = lancedb::connect(&lance_dir.to_string_lossy()).execute().await?;
    Ok(db.open_table(LANCE_TABLE).execute().await?)
}

async fn lance_search(
    table: &lancedb::Table,
    query: &[f32],
    top_k: usize,
) -> anyhow::Result<Vec<(String, f32)>> {
    let stream = table
        .query()
        .nearest_to(query)?
        .distance_type(lancedb::DistanceType::Cosine)
        .limit(top_k)
        .execute()
        .await?;
    let batches: Vec<RecordBatch> = stream.try_collect().await?;

    let mut hits = Vec::new();
    for batch in batches {
        let ids = batch
            .column_by_name("id")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("missing id column"))?;
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
        for row in 0..batch.num_rows() {
            let score = distances
                .map(|d| (1.0 - d.value(row)).clamp(-1.0, 1.0))
                .unwrap_or(0.0);
            hits.push((ids.value(row).to_string(), score));
        }
    }
    Ok(hits)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
