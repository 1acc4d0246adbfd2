use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow_array::types::Float32Type;
use arrow_array::{FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use serde_json::Value;
use tracing::{info, warn};

use crate::chunker::{chunk_markdown, ChunkNode, ChunkerConfig};
use crate::core::error::PipelineError;
use crate::index::embedder::Embedder;
use crate::index::store::{IndexMeta, VectorIndex, LANCE_DIR, LANCE_TABLE};
use crate::pipeline::hierarchy::HierarchyNode;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub chunk: ChunkerConfig,
    pub rebuild: bool,
}

/// Build (or reload) the vector index from an `annotated/` directory.
///
/// Rebuild semantics: with `rebuild=true`, or when the on-disk store turns
/// out to be unreadable, the persist directory is cleared and rebuilt once;
/// a failure of that rebuild surfaces.
pub async fn build_index(
    input_dir: &Path,
    persist_dir: &Path,
    hierarchy: Option<&HierarchyNode>,
    embedder: &dyn Embedder,
    embed_model_label: &str,
    options: &BuildOptions,
) -> Result<VectorIndex, PipelineError> {
    info!(
        "Building vector index from {} -> {} (rebuild={})",
        input_dir.display(),
        persist_dir.display(),
        options.rebuild
    );

    if !options.rebuild && persist_dir.join(crate::index::store::DOCSTORE_FILE).exists() {
        match VectorIndex::load(persist_dir).await {
            Ok(index) => {
                info!("Loaded existing index from {}", persist_dir.display());
                return Ok(index);
            }
            Err(e) => warn!("Existing index unreadable ({e}); rebuilding"),
        }
    }

    clear_dir(persist_dir)?;
    std::fs::create_dir_all(persist_dir)?;

    // Deterministic file order keeps node positions stable across runs.
    let mut md_files: Vec<std::path::PathBuf> = std::fs::read_dir(input_dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
        .collect();
    md_files.sort();

    let mut nodes: HashMap<String, ChunkNode> = HashMap::new();
    let mut embeddings: HashMap<String, Vec<f32>> = HashMap::new();
    let dimension = embedder.dimension().await.map_err(|e| PipelineError::Index {
        dir: persist_dir.to_path_buf(),
        reason: format!("embedding provider unavailable: {e}"),
    })?;

    for path in &md_files {
        let raw = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("skipping unreadable {}: {e}", path.display());
                continue;
            }
        };
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.md")
            .to_string();
        let (front, body) = parse_frontmatter(&raw);

        let mut base_metadata: HashMap<String, Value> = HashMap::new();
        base_metadata.insert("file_path".to_string(), Value::String(filename.clone()));
        for key in ["title", "url", "site_name"] {
            if let Some(v) = front.get(key) {
                base_metadata.insert(key.to_string(), Value::String(v.clone()));
            }
        }

        // Provenance comments stay out of both the chunks and the
        // embeddings; the source URL already lives in metadata.
        let body = strip_provenance(body);
        for mut node in chunk_markdown(&body, &base_metadata, &options.chunk) {
            enrich_node(&mut node, &filename, front.get("title"), hierarchy);
            let vector = embedder.embed(&node.text).await.map_err(|e| {
                PipelineError::Index {
                    dir: persist_dir.to_path_buf(),
                    reason: format!("embedding failed: {e}"),
                }
            })?;
            if vector.len() != dimension {
                return Err(PipelineError::Index {
                    dir: persist_dir.to_path_buf(),
                    reason: format!(
                        "embedding dimension mismatch: expected {dimension}, got {}",
                        vector.len()
                    ),
                });
            }
            embeddings.insert(node.id.clone(), vector);
            nodes.insert(node.id.clone(), node);
        }
    }

    if nodes.is_empty() {
        return Err(PipelineError::Index {
            dir: persist_dir.to_path_buf(),
            reason: format!("no markdown documents found in {}", input_dir.display()),
        });
    }
    info!("Generated {} nodes from {} documents", nodes.len(), md_files.len());

    let meta = IndexMeta {
        embed_model: embed_model_label.to_string(),
        dimension,
        node_count: nodes.len(),
        created_at: chrono::Utc::now().to_rfc3339(),
        source_dir: input_dir.display().to_string(),
    };
    let mut index = VectorIndex::new(persist_dir.to_path_buf(), nodes, embeddings, meta);
    index.save_sidecars()?;

    match write_lance_table(persist_dir, &index).await {
        Ok(table) => index.set_table(table),
        // The sidecars alone are a complete index; dense search degrades
        // to a flat scan.
        Err(e) => warn!("lance table creation failed, continuing with sidecars only: {e}"),
    }

    Ok(index)
}

/// Load a persisted index without rebuilding.
pub async fn load_index(persist_dir: &Path) -> Result<VectorIndex, PipelineError> {
    VectorIndex::load(persist_dir).await
}

fn clear_dir(dir: &Path) -> Result<(), PipelineError> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Split a `---`-delimited frontmatter block off a markdown body.
pub fn parse_frontmatter(content: &str) -> (HashMap<String, String>, &str) {
    let mut fields = HashMap::new();
    let Some(rest) = content.strip_prefix("---\n") else {
        return (fields, content);
    };
    let Some(end) = rest.find("\n---\n") else {
        return (fields, content);
    };
    for line in rest[..end].lines() {
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    let body = &rest[end + 5..];
    (fields, body.trim_start_matches('\n'))
}

fn strip_provenance(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("<!-- Source:"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fold hierarchy context into one chunk's metadata: full breadcrumb,
/// section depth, parent section, and the top-level doc section.
fn enrich_node(
    node: &mut ChunkNode,
    filename: &str,
    doc_title: Option<&String>,
    hierarchy: Option<&HierarchyNode>,
) {
    let doc_crumb = hierarchy
        .and_then(|h| breadcrumb_for_page(h, filename))
        .unwrap_or_else(|| doc_title.cloned().map(|t| vec![t]).unwrap_or_default());

    let section_crumb = node
        .metadata
        .get("breadcrumb")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let mut parts = doc_crumb.clone();
    if !section_crumb.is_empty() {
        parts.push(section_crumb);
    }
    let breadcrumb = parts.join(" > ");

    let parent_section = node
        .metadata
        .get("heading")
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| doc_crumb.last().cloned())
        .unwrap_or_default();
    let doc_section = doc_crumb
        .first()
        .cloned()
        .or_else(|| doc_title.cloned())
        .unwrap_or_else(|| "Documentation".to_string());

    node.metadata
        .insert("breadcrumb".to_string(), Value::String(breadcrumb));
    node.metadata
        .insert("section_depth".to_string(), Value::from(doc_crumb.len() as i64));
    node.metadata
        .insert("parent_section".to_string(), Value::String(parent_section));
    node.metadata
        .insert("doc_section".to_string(), Value::String(doc_section));
}

/// Title path from the hierarchy root down to the node whose `page`
/// matches `filename`; the synthetic root is excluded.
fn breadcrumb_for_page(root: &HierarchyNode, filename: &str) -> Option<Vec<String>> {
    fn walk(node: &HierarchyNode, filename: &str, path: &mut Vec<String>) -> Option<Vec<String>> {
        if node.page.as_deref() == Some(filename) {
            let mut full = path.clone();
            full.push(node.title.clone());
            return Some(full);
        }
        if node.page.is_some() || node.id.is_some() {
            path.push(node.title.clone());
        }
        for child in &node.children {
            if let Some(found) = walk(child, filename, path) {
                return Some(found);
            }
        }
        if node.page.is_some() || node.id.is_some() {
            path.pop();
        }
        None
    }
    let mut path = Vec::new();
    walk(root, filename, &mut path)
}

async fn write_lance_table(
    persist_dir: &Path,
    index: &VectorIndex,
) -> anyhow::Result<lancedb::Table> {
    let lance_dir = persist_dir.join(LANCE_DIR);
    let db = lancedb::connect(&lance_dir.to_string_lossy()).execute().await?;

    let vector_len: i32 = index
        .meta
        .dimension
        .try_into()
        .map_err(|_| anyhow::anyhow!("embedding dimension too large"))?;
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_len),
            true,
        ),
    ]));

    // Stable row order so rebuilt tables are comparable.
    let mut ids: Vec<&String> = index.embeddings.keys().collect();
    ids.sort();
    let id_array = StringArray::from(ids.iter().map(|s| s.as_str()).collect::<Vec<_>>());
    let vector_array = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
        ids.iter().map(|id| {
            Some(
                index.embeddings[id.as_str()]
                    .iter()
                    .map(|v| Some(*v))
                    .collect::<Vec<_>>(),
            )
        }),
        vector_len,
    );
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(id_array), Arc::new(vector_array)],
    )?;

    let table = db
        .create_empty_table(LANCE_TABLE, schema.clone())
        .execute()
        .await?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema);
    table.add(batches).execute().await?;

    // Flat search still works if index creation is unsupported for the
    // table size.
    if let Err(e) = table
        .create_index(&["vector"], lancedb::index::Index::Auto)
        .execute()
        .await
    {
        tracing::debug!("lance create_index skipped: {e}");
    }
    Ok(table)
}
