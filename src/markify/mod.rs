pub mod cleaner;
pub mod convert;
pub mod dedup;

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::core::types::StageReport;
use crate::markify::convert::estimate_tokens;
use crate::markify::dedup::{dedupe_across_documents, dedupe_sections, ParagraphDeduper};
use crate::pipeline::document::{DocType, Document};
use crate::pipeline::state::PipelineState;

/// Worker-pool width for the CPU-bound conversion work.
const MARKIFY_CONCURRENCY: usize = 4;

/// Convert one HTML document in place.
///
/// A cleaner failure substitutes the "Error Processing Page" body and
/// records `conversion_error`; the raw HTML stays recoverable on disk, so
/// a later run can redo the stage.
pub fn process_document(mut doc: Document, deduper: &ParagraphDeduper) -> Document {
    if doc.doc_type() != Some(DocType::Html) || doc.content.is_empty() {
        return doc;
    }

    let html_size = doc.content.len() as i64;
    match cleaner::clean_html(&doc.content, &doc.url) {
        Ok(fragment) => {
            let markdown = convert::to_markdown(&fragment, &doc.url);
            let markdown = deduper.filter(&markdown);
            let markdown = dedupe_sections(&markdown);
            doc.set_meta_i64("html_size", html_size);
            doc.set_meta_i64("markdown_size", markdown.len() as i64);
            doc.set_meta_i64("token_count", estimate_tokens(&markdown) as i64);
            doc.content = markdown;
            doc.set_doc_type(DocType::Markdown);
        }
        Err(e) => {
            warn!("cleaner failed for {}: {e}", doc.url);
            doc.set_meta_str("conversion_error", e.to_string());
            doc.set_meta_i64("html_size", html_size);
            doc.content = format!(
                "# Error Processing Page\n\nThe page at {} could not be converted.\n",
                doc.url
            );
            doc.set_doc_type(DocType::Markdown);
        }
    }
    doc
}

/// Convert every HTML document to Markdown, then collapse duplicate
/// documents site-wide and rebuild the hierarchy.
pub async fn markify_stage(state: &mut PipelineState) -> StageReport {
    let started = Instant::now();
    let deduper = Arc::new(ParagraphDeduper::new());

    let docs: Vec<Document> = state.documents.drain().map(|(_, d)| d).collect();
    let total = docs.len();

    let converted: Vec<Document> = stream::iter(docs)
        .map(|doc| {
            let deduper = Arc::clone(&deduper);
            async move {
                tokio::task::spawn_blocking(move || process_document(doc, &deduper))
                    .await
                    .expect("markify worker panicked")
            }
        })
        .buffered(MARKIFY_CONCURRENCY)
        .collect()
        .await;

    let failed = converted
        .iter()
        .filter(|d| d.metadata.contains_key("conversion_error"))
        .count();
    for doc in converted {
        state.add_document(doc);
    }

    apply_cross_document_dedup(state);
    state.build_hierarchy();

    info!(
        "Markdown conversion complete: {} documents, {} failed",
        state.documents.len(),
        failed
    );
    StageReport {
        stage: "markify".to_string(),
        processed: total,
        failed,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Body used for duplicate comparison: everything after the provenance
/// comment, which is unique per document by construction.
fn comparable_body(content: &str) -> &str {
    match content.strip_prefix("<!-- Source:") {
        Some(rest) => rest.split_once("-->").map(|(_, body)| body).unwrap_or(rest),
        None => content,
    }
}

fn apply_cross_document_dedup(state: &mut PipelineState) {
    let comparable: Vec<(String, String)> = state
        .documents
        .values()
        .filter(|d| d.doc_type() == Some(DocType::Markdown) && !d.content.is_empty())
        .map(|d| (d.id.clone(), comparable_body(&d.content).trim().to_string()))
        .collect();
    if comparable.len() < 2 {
        return;
    }

    let outcome = dedupe_across_documents(&comparable);
    if outcome.dropped.is_empty() {
        return;
    }

    // Chase replacement chains (exact-dup winner may itself be a near-dup).
    let resolve = |id: &str| -> String {
        let mut current = id.to_string();
        let mut hops = 0;
        while let Some(next) = outcome.dropped.get(&current) {
            current = next.clone();
            hops += 1;
            if hops > outcome.dropped.len() {
                break;
            }
        }
        current
    };

    for (dropped_id, _) in &outcome.dropped {
        let kept_id = resolve(dropped_id);
        if let Some(doc) = state.documents.remove(dropped_id) {
            info!("dropping duplicate document {} (kept {})", dropped_id, kept_id);
            state.url_map.insert(doc.url, kept_id.clone());
        }
        // Children of the dropped page re-attach to the kept page.
        for doc in state.documents.values_mut() {
            if doc.parent_id.as_deref() == Some(dropped_id.as_str()) {
                doc.parent_id = if doc.id == kept_id {
                    None
                } else {
                    Some(kept_id.clone())
                };
            }
        }
    }
}
