pub mod client;

use std::time::Instant;

use tracing::{info, warn};

use crate::annotate::client::{DocContext, LlmClient};
use crate::core::config::LlmConfig;
use crate::core::error::AnnotateError;
use crate::core::types::StageReport;
use crate::pipeline::document::{DocType, Document};
use crate::pipeline::state::PipelineState;

/// Assemble the hierarchy context for one document: its parent's title,
/// the titles of its siblings, and the titles of its children.
pub fn doc_context(state: &PipelineState, doc: &Document) -> DocContext {
    let parent = doc
        .parent_id
        .as_ref()
        .and_then(|pid| state.documents.get(pid));
    let siblings = match parent {
        Some(parent_doc) => parent_doc
            .children_ids
            .iter()
            .filter(|id| **id != doc.id)
            .filter_map(|id| state.documents.get(id))
            .map(|d| d.title.clone())
            .collect(),
        None => Vec::new(),
    };
    let children = doc
        .children_ids
        .iter()
        .filter_map(|id| state.documents.get(id))
        .map(|d| d.title.clone())
        .collect();

    DocContext {
        title: doc.title.clone(),
        parent: parent.map(|d| d.title.clone()),
        siblings,
        children,
    }
}

/// Prepend a summary block and mark the document annotated.
pub fn apply_summary(doc: &mut Document, summary: &str) {
    doc.content = format!("## Summary\n\n{}\n\n---\n\n{}", summary, doc.content);
    doc.set_doc_type(DocType::Annotated);
    doc.set_meta_str("summary", summary);
}

/// Summarize every markdown document via the LLM.
///
/// Strictly non-fatal: any per-document failure (including the FAIL
/// sentinel) keeps the original body with `type` unchanged.
pub async fn annotate_stage(
    state: &mut PipelineState,
    http: &reqwest::Client,
    config: &LlmConfig,
) -> Result<StageReport, AnnotateError> {
    let started = Instant::now();
    let client = LlmClient::new(http.clone(), config)?;

    let ids: Vec<String> = state
        .documents
        .values()
        .filter(|d| d.doc_type() == Some(DocType::Markdown) && !d.content.is_empty())
        .map(|d| d.id.clone())
        .collect();

    let mut annotated = 0usize;
    let mut failed = 0usize;
    for id in &ids {
        let (context, body) = {
            let doc = &state.documents[id];
            (doc_context(state, doc), doc.content.clone())
        };
        match client.summarize(&body, &context).await {
            Ok(summary) => {
                if let Some(doc) = state.documents.get_mut(id) {
                    apply_summary(doc, &summary);
                    annotated += 1;
                }
            }
            Err(AnnotateError::SummaryFail) => {
                // Explicit decline: keep the original, not an error.
                info!("no summary for {id} (declined)");
            }
            Err(e) => {
                warn!("annotation failed for {id}: {e}");
                failed += 1;
            }
        }
    }

    state.build_hierarchy();
    info!(
        "Annotation complete: {}/{} summarized, {} failed",
        annotated,
        ids.len(),
        failed
    );
    Ok(StageReport {
        stage: "annotate".to_string(),
        processed: ids.len(),
        failed,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md_doc(id: &str, title: &str, parent: Option<&str>) -> Document {
        let mut doc = Document::new(id, format!("https://x.test/{id}"), title);
        doc.set_doc_type(DocType::Markdown);
        doc.content = format!("# {title}\n\nbody\n");
        doc.parent_id = parent.map(String::from);
        doc
    }

    #[test]
    fn context_collects_family_titles() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PipelineState::new("https://x.test", dir.path());
        state.add_document(md_doc("root", "Root", None));
        state.add_document(md_doc("a", "Alpha", Some("root")));
        state.add_document(md_doc("b", "Beta", Some("root")));
        state.add_document(md_doc("a1", "Alpha One", Some("a")));
        state.build_hierarchy();

        let ctx = doc_context(&state, &state.documents["a"]);
        assert_eq!(ctx.title, "Alpha");
        assert_eq!(ctx.parent.as_deref(), Some("Root"));
        assert_eq!(ctx.siblings, vec!["Beta".to_string()]);
        assert_eq!(ctx.children, vec!["Alpha One".to_string()]);
    }

    #[test]
    fn summary_is_prepended_and_type_flipped() {
        let mut doc = md_doc("a", "Alpha", None);
        apply_summary(&mut doc, "Explains the alpha module.");
        assert!(doc
            .content
            .starts_with("## Summary\n\nExplains the alpha module.\n\n---\n\n"));
        assert!(doc.content.contains("# Alpha"));
        assert_eq!(doc.doc_type(), Some(DocType::Annotated));
    }
}
