use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::error::PipelineError;
use crate::pipeline::document::{DocType, Document};
use crate::pipeline::hierarchy::{build_tree, render_llms_txt, HierarchyNode, PageInfo};

/// One line of `urls_map.jsonl`.
#[derive(Debug, Serialize, Deserialize)]
struct UrlMapEntry {
    url: String,
    id: String,
}

/// Sidecar written next to each document body.
#[derive(Debug, Serialize, Deserialize)]
struct DocMeta {
    title: String,
    url: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    children_ids: Vec<String>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

/// Full in-memory + on-disk representation of one site's ingestion.
///
/// Mutated in place by each stage and persisted between stages, so a crash
/// after stage N lets a later run resume at stage N+1.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub site_url: String,
    pub output_dir: PathBuf,
    pub documents: HashMap<String, Document>,
    /// url → id; a bijection after normalization.
    pub url_map: HashMap<String, String>,
    pub hierarchy: Option<HierarchyNode>,
}

impl PipelineState {
    pub fn new(site_url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            site_url: site_url.into(),
            output_dir: output_dir.into(),
            documents: HashMap::new(),
            url_map: HashMap::new(),
            hierarchy: None,
        }
    }

    pub fn content_dir(&self) -> PathBuf {
        self.output_dir.join("content")
    }

    pub fn annotated_dir(&self) -> PathBuf {
        self.output_dir.join("annotated")
    }

    pub fn vector_index_dir(&self) -> PathBuf {
        self.output_dir.join("vector_index")
    }

    /// Insert a document; an existing id is replaced and the URL map is
    /// kept in sync.
    pub fn add_document(&mut self, doc: Document) {
        self.url_map.insert(doc.url.clone(), doc.id.clone());
        self.documents.insert(doc.id.clone(), doc);
    }

    pub fn get_by_url(&self, url: &str) -> Option<&Document> {
        self.url_map.get(url).and_then(|id| self.documents.get(id))
    }

    /// Best-effort site identity for a state loaded without one: the
    /// origin of any stored URL.
    pub fn infer_site_url(&self) -> Option<String> {
        let url = self.url_map.keys().next()?;
        let parsed = url::Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        Some(format!("{}://{}/", parsed.scheme(), host))
    }

    /// Rebuild the hierarchy tree from parent edges, restoring the
    /// `parent_id` / `children_ids` mirror invariant along the way.
    pub fn build_hierarchy(&mut self) -> &HierarchyNode {
        // Drop dangling parent references, then recompute child lists.
        let known: Vec<String> = self.documents.keys().cloned().collect();
        for doc in self.documents.values_mut() {
            let drop_edge = match &doc.parent_id {
                Some(pid) => pid == &doc.id || !known.contains(pid),
                None => false,
            };
            if drop_edge {
                doc.parent_id = None;
            }
            doc.children_ids.clear();
        }
        let edges: Vec<(String, String)> = self
            .documents
            .values()
            .filter_map(|d| d.parent_id.clone().map(|p| (d.id.clone(), p)))
            .collect();
        for (child, parent) in &edges {
            if let Some(parent_doc) = self.documents.get_mut(parent) {
                parent_doc.children_ids.push(child.clone());
            }
        }
        for doc in self.documents.values_mut() {
            doc.children_ids.sort();
        }

        let pages: HashMap<String, PageInfo> = self
            .documents
            .values()
            .map(|d| {
                (
                    d.id.clone(),
                    PageInfo {
                        title: d.title.clone(),
                        url: d.url.clone(),
                        page: d.filename(),
                    },
                )
            })
            .collect();
        let edge_map: HashMap<String, String> = edges.into_iter().collect();
        self.hierarchy.insert(build_tree(&pages, &edge_map))
    }

    /// Persist everything under `output_dir`. Idempotent; safe to call
    /// between stages.
    pub fn save(&self) -> Result<(), PipelineError> {
        std::fs::create_dir_all(&self.output_dir)?;
        // Rewrite the per-document directories from scratch so documents
        // dropped by deduplication cannot resurface on the next load.
        for dir in [self.content_dir(), self.annotated_dir()] {
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
        }
        std::fs::create_dir_all(self.content_dir())?;

        if let Some(h) = &self.hierarchy {
            let json = serde_json::to_string_pretty(h)
                .map_err(|e| PipelineError::Internal(format!("hierarchy serialize: {e}")))?;
            std::fs::write(self.output_dir.join("hierarchy.json"), json)?;

            // Auxiliary outline; failure to write it never fails the save.
            let llms = render_llms_txt(&self.site_url, h);
            if let Err(e) = std::fs::write(self.output_dir.join("llms.txt"), llms) {
                debug!("llms.txt write skipped: {e}");
            }
        }

        let mut entries: Vec<UrlMapEntry> = self
            .url_map
            .iter()
            .map(|(url, id)| UrlMapEntry {
                url: url.clone(),
                id: id.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.url.cmp(&b.url));
        let mut jsonl = std::fs::File::create(self.output_dir.join("urls_map.jsonl"))?;
        for entry in &entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| PipelineError::Internal(format!("urls_map serialize: {e}")))?;
            writeln!(jsonl, "{line}")?;
        }

        let content_dir = self.content_dir();
        let annotated_dir = self.annotated_dir();
        let mut wrote_annotated = false;
        for doc in self.documents.values() {
            let meta = DocMeta {
                title: doc.title.clone(),
                url: doc.url.clone(),
                parent_id: doc.parent_id.clone(),
                children_ids: doc.children_ids.clone(),
                metadata: doc.metadata.clone(),
            };
            let meta_json = serde_json::to_string_pretty(&meta)
                .map_err(|e| PipelineError::Internal(format!("meta serialize: {e}")))?;
            std::fs::write(content_dir.join(format!("{}.meta.json", doc.id)), meta_json)?;

            // Empty content means "skip body serialization".
            if !doc.content.is_empty() {
                std::fs::write(content_dir.join(doc.filename()), &doc.content)?;
            }

            if !doc.content.is_empty()
                && matches!(doc.doc_type(), Some(DocType::Markdown) | Some(DocType::Annotated))
            {
                if !wrote_annotated {
                    std::fs::create_dir_all(&annotated_dir)?;
                    wrote_annotated = true;
                }
                let frontmatter = format!(
                    "---\ntitle: {}\nurl: {}\nsite_name: {}\n---\n\n",
                    doc.title, doc.url, self.site_url
                );
                std::fs::write(
                    annotated_dir.join(doc.filename()),
                    format!("{frontmatter}{}", doc.content),
                )?;
            }
        }
        Ok(())
    }

    /// Reconstruct a state from disk. Missing files yield empty
    /// substructures rather than errors.
    pub fn load(site_url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        let mut state = PipelineState::new(site_url, output_dir);

        let urls_map_path = state.output_dir.join("urls_map.jsonl");
        if let Ok(file) = std::fs::File::open(&urls_map_path) {
            for line in BufReader::new(file).lines().map_while(Result::ok) {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<UrlMapEntry>(&line) {
                    Ok(entry) => {
                        state.url_map.insert(entry.url, entry.id);
                    }
                    Err(e) => warn!("skipping corrupt urls_map line: {e}"),
                }
            }
        }

        let hierarchy_path = state.output_dir.join("hierarchy.json");
        if let Ok(contents) = std::fs::read_to_string(&hierarchy_path) {
            match serde_json::from_str::<HierarchyNode>(&contents) {
                Ok(h) => state.hierarchy = Some(h),
                Err(e) => warn!("skipping corrupt hierarchy.json: {e}"),
            }
        }

        let content_dir = state.content_dir();
        if let Ok(read_dir) = std::fs::read_dir(&content_dir) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some(id) = name.strip_suffix(".meta.json") else {
                    continue;
                };
                let Ok(raw) = std::fs::read_to_string(&path) else {
                    continue;
                };
                let meta: DocMeta = match serde_json::from_str(&raw) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("skipping corrupt {name}: {e}");
                        continue;
                    }
                };
                let content =
                    std::fs::read_to_string(content_dir.join(format!("{id}.md"))).unwrap_or_default();
                let doc = Document {
                    id: id.to_string(),
                    url: meta.url,
                    title: meta.title,
                    content,
                    metadata: meta.metadata,
                    parent_id: meta.parent_id,
                    children_ids: meta.children_ids,
                };
                state.url_map.insert(doc.url.clone(), doc.id.clone());
                state.documents.insert(doc.id.clone(), doc);
            }
        }

        state
    }
}

/// Remove `_temp_*` scratch directories left by interrupted runs.
pub fn cleanup_temp_dirs(dir: &Path) -> Result<usize, PipelineError> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_dir() && name.starts_with("_temp") {
            std::fs::remove_dir_all(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::urls::url_to_id;

    fn sample_doc(id: &str, url: &str, title: &str, parent: Option<&str>) -> Document {
        let mut doc = Document::new(id, url, title);
        doc.set_doc_type(DocType::Markdown);
        doc.content = format!("# {title}\n\nBody of {title}.\n");
        doc.parent_id = parent.map(|p| p.to_string());
        doc
    }

    #[test]
    fn save_load_round_trips_documents_and_maps() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PipelineState::new("https://x.test", dir.path());

        let root_id = url_to_id("https://x.test/");
        let child_id = url_to_id("https://x.test/a");
        state.add_document(sample_doc(&root_id, "https://x.test/", "Home", None));
        state.add_document(sample_doc(&child_id, "https://x.test/a", "A", Some(&root_id)));
        state.build_hierarchy();
        state.save().unwrap();

        let loaded = PipelineState::load("https://x.test", dir.path());
        assert_eq!(loaded.documents.len(), 2);
        assert_eq!(loaded.url_map, state.url_map);
        assert_eq!(loaded.hierarchy, state.hierarchy);

        let child = &loaded.documents[&child_id];
        assert_eq!(child.parent_id.as_deref(), Some(root_id.as_str()));
        assert_eq!(child.content, state.documents[&child_id].content);

        let root = &loaded.documents[&root_id];
        assert_eq!(root.children_ids, vec![child_id.clone()]);
    }

    #[test]
    fn save_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PipelineState::new("https://x.test", dir.path());
        state.add_document(sample_doc("a", "https://x.test/a", "A", None));
        state.build_hierarchy();
        state.save().unwrap();
        state.save().unwrap();

        let loaded = PipelineState::load("https://x.test", dir.path());
        assert_eq!(loaded.documents.len(), 1);
    }

    #[test]
    fn annotated_docs_get_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PipelineState::new("https://x.test", dir.path());
        state.add_document(sample_doc("a", "https://x.test/a", "A", None));
        state.build_hierarchy();
        state.save().unwrap();

        let annotated = std::fs::read_to_string(dir.path().join("annotated/a.md")).unwrap();
        assert!(annotated.starts_with("---\ntitle: A\nurl: https://x.test/a\nsite_name: https://x.test\n---\n\n"));
        assert!(annotated.contains("# A"));
    }

    #[test]
    fn empty_content_skips_body_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = PipelineState::new("https://x.test", dir.path());
        let mut doc = Document::new("empty", "https://x.test/empty", "Empty");
        doc.set_doc_type(DocType::Markdown);
        state.add_document(doc);
        state.save().unwrap();

        assert!(!dir.path().join("content/empty.md").exists());
        assert!(dir.path().join("content/empty.meta.json").exists());

        let loaded = PipelineState::load("https://x.test", dir.path());
        assert_eq!(loaded.documents["empty"].content, "");
    }

    #[test]
    fn load_from_missing_dir_yields_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = PipelineState::load("https://x.test", dir.path().join("nope"));
        assert!(state.documents.is_empty());
        assert!(state.url_map.is_empty());
        assert!(state.hierarchy.is_none());
    }

    #[test]
    fn cleanup_removes_temp_dirs_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("_temp_html")).unwrap();
        std::fs::create_dir(dir.path().join("content")).unwrap();
        let removed = cleanup_temp_dirs(dir.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(dir.path().join("content").exists());
    }
}
