use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::core::config::storage_path;
use crate::core::types::{DocsetInfo, ListDocsResponse};

/// A docset directory is valid when its `vector_index/` holds both the
/// docstore and the index-store sidecars.
fn valid_vector_index(dir: &Path) -> bool {
    dir.join("docstore.json").exists() && dir.join("index_store.json").exists()
}

fn index_file_inventory(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|e| e.file_name().to_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Enumerate documentation sets under `base_path` (or the configured
/// storage root). Never raises; failures land in the `error` field.
pub fn list_available_docs(base_path: Option<&str>) -> ListDocsResponse {
    let root: Option<PathBuf> = match base_path {
        Some(p) if !p.trim().is_empty() => Some(PathBuf::from(p)),
        _ => storage_path(),
    };
    let Some(root) = root else {
        return ListDocsResponse {
            error: Some("no base path provided and no storage path configured".to_string()),
            ..Default::default()
        };
    };

    let mut response = ListDocsResponse {
        base_path: root.display().to_string(),
        ..Default::default()
    };
    info!("Searching for vector indexes under {}", root.display());

    let entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) => {
            response.error = Some(format!("cannot read {}: {e}", root.display()));
            return response;
        }
    };

    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    candidates.sort();
    // The root itself may be a site directory.
    candidates.insert(0, root.clone());

    for site_dir in candidates {
        let index_dir = site_dir.join("vector_index");
        if !valid_vector_index(&index_dir) {
            debug!("no vector index in {}", site_dir.display());
            continue;
        }
        let name = site_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("docs")
            .to_string();
        let relative = site_dir
            .strip_prefix(&root)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        response.docs.push(DocsetInfo {
            name,
            path: index_dir.display().to_string(),
            relative_path: if relative.is_empty() { ".".to_string() } else { relative },
            files: index_file_inventory(&index_dir),
        });
    }
    response.count = response.docs.len();
    info!("Found {} vector indexes", response.count);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_index(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("docstore.json"), "{}").unwrap();
        std::fs::write(dir.join("index_store.json"), "{}").unwrap();
    }

    #[test]
    fn finds_site_directories_with_indexes() {
        let root = tempfile::tempdir().unwrap();
        make_index(&root.path().join("docs-example-com/vector_index"));
        std::fs::create_dir_all(root.path().join("incomplete/vector_index")).unwrap();
        std::fs::write(
            root.path().join("incomplete/vector_index/docstore.json"),
            "{}",
        )
        .unwrap();

        let response = list_available_docs(Some(root.path().to_str().unwrap()));
        assert!(response.error.is_none());
        assert_eq!(response.count, 1);
        assert_eq!(response.docs[0].name, "docs-example-com");
        assert_eq!(response.docs[0].relative_path, "docs-example-com");
        assert!(response.docs[0]
            .files
            .contains(&"docstore.json".to_string()));
    }

    #[test]
    fn missing_root_reports_structured_error() {
        let root = tempfile::tempdir().unwrap();
        let bogus = root.path().join("does-not-exist");
        let response = list_available_docs(Some(bogus.to_str().unwrap()));
        assert!(response.error.is_some());
        assert!(response.docs.is_empty());
    }

    #[test]
    fn root_itself_can_be_a_site() {
        let root = tempfile::tempdir().unwrap();
        make_index(&root.path().join("vector_index"));
        let response = list_available_docs(Some(root.path().to_str().unwrap()));
        assert_eq!(response.count, 1);
        assert_eq!(response.docs[0].relative_path, ".");
    }
}
