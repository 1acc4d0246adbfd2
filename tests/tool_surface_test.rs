//! End-to-end tool surface tests: build a small index on disk with a
//! deterministic embedder, then drive discovery and querying the way an
//! MCP client would.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use thinkmark::core::AppState;
use thinkmark::index::builder::{build_index, BuildOptions};
use thinkmark::index::embedder::Embedder;
use thinkmark::index::retriever::{retrieve, RetrievalOptions};
use thinkmark::mcp::call_tool;

/// Token-bucket hashing embedder: deterministic, no model download, and
/// texts sharing words land near each other.
struct BucketEmbedder {
    dim: usize,
}

#[async_trait]
impl Embedder for BucketEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];
        if text.trim().is_empty() {
            return Ok(v);
        }
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 2)
        {
            let mut h: u64 = 0xcbf29ce484222325;
            for b in token.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            v[(h % self.dim as u64) as usize] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }

    async fn dimension(&self) -> Result<usize> {
        Ok(self.dim)
    }
}

fn write_annotated(dir: &Path, name: &str, title: &str, body: &str) {
    let content = format!(
        "---\ntitle: {title}\nurl: https://docs.example.com/{name}\nsite_name: https://docs.example.com\n---\n\n{body}"
    );
    std::fs::write(dir.join(format!("{name}.md")), content).unwrap();
}

/// Three documents in the classic shape: one code-heavy install page, one
/// prose tutorial about installation, one unrelated page.
async fn build_sample_index(root: &Path) -> std::path::PathBuf {
    let annotated = root.join("annotated");
    std::fs::create_dir_all(&annotated).unwrap();
    write_annotated(
        &annotated,
        "install",
        "Install",
        "# Install\n\nInstall:\n\n```sh\npip install foo\npip install foo --upgrade\npython -m foo --check\n```\n",
    );
    write_annotated(
        &annotated,
        "tutorial",
        "Installation Tutorial",
        "# Installation Tutorial\n\nThis installation tutorial walks through how to install the package step by step.\n",
    );
    write_annotated(
        &annotated,
        "other",
        "Release Notes",
        "# Release Notes\n\nUnrelated content about zebras and release housekeeping.\n",
    );

    let persist = root.join("vector_index");
    let embedder = BucketEmbedder { dim: 64 };
    build_index(
        &annotated,
        &persist,
        None,
        &embedder,
        "bucket-test",
        &BuildOptions::default(),
    )
    .await
    .unwrap();
    persist
}

#[tokio::test]
async fn hybrid_query_ranks_install_docs_first() {
    let root = tempfile::tempdir().unwrap();
    let persist = build_sample_index(root.path()).await;

    let index = thinkmark::index::load_index(&persist).await.unwrap();
    let embedder = BucketEmbedder { dim: 64 };
    let options = RetrievalOptions {
        top_k: 2,
        use_hybrid: true,
        content_filter: None,
        min_score: 0.0,
    };
    let hits = retrieve(&index, &embedder, "how do I install?", &options)
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    for hit in &hits {
        assert!(hit.score > 0.0);
        let file = hit.node.metadata["file_path"].as_str().unwrap();
        assert!(
            file == "install.md" || file == "tutorial.md",
            "unexpected hit: {file}"
        );
    }
}

#[tokio::test]
async fn content_filter_keeps_only_code_chunks() {
    let root = tempfile::tempdir().unwrap();
    let persist = build_sample_index(root.path()).await;

    let index = thinkmark::index::load_index(&persist).await.unwrap();
    let embedder = BucketEmbedder { dim: 64 };
    let options = RetrievalOptions {
        top_k: 3,
        use_hybrid: true,
        content_filter: Some("code".to_string()),
        min_score: 0.0,
    };
    let hits = retrieve(&index, &embedder, "how do I install?", &options)
        .await
        .unwrap();

    assert!(!hits.is_empty());
    for hit in &hits {
        assert_eq!(hit.node.metadata["content_type"].as_str(), Some("code"));
        assert_eq!(hit.node.metadata["file_path"].as_str(), Some("install.md"));
    }
}

#[tokio::test]
async fn dense_only_mode_skips_fusion() {
    let root = tempfile::tempdir().unwrap();
    let persist = build_sample_index(root.path()).await;

    let index = thinkmark::index::load_index(&persist).await.unwrap();
    let embedder = BucketEmbedder { dim: 64 };
    let options = RetrievalOptions {
        top_k: 2,
        use_hybrid: false,
        content_filter: None,
        min_score: 0.0,
    };
    let hits = retrieve(&index, &embedder, "installation tutorial", &options)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    // Raw cosine scores, not fused ones.
    for hit in &hits {
        assert!(hit.score <= 1.0 + 1e-5);
    }
}

#[tokio::test]
async fn tool_dispatch_covers_discovery_and_query() {
    let storage = tempfile::tempdir().unwrap();
    let site_dir = storage.path().join("docs-example-com");
    std::fs::create_dir_all(&site_dir).unwrap();
    let persist = build_sample_index(&site_dir).await;

    let state = Arc::new(
        AppState::new().with_embedder(Arc::new(BucketEmbedder { dim: 64 })),
    );

    // Discovery sees the docset.
    let listed = call_tool(
        &state,
        "list_available_docs",
        serde_json::json!({"base_path": storage.path().to_str().unwrap()}),
    )
    .await
    .unwrap();
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["docs"][0]["name"], "docs-example-com");

    // Query through the same path an MCP client uses.
    let response = call_tool(
        &state,
        "query_docs",
        serde_json::json!({
            "question": "how do I install?",
            "persist_dir": persist.to_str().unwrap(),
            "top_k": 2,
            "similarity_threshold": 0.0,
            "use_hybrid_search": true
        }),
    )
    .await
    .unwrap();
    assert_eq!(response["search_type"], "hybrid");
    assert!(response["source_count"].as_u64().unwrap() >= 1);
    let first = &response["sources"][0];
    assert!(first["score"].as_f64().unwrap() > 0.0);
    assert!(first["breadcrumb"].is_string());
    assert!(first["file_path"].is_string());
}
