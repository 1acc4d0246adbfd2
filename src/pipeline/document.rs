use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle stage of a document body, stored under `metadata["type"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Html,
    Markdown,
    Annotated,
}

impl DocType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Html => "html",
            DocType::Markdown => "markdown",
            DocType::Annotated => "annotated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "html" => Some(DocType::Html),
            "markdown" => Some(DocType::Markdown),
            "annotated" => Some(DocType::Annotated),
            _ => None,
        }
    }
}

/// Unified record of one page across all its representations.
///
/// `content` is interpreted according to `metadata["type"]`; empty content
/// is permitted and means "skip this document for indexing and body
/// serialization".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub children_ids: Vec<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: title.into(),
            content: String::new(),
            metadata: HashMap::new(),
            parent_id: None,
            children_ids: Vec::new(),
        }
    }

    /// On-disk body filename.
    pub fn filename(&self) -> String {
        format!("{}.md", self.id)
    }

    pub fn doc_type(&self) -> Option<DocType> {
        self.metadata
            .get("type")
            .and_then(|v| v.as_str())
            .and_then(DocType::parse)
    }

    pub fn set_doc_type(&mut self, t: DocType) {
        self.metadata
            .insert("type".to_string(), Value::String(t.as_str().to_string()));
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata.get("content_type").and_then(|v| v.as_str())
    }

    pub fn token_count(&self) -> Option<i64> {
        self.metadata.get("token_count").and_then(|v| v.as_i64())
    }

    pub fn set_meta_i64(&mut self, key: &str, value: i64) {
        self.metadata.insert(key.to_string(), Value::from(value));
    }

    pub fn set_meta_str(&mut self, key: &str, value: impl Into<String>) {
        self.metadata
            .insert(key.to_string(), Value::String(value.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_metadata_accessors_round_trip() {
        let mut doc = Document::new("docs-x-a", "https://x.test/a", "A");
        doc.set_doc_type(DocType::Markdown);
        doc.set_meta_i64("token_count", 42);
        doc.set_meta_str("content_type", "code");

        assert_eq!(doc.doc_type(), Some(DocType::Markdown));
        assert_eq!(doc.token_count(), Some(42));
        assert_eq!(doc.content_type(), Some("code"));
        assert_eq!(doc.filename(), "docs-x-a.md");
    }
}
