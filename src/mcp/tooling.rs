use serde_json::Value;

/// One tool exposed over the MCP surface, with its JSON input schema.
#[derive(Clone, Debug)]
pub struct ToolCatalogEntry {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn tool_catalog() -> Vec<ToolCatalogEntry> {
    vec![
        ToolCatalogEntry {
            name: "list_available_docs",
            title: "List Available Docs",
            description: "List all ingested documentation sets that have a queryable vector index. Use this first to discover persist_dir values for query_docs.",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "base_path": {
                        "type": "string",
                        "description": "Optional directory to search instead of the configured storage root."
                    }
                }
            }),
        },
        ToolCatalogEntry {
            name: "query_docs",
            title: "Query Docs",
            description: "Semantic search over one ingested documentation set. Returns the most relevant chunks with provenance (breadcrumb, section, file).",
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string", "description": "Natural-language question to search for."},
                    "persist_dir": {"type": "string", "description": "Path to the documentation set's vector_index directory."},
                    "top_k": {"type": "integer", "minimum": 1, "default": 3},
                    "similarity_threshold": {"type": "number", "minimum": 0.0, "maximum": 1.0, "default": 0.7},
                    "content_filter": {"type": "string", "enum": ["code", "explanation", "mixed"], "description": "Optional: restrict hits to one content type."},
                    "use_hybrid_search": {"type": "boolean", "default": true, "description": "Fuse dense and BM25 retrieval; false for dense-only."}
                },
                "required": ["question", "persist_dir"]
            }),
        },
    ]
}

/// `tools/list` payload.
pub fn tools_list_json() -> Value {
    let tools: Vec<Value> = tool_catalog()
        .into_iter()
        .map(|entry| {
            serde_json::json!({
                "name": entry.name,
                "title": entry.title,
                "description": entry.description,
                "inputSchema": entry.input_schema
            })
        })
        .collect();
    serde_json::json!({ "tools": tools })
}
