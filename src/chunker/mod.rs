pub mod splitter;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::markify::convert::estimate_tokens;

pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_CHUNK_OVERLAP: usize = 20;

/// A section may exceed `chunk_size` by this factor before the fallback
/// splitter kicks in; slightly-long sections embed better whole.
const SINGLE_NODE_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Links from one chunk to its neighbours in the section tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeRelationships {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
}

/// One retrieval unit produced by the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkNode {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub relationships: NodeRelationships,
    pub position: usize,
}

/// Classification used by hybrid search filtering.
pub fn detect_content_type(text: &str) -> &'static str {
    const CODE_INDICATORS: &[&str] = &[
        "```", "def ", "class ", "function", "return", "import ", "from ", "var ", "const ",
        "let ", "if (", "for (", "while (", "=>",
    ];
    let indicator_count = CODE_INDICATORS.iter().filter(|i| text.contains(**i)).count();

    let mut code_chars = 0usize;
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            code_chars += line.len() + 1;
            continue;
        }
        if in_fence {
            code_chars += line.len() + 1;
        }
    }
    let total = text.len().max(1);
    let code_ratio = code_chars as f64 / total as f64;

    if code_ratio > 0.7 || indicator_count > 10 {
        "code"
    } else if code_ratio < 0.2 && indicator_count < 3 {
        "explanation"
    } else {
        "mixed"
    }
}

struct Section {
    level: usize,
    heading: String,
    lines: Vec<String>,
    parent: Option<usize>,
    has_protected: bool,
}

/// Split a Markdown document into retrieval nodes without ever bisecting a
/// fenced code block or pipe table.
///
/// Fences and tables are swapped for placeholder tokens first, sections
/// are parsed with a heading stack, placeholders are restored, and each
/// section becomes one node (or several overlapping parts when it is
/// oversized and contains no protected block).
pub fn chunk_markdown(
    markdown: &str,
    base_metadata: &HashMap<String, Value>,
    config: &ChunkerConfig,
) -> Vec<ChunkNode> {
    let (protected_text, blocks) = protect_blocks(markdown);
    let sections = parse_sections(&protected_text, &blocks);
    emit_nodes(sections, base_metadata, config)
}

// ── Step 1: placeholder protection ─────────────────────────────────────

struct ProtectedBlock {
    token: String,
    content: String,
}

fn protect_blocks(markdown: &str) -> (String, Vec<ProtectedBlock>) {
    let mut blocks: Vec<ProtectedBlock> = Vec::new();
    let mut out: Vec<String> = Vec::new();
    let lines: Vec<&str> = markdown.lines().collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.trim_start().starts_with("```") {
            // Collect the fence through its closing marker (or EOF).
            let mut block = vec![line.to_string()];
            i += 1;
            while i < lines.len() {
                block.push(lines[i].to_string());
                if lines[i].trim_start().starts_with("```") {
                    break;
                }
                i += 1;
            }
            // Unterminated fence at EOF: close it so no chunk ever carries
            // an unbalanced fence.
            if !block.last().map(|l| l.trim_start().starts_with("```")).unwrap_or(false)
                || block.len() == 1
            {
                block.push("```".to_string());
            }
            let token = format!("THINKMARKFENCE{}X", blocks.len());
            out.push(token.clone());
            blocks.push(ProtectedBlock {
                token,
                content: block.join("\n"),
            });
            i += 1;
            continue;
        }
        if line.trim_start().starts_with('|') {
            let mut block = Vec::new();
            while i < lines.len() && lines[i].trim_start().starts_with('|') {
                block.push(lines[i].to_string());
                i += 1;
            }
            let token = format!("THINKMARKTABLE{}X", blocks.len());
            out.push(token.clone());
            blocks.push(ProtectedBlock {
                token,
                content: block.join("\n"),
            });
            continue;
        }
        out.push(line.to_string());
        i += 1;
    }
    (out.join("\n"), blocks)
}

// ── Step 2: heading-stack section parse ────────────────────────────────

fn heading_level(line: &str) -> Option<(usize, String)> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some((hashes, rest.trim().to_string()))
}

fn parse_sections(text: &str, blocks: &[ProtectedBlock]) -> Vec<Section> {
    let mut sections: Vec<Section> = vec![Section {
        level: 0,
        heading: String::new(),
        lines: Vec::new(),
        parent: None,
        has_protected: false,
    }];
    // Stack of open section indexes, preamble at the bottom.
    let mut stack: Vec<usize> = vec![0];

    for line in text.lines() {
        if let Some((level, heading)) = heading_level(line) {
            while stack.len() > 1 && sections[*stack.last().expect("stack non-empty")].level >= level
            {
                stack.pop();
            }
            let parent = stack.last().copied();
            sections.push(Section {
                level,
                heading,
                lines: Vec::new(),
                parent,
                has_protected: false,
            });
            stack.push(sections.len() - 1);
        } else {
            let idx = *stack.last().expect("stack non-empty");
            // Step 3: restore placeholders in place.
            if let Some(block) = blocks.iter().find(|b| b.token == line.trim()) {
                sections[idx].lines.push(block.content.clone());
                sections[idx].has_protected = true;
            } else {
                sections[idx].lines.push(line.to_string());
            }
        }
    }
    sections
}

// ── Step 4/5: node emission with relationships ─────────────────────────

fn emit_nodes(
    sections: Vec<Section>,
    base_metadata: &HashMap<String, Value>,
    config: &ChunkerConfig,
) -> Vec<ChunkNode> {
    let threshold = (config.chunk_size as f64 * SINGLE_NODE_FACTOR) as usize;
    let breadcrumbs = breadcrumb_paths(&sections);

    let mut nodes: Vec<ChunkNode> = Vec::new();
    // Primary node id per section index, for PARENT edges.
    let mut primary: Vec<Option<String>> = vec![None; sections.len()];
    let mut position = 0usize;

    for (idx, section) in sections.iter().enumerate() {
        let mut text = String::new();
        if !section.heading.is_empty() {
            text.push_str(&format!("{} {}\n\n", "#".repeat(section.level), section.heading));
        }
        text.push_str(section.lines.join("\n").trim_matches('\n'));
        let text = text.trim().to_string();
        if text.is_empty() {
            continue;
        }

        let parent_node = section.parent.and_then(|p| primary[p].clone());
        let mut meta = base_metadata.clone();
        if !section.heading.is_empty() {
            meta.insert("heading".to_string(), Value::String(section.heading.clone()));
            meta.insert("heading_level".to_string(), Value::from(section.level as i64));
        }
        meta.insert(
            "breadcrumb".to_string(),
            Value::String(breadcrumbs[idx].clone()),
        );
        meta.insert(
            "content_type".to_string(),
            Value::String(detect_content_type(&text).to_string()),
        );

        let tokens = estimate_tokens(&text);
        let parts: Vec<String> = if tokens <= threshold || section.has_protected {
            // Protected blocks are never split, whatever their size.
            vec![text]
        } else {
            splitter::split_sentences(&text, config.chunk_size, config.chunk_overlap)
        };

        let total_parts = parts.len();
        let section_id = Uuid::new_v4().to_string();
        for (part_idx, part_text) in parts.into_iter().enumerate() {
            let mut part_meta = meta.clone();
            if total_parts > 1 {
                part_meta.insert("section_part".to_string(), Value::from(part_idx as i64 + 1));
                part_meta.insert("section_total_parts".to_string(), Value::from(total_parts as i64));
                part_meta.insert("section_id".to_string(), Value::String(section_id.clone()));
            }
            part_meta.insert(
                "token_count".to_string(),
                Value::from(estimate_tokens(&part_text) as i64),
            );

            let node = ChunkNode {
                id: Uuid::new_v4().to_string(),
                text: part_text,
                metadata: part_meta,
                relationships: NodeRelationships {
                    parent: parent_node.clone(),
                    ..Default::default()
                },
                position,
            };
            position += 1;
            if part_idx == 0 {
                primary[idx] = Some(node.id.clone());
            }
            nodes.push(node);
        }
    }

    // CHILD mirrors of PARENT, plus NEXT/PREV by position.
    let parent_edges: Vec<(String, String)> = nodes
        .iter()
        .filter_map(|n| n.relationships.parent.clone().map(|p| (p, n.id.clone())))
        .collect();
    let mut by_id: HashMap<String, usize> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        by_id.insert(node.id.clone(), i);
    }
    for (parent_id, child_id) in parent_edges {
        if let Some(&i) = by_id.get(&parent_id) {
            nodes[i].relationships.children.push(child_id);
        }
    }
    for i in 0..nodes.len() {
        if i > 0 {
            nodes[i].relationships.prev = Some(nodes[i - 1].id.clone());
        }
        if i + 1 < nodes.len() {
            nodes[i].relationships.next = Some(nodes[i + 1].id.clone());
        }
    }
    nodes
}

/// Title path from the document root to each section.
fn breadcrumb_paths(sections: &[Section]) -> Vec<String> {
    let mut paths = vec![String::new(); sections.len()];
    for (idx, section) in sections.iter().enumerate() {
        let mut parts: Vec<&str> = Vec::new();
        let mut current = Some(idx);
        while let Some(i) = current {
            if !sections[i].heading.is_empty() {
                parts.push(sections[i].heading.as_str());
            }
            current = sections[i].parent;
        }
        parts.reverse();
        paths[idx] = parts.join(" > ");
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(md: &str) -> Vec<ChunkNode> {
        chunk_markdown(md, &HashMap::new(), &ChunkerConfig::default())
    }

    fn chunk_small(md: &str, size: usize) -> Vec<ChunkNode> {
        chunk_markdown(
            md,
            &HashMap::new(),
            &ChunkerConfig {
                chunk_size: size,
                chunk_overlap: 5,
            },
        )
    }

    #[test]
    fn small_document_is_a_handful_of_section_nodes() {
        let md = "# Title\n\nIntro text.\n\n## Sub\n\nSub text.\n";
        let nodes = chunk(md);
        assert_eq!(nodes.len(), 2);
        assert_eq!(
            nodes[0].metadata["heading"],
            Value::String("Title".to_string())
        );
        assert_eq!(
            nodes[1].metadata["breadcrumb"],
            Value::String("Title > Sub".to_string())
        );
        // Sub's parent is Title's node.
        assert_eq!(nodes[1].relationships.parent.as_ref(), Some(&nodes[0].id));
        assert!(nodes[0].relationships.children.contains(&nodes[1].id));
    }

    #[test]
    fn heading_stack_pops_siblings() {
        let md = "# A\n\na\n\n## B\n\nb\n\n## C\n\nc\n\n# D\n\nd\n";
        let nodes = chunk(md);
        let by_heading: HashMap<String, &ChunkNode> = nodes
            .iter()
            .map(|n| {
                (
                    n.metadata["heading"].as_str().unwrap_or("").to_string(),
                    n,
                )
            })
            .collect();
        // C is a sibling of B under A, not a child of B.
        assert_eq!(
            by_heading["C"].relationships.parent,
            Some(by_heading["A"].id.clone())
        );
        // D reopened the top level.
        assert!(by_heading["D"].relationships.parent.is_none());
    }

    #[test]
    fn positions_are_monotonic() {
        let md = "# A\n\na\n\n## B\n\nb\n\n## C\n\nc\n";
        let nodes = chunk(md);
        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(node.position, i);
        }
        assert_eq!(nodes[0].relationships.next.as_ref(), Some(&nodes[1].id));
        assert_eq!(nodes[1].relationships.prev.as_ref(), Some(&nodes[0].id));
    }

    #[test]
    fn fences_are_never_bisected() {
        let body: String = (0..600).map(|i| format!("word{i} ")).collect();
        let code: String = (0..500).map(|i| format!("line{i}\n")).collect();
        let md = format!("# Big\n\n{body}\n\n```rust\n{code}```\n");
        let nodes = chunk_small(&md, 100);
        for node in &nodes {
            assert_eq!(
                node.text.matches("```").count() % 2,
                0,
                "unbalanced fence in chunk"
            );
        }
    }

    #[test]
    fn tables_stay_whole() {
        let md = "# T\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\nafter table\n";
        let nodes = chunk_small(md, 2);
        let with_table: Vec<&ChunkNode> =
            nodes.iter().filter(|n| n.text.contains('|')).collect();
        assert_eq!(with_table.len(), 1);
        assert!(with_table[0].text.contains("| 1 | 2 |"));
    }

    #[test]
    fn oversized_prose_section_splits_into_parts() {
        let body = (0..50)
            .map(|i| format!("Sentence number {i} is here to pad things out."))
            .collect::<Vec<_>>()
            .join(" ");
        let md = format!("# Long\n\n{body}\n");
        let nodes = chunk_small(&md, 40);
        assert!(nodes.len() > 1);
        let total = nodes.len() as i64;
        let mut section_ids = std::collections::HashSet::new();
        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(node.metadata["section_part"], Value::from(i as i64 + 1));
            assert_eq!(node.metadata["section_total_parts"], Value::from(total));
            section_ids.insert(node.metadata["section_id"].clone());
        }
        // All parts share one section id.
        assert_eq!(section_ids.len(), 1);
    }

    #[test]
    fn content_type_detection() {
        assert_eq!(
            detect_content_type("```rust\nfn main() {}\n```"),
            "code"
        );
        assert_eq!(
            detect_content_type("This page explains how the widget works in plain prose."),
            "explanation"
        );
        let mixed = "Some prose introduces the API.\nMore prose lines here to balance.\nEven more explanation text.\nStill explaining things verbosely.\n```python\ndef f():\n    return 1\n```\n";
        assert_eq!(detect_content_type(mixed), "mixed");
    }

    #[test]
    fn unterminated_fence_is_closed() {
        let md = "# X\n\n```python\ncode without closing fence\n";
        let nodes = chunk(md);
        for node in &nodes {
            assert_eq!(node.text.matches("```").count() % 2, 0);
        }
    }
}
