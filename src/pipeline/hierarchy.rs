use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Flat description of one page fed into the tree builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    pub title: String,
    pub url: String,
    /// Body filename (`<id>.md`).
    pub page: String,
}

/// One node of the persisted `hierarchy.json` tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HierarchyNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default)]
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    fn leaf(id: &str, info: &PageInfo) -> Self {
        Self {
            id: Some(id.to_string()),
            title: info.title.clone(),
            url: Some(info.url.clone()),
            page: Some(info.page.clone()),
            children: Vec::new(),
        }
    }

    /// Count every occurrence of every id in the tree (cycle-break leaf
    /// references count too).
    pub fn id_occurrences(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if let Some(id) = &node.id {
                *counts.entry(id.clone()).or_insert(0) += 1;
            }
            stack.extend(node.children.iter());
        }
        counts
    }
}

/// Assemble a cycle-free tree from observed parent edges.
///
/// Self-edges are dropped. A DFS from each root marks visited ids; an id
/// seen again becomes a childless leaf reference instead of recursing,
/// which breaks any cycle in the edge set. Children are sorted by title
/// (then id) so output is deterministic. The synthetic "Documentation
/// Root" owns every page that has no surviving parent edge.
pub fn build_tree(
    pages: &HashMap<String, PageInfo>,
    edges: &HashMap<String, String>,
) -> HierarchyNode {
    // child lists per parent; BTreeMap keeps traversal order stable.
    let mut children_map: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut has_parent: HashSet<&str> = HashSet::new();

    for (child, parent) in edges {
        if child == parent {
            continue;
        }
        if !pages.contains_key(child) || !pages.contains_key(parent) {
            continue;
        }
        children_map.entry(parent.as_str()).or_default().push(child.as_str());
        has_parent.insert(child.as_str());
    }

    let mut roots: Vec<&str> = pages
        .keys()
        .map(String::as_str)
        .filter(|id| !has_parent.contains(*id))
        .collect();
    sort_ids_by_title(&mut roots, pages);

    // Pages only reachable through a cycle (every member has a parent)
    // would otherwise vanish; treat the title-first member as a root.
    if roots.is_empty() && !pages.is_empty() {
        let mut all: Vec<&str> = pages.keys().map(String::as_str).collect();
        sort_ids_by_title(&mut all, pages);
        roots.push(all[0]);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut root = HierarchyNode {
        id: None,
        title: "Documentation Root".to_string(),
        url: None,
        page: None,
        children: Vec::new(),
    };
    for id in roots {
        root.children
            .push(build_subtree(id, pages, &children_map, &mut visited));
    }
    root
}

fn build_subtree<'a>(
    id: &'a str,
    pages: &HashMap<String, PageInfo>,
    children_map: &BTreeMap<&str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
) -> HierarchyNode {
    let info = &pages[id];
    if visited.contains(id) {
        // Cycle: emit a reference without descending again.
        return HierarchyNode::leaf(id, info);
    }
    visited.insert(id);

    let mut node = HierarchyNode::leaf(id, info);
    if let Some(child_ids) = children_map.get(id) {
        let mut ordered: Vec<&str> = child_ids.clone();
        sort_ids_by_title(&mut ordered, pages);
        for child in ordered {
            node.children
                .push(build_subtree(child, pages, children_map, visited));
        }
    }
    node
}

fn sort_ids_by_title(ids: &mut [&str], pages: &HashMap<String, PageInfo>) {
    ids.sort_by(|a, b| {
        let ta = pages.get(*a).map(|p| p.title.as_str()).unwrap_or("");
        let tb = pages.get(*b).map(|p| p.title.as_str()).unwrap_or("");
        ta.cmp(tb).then_with(|| a.cmp(b))
    });
}

/// Render the optional `llms.txt` outline: one heading for the site and an
/// indented bullet per page, depth-first.
pub fn render_llms_txt(site_url: &str, root: &HierarchyNode) -> String {
    let mut out = format!("# Documentation index for {}\n\n", site_url);
    fn walk(node: &HierarchyNode, depth: usize, out: &mut String) {
        for child in &node.children {
            let indent = "  ".repeat(depth);
            match &child.url {
                Some(url) => out.push_str(&format!("{}- [{}]({})\n", indent, child.title, url)),
                None => out.push_str(&format!("{}- {}\n", indent, child.title)),
            }
            walk(child, depth + 1, out);
        }
    }
    walk(root, 0, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(entries: &[(&str, &str)]) -> HashMap<String, PageInfo> {
        entries
            .iter()
            .map(|(id, title)| {
                (
                    id.to_string(),
                    PageInfo {
                        title: title.to_string(),
                        url: format!("https://x.test/{id}"),
                        page: format!("{id}.md"),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn chain_builds_nested_tree() {
        let pages = pages(&[("a", "A"), ("b", "B"), ("c", "C")]);
        let mut edges = HashMap::new();
        edges.insert("b".to_string(), "a".to_string());
        edges.insert("c".to_string(), "b".to_string());

        let tree = build_tree(&pages, &edges);
        assert_eq!(tree.title, "Documentation Root");
        assert_eq!(tree.children.len(), 1);
        let a = &tree.children[0];
        assert_eq!(a.id.as_deref(), Some("a"));
        assert_eq!(a.children[0].id.as_deref(), Some("b"));
        assert_eq!(a.children[0].children[0].id.as_deref(), Some("c"));
    }

    #[test]
    fn cycle_is_broken_with_leaf_reference() {
        // B→A, C→B, A→C: every node has a parent, so the cycle is entered
        // at the title-first member and broken at the revisit.
        let pages = pages(&[("a", "A"), ("b", "B"), ("c", "C")]);
        let mut edges = HashMap::new();
        edges.insert("b".to_string(), "a".to_string());
        edges.insert("c".to_string(), "b".to_string());
        edges.insert("a".to_string(), "c".to_string());

        let tree = build_tree(&pages, &edges);
        let a = &tree.children[0];
        assert_eq!(a.id.as_deref(), Some("a"));
        let b = &a.children[0];
        assert_eq!(b.id.as_deref(), Some("b"));
        let c = &b.children[0];
        assert_eq!(c.id.as_deref(), Some("c"));
        // The revisit of A under C must be a childless reference.
        assert!(c.children.iter().all(|n| n.children.is_empty()));

        // Each id appears at most twice; at most one occurrence has children.
        let counts = tree.id_occurrences();
        assert!(counts.values().all(|&n| n <= 2));
    }

    #[test]
    fn self_edges_are_dropped() {
        let pages = pages(&[("a", "A")]);
        let mut edges = HashMap::new();
        edges.insert("a".to_string(), "a".to_string());

        let tree = build_tree(&pages, &edges);
        assert_eq!(tree.children.len(), 1);
        assert!(tree.children[0].children.is_empty());
    }

    #[test]
    fn children_sorted_by_title() {
        let pages = pages(&[("r", "Root"), ("z", "Alpha"), ("m", "Beta")]);
        let mut edges = HashMap::new();
        edges.insert("z".to_string(), "r".to_string());
        edges.insert("m".to_string(), "r".to_string());

        let tree = build_tree(&pages, &edges);
        let r = &tree.children[0];
        let titles: Vec<&str> = r.children.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Beta"]);
    }

    #[test]
    fn every_page_appears_in_tree() {
        let pages = pages(&[("a", "A"), ("b", "B"), ("orphan", "Orphan")]);
        let mut edges = HashMap::new();
        edges.insert("b".to_string(), "a".to_string());

        let tree = build_tree(&pages, &edges);
        let counts = tree.id_occurrences();
        for id in pages.keys() {
            assert!(counts.contains_key(id), "missing {id}");
        }
    }

    #[test]
    fn llms_txt_lists_pages() {
        let pages = pages(&[("a", "A"), ("b", "B")]);
        let mut edges = HashMap::new();
        edges.insert("b".to_string(), "a".to_string());
        let tree = build_tree(&pages, &edges);
        let txt = render_llms_txt("https://x.test", &tree);
        assert!(txt.contains("- [A](https://x.test/a)"));
        assert!(txt.contains("  - [B](https://x.test/b)"));
    }
}
