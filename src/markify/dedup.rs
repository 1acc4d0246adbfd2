use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::debug;

/// Occurrences of one paragraph before it is treated as site boilerplate
/// and dropped everywhere.
const PARAGRAPH_DROP_THRESHOLD: u32 = 3;

/// Near-duplicate documents above this cosine similarity collapse into the
/// longer one.
const NEAR_DUP_SIMILARITY: f64 = 0.9;

type ParagraphHash = [u8; 32];

fn sha256(text: &str) -> ParagraphHash {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

/// A line is a paragraph unless it opens a heading, quote, fence, indented
/// code, list item, or table row.
fn is_paragraph_line(line: &str) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    !(line.starts_with('#')
        || line.starts_with('>')
        || line.starts_with("```")
        || line.starts_with("    ")
        || line.starts_with('-')
        || line.starts_with('*')
        || line.starts_with('|'))
}

/// Global paragraph-frequency tracker shared by every document in one run.
///
/// The mutex keeps the counters coherent when markify runs documents on a
/// worker pool; the workload is dominated by I/O, not hashing.
#[derive(Debug, Default)]
pub struct ParagraphDeduper {
    counts: Mutex<HashMap<ParagraphHash, u32>>,
}

impl ParagraphDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop paragraphs whose hash has now been seen
    /// `PARAGRAPH_DROP_THRESHOLD` times or more. Fenced code interiors are
    /// never touched.
    pub fn filter(&self, markdown: &str) -> String {
        let mut counts = self.counts.lock().expect("paragraph dedup mutex poisoned");
        let mut out: Vec<&str> = Vec::new();
        let mut in_fence = false;

        for line in markdown.lines() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                out.push(line);
                continue;
            }
            if in_fence || !is_paragraph_line(line) {
                out.push(line);
                continue;
            }
            let hash = sha256(line.trim());
            let count = counts.entry(hash).or_insert(0);
            *count += 1;
            if *count >= PARAGRAPH_DROP_THRESHOLD {
                debug!("dropping boilerplate paragraph (seen {}x)", *count);
                continue;
            }
            out.push(line);
        }

        let mut result = out.join("\n");
        if markdown.ends_with('\n') {
            result.push('\n');
        }
        result
    }
}

/// Collapse repeated heading-delimited sections within one document,
/// keyed on the hash of the section body.
pub fn dedupe_sections(markdown: &str) -> String {
    let mut sections: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        if !in_fence && line.starts_with('#') && !current.is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push(line);
    }
    if !current.is_empty() {
        sections.push(current);
    }

    let mut seen: HashSet<ParagraphHash> = HashSet::new();
    let mut kept: Vec<String> = Vec::new();
    for section in sections {
        let body = section.join("\n");
        let hash = sha256(body.trim());
        if seen.insert(hash) {
            kept.push(body);
        }
    }

    let mut result = kept.join("\n");
    if markdown.ends_with('\n') && !result.ends_with('\n') {
        result.push('\n');
    }
    result
}

/// Result of cross-document deduplication: ids to drop, each mapped to the
/// id that was retained in its place.
#[derive(Debug, Default)]
pub struct CrossDocOutcome {
    pub dropped: HashMap<String, String>,
}

/// Exact-hash duplicates collapse first; the survivors are compared
/// pairwise with TF-IDF cosine similarity and near-duplicates keep the
/// longer document. Runs only when at least two documents exist.
pub fn dedupe_across_documents(docs: &[(String, String)]) -> CrossDocOutcome {
    let mut outcome = CrossDocOutcome::default();
    if docs.len() < 2 {
        return outcome;
    }

    // Exact duplicates by content hash.
    let mut by_hash: HashMap<ParagraphHash, &str> = HashMap::new();
    let mut survivors: Vec<&(String, String)> = Vec::new();
    for doc in docs {
        let hash = sha256(doc.1.trim());
        match by_hash.get(&hash) {
            Some(kept) => {
                outcome.dropped.insert(doc.0.clone(), kept.to_string());
            }
            None => {
                by_hash.insert(hash, &doc.0);
                survivors.push(doc);
            }
        }
    }

    if survivors.len() < 2 {
        return outcome;
    }

    // TF-IDF vectors over the survivors.
    let tokenized: Vec<HashMap<String, f64>> = survivors
        .iter()
        .map(|(_, content)| term_frequencies(content))
        .collect();
    let mut document_frequency: HashMap<&str, usize> = HashMap::new();
    for tf in &tokenized {
        for term in tf.keys() {
            *document_frequency.entry(term.as_str()).or_insert(0) += 1;
        }
    }
    let n = survivors.len() as f64;
    let vectors: Vec<HashMap<&str, f64>> = tokenized
        .iter()
        .map(|tf| {
            tf.iter()
                .map(|(term, freq)| {
                    let df = document_frequency[term.as_str()] as f64;
                    let idf = (n / df).ln() + 1.0;
                    (term.as_str(), freq * idf)
                })
                .collect()
        })
        .collect();

    let mut gone: HashSet<usize> = HashSet::new();
    for i in 0..survivors.len() {
        if gone.contains(&i) {
            continue;
        }
        for j in (i + 1)..survivors.len() {
            if gone.contains(&j) {
                continue;
            }
            if cosine(&vectors[i], &vectors[j]) > NEAR_DUP_SIMILARITY {
                // Keep the longer document.
                let (drop, keep) = if survivors[i].1.len() >= survivors[j].1.len() {
                    (j, i)
                } else {
                    (i, j)
                };
                gone.insert(drop);
                outcome
                    .dropped
                    .insert(survivors[drop].0.clone(), survivors[keep].0.clone());
                if drop == i {
                    break;
                }
            }
        }
    }
    outcome
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut counts: HashMap<String, f64> = HashMap::new();
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
    {
        *counts.entry(token.to_string()).or_insert(0.0) += 1.0;
    }
    counts
}

fn cosine(a: &HashMap<&str, f64>, b: &HashMap<&str, f64>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, w)| large.get(term).map(|v| w * v))
        .sum();
    let norm_a: f64 = a.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_occurrence_of_a_paragraph_is_dropped() {
        let deduper = ParagraphDeduper::new();
        let doc = "Copyright Example Corp.\n\nUnique body.\n";
        let first = deduper.filter(doc);
        assert!(first.contains("Copyright Example Corp."));
        let second = deduper.filter("Copyright Example Corp.\n\nOther body.\n");
        assert!(second.contains("Copyright Example Corp."));
        let third = deduper.filter("Copyright Example Corp.\n\nThird body.\n");
        assert!(!third.contains("Copyright Example Corp."));
        assert!(third.contains("Third body."));
    }

    #[test]
    fn headings_and_code_are_never_counted() {
        let deduper = ParagraphDeduper::new();
        let doc = "# Title\n\n```\nsame line\n```\n";
        for _ in 0..4 {
            let out = deduper.filter(doc);
            assert!(out.contains("# Title"));
            assert!(out.contains("same line"));
        }
    }

    #[test]
    fn repeated_sections_collapse_within_a_document() {
        let md = "# A\n\nbody one\n# B\n\nbody two\n# A\n\nbody one\n";
        let out = dedupe_sections(md);
        assert_eq!(out.matches("body one").count(), 1);
        assert!(out.contains("body two"));
    }

    #[test]
    fn exact_duplicates_collapse_across_documents() {
        let docs = vec![
            ("a".to_string(), "shared content here".to_string()),
            ("b".to_string(), "shared content here".to_string()),
            ("c".to_string(), "completely different page about widgets".to_string()),
        ];
        let outcome = dedupe_across_documents(&docs);
        assert_eq!(outcome.dropped.get("b").map(String::as_str), Some("a"));
        assert!(!outcome.dropped.contains_key("c"));
    }

    #[test]
    fn near_duplicates_keep_the_longer_document() {
        let base = "installation guide for the widget toolkit step one step two step three";
        let longer = format!("{base} appendix");
        let docs = vec![
            ("short".to_string(), base.to_string()),
            ("long".to_string(), longer),
            ("other".to_string(), "api reference for frobnicator class methods".to_string()),
        ];
        let outcome = dedupe_across_documents(&docs);
        assert_eq!(outcome.dropped.get("short").map(String::as_str), Some("long"));
        assert!(!outcome.dropped.contains_key("other"));
    }

    #[test]
    fn single_document_is_untouched() {
        let docs = vec![("a".to_string(), "alone".to_string())];
        assert!(dedupe_across_documents(&docs).dropped.is_empty());
    }
}
