use std::collections::HashMap;

/// Okapi BM25 parameters; standard literature defaults.
const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Sparse lexical retriever over the docstore texts.
///
/// Built once per loaded index; queries are scored against precomputed
/// term frequencies and document lengths.
#[derive(Debug, Default)]
pub struct Bm25Index {
    doc_ids: Vec<String>,
    term_frequencies: Vec<HashMap<String, usize>>,
    doc_lengths: Vec<usize>,
    document_frequency: HashMap<String, usize>,
    average_length: f64,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

impl Bm25Index {
    pub fn build<'a>(docs: impl Iterator<Item = (&'a String, &'a str)>) -> Self {
        let mut index = Bm25Index::default();
        for (id, text) in docs {
            let tokens = tokenize(text);
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *index.document_frequency.entry(term.clone()).or_insert(0) += 1;
            }
            index.doc_ids.push(id.clone());
            index.doc_lengths.push(tokens.len());
            index.term_frequencies.push(tf);
        }
        let total: usize = index.doc_lengths.iter().sum();
        index.average_length = if index.doc_ids.is_empty() {
            0.0
        } else {
            total as f64 / index.doc_ids.len() as f64
        };
        index
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    /// Top-k ids by BM25 score; zero-scoring documents are omitted.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f32)> {
        if self.is_empty() {
            return Vec::new();
        }
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }
        let n = self.doc_ids.len() as f64;

        let mut scored: Vec<(String, f32)> = Vec::new();
        for (i, tf) in self.term_frequencies.iter().enumerate() {
            let dl = self.doc_lengths[i] as f64;
            let mut score = 0.0f64;
            for term in &query_terms {
                let Some(&freq) = tf.get(term) else {
                    continue;
                };
                let df = *self.document_frequency.get(term).unwrap_or(&0) as f64;
                let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                let freq = freq as f64;
                let denom = freq + K1 * (1.0 - B + B * dl / self.average_length.max(1.0));
                score += idf * freq * (K1 + 1.0) / denom;
            }
            if score > 0.0 {
                scored.push((self.doc_ids[i].clone(), score as f32));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(docs: &[(&str, &str)]) -> Bm25Index {
        let owned: Vec<(String, String)> = docs
            .iter()
            .map(|(id, text)| (id.to_string(), text.to_string()))
            .collect();
        Bm25Index::build(owned.iter().map(|(id, text)| (id, text.as_str())))
    }

    #[test]
    fn ranks_matching_documents_first() {
        let index = build(&[
            ("install", "how to install: run pip install foo"),
            ("tutorial", "installation tutorial"),
            ("other", "unrelated content about zebras"),
        ]);
        let hits = index.search("how do I install?", 3);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, "install");
        assert!(hits.iter().all(|(id, _)| id != "other"));
    }

    #[test]
    fn rare_terms_outweigh_common_ones() {
        let index = build(&[
            ("a", "widget widget widget common"),
            ("b", "frobnicator common"),
            ("c", "common words only here"),
        ]);
        let hits = index.search("frobnicator", 3);
        assert_eq!(hits[0].0, "b");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn empty_query_or_index_yields_nothing() {
        let index = build(&[("a", "text")]);
        assert!(index.search("", 3).is_empty());
        let empty = Bm25Index::build(std::iter::empty());
        assert!(empty.search("anything", 3).is_empty());
    }
}
