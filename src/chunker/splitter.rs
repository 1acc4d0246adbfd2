/// Sentence-based fallback splitter for sections too large to embed whole.
///
/// Sentences are grouped greedily up to `chunk_size` approximate tokens
/// (whitespace words); each following chunk re-opens with the last
/// `chunk_overlap` tokens of its predecessor so context survives the cut.
pub fn split_sentences(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let sentences = sentence_boundaries(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for sentence in sentences {
        let tokens = sentence.split_whitespace().count();
        if current_tokens + tokens > chunk_size && !current.is_empty() {
            let carry = overlap_tail(&current, chunk_overlap);
            chunks.push(std::mem::take(&mut current));
            current = carry;
            current_tokens = current.split_whitespace().count();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
        current_tokens += tokens;
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

fn overlap_tail(text: &str, overlap_tokens: usize) -> String {
    if overlap_tokens == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(overlap_tokens);
    words[start..].join(" ")
}

/// Split on sentence-final punctuation followed by whitespace; newlines
/// also terminate a sentence so list-ish prose stays line-aligned.
fn sentence_boundaries(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        let at_boundary = matches!(c, '.' | '!' | '?')
            && bytes
                .get(i + 1)
                .map(|n| (*n as char).is_whitespace())
                .unwrap_or(true);
        if at_boundary || c == '\n' {
            let slice = text[start..=i].trim();
            if !slice.is_empty() {
                out.push(slice);
            }
            start = i + 1;
        }
        i += 1;
    }
    if start < text.len() {
        let slice = text[start..].trim();
        if !slice.is_empty() {
            out.push(slice);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = split_sentences("One sentence. Another one.", 100, 10);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Another one."));
    }

    #[test]
    fn long_text_splits_with_overlap() {
        let text = (0..40)
            .map(|i| format!("Sentence number {i} has exactly six words."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_sentences(&text, 50, 10);
        assert!(chunks.len() > 1);
        // Overlap: each later chunk starts with the tail of the previous.
        for pair in chunks.windows(2) {
            let prev_words: Vec<&str> = pair[0].split_whitespace().collect();
            let tail = prev_words[prev_words.len().saturating_sub(3)..].join(" ");
            assert!(
                pair[1].contains(&tail),
                "chunk lost overlap context: {tail:?}"
            );
        }
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(split_sentences("", 100, 10).is_empty());
        assert!(split_sentences("   \n  ", 100, 10).is_empty());
    }
}
