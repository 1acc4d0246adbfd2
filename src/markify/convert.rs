use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};

fn re_multi_newline() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

fn re_language_class() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"language-([A-Za-z0-9_+-]+)").unwrap())
}

/// Convert a cleaned HTML fragment to Markdown.
///
/// Fenced code blocks are carved out before the generic conversion so
/// nothing can reflow or escape them, then restored afterwards. Output is
/// never line-wrapped; runs of 3+ newlines collapse to exactly two and a
/// single `<!-- Source: url -->` provenance comment is prepended.
pub fn to_markdown(fragment: &str, url: &str) -> String {
    let (html_without_code, code_blocks) = protect_code_blocks(fragment);

    let mut markdown = html2md::parse_html(&html_without_code);

    for (token, fenced) in &code_blocks {
        markdown = markdown.replace(token, fenced);
    }

    let markdown = re_multi_newline().replace_all(&markdown, "\n\n");
    format!("<!-- Source: {} -->\n\n{}\n", url, markdown.trim())
}

/// Replace every `<pre>` subtree with an alphanumeric placeholder the
/// converter passes through untouched, returning the fenced replacements.
fn protect_code_blocks(fragment: &str) -> (String, Vec<(String, String)>) {
    let doc = Html::parse_fragment(fragment);
    let serialized = doc.root_element().inner_html();
    let Ok(pre_sel) = Selector::parse("pre") else {
        return (fragment.to_string(), Vec::new());
    };

    let mut out = serialized;
    let mut blocks = Vec::new();
    for (i, pre) in doc.select(&pre_sel).enumerate() {
        let language = re_language_class()
            .captures(&pre.html())
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        let code: String = pre.text().collect();
        let code = code.trim_end_matches('\n');
        let fenced = format!("```{}\n{}\n```", language, code);
        let token = format!("THINKMARKCODEBLOCK{}X", i);
        out = out.replace(&pre.html(), &format!("<p>{}</p>", token));
        blocks.push((token, fenced));
    }
    (out, blocks)
}

/// Approximate token count used for chunk sizing and metadata.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_atx_heading_and_source_comment() {
        let md = to_markdown("<h1>T</h1><p>P</p>", "https://x.test/a");
        assert!(md.starts_with("<!-- Source: https://x.test/a -->\n\n"));
        assert!(md.contains("T"));
        assert!(md.contains("P"));
    }

    #[test]
    fn code_blocks_keep_language_and_content() {
        let html = r#"<p>before</p><pre><code class="language-python">def f():
    return 1</code></pre><p>after</p>"#;
        let md = to_markdown(html, "https://x.test/a");
        assert!(md.contains("```python\ndef f():\n    return 1\n```"));
        assert!(md.contains("before"));
        assert!(md.contains("after"));
        // Balanced fences.
        assert_eq!(md.matches("```").count() % 2, 0);
    }

    #[test]
    fn code_without_language_gets_bare_fence() {
        let html = "<pre><code>plain</code></pre>";
        let md = to_markdown(html, "https://x.test/a");
        assert!(md.contains("```\nplain\n```"));
    }

    #[test]
    fn newline_runs_collapse_to_two() {
        let html = "<p>a</p><br><br><br><p>b</p>";
        let md = to_markdown(html, "https://x.test/a");
        assert!(!md.contains("\n\n\n"));
    }

    #[test]
    fn token_estimate_counts_whitespace_words() {
        assert_eq!(estimate_tokens("one two  three\nfour"), 4);
        assert_eq!(estimate_tokens(""), 0);
    }
}
