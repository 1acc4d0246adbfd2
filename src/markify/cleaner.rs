use std::sync::OnceLock;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// Query parameters that only ever track the reader.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "mc_cid", "mc_eid", "_ga", "_gl", "ref", "source",
];

/// Doc-theme chrome stripped before main-content selection. Tag names are
/// removed with their subtrees; class/id tokens match common Sphinx/RTD
/// furniture.
const REMOVE_TAGS: &[&str] = &["nav", "footer", "header", "script", "style", "iframe", "noscript", "aside"];
const REMOVE_TOKENS: &[&str] = &[
    "wy-nav-side",
    "wy-side-nav-search",
    "wy-menu",
    "wy-breadcrumbs-aside",
    "rst-footer-buttons",
    "rst-versions",
    "version-switch",
    "language-switch",
    "rtd-search-form",
];

/// Main-content preference order; first match wins, `<body>` is the
/// fallback.
const KEEP_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role=\"main\"]",
    ".document",
    ".wy-nav-content",
    ".content",
    "#content",
    ".main",
    "#main",
    ".section",
];

#[derive(Debug, thiserror::Error)]
#[error("no usable content in page: {0}")]
pub struct CleanError(pub String);

fn re_comments() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").unwrap())
}

fn re_empty_p() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<p[^>]*>(?:\s|&nbsp;)*</p>").unwrap())
}

fn re_attr_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\b(href|src)="([^"]*)""#).unwrap())
}

/// Strips site chrome and returns a sanitized HTML fragment focused on the
/// page's main content. Order matters; see each step.
pub fn clean_html(html: &str, page_url: &str) -> Result<String, CleanError> {
    // 1) Remove chrome subtrees before anything else so a nav <main> link
    //    cannot win main-content selection.
    let mut pre = strip_tags(html, REMOVE_TAGS);
    pre = strip_chrome_blocks(&pre, REMOVE_TOKENS);

    // 2) First match of the preference list, else <body>, else the page.
    let fragment = select_main_content(&pre);

    // 3) Comments and empty paragraphs.
    let mut fragment = re_comments().replace_all(&fragment, "").to_string();
    fragment = re_empty_p().replace_all(&fragment, "").to_string();

    // 4) Resolve relative href/src against the page URL, 7) dropping
    //    tracking parameters from anchors while we are rewriting them.
    fragment = resolve_urls(&fragment, page_url);

    // 5) Complex tables become a placeholder note.
    fragment = flatten_complex_tables(&fragment);

    // 6) Unlabelled code blocks get a guessed language class.
    fragment = annotate_code_language(&fragment);

    static RE_TAGS: OnceLock<Regex> = OnceLock::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"<[^>]*>").unwrap());
    let text_probe = re_tags.replace_all(&fragment, "");
    if text_probe.trim().is_empty() && !fragment.contains("<img") {
        return Err(CleanError(page_url.to_string()));
    }
    Ok(fragment)
}

fn strip_tags(html: &str, tags: &[&str]) -> String {
    let pattern = format!(r"(?is)<(?:{0})\b[^>]*?>.*?</(?:{0})>", tags.join("|"));
    let re = Regex::new(&pattern).unwrap();
    re.replace_all(html, " ").to_string()
}

fn strip_chrome_blocks(html: &str, tokens: &[&str]) -> String {
    let pattern = format!(
        r#"(?is)<(?:div|section|form|ul)\b[^>]*?(?:id|class)="[^"]*(?:{})[^"]*"[^>]*?>.*?</(?:div|section|form|ul)>"#,
        tokens.join("|")
    );
    let re = Regex::new(&pattern).unwrap();
    re.replace_all(html, " ").to_string()
}

fn select_main_content(html: &str) -> String {
    let document = Html::parse_document(html);
    for sel_str in KEEP_SELECTORS {
        if let Ok(sel) = Selector::parse(sel_str) {
            if let Some(el) = document.select(&sel).next() {
                return el.html();
            }
        }
    }
    if let Ok(sel) = Selector::parse("body") {
        if let Some(body) = document.select(&sel).next() {
            return body.inner_html();
        }
    }
    html.to_string()
}

/// Undo the entity escaping the serializer applies to attribute values,
/// so query strings parse as written in the source page.
fn html_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn resolve_urls(fragment: &str, page_url: &str) -> String {
    let Ok(base) = Url::parse(page_url) else {
        return fragment.to_string();
    };
    re_attr_url()
        .replace_all(fragment, |caps: &regex::Captures<'_>| {
            let attr = &caps[1];
            let value = html_unescape(&caps[2]);
            if value.starts_with("mailto:") || value.starts_with("data:") || value.starts_with('#')
            {
                return caps[0].to_string();
            }
            match base.join(&value) {
                Ok(mut resolved) => {
                    if attr.eq_ignore_ascii_case("href") {
                        strip_tracking_params(&mut resolved);
                    }
                    format!(r#"{}="{}""#, attr, resolved)
                }
                Err(_) => caps[0].to_string(),
            }
        })
        .to_string()
}

fn strip_tracking_params(url: &mut Url) {
    if url.query().is_none() {
        return;
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        const QUERY_ESCAPE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'&').add(b'=');
        let query: String = kept
            .iter()
            .map(|(k, v)| {
                let k = utf8_percent_encode(k, QUERY_ESCAPE);
                if v.is_empty() {
                    k.to_string()
                } else {
                    format!("{k}={}", utf8_percent_encode(v, QUERY_ESCAPE))
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }
}

/// Tables with more than 3 columns or nested tables turn Markdown output
/// into noise; replace them with a marker blockquote.
fn flatten_complex_tables(fragment: &str) -> String {
    let doc = Html::parse_fragment(fragment);
    let serialized = doc.root_element().inner_html();
    let Ok(table_sel) = Selector::parse("table") else {
        return fragment.to_string();
    };
    let Ok(cell_sel) = Selector::parse("tr") else {
        return fragment.to_string();
    };

    let mut out = serialized.clone();
    for table in doc.select(&table_sel) {
        let nested = table
            .select(&table_sel)
            .any(|inner| inner.id() != table.id());
        let max_cols = table
            .select(&cell_sel)
            .map(|row| {
                row.children()
                    .filter_map(scraper::ElementRef::wrap)
                    .filter(|c| matches!(c.value().name(), "td" | "th"))
                    .count()
            })
            .max()
            .unwrap_or(0);
        if nested || max_cols > 3 {
            out = out.replace(
                &table.html(),
                "<blockquote><p>NOTE: table removed</p></blockquote>",
            );
        }
    }
    out
}

/// Heuristic language tagging for `<pre><code>` without a `language-*`
/// class: def/class → python, function/const → javascript, tag-looking →
/// html, otherwise text.
fn annotate_code_language(fragment: &str) -> String {
    let doc = Html::parse_fragment(fragment);
    let serialized = doc.root_element().inner_html();
    let Ok(pre_sel) = Selector::parse("pre") else {
        return fragment.to_string();
    };

    let mut out = serialized.clone();
    for pre in doc.select(&pre_sel) {
        let block = pre.html();
        if block.contains("language-") || !block.contains("<code") {
            continue;
        }
        let text: String = pre.text().collect();
        let lang = guess_language(&text);
        let tagged = block.replacen("<code", &format!(r#"<code class="language-{lang}""#), 1);
        out = out.replace(&block, &tagged);
    }
    out
}

pub(crate) fn guess_language(code: &str) -> &'static str {
    let trimmed = code.trim_start();
    if trimmed.starts_with('<') && code.contains("</") {
        return "html";
    }
    if code.contains("def ") || code.contains("class ") && code.contains(':') {
        return "python";
    }
    if code.contains("function") || code.contains("const ") || code.contains("=>") {
        return "javascript";
    }
    "text"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_nav_and_selects_main() {
        let html = "<nav>x</nav><main><h1>T</h1><p>P</p></main>";
        let cleaned = clean_html(html, "https://x.test/page.html").unwrap();
        assert!(cleaned.contains("<h1>T</h1>"));
        assert!(cleaned.contains("<p>P</p>"));
        assert!(!cleaned.contains(">x<"));
    }

    #[test]
    fn drops_comments_and_empty_paragraphs() {
        let html = "<main><p></p><!-- hidden --><p>kept</p></main>";
        let cleaned = clean_html(html, "https://x.test/").unwrap();
        assert!(!cleaned.contains("hidden"));
        assert!(cleaned.contains("kept"));
        assert!(!cleaned.contains("<p></p>"));
    }

    #[test]
    fn resolves_relative_links_and_strips_tracking() {
        let html = r#"<main><p><a href="sub/page.html?utm_source=x&keep=1">go</a></p></main>"#;
        let cleaned = clean_html(html, "https://x.test/docs/").unwrap();
        assert!(cleaned.contains(r#"href="https://x.test/docs/sub/page.html?keep=1""#));
    }

    #[test]
    fn wide_tables_become_placeholder() {
        let html = "<main><p>intro</p><table><tr><td>1</td><td>2</td><td>3</td><td>4</td></tr></table></main>";
        let cleaned = clean_html(html, "https://x.test/").unwrap();
        assert!(cleaned.contains("NOTE: table removed"));
        assert!(!cleaned.contains("<td>4</td>"));
    }

    #[test]
    fn narrow_tables_survive() {
        let html = "<main><p>intro</p><table><tr><td>a</td><td>b</td></tr></table></main>";
        let cleaned = clean_html(html, "https://x.test/").unwrap();
        assert!(cleaned.contains("<td>a</td>"));
    }

    #[test]
    fn code_without_class_gets_language_guess() {
        let html = "<main><p>x</p><pre><code>def hello():\n    pass</code></pre></main>";
        let cleaned = clean_html(html, "https://x.test/").unwrap();
        assert!(cleaned.contains(r#"class="language-python""#));
    }

    #[test]
    fn chrome_classes_are_removed() {
        let html = r#"<div class="wy-nav-side">menu</div><main><p>body</p></main>"#;
        let cleaned = clean_html(html, "https://x.test/").unwrap();
        assert!(!cleaned.contains("menu"));
        assert!(cleaned.contains("body"));
    }

    #[test]
    fn empty_page_is_an_error() {
        assert!(clean_html("<html><body></body></html>", "https://x.test/").is_err());
    }

    #[test]
    fn language_guesses() {
        assert_eq!(guess_language("def f():\n  return 1"), "python");
        assert_eq!(guess_language("const x = () => 1;"), "javascript");
        assert_eq!(guess_language("<div>hi</div>"), "html");
        assert_eq!(guess_language("plain words"), "text");
    }
}
