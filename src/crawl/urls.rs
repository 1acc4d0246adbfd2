use std::sync::OnceLock;

use aho_corasick::AhoCorasick;
use regex::Regex;
use url::Url;

/// Sentinel parent value for the start URL; mapped to "no parent" in the
/// document model.
pub const ROOT_PARENT: &str = "ROOT";

/// Path fragments that mark raw/source mirrors of rendered pages.
const RAW_SOURCE_PATTERNS: &[&str] = &["/_sources/", "/raw/", "/source/", "/_static/", "/_downloads/"];

/// Extensions of media and archive files that never carry documentation text.
const MEDIA_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".ico", ".pdf", ".zip", ".tar", ".gz",
    ".mp3", ".mp4",
];

fn raw_source_matcher() -> &'static AhoCorasick {
    static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
    MATCHER.get_or_init(|| AhoCorasick::new(RAW_SOURCE_PATTERNS).unwrap())
}

fn source_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.(md|rst|ipynb|py|txt|json|xml|cpp|h|c|js|css)\.txt$").unwrap())
}

/// Canonicalize a URL: fragment stripped, default ports removed, trailing
/// slash removed from non-root paths ("/" itself is preserved).
///
/// Unparseable input is returned trimmed but otherwise unchanged so the
/// function stays idempotent.
pub fn normalize(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url.trim()) else {
        return url.trim().to_string();
    };
    parsed.set_fragment(None);
    let path = parsed.path().to_string();
    if path != "/" && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }
    parsed.to_string()
}

/// Apply, in order: domain allowlist (empty allows any), exclude-prefix
/// (any match denies), include-prefix (non-empty requires one match).
pub fn is_allowed(
    url: &str,
    allowed_domains: &[String],
    include_paths: &[String],
    exclude_paths: &[String],
) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or("");
    let path = parsed.path();

    if !allowed_domains.is_empty() && !allowed_domains.iter().any(|d| d == host) {
        return false;
    }
    if exclude_paths.iter().any(|ex| path.starts_with(ex.as_str())) {
        return false;
    }
    if !include_paths.is_empty() && !include_paths.iter().any(|inc| path.starts_with(inc.as_str())) {
        return false;
    }
    true
}

/// Deny raw/source mirrors, source-file downloads, media files, and
/// anything whose path suffix does not look like an HTML document.
pub fn should_skip(url: &str) -> bool {
    let lower = url.to_lowercase();
    if raw_source_matcher().is_match(&lower) || source_file_regex().is_match(&lower) {
        return true;
    }
    if MEDIA_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return true;
    }
    !is_html_doc(&lower)
}

/// HTML-ness is inferred from the path suffix: `.html`, `/`, or empty.
pub fn is_html_doc(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    path.is_empty() || path.ends_with('/') || path.ends_with(".html")
}

/// Deterministic document id: slug of the host plus the slugified path.
/// Two URLs that normalize equal always map to the same id.
pub fn url_to_id(url: &str) -> String {
    let normalized = normalize(url);
    let (host, path) = match Url::parse(&normalized) {
        Ok(parsed) => (
            parsed.host_str().unwrap_or("site").to_string(),
            parsed.path().trim_matches('/').to_string(),
        ),
        Err(_) => (normalized.clone(), String::new()),
    };
    let host_slug = slugify(&host);
    if path.is_empty() {
        host_slug
    } else {
        format!("{}-{}", host_slug, slugify(&path.replace('/', "-")))
    }
}

/// Lowercase, map non-alphanumeric runs to single hyphens, trim hyphens.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_hyphen = true;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            out.push('-');
            last_hyphen = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Best-effort title from a URL: "Home" for the root, otherwise the last
/// path segment with separators spaced and words title-cased.
pub fn url_to_title(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().trim_end_matches('/').to_string(),
        Err(_) => String::new(),
    };
    if path.is_empty() {
        return "Home".to_string();
    }
    let last = path.rsplit('/').next().unwrap_or("");
    let last = last.strip_suffix(".html").unwrap_or(last);
    last.split(|c| c == '-' || c == '_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve a potentially relative link against its page, keeping only
/// http/https targets. Fragment-only and scheme-handler links are dropped.
pub fn resolve_link(base: &str, href: &str) -> Option<String> {
    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with('#')
        || href.starts_with("data:")
    {
        return None;
    }
    let base_url = Url::parse(base).ok()?;
    let resolved = base_url.join(href).ok()?;
    if resolved.scheme() == "http" || resolved.scheme() == "https" {
        Some(resolved.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_fragment_and_trailing_slash() {
        assert_eq!(
            normalize("https://docs.example.com/a/#s"),
            "https://docs.example.com/a"
        );
        // Root slash is preserved.
        assert_eq!(normalize("https://docs.example.com/"), "https://docs.example.com/");
        // Default ports disappear.
        assert_eq!(
            normalize("https://docs.example.com:443/a/"),
            "https://docs.example.com/a"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        for u in [
            "https://docs.example.com/a/#s",
            "https://docs.example.com/",
            "http://x.test/path/?q=1#frag",
            "not a url at all",
        ] {
            let once = normalize(u);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn allowed_applies_domain_then_exclude_then_include() {
        let domains = vec!["docs.example.com".to_string()];
        assert!(is_allowed("https://docs.example.com/a", &domains, &[], &[]));
        assert!(!is_allowed("https://other.example.com/a", &domains, &[], &[]));

        let exclude = vec!["/private".to_string()];
        assert!(!is_allowed("https://docs.example.com/private/x", &domains, &[], &exclude));

        let include = vec!["/guide".to_string()];
        assert!(is_allowed("https://docs.example.com/guide/x", &domains, &include, &exclude));
        assert!(!is_allowed("https://docs.example.com/api/x", &domains, &include, &exclude));
    }

    #[test]
    fn skip_rules_catch_sources_and_media() {
        assert!(should_skip("https://x.test/_sources/page.md.txt"));
        assert!(should_skip("https://x.test/page.rst.txt"));
        assert!(should_skip("https://x.test/logo.png"));
        assert!(should_skip("https://x.test/archive.tar.gz"));
        // Non-HTML path suffix.
        assert!(should_skip("https://x.test/data.csv"));
        assert!(!should_skip("https://x.test/guide.html"));
        assert!(!should_skip("https://x.test/guide/"));
        assert!(!should_skip("https://x.test"));
    }

    #[test]
    fn ids_are_stable_and_follow_normalization() {
        let a = url_to_id("https://docs.example.com/guide/intro/#install");
        let b = url_to_id("https://docs.example.com/guide/intro/");
        assert_eq!(a, b);
        assert_eq!(a, "docs-example-com-guide-intro");
        assert_eq!(url_to_id("https://docs.example.com/"), "docs-example-com");
    }

    #[test]
    fn titles_fall_back_to_path_segments() {
        assert_eq!(url_to_title("https://x.test/"), "Home");
        assert_eq!(url_to_title("https://x.test/getting-started.html"), "Getting Started");
        assert_eq!(url_to_title("https://x.test/api_reference/"), "Api Reference");
    }

    #[test]
    fn link_resolution_skips_non_http_targets() {
        assert_eq!(
            resolve_link("https://x.test/a/", "../b.html"),
            Some("https://x.test/b.html".to_string())
        );
        assert_eq!(resolve_link("https://x.test/", "mailto:hi@x.test"), None);
        assert_eq!(resolve_link("https://x.test/", "#section"), None);
        assert_eq!(resolve_link("https://x.test/", "ftp://x.test/file"), None);
    }
}
