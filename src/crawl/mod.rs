pub mod robots;
pub mod urls;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use futures::stream::{self, StreamExt};
use rand::RngExt;
use scraper::{Html, Selector};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};
use url::Url;

use crate::core::config::SiteConfig;
use crate::core::error::PipelineError;
use crate::crawl::robots::RobotsCache;
use crate::crawl::urls::{
    is_allowed, is_html_doc, normalize, resolve_link, should_skip, url_to_id, url_to_title,
    ROOT_PARENT,
};

/// Bounds and politeness knobs for one crawl.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub max_depth: usize,
    pub max_pages: usize,
    /// Global bound on in-flight requests.
    pub max_concurrent: usize,
    /// Per-host bound on in-flight requests.
    pub per_host_concurrency: usize,
    /// Pause before each request, jittered up to 2x.
    pub download_delay: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub allowed_domains: Vec<String>,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub obey_robots_txt: bool,
    /// Whole-stage deadline; expiry yields partial results.
    pub stage_deadline: Option<Duration>,
    /// When set, raw bodies are persisted here as `<id>.html`.
    pub html_dir: Option<PathBuf>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 500,
            max_concurrent: 8,
            per_host_concurrency: 2,
            download_delay: Duration::from_millis(250),
            request_timeout: Duration::from_secs(10),
            user_agent: format!("thinkmark/{}", env!("CARGO_PKG_VERSION")),
            allowed_domains: Vec::new(),
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            obey_robots_txt: false,
            stage_deadline: None,
            html_dir: None,
        }
    }
}

impl CrawlConfig {
    pub fn from_site(site: &SiteConfig) -> Self {
        Self {
            max_depth: site.max_depth,
            max_pages: site.max_pages,
            allowed_domains: site.allowed_domains.clone(),
            include_paths: site.include_paths.clone(),
            exclude_paths: site.exclude_paths.clone(),
            obey_robots_txt: site.obey_robots_txt,
            ..Default::default()
        }
    }
}

/// One fetched page: canonical URL, observed parent, raw body.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    /// Canonical parent URL; the start page carries the ROOT sentinel.
    pub parent: String,
    pub title: String,
    pub body: String,
    pub depth: usize,
    pub is_html: bool,
}

/// Everything a crawl produced, plus the side tables the later stages use.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    /// Canonical root (rewritten when the start URL redirected).
    pub start_url: String,
    pub pages: Vec<CrawledPage>,
    /// url → stored filename (`<id>.html`).
    pub urls_map: HashMap<String, String>,
    /// child canonical url → parent canonical url (root maps to ROOT).
    pub parent_map: HashMap<String, String>,
    pub failed: usize,
}

struct FetchResult {
    canonical: String,
    title: String,
    body: String,
    is_html: bool,
    links: Vec<String>,
}

/// Bounded BFS from `start_url`.
///
/// Dedup key is the normalized URL; the first worker to see a URL owns its
/// parent edge. Per-URL failures are logged and counted, never fatal.
pub async fn crawl_site(
    client: &reqwest::Client,
    start_url: &str,
    config: &CrawlConfig,
) -> Result<CrawlOutcome, PipelineError> {
    let started = Instant::now();
    let mut root = normalize(start_url);
    Url::parse(&root)
        .map_err(|e| PipelineError::Config(format!("invalid start URL {start_url}: {e}")))?;

    if let Some(dir) = &config.html_dir {
        std::fs::create_dir_all(dir)?;
    }

    info!(
        "Starting crawl of {} (max_depth: {}, max_pages: {})",
        root, config.max_depth, config.max_pages
    );

    let global_limit = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let host_limits: Arc<Mutex<HashMap<String, Arc<Semaphore>>>> =
        Arc::new(Mutex::new(HashMap::new()));
    let mut robots = RobotsCache::default();

    // visited is keyed on normalized URLs; inserting here claims the URL
    // and its parent edge, so children cannot race their parent's record.
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, String, usize)> = VecDeque::new();
    visited.insert(root.clone());
    queue.push_back((root.clone(), ROOT_PARENT.to_string(), 0));

    let mut outcome = CrawlOutcome {
        start_url: root.clone(),
        ..Default::default()
    };
    outcome.parent_map.insert(root.clone(), ROOT_PARENT.to_string());

    loop {
        if outcome.pages.len() >= config.max_pages {
            info!("Reached max_pages limit: {}", config.max_pages);
            break;
        }
        if let Some(deadline) = config.stage_deadline {
            if started.elapsed() >= deadline {
                warn!("Crawl deadline reached; returning partial results");
                break;
            }
        }

        let remaining = config.max_pages - outcome.pages.len();
        let batch_size = remaining.min(config.max_concurrent * 2).max(1);
        let mut batch: Vec<(String, String, usize)> = Vec::new();
        while batch.len() < batch_size {
            match queue.pop_front() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        if batch.is_empty() {
            break;
        }

        // robots.txt is consulted before a URL is spent from the batch.
        let mut admitted: Vec<(String, String, usize)> = Vec::new();
        for (url, parent, depth) in batch {
            if config.obey_robots_txt {
                if let Ok(parsed) = Url::parse(&url) {
                    if !robots.allows(client, &parsed, &config.user_agent).await {
                        info!("robots.txt disallows {url}");
                        continue;
                    }
                }
            }
            admitted.push((url, parent, depth));
        }

        let results: Vec<(String, String, usize, Result<FetchResult, anyhow::Error>)> =
            stream::iter(admitted)
                .map(|(url, parent, depth)| {
                    let client = client.clone();
                    let config = config.clone();
                    let global_limit = Arc::clone(&global_limit);
                    let host_limits = Arc::clone(&host_limits);
                    async move {
                        let result =
                            fetch_page(&client, &url, depth, &config, global_limit, host_limits)
                                .await;
                        (url, parent, depth, result)
                    }
                })
                .buffer_unordered(config.max_concurrent.max(1))
                .collect()
                .await;

        for (requested, parent, depth, result) in results {
            match result {
                Ok(fetch) => {
                    let canonical = fetch.canonical.clone();

                    // Redirect landed on an already-seen page: plain dedup.
                    if canonical != requested && !visited.insert(canonical.clone()) {
                        continue;
                    }

                    // A redirected start URL rewrites the root.
                    if depth == 0 && canonical != root {
                        outcome.parent_map.remove(&root);
                        outcome.parent_map.insert(canonical.clone(), ROOT_PARENT.to_string());
                        root = canonical.clone();
                        outcome.start_url = root.clone();
                    } else if canonical != requested {
                        let edge = outcome
                            .parent_map
                            .remove(&requested)
                            .unwrap_or_else(|| parent.clone());
                        outcome.parent_map.insert(canonical.clone(), edge);
                    }

                    if should_skip(&canonical) {
                        continue;
                    }

                    let id = url_to_id(&canonical);
                    let filename = format!("{id}.html");
                    if let Some(dir) = &config.html_dir {
                        if let Err(e) = std::fs::write(dir.join(&filename), &fetch.body) {
                            warn!("failed to persist raw html for {canonical}: {e}");
                        }
                    }
                    outcome.urls_map.insert(canonical.clone(), filename);

                    if fetch.is_html && depth < config.max_depth {
                        for link in fetch.links {
                            if visited.contains(&link) {
                                continue;
                            }
                            visited.insert(link.clone());
                            outcome.parent_map.insert(link.clone(), canonical.clone());
                            queue.push_back((link, canonical.clone(), depth + 1));
                        }
                    }

                    let parent_edge = outcome
                        .parent_map
                        .get(&canonical)
                        .cloned()
                        .unwrap_or(parent);
                    outcome.pages.push(CrawledPage {
                        url: canonical,
                        parent: parent_edge,
                        title: fetch.title,
                        body: fetch.body,
                        depth,
                        is_html: fetch.is_html,
                    });
                }
                Err(e) => {
                    warn!("Failed to crawl {requested}: {e}");
                    outcome.failed += 1;
                }
            }
        }
    }

    info!(
        "Crawl completed: {} pages, {} failed, {}ms total",
        outcome.pages.len(),
        outcome.failed,
        started.elapsed().as_millis()
    );
    Ok(outcome)
}

async fn fetch_page(
    client: &reqwest::Client,
    url: &str,
    depth: usize,
    config: &CrawlConfig,
    global_limit: Arc<Semaphore>,
    host_limits: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
) -> anyhow::Result<FetchResult> {
    let parsed = Url::parse(url)?;
    let host = parsed.host_str().unwrap_or("").to_string();

    let host_limit = {
        let mut limits = host_limits.lock().await;
        Arc::clone(
            limits
                .entry(host)
                .or_insert_with(|| Arc::new(Semaphore::new(config.per_host_concurrency.max(1)))),
        )
    };
    let _global = global_limit.acquire().await?;
    let _host = host_limit.acquire().await?;

    // Politeness pause with jitter so parallel workers spread out.
    if !config.download_delay.is_zero() {
        let jitter: f64 = rand::rng().random_range(1.0..2.0);
        tokio::time::sleep(config.download_delay.mul_f64(jitter)).await;
    }

    // Retry transient failures; 4xx/5xx are permanent for this URL.
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_max_elapsed_time(Some(Duration::from_secs(15)))
        .build();
    let response = retry(backoff, || async {
        let resp = client
            .get(url)
            .header(reqwest::header::USER_AGENT, &config.user_agent)
            .timeout(config.request_timeout)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(anyhow::anyhow!(e)))?;
        if resp.status().is_server_error() {
            return Err(backoff::Error::transient(anyhow::anyhow!(
                "server error {}",
                resp.status()
            )));
        }
        if !resp.status().is_success() {
            return Err(backoff::Error::permanent(anyhow::anyhow!(
                "http status {}",
                resp.status()
            )));
        }
        Ok(resp)
    })
    .await?;

    // The final URL after redirects becomes the canonical identity.
    let canonical = normalize(response.url().as_str());
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();
    let is_html = content_type.contains("text/html")
        || (content_type.is_empty() && is_html_doc(&canonical));

    let body = response.text().await?;

    let (title, links) = if is_html {
        let (title, raw_links) = extract_title_and_links(&body, &canonical);
        let mut filtered = Vec::new();
        if depth < config.max_depth {
            for link in raw_links {
                let link = normalize(&link);
                if should_skip(&link) || !is_html_doc(&link) {
                    continue;
                }
                if !is_allowed(
                    &link,
                    &config.allowed_domains,
                    &config.include_paths,
                    &config.exclude_paths,
                ) {
                    continue;
                }
                filtered.push(link);
            }
        }
        (title.unwrap_or_else(|| url_to_title(&canonical)), filtered)
    } else {
        // Non-text responses: stored, title from URL, no link extraction.
        (url_to_title(&canonical), Vec::new())
    };

    Ok(FetchResult {
        canonical,
        title,
        body,
        is_html,
        links,
    })
}

/// Pull the `<title>` and every resolvable `<a href>` out of a page.
/// CPU-bound and non-suspending by design.
fn extract_title_and_links(html: &str, page_url: &str) -> (Option<String>, Vec<String>) {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let mut links = Vec::new();
    if let Ok(sel) = Selector::parse("a[href]") {
        for el in document.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                if let Some(resolved) = resolve_link(page_url, href) {
                    links.push(resolved);
                }
            }
        }
    }
    (title, links)
}
