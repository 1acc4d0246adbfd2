pub mod document;
pub mod hierarchy;
pub mod state;

pub use document::{DocType, Document};
pub use state::PipelineState;

use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};

use crate::annotate;
use crate::core::config::{embed_model_id, LlmConfig, SiteConfig};
use crate::core::error::{AnnotateError, PipelineError};
use crate::core::types::{PipelineReport, StageReport};
use crate::crawl::urls::{url_to_id, ROOT_PARENT};
use crate::crawl::{crawl_site, CrawlConfig};
use crate::index::builder::{build_index, BuildOptions};
use crate::index::embedder::StaticEmbedder;
use crate::markify::markify_stage;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub site: SiteConfig,
    pub llm: LlmConfig,
    pub build_vector_index: bool,
    /// Rebuild the vector index even when a loadable one exists.
    pub force: bool,
}

/// HTTP client shared by the crawler and the annotator, with timeouts
/// taken from the environment.
pub fn http_client() -> Result<reqwest::Client, PipelineError> {
    let http_timeout = std::env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(30);
    let connect_timeout = std::env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(10);
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(http_timeout))
        .connect_timeout(std::time::Duration::from_secs(connect_timeout))
        .build()
        .map_err(|e| PipelineError::Internal(format!("http client: {e}")))
}

/// Fetch the site into HTML documents with parent edges.
pub async fn scrape_stage(
    state: &mut PipelineState,
    client: &reqwest::Client,
    site: &SiteConfig,
) -> Result<StageReport, PipelineError> {
    let started = Instant::now();
    info!("Starting scrape stage for {}", state.site_url);

    let mut config = CrawlConfig::from_site(site);
    config.html_dir = Some(state.output_dir.join("_temp_html"));

    let outcome = crawl_site(client, &state.site_url, &config).await?;
    // A redirected start URL becomes the site identity.
    state.site_url = outcome.start_url.clone();

    let processed = outcome.pages.len();
    for page in outcome.pages {
        let id = url_to_id(&page.url);
        let parent_id = outcome
            .parent_map
            .get(&page.url)
            .filter(|p| p.as_str() != ROOT_PARENT)
            .map(|p| url_to_id(p));

        let mut doc = Document::new(id, &page.url, &page.title);
        doc.content = page.body;
        doc.set_doc_type(DocType::Html);
        doc.set_meta_i64("depth", page.depth as i64);
        if !page.is_html {
            doc.set_meta_str("content_kind", "non-html");
        }
        doc.parent_id = parent_id;
        state.add_document(doc);
    }
    state.build_hierarchy();

    info!(
        "Scrape stage complete: {} documents for {}",
        state.documents.len(),
        state.site_url
    );
    Ok(StageReport {
        stage: "scrape".to_string(),
        processed,
        failed: outcome.failed,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Run scrape → markify → annotate → (optional) vector index against one
/// mutable state, persisting after every stage so a crash loses at most
/// the stage in flight.
pub async fn run_pipeline(
    url: &str,
    output_dir: &Path,
    options: &PipelineOptions,
) -> Result<PipelineReport, PipelineError> {
    info!("Starting ThinkMark pipeline for {url}");
    let client = http_client()?;
    let mut stages: Vec<StageReport> = Vec::new();

    // A previous run's persisted state lets us resume after the crawl.
    let mut state = if options.force {
        PipelineState::new(url, output_dir)
    } else {
        PipelineState::load(url, output_dir)
    };

    if state.documents.is_empty() {
        // Stage 1: scrape.
        stages.push(scrape_stage(&mut state, &client, &options.site).await?);
        state.save()?;
    } else {
        info!(
            "Resuming from persisted state ({} documents); skipping crawl",
            state.documents.len()
        );
    }

    // Stage 2: markify.
    stages.push(markify_stage(&mut state).await);
    state.save()?;

    // Stage 3: annotate (skipped cleanly without an API key).
    match annotate::annotate_stage(&mut state, &client, &options.llm).await {
        Ok(report) => {
            stages.push(report);
            state.save()?;
        }
        Err(AnnotateError::MissingApiKey) => {
            info!("No annotation API key configured; keeping plain Markdown");
        }
        Err(e) => {
            warn!("Annotation stage failed: {e}; proceeding with partial pipeline");
        }
    }

    // Stage 4 (optional): vector index.
    let mut vector_index_dir = None;
    if options.build_vector_index {
        let started = Instant::now();
        let embedder = StaticEmbedder::new(embed_model_id());
        let persist_dir = state.vector_index_dir();
        let build = BuildOptions {
            rebuild: true,
            ..Default::default()
        };
        match build_index(
            &state.annotated_dir(),
            &persist_dir,
            state.hierarchy.as_ref(),
            &embedder,
            embedder.model_id(),
            &build,
        )
        .await
        {
            Ok(index) => {
                info!("Vector index built at {}", persist_dir.display());
                vector_index_dir = Some(persist_dir.display().to_string());
                stages.push(StageReport {
                    stage: "vector-index".to_string(),
                    processed: index.nodes.len(),
                    failed: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            Err(e) => warn!("Vector indexing failed: {e}"),
        }
    }

    info!("Pipeline for {} completed", state.site_url);
    Ok(PipelineReport {
        site_url: state.site_url.clone(),
        output_dir: state.output_dir.display().to_string(),
        documents: state.documents.len(),
        stages,
        vector_index_dir,
    })
}
