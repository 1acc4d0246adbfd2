use std::path::{Path, PathBuf};

use tracing::{error, info};

use thinkmark::core::config::{
    load_global_config, save_global_config, storage_path, LlmConfig, SiteConfig,
};
use thinkmark::core::error::PipelineError;
use thinkmark::crawl::urls::slugify;
use thinkmark::pipeline::state::cleanup_temp_dirs;
use thinkmark::pipeline::{run_pipeline, PipelineOptions};

const USAGE: &str = "\
thinkmark — documentation ingestion pipeline

USAGE:
    thinkmark init [--path DIR]
    thinkmark ingest URL [--site-config FILE] [--api-key KEY] [--force] [--vector-index]
    thinkmark pipeline URL [--output DIR] [--config FILE] [--api-key KEY] [--vector-index] [--verbose]
    thinkmark scrape URL --output DIR [--config FILE]
    thinkmark markify DIR
    thinkmark annotate DIR [--api-key KEY]
    thinkmark index DIR [--rebuild]
    thinkmark cleanup DIR [-y]
    thinkmark serve

The single-stage commands (scrape/markify/annotate/index) operate on the
same on-disk state the full pipeline uses, so stages can be re-run in
isolation.

Exit codes: 0 success (including partial page failures), 1 user/config error, 2 runtime error.
";

fn flag_value(args: &[String], name: &str) -> Option<String> {
    let mut iter = args.iter().peekable();
    while let Some(a) = iter.next() {
        if a == name {
            if let Some(v) = iter.peek() {
                return Some((*v).clone());
            }
        } else if let Some(rest) = a.strip_prefix(&format!("{name}=")) {
            return Some(rest.to_string());
        }
    }
    None
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().cloned() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    let rest = &args[1..];

    let code = match command.as_str() {
        "init" => cmd_init(rest),
        "ingest" => cmd_ingest(rest).await,
        "pipeline" => cmd_pipeline(rest).await,
        "scrape" => cmd_scrape(rest).await,
        "markify" => cmd_markify(rest).await,
        "annotate" => cmd_annotate(rest).await,
        "index" => cmd_index(rest).await,
        "cleanup" => cmd_cleanup(rest),
        "serve" => {
            match thinkmark::mcp::stdio::run().await {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("serve failed: {e}");
                    2
                }
            }
        }
        "--help" | "-h" | "help" => {
            println!("{USAGE}");
            0
        }
        other => {
            eprintln!("unknown command: {other}\n\n{USAGE}");
            1
        }
    };
    std::process::exit(code);
}

fn cmd_init(args: &[String]) -> i32 {
    init_tracing(false);
    let path = flag_value(args, "--path")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".thinkmark")));
    let Some(path) = path else {
        eprintln!("cannot determine a storage path; pass --path DIR");
        return 1;
    };
    if let Err(e) = std::fs::create_dir_all(&path) {
        eprintln!("cannot create {}: {e}", path.display());
        return 1;
    }
    let mut config = load_global_config();
    config.storage_path = Some(path.clone());
    match save_global_config(&config) {
        Ok(()) => {
            println!("Storage root set to {}", path.display());
            0
        }
        Err(e) => {
            eprintln!("failed to save config: {e}");
            1
        }
    }
}

async fn cmd_ingest(args: &[String]) -> i32 {
    init_tracing(false);
    let Some(url) = args.first().filter(|a| !a.starts_with('-')) else {
        eprintln!("ingest requires a URL\n\n{USAGE}");
        return 1;
    };
    let Some(storage) = storage_path() else {
        eprintln!("no storage path configured; run `thinkmark init` first");
        return 1;
    };

    let host = match url::Url::parse(url) {
        Ok(u) => u.host_str().unwrap_or("site").to_string(),
        Err(e) => {
            eprintln!("invalid URL {url}: {e}");
            return 1;
        }
    };
    let output_dir = storage.join(slugify(&host));

    run_and_report(
        url,
        &output_dir,
        flag_value(args, "--site-config"),
        flag_value(args, "--api-key"),
        has_flag(args, "--vector-index"),
        has_flag(args, "--force"),
    )
    .await
}

async fn cmd_pipeline(args: &[String]) -> i32 {
    init_tracing(has_flag(args, "--verbose"));
    let Some(url) = args.first().filter(|a| !a.starts_with('-')) else {
        eprintln!("pipeline requires a URL\n\n{USAGE}");
        return 1;
    };
    let output_dir = match flag_value(args, "--output") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let Some(storage) = storage_path() else {
                eprintln!("no storage path configured; pass --output DIR or run `thinkmark init`");
                return 1;
            };
            let host = url::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(String::from))
                .unwrap_or_else(|| "site".to_string());
            storage.join(slugify(&host))
        }
    };

    run_and_report(
        url,
        &output_dir,
        flag_value(args, "--config"),
        flag_value(args, "--api-key"),
        has_flag(args, "--vector-index"),
        has_flag(args, "--force"),
    )
    .await
}

async fn run_and_report(
    url: &str,
    output_dir: &Path,
    site_config: Option<String>,
    api_key: Option<String>,
    build_vector_index: bool,
    force: bool,
) -> i32 {
    let site = match SiteConfig::load(site_config.as_deref().map(Path::new), url) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            return e.exit_code();
        }
    };
    let options = PipelineOptions {
        site,
        llm: LlmConfig {
            api_key,
            ..Default::default()
        },
        build_vector_index,
        force,
    };

    match run_pipeline(url, output_dir, &options).await {
        Ok(report) => {
            info!(
                "Done: {} documents under {}",
                report.documents, report.output_dir
            );
            for stage in &report.stages {
                info!(
                    "  {}: {} processed, {} failed, {}ms",
                    stage.stage, stage.processed, stage.failed, stage.duration_ms
                );
            }
            if let Some(dir) = &report.vector_index_dir {
                info!("  vector index: {dir}");
            }
            // Partial page failures are still success.
            0
        }
        Err(e @ PipelineError::Config(_)) => {
            error!("{e}");
            1
        }
        Err(e) => {
            error!("pipeline failed: {e}");
            e.exit_code()
        }
    }
}

async fn cmd_scrape(args: &[String]) -> i32 {
    init_tracing(false);
    let Some(url) = args.first().filter(|a| !a.starts_with('-')) else {
        eprintln!("scrape requires a URL\n\n{USAGE}");
        return 1;
    };
    let Some(output) = flag_value(args, "--output") else {
        eprintln!("scrape requires --output DIR");
        return 1;
    };
    let site_config = flag_value(args, "--config");
    let site = match SiteConfig::load(site_config.as_deref().map(Path::new), url) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            return e.exit_code();
        }
    };

    let client = match thinkmark::pipeline::http_client() {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return 2;
        }
    };
    let mut state = thinkmark::pipeline::PipelineState::new(url.as_str(), PathBuf::from(output));
    match thinkmark::pipeline::scrape_stage(&mut state, &client, &site).await {
        Ok(report) => {
            if let Err(e) = state.save() {
                error!("failed to persist state: {e}");
                return 2;
            }
            info!(
                "scrape: {} processed, {} failed, {}ms",
                report.processed, report.failed, report.duration_ms
            );
            0
        }
        Err(e) => {
            error!("scrape failed: {e}");
            e.exit_code()
        }
    }
}

/// Load the persisted state under `dir`, erroring out politely when there
/// is nothing to work on.
fn load_stage_state(dir: &str) -> Result<thinkmark::pipeline::PipelineState, i32> {
    let mut state = thinkmark::pipeline::PipelineState::load(String::new(), PathBuf::from(dir));
    if state.documents.is_empty() {
        eprintln!("no pipeline state found under {dir}; run `thinkmark scrape` first");
        return Err(1);
    }
    if let Some(site_url) = state.infer_site_url() {
        state.site_url = site_url;
    }
    Ok(state)
}

async fn cmd_markify(args: &[String]) -> i32 {
    init_tracing(false);
    let Some(dir) = args.first().filter(|a| !a.starts_with('-')) else {
        eprintln!("markify requires a state directory\n\n{USAGE}");
        return 1;
    };
    let mut state = match load_stage_state(dir) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let report = thinkmark::markify::markify_stage(&mut state).await;
    if let Err(e) = state.save() {
        error!("failed to persist state: {e}");
        return 2;
    }
    info!(
        "markify: {} processed, {} failed, {}ms",
        report.processed, report.failed, report.duration_ms
    );
    0
}

async fn cmd_annotate(args: &[String]) -> i32 {
    init_tracing(false);
    let Some(dir) = args.first().filter(|a| !a.starts_with('-')) else {
        eprintln!("annotate requires a state directory\n\n{USAGE}");
        return 1;
    };
    let mut state = match load_stage_state(dir) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let llm = LlmConfig {
        api_key: flag_value(args, "--api-key"),
        ..Default::default()
    };
    let client = match thinkmark::pipeline::http_client() {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return 2;
        }
    };
    match thinkmark::annotate::annotate_stage(&mut state, &client, &llm).await {
        Ok(report) => {
            if let Err(e) = state.save() {
                error!("failed to persist state: {e}");
                return 2;
            }
            info!(
                "annotate: {} processed, {} failed, {}ms",
                report.processed, report.failed, report.duration_ms
            );
            0
        }
        Err(e) => {
            error!("annotation unavailable: {e}");
            1
        }
    }
}

async fn cmd_index(args: &[String]) -> i32 {
    init_tracing(false);
    let Some(dir) = args.first().filter(|a| !a.starts_with('-')) else {
        eprintln!("index requires a state directory\n\n{USAGE}");
        return 1;
    };
    let state = match load_stage_state(dir) {
        Ok(s) => s,
        Err(code) => return code,
    };

    let embedder =
        thinkmark::index::embedder::StaticEmbedder::new(thinkmark::core::config::embed_model_id());
    let options = thinkmark::index::BuildOptions {
        rebuild: has_flag(args, "--rebuild"),
        ..Default::default()
    };
    match thinkmark::index::build_index(
        &state.annotated_dir(),
        &state.vector_index_dir(),
        state.hierarchy.as_ref(),
        &embedder,
        embedder.model_id(),
        &options,
    )
    .await
    {
        Ok(index) => {
            info!(
                "vector index ready: {} nodes at {}",
                index.nodes.len(),
                state.vector_index_dir().display()
            );
            0
        }
        Err(e) => {
            error!("index build failed: {e}");
            2
        }
    }
}

fn cmd_cleanup(args: &[String]) -> i32 {
    init_tracing(false);
    let Some(dir) = args.first().filter(|a| !a.starts_with('-')) else {
        eprintln!("cleanup requires a directory\n\n{USAGE}");
        return 1;
    };
    let dir = PathBuf::from(dir);
    if !dir.is_dir() {
        eprintln!("not a directory: {}", dir.display());
        return 1;
    }

    if !has_flag(args, "-y") {
        let found: Vec<String> = std::fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| {
                        e.path().is_dir()
                            && e.file_name().to_string_lossy().starts_with("_temp")
                    })
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        if found.is_empty() {
            println!("Nothing to clean under {}", dir.display());
        } else {
            println!("Would remove: {}", found.join(", "));
            println!("Pass -y to remove.");
        }
        return 0;
    }

    match cleanup_temp_dirs(&dir) {
        Ok(removed) => {
            println!("Removed {removed} temp director{}", if removed == 1 { "y" } else { "ies" });
            0
        }
        Err(e) => {
            eprintln!("cleanup failed: {e}");
            2
        }
    }
}
