use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::error::PipelineError;

// ---------------------------------------------------------------------------
// Global config — storage root persisted by `thinkmark init`, env-var fallback
// ---------------------------------------------------------------------------

pub const ENV_STORAGE_PATH: &str = "THINKMARK_STORAGE_PATH";
pub const ENV_API_KEY: &str = "THINKMARK_API_KEY";
pub const ENV_LLM_BASE_URL: &str = "THINKMARK_LLM_BASE_URL";
pub const ENV_LLM_MODEL: &str = "THINKMARK_LLM_MODEL";
pub const ENV_EMBED_MODEL: &str = "THINKMARK_EMBED_MODEL";
pub const ENV_CLAUDE_DESKTOP: &str = "THINKMARK_CLAUDE_DESKTOP";

/// Contents of `~/.thinkmark/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,
}

fn config_file() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    Some(home.join(".thinkmark").join("config.json"))
}

/// Load `~/.thinkmark/config.json`.
///
/// Missing file → `GlobalConfig::default()` (silent, env fallbacks apply).
/// Parse error → log a warning, return defaults.
pub fn load_global_config() -> GlobalConfig {
    let Some(path) = config_file() else {
        return GlobalConfig::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<GlobalConfig>(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(
                    "config.json parse error at {}: {} — using defaults",
                    path.display(),
                    e
                );
                GlobalConfig::default()
            }
        },
        Err(_) => GlobalConfig::default(),
    }
}

/// Persist the global config, creating `~/.thinkmark/` if needed.
pub fn save_global_config(cfg: &GlobalConfig) -> Result<(), PipelineError> {
    let path = config_file()
        .ok_or_else(|| PipelineError::Config("cannot determine home directory".to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cfg)
        .map_err(|e| PipelineError::Config(format!("cannot serialize config: {e}")))?;
    std::fs::write(&path, json)?;
    Ok(())
}

/// Storage root for ingested sites: `THINKMARK_STORAGE_PATH` env var →
/// config-file value → `~/.thinkmark`.
pub fn storage_path() -> Option<PathBuf> {
    if let Ok(v) = std::env::var(ENV_STORAGE_PATH) {
        let v = v.trim();
        if !v.is_empty() {
            return Some(PathBuf::from(v));
        }
    }
    if let Some(p) = load_global_config().storage_path {
        return Some(p);
    }
    dirs::home_dir().map(|h| h.join(".thinkmark"))
}

/// Whether the stdio transport should dispatch tool calls synchronously
/// (Claude Desktop cannot interleave responses on the same session).
pub fn claude_desktop_mode() -> bool {
    let Ok(v) = std::env::var(ENV_CLAUDE_DESKTOP) else {
        return false;
    };
    matches!(v.trim(), "1" | "true" | "yes" | "on")
}

// ---------------------------------------------------------------------------
// Annotation LLM config
// ---------------------------------------------------------------------------

/// Connection settings for the summarization endpoint (OpenAI-compatible).
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

impl LlmConfig {
    /// API key: explicit value → `THINKMARK_API_KEY` env var → `None`.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.trim().to_string());
        }
        std::env::var(ENV_API_KEY).ok().filter(|v| !v.trim().is_empty())
    }

    /// Base URL: explicit → `THINKMARK_LLM_BASE_URL` → OpenRouter.
    pub fn resolve_base_url(&self) -> String {
        if let Some(u) = &self.base_url {
            if !u.trim().is_empty() {
                return u.clone();
            }
        }
        std::env::var(ENV_LLM_BASE_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string())
    }

    /// Model name: explicit → `THINKMARK_LLM_MODEL` → a small fast default.
    pub fn resolve_model(&self) -> String {
        if let Some(m) = &self.model {
            if !m.trim().is_empty() {
                return m.clone();
            }
        }
        std::env::var(ENV_LLM_MODEL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "google/gemini-2.0-flash-lite-001".to_string())
    }
}

/// Embedding model id: `THINKMARK_EMBED_MODEL` env var → potion-base-8M.
pub fn embed_model_id() -> String {
    std::env::var(ENV_EMBED_MODEL)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "minishlab/potion-base-8M".to_string())
}

// ---------------------------------------------------------------------------
// Site crawl config
// ---------------------------------------------------------------------------

/// Per-site crawl constraints, loadable from a JSON file or derived from
/// the start URL (the host becomes the only allowed domain).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default)]
    pub obey_robots_txt: bool,
}

fn default_max_depth() -> usize {
    3
}

fn default_max_pages() -> usize {
    500
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            allowed_domains: Vec::new(),
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            max_pages: default_max_pages(),
            obey_robots_txt: false,
        }
    }
}

impl SiteConfig {
    /// Load from `config_file` when present, otherwise defaults. Either way
    /// an empty domain allowlist is filled in from the start URL so the
    /// crawler cannot escape to unrelated sites.
    pub fn load(config_file: Option<&Path>, start_url: &str) -> Result<Self, PipelineError> {
        let mut cfg = match config_file {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    PipelineError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                serde_json::from_str::<SiteConfig>(&contents).map_err(|e| {
                    PipelineError::Config(format!("invalid site config {}: {e}", path.display()))
                })?
            }
            None => SiteConfig::default(),
        };

        if cfg.allowed_domains.is_empty() {
            let parsed = Url::parse(start_url)
                .map_err(|e| PipelineError::Config(format!("invalid URL {start_url}: {e}")))?;
            if let Some(host) = parsed.host_str() {
                cfg.allowed_domains.push(host.to_string());
            }
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_config_derives_domain_from_start_url() {
        let cfg = SiteConfig::load(None, "https://docs.example.com/guide/").unwrap();
        assert_eq!(cfg.allowed_domains, vec!["docs.example.com".to_string()]);
        assert_eq!(cfg.max_depth, 3);
    }

    #[test]
    fn site_config_rejects_bad_url() {
        assert!(SiteConfig::load(None, "not a url").is_err());
    }

    #[test]
    fn llm_config_prefers_explicit_values() {
        let cfg = LlmConfig {
            api_key: Some("sk-test".to_string()),
            base_url: Some("http://localhost:11434/v1".to_string()),
            model: Some("llama3".to_string()),
        };
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("sk-test"));
        assert_eq!(cfg.resolve_base_url(), "http://localhost:11434/v1");
        assert_eq!(cfg.resolve_model(), "llama3");
    }
}
