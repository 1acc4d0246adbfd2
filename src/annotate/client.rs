use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::core::config::LlmConfig;
use crate::core::error::AnnotateError;

/// Sentinel the model is instructed to return for pages with no useful
/// content; treated as "no summary".
const FAIL_SENTINEL: &str = "FAIL";

const SYSTEM_PROMPT: &str = "Describe this documentation page in a 1-2 sentence summary for an \
     index. If it does not contain useful information for a developer agent, respond with FAIL.";

/// Cap on how much of a document is sent for summarization.
const MAX_SUMMARY_INPUT_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Hierarchy context handed to the summarizer alongside the body.
#[derive(Debug, Clone, Default)]
pub struct DocContext {
    pub title: String,
    pub parent: Option<String>,
    pub siblings: Vec<String>,
    pub children: Vec<String>,
}

impl DocContext {
    fn render(&self) -> String {
        let mut out = format!("Page: {}", self.title);
        if let Some(parent) = &self.parent {
            out.push_str(&format!("\nParent section: {parent}"));
        }
        if !self.siblings.is_empty() {
            out.push_str(&format!("\nSibling pages: {}", self.siblings.join(", ")));
        }
        if !self.children.is_empty() {
            out.push_str(&format!("\nChild pages: {}", self.children.join(", ")));
        }
        out
    }
}

/// Client for an OpenAI-compatible chat endpoint used to summarize
/// documents. The provider is opaque to the pipeline; only
/// `summarize` is exposed.
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    /// Build from config; `MissingApiKey` when no key resolves.
    pub fn new(http: reqwest::Client, config: &LlmConfig) -> Result<Self, AnnotateError> {
        let api_key = config.resolve_api_key().ok_or(AnnotateError::MissingApiKey)?;
        Ok(Self {
            http,
            api_key,
            base_url: config.resolve_base_url(),
            model: config.resolve_model(),
        })
    }

    /// Summarize a markdown body with its hierarchy context.
    ///
    /// Returns `SummaryFail` when the model declines with the sentinel, so
    /// the caller can keep the original document explicitly.
    pub async fn summarize(
        &self,
        markdown: &str,
        context: &DocContext,
    ) -> Result<String, AnnotateError> {
        let truncated: String = markdown.chars().take(MAX_SUMMARY_INPUT_CHARS).collect();
        let user_content = format!("{}\n\n{}", context.render(), truncated);
        let content = self
            .chat(SYSTEM_PROMPT, &user_content, 256)
            .await?;
        let summary = content.trim();

        if summary.is_empty() || summary.eq_ignore_ascii_case(FAIL_SENTINEL) {
            debug!("summarizer declined document");
            return Err(AnnotateError::SummaryFail);
        }
        Ok(summary.to_string())
    }

    /// Synthesize an answer from retrieved excerpts. Used as the optional
    /// query engine behind `query_docs`; callers treat any failure as "no
    /// answer" and return sources only.
    pub async fn synthesize_answer(
        &self,
        question: &str,
        excerpts: &[String],
    ) -> Result<String, AnnotateError> {
        if excerpts.is_empty() {
            return Err(AnnotateError::SummaryFail);
        }
        let context: String = excerpts
            .iter()
            .enumerate()
            .map(|(i, text)| format!("[{}] {}\n", i + 1, text))
            .collect();
        let user_content = format!("Documentation excerpts:\n\n{context}\nQuestion: {question}");
        let answer = self
            .chat(
                "Answer the question using ONLY the provided documentation excerpts. \
                 Be concise. If the excerpts do not contain the answer, say so.",
                &user_content,
                512,
            )
            .await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(AnnotateError::SummaryFail);
        }
        Ok(answer.to_string())
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, AnnotateError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "max_tokens": max_tokens
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnnotateError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AnnotateError::Request(format!(
                "llm endpoint returned {}",
                response.status()
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AnnotateError::Request(e.to_string()))?;
        Ok(parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_renders_all_fields() {
        let ctx = DocContext {
            title: "Install".to_string(),
            parent: Some("Getting Started".to_string()),
            siblings: vec!["Configure".to_string()],
            children: vec!["Linux".to_string(), "macOS".to_string()],
        };
        let rendered = ctx.render();
        assert!(rendered.contains("Page: Install"));
        assert!(rendered.contains("Parent section: Getting Started"));
        assert!(rendered.contains("Sibling pages: Configure"));
        assert!(rendered.contains("Child pages: Linux, macOS"));
    }

    #[test]
    fn client_requires_an_api_key() {
        let cfg = LlmConfig {
            api_key: None,
            base_url: Some("http://localhost:9".to_string()),
            model: None,
        };
        // No explicit key; only fails when the env var is also unset.
        if std::env::var(crate::core::config::ENV_API_KEY).is_err() {
            let result = LlmClient::new(reqwest::Client::new(), &cfg);
            assert!(matches!(result, Err(AnnotateError::MissingApiKey)));
        }
    }
}
