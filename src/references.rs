//! Bibliographic reference suggestions from diagram text.
//!
//! One stateless call to a text-generation provider: no retry, no timeout
//! beyond the transport's own defaults.

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const TEMPERATURE: f64 = 0.7;
const MAX_OUTPUT_TOKENS: u32 = 2000;

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("No text provided")]
    MissingText,
    #[error(
        "Gemini API key is not configured. Pass an API key with the request or set GEMINI_API_KEY."
    )]
    MissingCredential,
    #[error("Failed to generate references: {0}")]
    Upstream(String),
    /// The request body could not be read as `{ text, apiKey? }`.
    #[error("Failed to generate references: {0}")]
    InvalidBody(String),
}

impl ReferenceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ReferenceError::MissingText => 400,
            ReferenceError::MissingCredential => 401,
            ReferenceError::Upstream(_) | ReferenceError::InvalidBody(_) => 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    /// Used when the caller does not supply its own key.
    pub api_key: Option<String>,
    pub model: String,
    pub api_url: String,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            model: std::env::var("MINDCANVAS_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            api_url: std::env::var("MINDCANVAS_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReferenceResponse {
    pub references: Vec<String>,
}

pub fn build_prompt(text: &str) -> String {
    format!(
        "Based on the following mind map, suggest 5-10 relevant academic references.
Format every reference in APA 7th edition style.

Mind map content:
{text}

Instructions:
1. Suggest academic papers, books or reputable websites that plausibly exist
2. Format each reference accurately in APA 7th edition style
3. Prefer the references most relevant to the topics of the mind map
4. Output one reference per line, without numbering

References:"
    )
}

pub fn parse_references(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct ReferenceClient {
    config: ReferenceConfig,
    http: reqwest::Client,
}

impl ReferenceClient {
    pub fn new(config: ReferenceConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Suggests references for `text`. A caller-supplied credential takes
    /// precedence over the configured default.
    pub async fn suggest(
        &self,
        text: &str,
        credential: Option<&str>,
    ) -> Result<Vec<String>, ReferenceError> {
        if text.trim().is_empty() {
            return Err(ReferenceError::MissingText);
        }

        let credential = credential
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .or(self.config.api_key.as_deref())
            .ok_or(ReferenceError::MissingCredential)?;

        let prompt = build_prompt(text);
        let generated = self
            .generate(&prompt, credential)
            .await
            .map_err(|err| {
                log::error!("reference generation failed: {err:#}");
                ReferenceError::Upstream(format!("{err:#}"))
            })?;

        Ok(parse_references(&generated))
    }

    async fn generate(&self, prompt: &str, api_key: &str) -> anyhow::Result<String> {
        // the key travels in a header so it never shows up in URLs, which
        // reqwest echoes into its error messages
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model,
        );

        let request_body = serde_json::json!({
            "contents": [{
                "parts": [{"text": prompt}]
            }],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "maxOutputTokens": MAX_OUTPUT_TOKENS
            }
        });

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to send request to Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            bail!(
                "Gemini API request failed with status {}: {}",
                status,
                error_text
            );
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to parse Gemini response")?;

        let content = response_json
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow!("Unexpected Gemini API response format"))?;

        Ok(content.to_string())
    }
}
