use std::time::Duration;

use anyhow::{ensure, Context};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Instrument};

use crate::{tracing_utils::inject_span, upload::InlineImage};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Multimodal text generation: one instruction plus one inline image in,
/// free-form text out.
#[async_trait]
pub trait CaptionGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, image: &InlineImage) -> anyhow::Result<String>;
}

/// Client for the Gemini `generateContent` REST endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::ClientBuilder::new();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("failed to build gemini http client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            let mut value = HeaderValue::from_str(api_key).context("invalid gemini api key")?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl CaptionGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, image: &InlineImage) -> anyhow::Result<String> {
        let span = info_span!(
            "gemini.GenerateContent",
            http.method = "POST",
            model = %self.model,
        );
        let mut headers = self.headers()?;
        inject_span(&mut headers, &span);

        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::Text { text: prompt }, Part::InlineData { inline_data: image }],
            }],
        };

        async move {
            let response = self
                .client
                .post(self.endpoint())
                .headers(headers)
                .json(&body)
                .send()
                .await
                .context("gemini request failed")?;

            let status = response.status();
            let text = response.text().await.context("failed to read gemini response")?;
            ensure!(
                status.is_success(),
                "gemini returned status {}: {}",
                status,
                text
            );

            let response: GenerateContentResponse =
                serde_json::from_str(&text).context("failed to parse gemini response")?;
            debug!(candidates = response.candidates.len(), "Received gemini response");
            Ok(response.text())
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: &'a InlineImage },
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate. Empty when the model produced nothing,
    /// e.g. when the candidate was blocked.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}
