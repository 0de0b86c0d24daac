//! Gemini `generateContent` backend for the cluster classifier.

use super::prompt::build_prompt;
use super::validate::{accept_candidates, parse_output};
use super::ClusterClassifier;
use crate::config::ApiKey;
use crate::error::AggregateError;
use crate::models::{DisasterCandidate, Report};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// Configuration for the Gemini classifier.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_url: String,
    pub model: String,
    pub api_key: ApiKey,
    pub temperature: f32,
    pub timeout_seconds: u64,
    /// Fail the run on the first invalid candidate instead of dropping it.
    pub strict_validation: bool,
}

/// Gemini API request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

/// Gemini API response.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Classifier backed by a hosted Gemini model.
pub struct GeminiClassifier {
    config: GeminiConfig,
    http_client: reqwest::Client,
}

impl GeminiClassifier {
    pub fn new(config: GeminiConfig) -> Result<Self, AggregateError> {
        info!("Initializing Gemini classifier with model {}", config.model);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AggregateError::ClassifierCall(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Send the prompt and return the model's raw text.
    async fn generate(&self, prompt: &str) -> Result<String, AggregateError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: self.config.temperature,
            },
        };

        debug!("Sending generateContent request ({} prompt bytes)", prompt.len());

        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", self.config.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AggregateError::ClassifierCall(format!(
                        "request timed out after {}s",
                        self.config.timeout_seconds
                    ))
                } else if e.is_connect() {
                    AggregateError::ClassifierCall(format!(
                        "cannot connect to {}",
                        self.config.api_url
                    ))
                } else {
                    AggregateError::ClassifierCall(format!("failed to send request: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AggregateError::ClassifierCall(format!("failed to read response: {}", e)))?;

        extract_text(status.as_u16(), &body)
    }
}

/// Pull the generated text out of a `generateContent` response body.
fn extract_text(status: u16, body: &str) -> Result<String, AggregateError> {
    let parsed: Result<GenerateResponse, _> = serde_json::from_str(body);

    if let Ok(GenerateResponse {
        error: Some(api_error),
        ..
    }) = &parsed
    {
        error!("Gemini API error ({}): {}", status, body);
        let message = api_error
            .message
            .clone()
            .or_else(|| api_error.status.clone())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(AggregateError::ClassifierCall(format!("Gemini API error: {}", message)));
    }

    if !(200..300).contains(&status) {
        error!("Gemini returned HTTP {}: {}", status, body);
        return Err(AggregateError::ClassifierCall(format!("Gemini returned HTTP {}", status)));
    }

    let response = parsed.map_err(|e| {
        error!("Gemini unexpected response: {}", body);
        AggregateError::ClassifierResponse(format!("unreadable Gemini envelope ({})", e))
    })?;

    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        error!("Gemini unexpected response: {}", body);
        return Err(AggregateError::ClassifierResponse(
            "no candidates or content in Gemini response".to_string(),
        ));
    }

    Ok(text)
}

#[async_trait]
impl ClusterClassifier for GeminiClassifier {
    async fn classify(&self, reports: &[Report]) -> Result<Vec<DisasterCandidate>, AggregateError> {
        let prompt = build_prompt(reports, Utc::now()).map_err(|e| {
            AggregateError::ClassifierCall(format!("failed to serialize reports: {}", e))
        })?;

        info!("Classifying {} reports with {}", reports.len(), self.config.model);
        let text = self.generate(&prompt).await?;

        let raw = parse_output(&text)?;
        let (accepted, rejected) = accept_candidates(raw, self.config.strict_validation)?;
        info!(
            "Classifier proposed {} disasters ({} rejected)",
            accepted.len() + rejected,
            rejected
        );

        Ok(accepted)
    }
}
