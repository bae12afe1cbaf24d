//! Google Vertex AI connector (generateContent REST endpoint)

use super::LlmResponse;
use crate::config::{BackendDescriptor, SafetySetting};
use crate::error::{AppError, AppResult, ConnectorError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "no_safety_settings")]
    safety_settings: &'a [SafetySetting],
}

fn no_safety_settings(settings: &&[SafetySetting]) -> bool {
    settings.is_empty()
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
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

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GenerateContentResponse {
    /// Text of the first candidate, parts concatenated
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

/// Vertex connector for a single publisher model
#[derive(Debug)]
pub struct VertexConnector {
    http: reqwest::Client,
    url: String,
    model: String,
    temperature: f64,
    top_p: Option<f64>,
    max_tokens: Option<u32>,
    safety_settings: Vec<SafetySetting>,
    access_token_env: Option<String>,
}

impl VertexConnector {
    pub fn new(backend: &BackendDescriptor) -> AppResult<Self> {
        let (Some(project), Some(location)) = (backend.project_id(), backend.location()) else {
            return Err(AppError::Config(format!(
                "Vertex model '{}' requires project_id and location",
                backend.model_name()
            )));
        };

        let base = match backend.api_base_url() {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}-aiplatform.googleapis.com", location),
        };
        let url = format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            base,
            project,
            location,
            backend.model_name()
        );

        let http = reqwest::Client::builder().build().map_err(|e| {
            AppError::Config(format!(
                "Failed to build HTTP client for Vertex model '{}': {}",
                backend.model_name(),
                e
            ))
        })?;

        Ok(Self {
            http,
            url,
            model: backend.model_name().to_string(),
            temperature: backend.temperature(),
            top_p: backend.top_p(),
            max_tokens: backend.max_tokens(),
            safety_settings: backend.vertex_safety_settings().to_vec(),
            access_token_env: backend.access_token_env().map(str::to_string),
        })
    }

    /// Fully-qualified generateContent URL
    pub fn url(&self) -> &str {
        &self.url
    }

    fn bearer_token(&self) -> Result<Option<String>, ConnectorError> {
        let Some(var) = &self.access_token_env else {
            return Ok(None);
        };
        std::env::var(var).map(Some).map_err(|_| {
            ConnectorError::Configuration(format!(
                "Environment variable '{}' with the Vertex access token is not set",
                var
            ))
        })
    }

    pub async fn invoke(&self, prompt: &str) -> Result<LlmResponse, ConnectorError> {
        let body = GenerateContentRequest {
            contents: [Content {
                role: "user",
                parts: [RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_p: self.top_p,
                max_output_tokens: self.max_tokens,
            },
            safety_settings: &self.safety_settings,
        };

        let mut request = self.http.post(&self.url).json(&body);
        if let Some(token) = self.bearer_token()? {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(
                model = %self.model,
                status = status.as_u16(),
                "Vertex generateContent returned an error status"
            );
            return Err(ConnectorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::Decode(e.to_string()))?;

        let usage = parsed.usage_metadata.as_ref();
        Ok(LlmResponse {
            content: parsed.text(),
            input_tokens: usage.map(|u| u.prompt_token_count).unwrap_or(0),
            output_tokens: usage.map(|u| u.candidates_token_count).unwrap_or(0),
        })
    }
}
