//! OpenAI-compatible connector built on `open-agent-sdk`

use super::LlmResponse;
use crate::config::BackendDescriptor;
use crate::error::{AppError, AppResult, ConnectorError};
use futures::StreamExt;
use open_agent::ContentBlock;

/// Used when the descriptor leaves `max_tokens` unset; the SDK requires a value.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Connector for any `/v1` chat completions endpoint
///
/// The SDK streams content blocks and exposes no usage figures, so token
/// counts are always reported as 0.
#[derive(Debug, Clone)]
pub struct OpenAiConnector {
    model: String,
    base_url: String,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiConnector {
    pub fn new(backend: &BackendDescriptor) -> AppResult<Self> {
        let base_url = backend.api_base_url().ok_or_else(|| {
            AppError::Config(format!(
                "OpenAI-compatible model '{}' requires api_base_url",
                backend.model_name()
            ))
        })?;

        Ok(Self {
            model: backend.model_name().to_string(),
            base_url: base_url.to_string(),
            temperature: backend.temperature(),
            max_tokens: backend.max_tokens().unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }

    pub async fn invoke(&self, prompt: &str) -> Result<LlmResponse, ConnectorError> {
        let options = open_agent::AgentOptions::builder()
            .model(&self.model)
            .base_url(&self.base_url)
            .max_tokens(self.max_tokens)
            .temperature(self.temperature as f32)
            .build()
            .map_err(|e| ConnectorError::Configuration(e.to_string()))?;

        let mut stream = open_agent::query(prompt, &options).await.map_err(|e| {
            tracing::debug!(
                model = %self.model,
                base_url = %self.base_url,
                error = %e,
                "Failed to start query"
            );
            ConnectorError::Transport(e.to_string())
        })?;

        let mut content = String::new();
        let mut block_count = 0usize;
        while let Some(result) = stream.next().await {
            match result {
                Ok(ContentBlock::Text(text_block)) => {
                    block_count += 1;
                    content.push_str(&text_block.text);
                }
                Ok(other_block) => {
                    block_count += 1;
                    tracing::warn!(
                        model = %self.model,
                        block_type = ?other_block,
                        block_number = block_count,
                        "Skipping non-text content block"
                    );
                }
                Err(e) => {
                    // A partial answer is discarded; the dispatcher retries.
                    return Err(ConnectorError::Transport(format!(
                        "stream interrupted after {} blocks ({} chars): {}",
                        block_count,
                        content.len(),
                        e
                    )));
                }
            }
        }

        Ok(LlmResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
        })
    }
}
