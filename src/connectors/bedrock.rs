//! AWS Bedrock connector using the Converse API

use super::LlmResponse;
use crate::config::BackendDescriptor;
use crate::error::{AppError, AppResult, ConnectorError};
use aws_sdk_bedrockruntime::Client as BedrockClient;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, ConverseOutput, InferenceConfiguration,
    Message as BedrockMessage,
};
use tokio::sync::OnceCell;

/// Bedrock connector for a single model
///
/// The AWS client is built on first use so resolving a connector stays
/// synchronous and cheap.
#[derive(Debug)]
pub struct BedrockConnector {
    model_id: String,
    region: String,
    temperature: f64,
    top_p: Option<f64>,
    max_tokens: Option<u32>,
    client: OnceCell<BedrockClient>,
}

impl BedrockConnector {
    pub fn new(backend: &BackendDescriptor) -> AppResult<Self> {
        let region = backend.aws_region().ok_or_else(|| {
            AppError::Config(format!(
                "Bedrock model '{}' requires aws_region",
                backend.model_name()
            ))
        })?;

        Ok(Self {
            model_id: backend.model_name().to_string(),
            region: region.to_string(),
            temperature: backend.temperature(),
            top_p: backend.top_p(),
            max_tokens: backend.max_tokens(),
            client: OnceCell::new(),
        })
    }

    async fn client(&self) -> &BedrockClient {
        self.client
            .get_or_init(|| async {
                tracing::debug!(
                    model = %self.model_id,
                    region = %self.region,
                    "Loading AWS configuration for Bedrock client"
                );
                let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(aws_config::Region::new(self.region.clone()))
                    .load()
                    .await;
                BedrockClient::new(&aws_config)
            })
            .await
    }

    fn inference_config(&self) -> InferenceConfiguration {
        let mut config = InferenceConfiguration::builder().temperature(self.temperature as f32);
        if let Some(top_p) = self.top_p {
            config = config.top_p(top_p as f32);
        }
        if let Some(max_tokens) = self.max_tokens {
            config = config.max_tokens(i32::try_from(max_tokens).unwrap_or(i32::MAX));
        }
        config.build()
    }

    pub async fn invoke(&self, prompt: &str) -> Result<LlmResponse, ConnectorError> {
        let message = BedrockMessage::builder()
            .role(ConversationRole::User)
            .content(ContentBlock::Text(prompt.to_owned()))
            .build()
            .map_err(|e| ConnectorError::Configuration(e.to_string()))?;

        let output = self
            .client()
            .await
            .converse()
            .model_id(&self.model_id)
            .messages(message)
            .inference_config(self.inference_config())
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(model = %self.model_id, error = %e, "Bedrock converse failed");
                ConnectorError::Transport(e.to_string())
            })?;

        let content = match output.output() {
            Some(ConverseOutput::Message(msg)) => msg
                .content()
                .iter()
                .filter_map(|block| block.as_text().ok())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        };

        let (input_tokens, output_tokens) = output
            .usage()
            .map(|u| {
                (
                    u64::try_from(u.input_tokens()).unwrap_or(0),
                    u64::try_from(u.output_tokens()).unwrap_or(0),
                )
            })
            .unwrap_or((0, 0));

        Ok(LlmResponse {
            content,
            input_tokens,
            output_tokens,
        })
    }
}
