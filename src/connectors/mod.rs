//! Connectors to hosting platforms
//!
//! Every platform exposes the same capability: send one prompt, get back the
//! content plus whatever token counts the platform reports. The set of
//! platforms is closed; [`PlatformConnector::for_backend`] is the single place
//! a platform tag turns into a concrete connector.

pub mod bedrock;
pub mod openai;
pub mod vertex;

pub use bedrock::BedrockConnector;
pub use openai::OpenAiConnector;
pub use vertex::VertexConnector;

use crate::config::BackendDescriptor;
use crate::error::{AppResult, ConnectorError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Content and token usage returned by one invocation
///
/// Token counts are 0 when the platform does not report them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl LlmResponse {
    pub fn new(content: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            content: content.into(),
            input_tokens,
            output_tokens,
        }
    }

    /// Placeholder used when a dispatch ends throttled
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Uniform invocation capability
///
/// Any error is treated as retryable by the dispatcher.
#[async_trait]
pub trait LlmConnector: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<LlmResponse, ConnectorError>;
}

/// Hosting platforms with a built-in connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostingPlatform {
    /// AWS Bedrock (Converse API)
    Bedrock,
    /// Google Vertex AI (generateContent)
    Vertex,
    /// Any OpenAI-compatible `/v1` endpoint
    OpenAi,
}

impl HostingPlatform {
    /// Parse a configured platform tag (case-insensitive)
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "bedrock" => Some(Self::Bedrock),
            "vertex" => Some(Self::Vertex),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bedrock => "bedrock",
            Self::Vertex => "vertex",
            Self::OpenAi => "openai",
        }
    }
}

/// Connector for one backend on one of the supported platforms
#[derive(Debug)]
pub enum PlatformConnector {
    Bedrock(BedrockConnector),
    Vertex(VertexConnector),
    OpenAi(OpenAiConnector),
}

impl PlatformConnector {
    /// Build the connector for a backend
    ///
    /// # Errors
    ///
    /// `UnsupportedPlatform` for an unknown tag, `Config` when platform-specific
    /// settings are missing.
    pub fn for_backend(backend: &BackendDescriptor) -> AppResult<Self> {
        let connector = match backend.platform()? {
            HostingPlatform::Bedrock => Self::Bedrock(BedrockConnector::new(backend)?),
            HostingPlatform::Vertex => Self::Vertex(VertexConnector::new(backend)?),
            HostingPlatform::OpenAi => Self::OpenAi(OpenAiConnector::new(backend)?),
        };

        tracing::debug!(
            backend = %backend.model_name(),
            platform = %backend.hosting_platform(),
            "Resolved platform connector"
        );
        Ok(connector)
    }

    pub fn platform(&self) -> HostingPlatform {
        match self {
            Self::Bedrock(_) => HostingPlatform::Bedrock,
            Self::Vertex(_) => HostingPlatform::Vertex,
            Self::OpenAi(_) => HostingPlatform::OpenAi,
        }
    }
}

#[async_trait]
impl LlmConnector for PlatformConnector {
    async fn invoke(&self, prompt: &str) -> Result<LlmResponse, ConnectorError> {
        match self {
            Self::Bedrock(c) => c.invoke(prompt).await,
            Self::Vertex(c) => c.invoke(prompt).await,
            Self::OpenAi(c) => c.invoke(prompt).await,
        }
    }
}

/// Resolves the connector the dispatcher uses for a backend
pub trait ConnectorFactory: Send + Sync + std::fmt::Debug {
    fn connector_for(&self, backend: &BackendDescriptor) -> AppResult<Arc<dyn LlmConnector>>;
}

/// Default factory backed by the built-in platform connectors
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformConnectors;

impl ConnectorFactory for PlatformConnectors {
    fn connector_for(&self, backend: &BackendDescriptor) -> AppResult<Arc<dyn LlmConnector>> {
        Ok(Arc::new(PlatformConnector::for_backend(backend)?))
    }
}
