//! Configuration management for the load balancer
//!
//! Parses TOML configuration files and provides typed access to settings.

use crate::connectors::HostingPlatform;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub balancer: BalancerConfig,
    /// Backends to balance between, in selection order
    pub target_models: Vec<BackendDescriptor>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Retry and throttle behaviour shared by every dispatch
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalancerConfig {
    /// Invocation attempts per dispatch before the backend is throttled
    #[serde(default = "default_max_retries")]
    pub max_retries_on_failure: usize,
    /// Pause between a failed attempt and the next one
    #[serde(default)]
    pub retry_delay_seconds: f64,
    /// How long a throttled backend stays out of selection
    #[serde(default = "default_throttle_timeout")]
    pub throttle_timeout_seconds: f64,
    /// Cooldown reported when every backend is throttled at once
    #[serde(default = "default_totally_throttled_timeout")]
    pub totally_throttled_timeout_seconds: f64,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            max_retries_on_failure: default_max_retries(),
            retry_delay_seconds: 0.0,
            throttle_timeout_seconds: default_throttle_timeout(),
            totally_throttled_timeout_seconds: default_totally_throttled_timeout(),
        }
    }
}

impl BalancerConfig {
    pub fn retry_delay(&self) -> Duration {
        seconds_to_duration(self.retry_delay_seconds)
    }

    pub fn throttle_timeout(&self) -> Duration {
        seconds_to_duration(self.throttle_timeout_seconds)
    }

    pub fn totally_throttled_timeout(&self) -> Duration {
        seconds_to_duration(self.totally_throttled_timeout_seconds)
    }
}

// Validation rejects out-of-range values; this only guards direct construction.
// Too large saturates, anything else unrepresentable (negative, NaN) is zero.
fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds >= Duration::MAX.as_secs_f64() {
        return Duration::MAX;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO)
}

fn default_max_retries() -> usize {
    3
}

fn default_throttle_timeout() -> f64 {
    60.0
}

fn default_totally_throttled_timeout() -> f64 {
    30.0
}

/// Vertex AI harm category / threshold pair, forwarded verbatim
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

/// Individual backend configuration
///
/// Fields are private; instances come from deserialization (validated by
/// `Config::validate()`) or from the `new`/`with_*` constructors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendDescriptor {
    model_name: String,
    hosting_platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aws_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    vertex_safety_settings: Vec<SafetySetting>,
    /// Base URL for OpenAI-compatible backends, or an override for Vertex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_base_url: Option<String>,
    /// Environment variable holding a bearer token (Vertex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token_env: Option<String>,
    #[serde(default = "default_temperature")]
    temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    /// Relative probability of this backend being selected
    #[serde(default = "default_weight")]
    model_weight: f64,
}

impl BackendDescriptor {
    /// Create a descriptor with default generation parameters
    pub fn new(
        model_name: impl Into<String>,
        hosting_platform: impl Into<String>,
        model_weight: f64,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            hosting_platform: hosting_platform.into(),
            aws_region: None,
            project_id: None,
            location: None,
            vertex_safety_settings: Vec::new(),
            api_base_url: None,
            access_token_env: None,
            temperature: default_temperature(),
            top_p: None,
            max_tokens: None,
            model_weight,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_aws_region(mut self, region: impl Into<String>) -> Self {
        self.aws_region = Some(region.into());
        self
    }

    pub fn with_vertex_project(
        mut self,
        project_id: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        self.project_id = Some(project_id.into());
        self.location = Some(location.into());
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn with_access_token_env(mut self, var: impl Into<String>) -> Self {
        self.access_token_env = Some(var.into());
        self
    }

    pub fn with_safety_setting(
        mut self,
        category: impl Into<String>,
        threshold: impl Into<String>,
    ) -> Self {
        self.vertex_safety_settings.push(SafetySetting {
            category: category.into(),
            threshold: threshold.into(),
        });
        self
    }

    /// Unique backend identity
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Raw hosting platform tag as configured
    pub fn hosting_platform(&self) -> &str {
        &self.hosting_platform
    }

    /// Resolve the platform tag into the closed platform set
    pub fn platform(&self) -> AppResult<HostingPlatform> {
        HostingPlatform::from_tag(&self.hosting_platform).ok_or_else(|| {
            AppError::UnsupportedPlatform {
                model: self.model_name.clone(),
                platform: self.hosting_platform.clone(),
            }
        })
    }

    pub fn aws_region(&self) -> Option<&str> {
        self.aws_region.as_deref()
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn vertex_safety_settings(&self) -> &[SafetySetting] {
        &self.vertex_safety_settings
    }

    pub fn api_base_url(&self) -> Option<&str> {
        self.api_base_url.as_deref()
    }

    pub fn access_token_env(&self) -> Option<&str> {
        self.access_token_env.as_deref()
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn top_p(&self) -> Option<f64> {
        self.top_p
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn weight(&self) -> f64 {
        self.model_weight
    }

    fn validate(&self) -> AppResult<()> {
        let name = &self.model_name;

        if name.trim().is_empty() {
            return Err(AppError::Config(
                "Configuration error: target_models entry has an empty model_name".to_string(),
            ));
        }

        if self.model_weight <= 0.0 || !self.model_weight.is_finite() {
            return Err(AppError::Config(format!(
                "Configuration error: Model '{}' has invalid model_weight {}. \
                Weight must be a positive finite number.",
                name, self.model_weight
            )));
        }

        if !(0.0..=2.0).contains(&self.temperature) || self.temperature.is_nan() {
            return Err(AppError::Config(format!(
                "Configuration error: Model '{}' has invalid temperature {}. \
                temperature must be a finite number between 0.0 and 2.0.",
                name, self.temperature
            )));
        }

        if let Some(top_p) = self.top_p
            && (top_p <= 0.0 || top_p > 1.0 || top_p.is_nan())
        {
            return Err(AppError::Config(format!(
                "Configuration error: Model '{}' has invalid top_p {}. \
                top_p must be in the range (0.0, 1.0].",
                name, top_p
            )));
        }

        if self.max_tokens == Some(0) {
            return Err(AppError::Config(format!(
                "Configuration error: Model '{}' has max_tokens=0. \
                max_tokens must be greater than 0.",
                name
            )));
        }

        match self.platform()? {
            HostingPlatform::Bedrock => {
                if self.aws_region.is_none() {
                    return Err(AppError::Config(format!(
                        "Configuration error: Bedrock model '{}' requires aws_region",
                        name
                    )));
                }
            }
            HostingPlatform::Vertex => {
                if self.project_id.is_none() || self.location.is_none() {
                    return Err(AppError::Config(format!(
                        "Configuration error: Vertex model '{}' requires project_id and location",
                        name
                    )));
                }
                // The Google endpoint rejects unauthenticated calls.
                if self.access_token_env.is_none() && self.api_base_url.is_none() {
                    return Err(AppError::Config(format!(
                        "Configuration error: Vertex model '{}' has no access_token_env. \
                        Set access_token_env to the name of an environment variable holding \
                        an OAuth access token (e.g. the output of \
                        `gcloud auth print-access-token`), or set api_base_url to use a \
                        different endpoint.",
                        name
                    )));
                }
            }
            HostingPlatform::OpenAi => match self.api_base_url.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(url) => {
                    return Err(AppError::Config(format!(
                        "Configuration error: Model '{}' has invalid api_base_url '{}'. \
                        api_base_url must start with 'http://' or 'https://'.",
                        name, url
                    )));
                }
                None => {
                    return Err(AppError::Config(format!(
                        "Configuration error: OpenAI-compatible model '{}' requires api_base_url",
                        name
                    )));
                }
            },
        }

        Ok(())
    }
}

fn default_temperature() -> f64 {
    0.7
}

fn default_weight() -> f64 {
    1.0
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Build a configuration in code (validated)
    pub fn new(balancer: BalancerConfig, target_models: Vec<BackendDescriptor>) -> AppResult<Self> {
        let config = Self {
            balancer,
            target_models,
            observability: ObservabilityConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        // Unsupported platforms surface as-is so callers can match on them.
        config.validate().map_err(|e| match e {
            AppError::UnsupportedPlatform { .. } => e,
            other => AppError::ConfigValidationFailed {
                path: path_display,
                reason: other.to_string(),
            },
        })?;

        Ok(config)
    }

    /// Look up a backend by name
    pub fn backend(&self, name: &str) -> Option<&BackendDescriptor> {
        self.target_models.iter().find(|m| m.model_name() == name)
    }

    /// Validate configuration after parsing
    ///
    /// Called automatically by `from_file()` and `from_str()`; call it explicitly
    /// when deserializing by other means.
    pub fn validate(&self) -> AppResult<()> {
        if self.target_models.is_empty() {
            return Err(AppError::Config(
                "Configuration error: target_models has no entries. \
                At least one backend is required.\n\n\
                Example fix - add to config.toml:\n\
                [[target_models]]\n\
                model_name = \"anthropic.claude-3-haiku-20240307-v1:0\"\n\
                hosting_platform = \"bedrock\"\n\
                aws_region = \"us-east-1\"\n\
                temperature = 0.7\n\
                model_weight = 1.0"
                    .to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for model in &self.target_models {
            if !seen.insert(model.model_name()) {
                return Err(AppError::Config(format!(
                    "Configuration error: model_name '{}' appears more than once. \
                    Backend names must be unique.",
                    model.model_name()
                )));
            }
            model.validate()?;
        }

        for (field, value) in [
            ("retry_delay_seconds", self.balancer.retry_delay_seconds),
            ("throttle_timeout_seconds", self.balancer.throttle_timeout_seconds),
            (
                "totally_throttled_timeout_seconds",
                self.balancer.totally_throttled_timeout_seconds,
            ),
        ] {
            if value < 0.0 || !value.is_finite() {
                return Err(AppError::Config(format!(
                    "Configuration error: balancer.{} must be a finite, non-negative number of seconds, got {}",
                    field, value
                )));
            }
            if value >= Duration::MAX.as_secs_f64() {
                return Err(AppError::Config(format!(
                    "Configuration error: balancer.{} = {} is too large to represent as a duration. \
                    Use a value below {:e} seconds.",
                    field,
                    value,
                    Duration::MAX.as_secs_f64()
                )));
            }
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
