//! Command-line interface for llm-loadbalancer
//!
//! Provides argument parsing and subcommand handling for the binary.

use clap::{Parser, Subcommand};

/// Weighted load balancer for hosted LLM backends
#[derive(Parser, Debug)]
#[command(name = "llm-loadbalancer")]
#[command(version)]
#[command(about = "Weighted load balancer for hosted LLM backends")]
#[command(
    long_about = "Dispatches prompts to AWS Bedrock, Vertex AI and OpenAI-compatible backends \
    by weight, retrying failures and throttling backends that keep failing. Can also compare \
    every configured backend on one prompt and have one of them review the results."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    /// Print Prometheus metrics to stderr after the command finishes
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one prompt to a weighted-random backend
    Prompt {
        /// Prompt text
        text: String,

        /// Return an empty response instead of an error when the backend gets throttled
        #[arg(long)]
        no_fail_on_throttle: bool,
    },

    /// Run one prompt against every configured backend
    Compare {
        /// Prompt text
        text: String,

        /// Invocations per backend
        #[arg(short, long, default_value_t = 1)]
        iterations: usize,

        /// Backend (model_name) that reviews the aggregated results
        #[arg(short, long)]
        reviewer: Option<String>,

        /// File with the review prompt; `{report}` marks where the results go
        #[arg(long, requires = "reviewer")]
        review_template: Option<String>,
    },

    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# llm-loadbalancer Configuration
# ===============================
#
# Backends to balance between, plus retry and throttle behaviour.

# ─────────────────────────────────────────────────────────────────────────────
# BALANCER
# ─────────────────────────────────────────────────────────────────────────────

[balancer]
# Invocation attempts per prompt before the backend is throttled.
# 0 throttles the selected backend without calling it.
max_retries_on_failure = 3

# Pause between a failed attempt and the next one (seconds, 0 = no pause)
retry_delay_seconds = 0.5

# How long a throttled backend is excluded from selection (seconds)
throttle_timeout_seconds = 60

# Cooldown reported in the totally_throttled event when every backend is
# throttled at once and the throttle state is rebuilt (seconds)
totally_throttled_timeout_seconds = 30

# ─────────────────────────────────────────────────────────────────────────────
# TARGET MODELS
# ─────────────────────────────────────────────────────────────────────────────
#
# Common fields:
#   - model_name: Platform model identifier, unique across the file
#   - hosting_platform: "bedrock", "vertex" or "openai"
#   - model_weight: Relative selection probability (> 0)
#   - temperature: Sampling temperature (0.0-2.0, default 0.7)
#   - top_p: Nucleus sampling (0.0-1.0], optional
#   - max_tokens: Generation limit, optional

# AWS Bedrock (credentials from the default AWS provider chain)
[[target_models]]
model_name = "anthropic.claude-3-haiku-20240307-v1:0"
hosting_platform = "bedrock"
aws_region = "us-east-1"
model_weight = 2.0
temperature = 0.5
max_tokens = 1024

# Google Vertex AI
[[target_models]]
model_name = "gemini-1.5-flash"
hosting_platform = "vertex"
project_id = "your-gcp-project"
location = "us-central1"
# Environment variable holding an OAuth access token
access_token_env = "VERTEX_ACCESS_TOKEN"
model_weight = 1.0
temperature = 0.5

[[target_models.vertex_safety_settings]]
category = "HARM_CATEGORY_DANGEROUS_CONTENT"
threshold = "BLOCK_ONLY_HIGH"

# Any OpenAI-compatible endpoint (base URL must end with /v1)
[[target_models]]
model_name = "your-local-model"
hosting_platform = "openai"
api_base_url = "http://localhost:1234/v1"
model_weight = 1.0

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"
"#
}
