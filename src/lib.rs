//! llm-loadbalancer - Weighted load balancing across hosted LLM backends
//!
//! Routes each prompt to one of several configured model backends (AWS Bedrock,
//! Google Vertex AI, OpenAI-compatible endpoints), retries failed attempts,
//! temporarily throttles backends that keep failing, and reports usage and
//! timing per dispatch. A comparison harness runs one prompt against every
//! backend and can have a designated backend review the results.

pub mod backends;
pub mod cli;
pub mod clock;
pub mod config;
pub mod connectors;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod metrics;
pub mod telemetry;

pub use config::Config;
pub use dispatch::{
    ComparisonReport, ComparisonRequest, Dispatcher, PromptOutcome, PromptStatsReport,
    ThrottlePolicy,
};
pub use error::{AppError, AppResult};
