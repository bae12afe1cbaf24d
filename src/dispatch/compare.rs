//! Comparison harness: one prompt against every backend, optionally judged by a reviewer

use super::Dispatcher;
use crate::backends::BackendName;
use crate::connectors::LlmResponse;
use crate::error::{AppError, AppResult};
use crate::events::DispatchEvent;
use crate::metrics::IterationOutcome;
use serde::Serialize;
use std::time::Instant;

/// Placeholder replaced by the serialized report in a review template
pub const REPORT_PLACEHOLDER: &str = "{report}";

/// Instruction sent to the reviewer when the caller supplies no template
pub const DEFAULT_REVIEW_INSTRUCTION: &str = "You are reviewing the output of several language \
models that were given the same prompt. The JSON report below lists, for each model, the \
generation parameters, the average runtime and every response it produced. For each model, \
score from 1 to 10 and briefly justify: consistency across its responses, overall quality, \
token efficiency, and adherence to the prompt. Finish with a ranking of the models.";

/// Parameters for [`Dispatcher::compare_models_for_single_prompt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonRequest {
    prompt: String,
    iterations: usize,
    reviewer: Option<String>,
    review_template: Option<String>,
}

impl ComparisonRequest {
    pub fn new(prompt: impl Into<String>, iterations: usize) -> Self {
        Self {
            prompt: prompt.into(),
            iterations,
            reviewer: None,
            review_template: None,
        }
    }

    /// Ask the named backend to judge the report
    pub fn with_reviewer(mut self, backend: impl Into<String>) -> Self {
        self.reviewer = Some(backend.into());
        self
    }

    /// Review prompt template; `{report}` is replaced by the serialized report,
    /// otherwise the report is appended
    pub fn with_review_template(mut self, template: impl Into<String>) -> Self {
        self.review_template = Some(template.into());
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn reviewer(&self) -> Option<&str> {
        self.reviewer.as_deref()
    }
}

/// Results for one backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResults {
    pub model: String,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub iterations: usize,
    /// Wall-clock total over all iterations divided by `iterations`
    pub average_runtime_in_seconds: f64,
    /// Successful responses only; may be shorter than `iterations`
    pub responses: Vec<LlmResponse>,
}

/// Aggregated comparison over every configured backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub prompt: String,
    pub models: Vec<ModelResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
}

impl ComparisonReport {
    /// Prompt sent to the reviewer for this report
    pub fn review_prompt(&self, template: Option<&str>) -> AppResult<String> {
        let report = serde_json::to_string_pretty(self)?;
        let prompt = match template {
            Some(t) if t.contains(REPORT_PLACEHOLDER) => t.replace(REPORT_PLACEHOLDER, &report),
            Some(t) => format!("{}\n\n{}", t, report),
            None => format!("{}\n\n{}", DEFAULT_REVIEW_INSTRUCTION, report),
        };
        Ok(prompt)
    }
}

impl Dispatcher {
    /// Run the prompt `iterations` times against every backend in registry order
    ///
    /// Iteration failures are reported as `comparison_error` events and never
    /// abort the run. Throttle state is neither consulted nor updated.
    ///
    /// # Errors
    ///
    /// - `Validation` if `iterations` is 0
    /// - `UnknownBackend` if the reviewer is not configured (checked before any invocation)
    /// - `ReviewerInvocationFailed` if the reviewer call fails; no partial report is returned
    pub async fn compare_models_for_single_prompt(
        &self,
        request: &ComparisonRequest,
    ) -> AppResult<ComparisonReport> {
        if request.iterations == 0 {
            return Err(AppError::Validation(
                "comparison requires at least one iteration".to_string(),
            ));
        }

        let reviewer = match request.reviewer() {
            Some(name) => Some(
                self.config()
                    .backend(name)
                    .ok_or_else(|| AppError::UnknownBackend(name.to_string()))?,
            ),
            None => None,
        };

        let mut models = Vec::with_capacity(self.config().target_models.len());
        for backend in &self.config().target_models {
            let name = BackendName::from(backend);
            let connector = self.connector_for(backend)?;
            let mut responses = Vec::new();
            let started = Instant::now();

            for iteration in 0..request.iterations {
                match connector.invoke(&request.prompt).await {
                    Ok(response) => {
                        self.metrics().record_tokens(
                            name.as_str(),
                            response.input_tokens,
                            response.output_tokens,
                        );
                        self.metrics()
                            .record_comparison_iteration(name.as_str(), IterationOutcome::Success);
                        responses.push(response);
                        self.events().notify(&DispatchEvent::ComparisonProgress {
                            backend: name.clone(),
                            iteration,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            backend = %name,
                            iteration = iteration,
                            error = %e,
                            "Comparison iteration failed"
                        );
                        self.metrics()
                            .record_comparison_iteration(name.as_str(), IterationOutcome::Error);
                        self.events().notify(&DispatchEvent::ComparisonError {
                            backend: name.clone(),
                            iteration,
                            error: e.to_string(),
                        });
                    }
                }
            }

            let average = started.elapsed().as_secs_f64() / request.iterations as f64;
            tracing::info!(
                backend = %name,
                iterations = request.iterations,
                successes = responses.len(),
                average_runtime_seconds = average,
                "Comparison finished for backend"
            );

            models.push(ModelResults {
                model: backend.model_name().to_string(),
                temperature: backend.temperature(),
                top_p: backend.top_p(),
                max_tokens: backend.max_tokens(),
                iterations: request.iterations,
                average_runtime_in_seconds: average,
                responses,
            });
        }

        let mut report = ComparisonReport {
            prompt: request.prompt.clone(),
            models,
            review: None,
        };

        if let Some(reviewer) = reviewer {
            let review_prompt = report.review_prompt(request.review_template.as_deref())?;
            let connector = self.connector_for(reviewer)?;
            let review = connector.invoke(&review_prompt).await.map_err(|source| {
                tracing::error!(
                    reviewer = %reviewer.model_name(),
                    error = %source,
                    "Reviewer invocation failed"
                );
                AppError::ReviewerInvocationFailed {
                    backend: reviewer.model_name().to_string(),
                    source,
                }
            })?;
            report.review = Some(review.content);
        }

        Ok(report)
    }
}
