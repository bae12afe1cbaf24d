//! Shared test doubles: scripted connectors and a manual clock

#![allow(dead_code)]

use async_trait::async_trait;
use llm_loadbalancer::clock::Clock;
use llm_loadbalancer::config::BackendDescriptor;
use llm_loadbalancer::connectors::{ConnectorFactory, LlmConnector, LlmResponse};
use llm_loadbalancer::error::{AppError, AppResult, ConnectorError};
use llm_loadbalancer::events::{DispatchEvent, EventKind, EventNotifier};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const INPUT_TOKENS: u64 = 7;
pub const OUTPUT_TOKENS: u64 = 3;

/// One scripted invocation result
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Fail(String),
}

/// Connector that plays back a script, then repeats `fallback` forever
#[derive(Debug)]
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    latency: Duration,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    fn next_step(&self) -> Step {
        self.steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl LlmConnector for ScriptedConnector {
    async fn invoke(&self, prompt: &str) -> Result<LlmResponse, ConnectorError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let step = self.next_step();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match step {
            Step::Reply(content) => Ok(LlmResponse::new(content, INPUT_TOKENS, OUTPUT_TOKENS)),
            Step::Fail(message) => Err(ConnectorError::Other(message)),
        }
    }
}

/// Factory handing out one shared scripted connector per backend name
///
/// Clones share the same scripts, so a test can keep a handle after giving
/// one to the dispatcher builder.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFactory {
    connectors: Arc<Mutex<HashMap<String, Arc<ScriptedConnector>>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: &str, steps: Vec<Step>, fallback: Step, latency: Duration) -> &Self {
        self.connectors.lock().unwrap().insert(
            name.to_string(),
            Arc::new(ScriptedConnector {
                steps: Mutex::new(steps.into()),
                fallback,
                latency,
                prompts: Mutex::new(Vec::new()),
            }),
        );
        self
    }

    pub fn always_ok(&self, name: &str, content: &str) -> &Self {
        self.script(name, Vec::new(), Step::Reply(content.to_string()), Duration::ZERO)
    }

    pub fn always_fail(&self, name: &str) -> &Self {
        self.script(
            name,
            Vec::new(),
            Step::Fail(format!("{} is down", name)),
            Duration::ZERO,
        )
    }

    /// Fail `failures` times, then reply with `content`
    pub fn fail_then_ok(&self, name: &str, failures: usize, content: &str) -> &Self {
        let steps = (0..failures)
            .map(|i| Step::Fail(format!("{} failure {}", name, i)))
            .collect();
        self.script(name, steps, Step::Reply(content.to_string()), Duration::ZERO)
    }

    pub fn calls(&self, name: &str) -> usize {
        self.prompts(name).len()
    }

    pub fn prompts(&self, name: &str) -> Vec<String> {
        self.connectors
            .lock()
            .unwrap()
            .get(name)
            .map(|c| c.prompts.lock().unwrap().clone())
            .unwrap_or_default()
    }
}

impl ConnectorFactory for ScriptedFactory {
    fn connector_for(&self, backend: &BackendDescriptor) -> AppResult<Arc<dyn LlmConnector>> {
        let connector = self
            .connectors
            .lock()
            .unwrap()
            .get(backend.model_name())
            .cloned()
            .ok_or_else(|| AppError::UnknownBackend(backend.model_name().to_string()))?;
        Ok(connector)
    }
}

/// Clock the test moves by hand
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn starting_at(millis: u64) -> Self {
        Self(Arc::new(AtomicU64::new(millis)))
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Record every event of one kind
pub fn record(events: &EventNotifier, kind: EventKind) -> Arc<Mutex<Vec<DispatchEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    events.subscribe(kind, move |event| sink.lock().unwrap().push(event.clone()));
    seen
}

/// Configuration with OpenAI-compatible backends `(name, weight)`
pub fn config_with(
    max_retries: usize,
    retry_delay_seconds: f64,
    backends: &[(&str, f64)],
) -> llm_loadbalancer::Config {
    let mut toml = format!(
        r#"
[balancer]
max_retries_on_failure = {}
retry_delay_seconds = {:?}
throttle_timeout_seconds = 60
totally_throttled_timeout_seconds = 30
"#,
        max_retries, retry_delay_seconds
    );
    for (name, weight) in backends {
        toml.push_str(&format!(
            r#"
[[target_models]]
model_name = "{}"
hosting_platform = "openai"
api_base_url = "http://127.0.0.1:1/v1"
model_weight = {:?}
"#,
            name, weight
        ));
    }
    llm_loadbalancer::Config::from_str(&toml).expect("test config should be valid")
}
