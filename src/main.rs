//! llm-loadbalancer command-line entry point

use clap::Parser;
use llm_loadbalancer::cli::{Cli, Command, generate_config_template};
use llm_loadbalancer::config::Config;
use llm_loadbalancer::dispatch::{ComparisonRequest, Dispatcher, ThrottlePolicy};
use llm_loadbalancer::events::{DispatchEvent, EventKind};
use llm_loadbalancer::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (text, policy, comparison) = match cli.command {
        Command::Config { output } => {
            let template = generate_config_template();
            match output {
                Some(path) => {
                    std::fs::write(&path, template)?;
                    eprintln!("Configuration template written to {}", path);
                }
                None => print!("{}", template),
            }
            return Ok(());
        }
        Command::Prompt {
            text,
            no_fail_on_throttle,
        } => {
            let policy = if no_fail_on_throttle {
                ThrottlePolicy::Notify
            } else {
                ThrottlePolicy::Fail
            };
            (text, policy, None)
        }
        Command::Compare {
            text,
            iterations,
            reviewer,
            review_template,
        } => {
            let mut request = ComparisonRequest::new(text.clone(), iterations);
            if let Some(reviewer) = reviewer {
                request = request.with_reviewer(reviewer);
            }
            if let Some(path) = review_template {
                request = request.with_review_template(std::fs::read_to_string(&path)?);
            }
            (text, ThrottlePolicy::default(), Some(request))
        }
    };

    let config = Config::from_file(&cli.config)?;
    telemetry::init(&config.observability.log_level);

    let dispatcher = Dispatcher::new(config)?;
    subscribe_logging(&dispatcher);

    let output = match comparison {
        Some(request) => {
            let report = dispatcher.compare_models_for_single_prompt(&request).await?;
            serde_json::to_string_pretty(&report)?
        }
        None => {
            let outcome = dispatcher.run_single_prompt_with(&text, policy).await?;
            serde_json::to_string_pretty(&outcome)?
        }
    };
    println!("{}", output);

    if cli.metrics {
        eprint!("{}", dispatcher.metrics().render()?);
    }

    Ok(())
}

fn subscribe_logging(dispatcher: &Dispatcher) {
    for kind in [
        EventKind::Retry,
        EventKind::Throttled,
        EventKind::TotallyThrottled,
        EventKind::ComparisonProgress,
        EventKind::ComparisonError,
    ] {
        dispatcher.events().subscribe(kind, log_event);
    }
}

fn log_event(event: &DispatchEvent) {
    match event {
        DispatchEvent::Retry {
            backend,
            attempt,
            error,
        } => tracing::info!(backend = %backend, attempt, error = %error, "retry"),
        DispatchEvent::Throttled { backend } => tracing::warn!(backend = %backend, "throttled"),
        DispatchEvent::TotallyThrottled { cooldown } => tracing::warn!(
            cooldown_seconds = cooldown.as_secs_f64(),
            "totally throttled"
        ),
        DispatchEvent::ComparisonProgress { backend, iteration } => {
            tracing::info!(backend = %backend, iteration, "comparison iteration succeeded")
        }
        DispatchEvent::ComparisonError {
            backend,
            iteration,
            error,
        } => tracing::warn!(
            backend = %backend,
            iteration,
            error = %error,
            "comparison iteration failed"
        ),
    }
}
