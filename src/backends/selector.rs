//! Weighted random backend selection
//!
//! Only backends whose throttle record is not throttled take part. The draw is
//! mapped onto a cumulative partition of `[0, 1)` in registry order.

use crate::backends::{BackendName, ThrottleState};
use crate::config::BackendDescriptor;
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no eligible backend among {total} configured")]
    NoEligibleBackend { total: usize },
}

/// Select a backend using the thread-local RNG
pub fn select<'a>(
    state: &ThrottleState,
    registry: &'a [BackendDescriptor],
) -> Result<&'a BackendDescriptor, SelectionError> {
    select_with(state, registry, &mut rand::rng())
}

/// Select a backend with a caller-supplied RNG
///
/// # Performance
/// O(n) in the number of configured backends; one allocation for the eligible list.
pub fn select_with<'a, R: Rng + ?Sized>(
    state: &ThrottleState,
    registry: &'a [BackendDescriptor],
    rng: &mut R,
) -> Result<&'a BackendDescriptor, SelectionError> {
    let eligible: Vec<&BackendDescriptor> = registry
        .iter()
        .filter(|backend| state.is_eligible(&BackendName::from(*backend)))
        .collect();

    let Some(last) = eligible.last() else {
        tracing::debug!(
            total_backends = registry.len(),
            "No eligible backends - every backend is throttled"
        );
        return Err(SelectionError::NoEligibleBackend {
            total: registry.len(),
        });
    };

    let total_weight: f64 = eligible.iter().map(|b| b.weight()).sum();
    let draw: f64 = rng.random();

    let mut cumulative = 0.0;
    for backend in &eligible {
        cumulative += backend.weight() / total_weight;
        if draw < cumulative {
            tracing::debug!(
                backend = %backend.model_name(),
                weight = backend.weight(),
                total_weight = total_weight,
                eligible_backends = eligible.len(),
                "Selected backend via weighted random selection"
            );
            return Ok(*backend);
        }
    }

    tracing::warn!(
        backend = %last.model_name(),
        draw = draw,
        "Fallback to last eligible backend (likely floating-point rounding)"
    );
    Ok(*last)
}
