//! Type-safe backend name wrapper
//!
//! Keys throttle records and event payloads so backend identities are never
//! confused with prompts or error messages.

use crate::config::{BackendDescriptor, Config};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identity of a configured backend (its `model_name`)
///
/// # Validation
/// - `new()`: checks the name against the configuration
/// - `From<&BackendDescriptor>`: always valid
/// - `From<&str>` / `From<String>`: unchecked, for tests and lookups
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendName(String);

impl BackendName {
    /// Create a validated BackendName
    ///
    /// # Errors
    /// Returns an error if no configured backend has this name.
    pub fn new(name: &str, config: &Config) -> Result<Self, String> {
        if config.backend(name).is_some() {
            Ok(Self(name.to_string()))
        } else {
            let available: Vec<&str> = config
                .target_models
                .iter()
                .map(|m| m.model_name())
                .collect();
            Err(format!(
                "Unknown backend: '{}'. Available backends: {}",
                name,
                available.join(", ")
            ))
        }
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&BackendDescriptor> for BackendName {
    fn from(backend: &BackendDescriptor) -> Self {
        Self(backend.model_name().to_string())
    }
}

impl From<String> for BackendName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for BackendName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl PartialEq<str> for BackendName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for BackendName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
