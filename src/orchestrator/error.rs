use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::engine::{EngineError, EngineStep};
use crate::store::StoreError;

/// A remote step that did not complete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub step: EngineStep,
    pub message: String,
}

impl StepFailure {
    pub fn new(step: EngineStep, error: &EngineError) -> Self {
        Self {
            step,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Engine resource created by a setup that did not finish
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "kebab-case")]
pub enum CreatedResource {
    Sandbox(String),
    Endpoint(String),
}

impl fmt::Display for CreatedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreatedResource::Sandbox(id) => write!(f, "sandbox {}", id),
            CreatedResource::Endpoint(id) => write!(f, "endpoint {}", id),
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "none".to_string();
    }
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum PodNetworkError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Remote call {step} failed: {source}")]
    RemoteCall {
        step: EngineStep,
        #[source]
        source: EngineError,
    },

    #[error(
        "Setup failed at {failed_step}: {source} (left in place: {}; compensation failures: {})",
        join(.created),
        join(.compensation_failures)
    )]
    PartialSetup {
        failed_step: EngineStep,
        #[source]
        source: EngineError,
        created: Vec<CreatedResource>,
        compensation_failures: Vec<StepFailure>,
    },

    /// Every remote step succeeded but the record could not be written
    #[error(
        "Setup not recorded: {source} (left in place: {}; compensation failures: {})",
        join(.created),
        join(.compensation_failures)
    )]
    Unrecorded {
        #[source]
        source: StoreError,
        created: Vec<CreatedResource>,
        compensation_failures: Vec<StepFailure>,
    },

    #[error("Teardown incomplete, record retained ({})", join(.failures))]
    Teardown { failures: Vec<StepFailure> },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl PodNetworkError {
    /// Short machine-readable name used in error responses
    pub fn kind(&self) -> &'static str {
        match self {
            PodNetworkError::Validation(_) => "validation",
            PodNetworkError::NotFound(_) => "not-found",
            PodNetworkError::Conflict(_) => "conflict",
            PodNetworkError::RemoteCall { .. } => "remote-call",
            PodNetworkError::PartialSetup { .. } => "partial-setup",
            PodNetworkError::Unrecorded { source, .. } if source.is_conflict() => "conflict",
            PodNetworkError::Unrecorded { .. } => "store",
            PodNetworkError::Teardown { .. } => "teardown",
            PodNetworkError::Store(_) => "store",
        }
    }

    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PodNetworkError::Validation(_) | PodNetworkError::NotFound(_)
        )
    }

    /// Steps that failed, for errors that name them
    pub fn failed_steps(&self) -> Vec<EngineStep> {
        match self {
            PodNetworkError::RemoteCall { step, .. } => vec![*step],
            PodNetworkError::PartialSetup { failed_step, .. } => vec![*failed_step],
            PodNetworkError::Teardown { failures } => failures.iter().map(|f| f.step).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<StoreError> for PodNetworkError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => PodNetworkError::NotFound(key),
            StoreError::Conflict(msg) => PodNetworkError::Conflict(msg),
            other => PodNetworkError::Store(other),
        }
    }
}
