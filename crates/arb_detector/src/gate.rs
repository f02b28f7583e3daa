//! Execution-safety gate seam. Consulted once per leg right before a trade
//! is built.

use market_normalizer::types::Provider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub account:     Option<String>,
    pub provider_id: Provider,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("execution blocked by {check}: {detail}")]
pub struct ExecutionBlockedError {
    pub check:  String,
    pub detail: String,
}

impl ExecutionBlockedError {
    pub fn new(check: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { check: check.into(), detail: detail.into() }
    }
}

pub trait ExecutionGate: Send + Sync {
    fn assert_executable(&self, request: &ExecutionRequest) -> Result<(), ExecutionBlockedError>;
}

/// Permits everything. The hub runs with this until a real gate is wired in.
pub struct OpenGate;

impl ExecutionGate for OpenGate {
    fn assert_executable(&self, _request: &ExecutionRequest) -> Result<(), ExecutionBlockedError> {
        Ok(())
    }
}
