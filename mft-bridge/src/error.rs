use mft_core::model::ModelError;
use std::io;
use thiserror::Error;

pub const INVALID_ARGS: &str = "INVALID_ARGS";
pub const INFERENCE_ERROR: &str = "INFERENCE_ERROR";

/// Failure to map a packaged artifact.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact not found: {path}")]
    NotFound { path: String },
    #[error("failed to read artifact {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Why `initialize` could not reach the ready state.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to construct {model} interpreter: {source}")]
    Construct {
        model: &'static str,
        #[source]
        source: ModelError,
    },
    #[error("{model} interpreter panicked during construction")]
    Panicked { model: &'static str },
    #[error("{model} interpreter shapes {actual_input:?} -> {actual_output:?} do not match {expected_input:?} -> {expected_output:?}")]
    ContractMismatch {
        model: &'static str,
        expected_input: Vec<usize>,
        expected_output: Vec<usize>,
        actual_input: Vec<usize>,
        actual_output: Vec<usize>,
    },
    #[error("bridge is closed")]
    Closed,
}

/// Caller-side precondition that was violated.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum InputFault {
    #[error("bridge is not initialized")]
    NotReady,
    #[error("expected {expected} tokens, got {actual}")]
    Length { expected: usize, actual: usize },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    #[error("invalid input: {0}")]
    InvalidInput(InputFault),
    #[error("inference failed: {0}")]
    Inference(String),
}

impl BridgeError {
    /// Code reported across the method-call boundary.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::InvalidInput(_) => INVALID_ARGS,
            BridgeError::Inference(_) => INFERENCE_ERROR,
        }
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, BridgeError::InvalidInput(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_fault_messages() {
        let err = BridgeError::InvalidInput(InputFault::Length { expected: 128, actual: 3 });
        assert_eq!(err.to_string(), "invalid input: expected 128 tokens, got 3");
        assert_eq!(err.code(), INVALID_ARGS);
        assert_eq!(InputFault::NotReady.to_string(), "bridge is not initialized");
    }

    #[test]
    fn inference_errors_carry_their_code() {
        let err = BridgeError::Inference("boom".into());
        assert_eq!(err.code(), INFERENCE_ERROR);
        assert!(!err.is_invalid_input());
    }
}
