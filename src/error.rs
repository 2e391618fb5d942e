// THEORY:
// Every failure the pipeline can surface falls into one of three families:
// contract violations found while wiring models together, failures reported by
// the compute backend while running a request, and configuration problems found
// before anything is loaded. Each family gets its own enum so that callers can
// match on the layer that failed.

use thiserror::Error;

use crate::core_modules::tensor::SlotId;

/// Failures reported by a `ComputeBackend`.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The model could not be loaded onto the backend.
    #[error("failed to load model `{model}`: {reason}")]
    Load { model: String, reason: String },

    /// The model ran but did not produce a result.
    #[error("model `{model}` failed to execute: {reason}")]
    Execution { model: String, reason: String },

    #[error("slot {slot} is out of range for a pool of {num_requests} requests")]
    SlotOutOfRange { slot: SlotId, num_requests: usize },

    /// `execute_async` was called on a slot whose previous result was never collected.
    #[error("slot {0} already has an uncollected request in flight")]
    SlotBusy(SlotId),

    /// `wait_slot` was called on a slot with nothing submitted.
    #[error("slot {0} has no request in flight")]
    SlotIdle(SlotId),

    /// The worker executing the request went away before replying.
    #[error("worker for slot {0} disconnected before completing the request")]
    Disconnected(SlotId),

    #[error("input tensor `{0}` was not provided")]
    MissingInput(String),
}

/// Failures surfaced by the model wrapper and the pipelines built on it.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The model does not expose exactly one input and one output tensor.
    #[error(
        "model `{model}` must expose exactly one input and one output, \
         found {inputs} input(s) and {outputs} output(s)"
    )]
    Contract {
        model: String,
        inputs: usize,
        outputs: usize,
    },

    /// The encoder output cannot be reshaped into the decoder input.
    #[error(
        "cannot reshape encoder output {encoder:?} ({encoder_elements} elements) \
         into decoder input {decoder:?} ({decoder_elements} elements)"
    )]
    ReshapeMismatch {
        encoder: Vec<usize>,
        encoder_elements: usize,
        decoder: Vec<usize>,
        decoder_elements: usize,
    },

    #[error("pipeline depth {depth} is invalid for a model loaded with {num_requests} request slot(s)")]
    InvalidDepth { depth: usize, num_requests: usize },

    #[error("invalid model load option: {0}")]
    InvalidOption(String),

    #[error("backend response is missing output tensor `{0}`")]
    MissingOutput(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// Failures while reading or validating a `PipelineConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
