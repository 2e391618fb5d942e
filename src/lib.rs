// THEORY:
// This file is the entry point for the `slot_pipeline` library crate. It exports
// the two caller-facing pipelines, `AsyncPipeline` (overlapped, slot-addressed,
// strictly in-order) and `StagedPipeline` (encoder feeding a reshaped decoder),
// together with the pieces needed to build them: the `ComputeBackend` seam, the
// in-process `HostBackend`, the `ModelWrapper`, and configuration.
//
// The building blocks live in `core_modules`; nothing in the crate reads global
// state. Every backend handle and setting is passed in explicitly.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod staged_pipeline;

pub use config::PipelineConfig;
pub use core_modules::backend::{ComputeBackend, LoadedModel};
pub use core_modules::host_backend::{HostBackend, HostHandle, HostModel, Kernel};
pub use core_modules::model::ModelWrapper;
pub use core_modules::tensor::{ModelSignature, SlotId, Tensor, TensorMap, TensorSpec};
pub use error::{BackendError, ConfigError, PipelineError, Result};
pub use pipeline::{AsyncPipeline, Completed, InferOutcome, SlotState};
pub use staged_pipeline::StagedPipeline;
