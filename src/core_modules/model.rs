// THEORY:
// `ModelWrapper` owns one model loaded on a backend and is the only thing in the
// crate that talks to the backend directly. It turns the backend's named-tensor
// interface into a single-tensor one, which is only possible because the wrapper
// refuses, at construction, any model that does not have exactly one input and
// one output.
//
// The wrapper does not police the submit/wait pairing on slots. It forwards
// `submit` and `wait_for_slot` verbatim; keeping one `submit` matched with one
// later `wait_for_slot` per slot is the job of whoever owns the slots (the
// `AsyncPipeline`).

use std::sync::Arc;

use tracing::{debug, info};

use crate::core_modules::backend::ComputeBackend;
use crate::core_modules::tensor::{SlotId, Tensor, TensorMap, TensorSpec};
use crate::error::{PipelineError, Result};

/// A loaded single-input, single-output model.
pub struct ModelWrapper<B: ComputeBackend> {
    backend: Arc<B>,
    handle: B::Handle,
    name: String,
    input: TensorSpec,
    output: TensorSpec,
    num_requests: usize,
    batch_size: usize,
}

impl<B: ComputeBackend> ModelWrapper<B> {
    /// Loads `model` on `backend` with `num_requests` asynchronous request slots.
    ///
    /// Fails if the model does not expose exactly one input and one output tensor.
    pub fn new(backend: Arc<B>, model: &B::Model, num_requests: usize, batch_size: usize) -> Result<Self> {
        if num_requests == 0 {
            return Err(PipelineError::InvalidOption("num_requests must be at least 1".to_string()));
        }
        if batch_size == 0 {
            return Err(PipelineError::InvalidOption("batch_size must be at least 1".to_string()));
        }

        let loaded = backend.load(model, num_requests, batch_size)?;
        let (input, output) = match (loaded.signature.inputs.as_slice(), loaded.signature.outputs.as_slice()) {
            ([input], [output]) => (input.clone(), output.clone()),
            (inputs, outputs) => {
                return Err(PipelineError::Contract {
                    model: loaded.name,
                    inputs: inputs.len(),
                    outputs: outputs.len(),
                });
            }
        };
        info!(
            model = %loaded.name,
            input = %input.name,
            input_shape = ?input.shape,
            output = %output.name,
            output_shape = ?output.shape,
            num_requests,
            batch_size,
            "model loaded"
        );

        Ok(Self {
            backend,
            handle: loaded.handle,
            name: loaded.name,
            input,
            output,
            num_requests,
            batch_size,
        })
    }

    /// Runs the model and blocks until its output is ready.
    pub fn infer(&self, input: Tensor) -> Result<Tensor> {
        let outputs = self.backend.execute_sync(&self.handle, self.bind(input))?;
        self.take_output(outputs)
    }

    /// Starts the model on `slot` without waiting for it.
    pub fn submit(&self, input: Tensor, slot: SlotId) -> Result<()> {
        debug!(model = %self.name, slot, "submit");
        self.backend.execute_async(&self.handle, self.bind(input), slot)?;
        Ok(())
    }

    /// Waits for the request on `slot` and returns its output. The slot is free afterwards.
    pub async fn wait_for_slot(&self, slot: SlotId) -> Result<Tensor> {
        let outputs = self.backend.wait_slot(&self.handle, slot).await?;
        debug!(model = %self.name, slot, "slot completed");
        self.take_output(outputs)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_spec(&self) -> &TensorSpec {
        &self.input
    }

    pub fn output_spec(&self) -> &TensorSpec {
        &self.output
    }

    pub fn num_requests(&self) -> usize {
        self.num_requests
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn bind(&self, input: Tensor) -> TensorMap {
        TensorMap::from([(self.input.name.clone(), input)])
    }

    fn take_output(&self, mut outputs: TensorMap) -> Result<Tensor> {
        outputs
            .remove(&self.output.name)
            .ok_or_else(|| PipelineError::MissingOutput(self.output.name.clone()))
    }
}
