// THEORY:
// The `ComputeBackend` trait is the seam between the scheduling logic in this
// crate and whatever actually executes a model (an accelerator runtime, a
// remote service, or the in-process `HostBackend`). The pipeline treats it as an
// opaque collaborator with four capabilities:
//
// 1.  **Load**: turn a backend-specific model definition into a handle, reserving
//     `num_requests` asynchronous request cells for it.
// 2.  **Synchronous execution**: run the model and block until it is done.
// 3.  **Asynchronous submission**: start a run on a given request cell and return
//     immediately.
// 4.  **Slot wait**: suspend until the run on a given cell finishes, then hand back
//     its outputs and free the cell.
//
// How the backend schedules work internally (threads, device queues, out-of-order
// completion) is its own business. The only promise the pipeline relies on is
// per-slot identity: the result collected from slot `s` belongs to the request
// that was submitted on slot `s`.

use std::future::Future;

use crate::core_modules::tensor::{ModelSignature, SlotId, TensorMap};
use crate::error::BackendError;

/// A model that has been loaded onto a backend.
#[derive(Debug, Clone)]
pub struct LoadedModel<H> {
    pub name: String,
    pub handle: H,
    pub signature: ModelSignature,
}

/// An executor for loaded models with a pool of slot-addressed asynchronous requests.
pub trait ComputeBackend: Send + Sync {
    /// Backend-specific description of a model to load.
    type Model;
    /// Reference to a model after it has been loaded.
    type Handle: Send + Sync;

    /// Loads `model`, reserving `num_requests` request cells. The returned signature
    /// has `batch_size` applied to the leading dimension of every tensor.
    fn load(
        &self,
        model: &Self::Model,
        num_requests: usize,
        batch_size: usize,
    ) -> Result<LoadedModel<Self::Handle>, BackendError>;

    /// Runs the model to completion on the calling thread.
    fn execute_sync(&self, handle: &Self::Handle, inputs: TensorMap) -> Result<TensorMap, BackendError>;

    /// Starts a run on `slot` and returns without waiting for it.
    fn execute_async(&self, handle: &Self::Handle, inputs: TensorMap, slot: SlotId) -> Result<(), BackendError>;

    /// Waits for the run on `slot` to finish and returns its outputs.
    fn wait_slot(
        &self,
        handle: &Self::Handle,
        slot: SlotId,
    ) -> impl Future<Output = Result<TensorMap, BackendError>> + Send;
}
