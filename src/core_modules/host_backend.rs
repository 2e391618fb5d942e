// THEORY:
// `HostBackend` is an in-process `ComputeBackend`. Models are plain Rust kernels
// (any `Fn(&TensorMap) -> Result<TensorMap, String>`), and asynchronous requests
// run on a fixed pool of worker threads owned by the backend.
//
// Key architectural principles:
// 1.  **Worker Pool**: Submissions are dispatched round-robin onto per-worker
//     queues. Workers run concurrently, so requests on different slots may finish
//     in any order.
// 2.  **Request Cells**: Every loaded model owns `num_requests` cells. A cell is
//     either idle or holds the receiving half of a oneshot channel on which the
//     worker will deliver that request's outputs. This is what makes a `SlotId`
//     meaningful: the cell is the slot.
// 3.  **Strict Cells**: Submitting on a busy cell or waiting on an idle one is
//     reported as an error instead of silently corrupting the cell.
// 4.  **Abandoned Waits**: A wait that is dropped before its reply arrives puts
//     the receiver back, so the slot is still in flight and can be waited on again.
// 5.  **Synchronous Path**: `execute_sync` never touches the pool; the kernel runs
//     on the caller's thread.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::core_modules::backend::{ComputeBackend, LoadedModel};
use crate::core_modules::tensor::{ModelSignature, SlotId, TensorMap, TensorSpec};
use crate::error::BackendError;

/// The computation behind a `HostModel`.
pub trait Kernel: Send + Sync {
    fn run(&self, inputs: &TensorMap) -> Result<TensorMap, String>;
}

impl<F> Kernel for F
where
    F: Fn(&TensorMap) -> Result<TensorMap, String> + Send + Sync,
{
    fn run(&self, inputs: &TensorMap) -> Result<TensorMap, String> {
        self(inputs)
    }
}

/// A model definition for the `HostBackend`: declared tensors plus a kernel.
#[derive(Clone)]
pub struct HostModel {
    name: String,
    signature: ModelSignature,
    kernel: Arc<dyn Kernel>,
}

impl HostModel {
    pub fn new<F>(name: impl Into<String>, kernel: F) -> Self
    where
        F: Fn(&TensorMap) -> Result<TensorMap, String> + Send + Sync + 'static,
    {
        Self::from_kernel(name, Arc::new(kernel))
    }

    /// Builds a model around an existing, possibly shared, kernel.
    pub fn from_kernel(name: impl Into<String>, kernel: Arc<dyn Kernel>) -> Self {
        Self {
            name: name.into(),
            signature: ModelSignature::default(),
            kernel,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, shape: impl Into<Vec<usize>>) -> Self {
        self.signature.inputs.push(TensorSpec::new(name, shape));
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, shape: impl Into<Vec<usize>>) -> Self {
        self.signature.outputs.push(TensorSpec::new(name, shape));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

enum RequestCell {
    Idle,
    InFlight(oneshot::Receiver<Result<TensorMap, String>>),
}

struct HostModelState {
    name: String,
    inputs: Vec<String>,
    kernel: Arc<dyn Kernel>,
    requests: Vec<Mutex<RequestCell>>,
}

/// Handle to a model loaded on a `HostBackend`.
#[derive(Clone)]
pub struct HostHandle {
    state: Arc<HostModelState>,
}

impl HostHandle {
    pub fn num_requests(&self) -> usize {
        self.state.requests.len()
    }
}

struct Job {
    kernel: Arc<dyn Kernel>,
    inputs: TensorMap,
    reply: oneshot::Sender<Result<TensorMap, String>>,
}

/// In-process backend executing `HostModel` kernels on a worker thread pool.
pub struct HostBackend {
    queues: Vec<mpsc::UnboundedSender<Job>>,
    next_worker: AtomicUsize,
    workers: Vec<JoinHandle<()>>,
}

impl HostBackend {
    /// Starts a backend with `workers` threads (at least one).
    pub fn new(workers: usize) -> std::io::Result<Self> {
        let workers_count = workers.max(1);
        let mut queues = Vec::with_capacity(workers_count);
        let mut workers = Vec::with_capacity(workers_count);

        for worker_idx in 0..workers_count {
            let (job_sender, mut job_receiver) = mpsc::unbounded_channel::<Job>();
            let worker = std::thread::Builder::new()
                .name(format!("host-worker-{worker_idx}"))
                .spawn(move || {
                    while let Some(job) = job_receiver.blocking_recv() {
                        let outcome = job.kernel.run(&job.inputs);
                        // The waiter may have been dropped with its pipeline.
                        if job.reply.send(outcome).is_err() {
                            debug!(worker = worker_idx, "result discarded, waiter gone");
                        }
                    }
                })?;
            queues.push(job_sender);
            workers.push(worker);
        }

        info!(workers = workers_count, "host backend started");
        Ok(Self {
            queues,
            next_worker: AtomicUsize::new(0),
            workers,
        })
    }

    /// Starts a backend with one worker per logical CPU.
    pub fn with_default_workers() -> std::io::Result<Self> {
        Self::new(num_cpus::get())
    }

    pub fn worker_count(&self) -> usize {
        self.queues.len()
    }

    fn check_inputs(state: &HostModelState, inputs: &TensorMap) -> Result<(), BackendError> {
        match state.inputs.iter().find(|name| !inputs.contains_key(name.as_str())) {
            Some(missing) => Err(BackendError::MissingInput(missing.clone())),
            None => Ok(()),
        }
    }

    fn request_cell(handle: &HostHandle, slot: SlotId) -> Result<&Mutex<RequestCell>, BackendError> {
        handle
            .state
            .requests
            .get(slot)
            .ok_or(BackendError::SlotOutOfRange {
                slot,
                num_requests: handle.state.requests.len(),
            })
    }
}

impl ComputeBackend for HostBackend {
    type Model = HostModel;
    type Handle = HostHandle;

    fn load(
        &self,
        model: &HostModel,
        num_requests: usize,
        batch_size: usize,
    ) -> Result<LoadedModel<HostHandle>, BackendError> {
        if num_requests == 0 {
            return Err(BackendError::Load {
                model: model.name.clone(),
                reason: "at least one request slot is required".to_string(),
            });
        }

        let signature = ModelSignature {
            inputs: model.signature.inputs.iter().map(|s| s.with_batch(batch_size)).collect(),
            outputs: model.signature.outputs.iter().map(|s| s.with_batch(batch_size)).collect(),
        };
        let state = HostModelState {
            name: model.name.clone(),
            inputs: signature.inputs.iter().map(|s| s.name.clone()).collect(),
            kernel: Arc::clone(&model.kernel),
            requests: (0..num_requests).map(|_| Mutex::new(RequestCell::Idle)).collect(),
        };

        debug!(model = %model.name, num_requests, batch_size, "model loaded on host backend");
        Ok(LoadedModel {
            name: model.name.clone(),
            handle: HostHandle {
                state: Arc::new(state),
            },
            signature,
        })
    }

    fn execute_sync(&self, handle: &HostHandle, inputs: TensorMap) -> Result<TensorMap, BackendError> {
        Self::check_inputs(&handle.state, &inputs)?;
        handle
            .state
            .kernel
            .run(&inputs)
            .map_err(|reason| BackendError::Execution {
                model: handle.state.name.clone(),
                reason,
            })
    }

    fn execute_async(&self, handle: &HostHandle, inputs: TensorMap, slot: SlotId) -> Result<(), BackendError> {
        Self::check_inputs(&handle.state, &inputs)?;
        let mut cell = Self::request_cell(handle, slot)?.lock();
        if matches!(*cell, RequestCell::InFlight(_)) {
            return Err(BackendError::SlotBusy(slot));
        }

        let (reply, receiver) = oneshot::channel();
        let worker_idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        let job = Job {
            kernel: Arc::clone(&handle.state.kernel),
            inputs,
            reply,
        };
        if self.queues[worker_idx].send(job).is_err() {
            warn!(model = %handle.state.name, slot, worker = worker_idx, "worker queue closed");
            return Err(BackendError::Disconnected(slot));
        }

        *cell = RequestCell::InFlight(receiver);
        Ok(())
    }

    fn wait_slot(
        &self,
        handle: &HostHandle,
        slot: SlotId,
    ) -> impl Future<Output = Result<TensorMap, BackendError>> + Send {
        let pending = Self::request_cell(handle, slot).and_then(|cell| {
            match std::mem::replace(&mut *cell.lock(), RequestCell::Idle) {
                RequestCell::InFlight(receiver) => Ok(PendingReply {
                    state: Arc::clone(&handle.state),
                    slot,
                    receiver: Some(receiver),
                }),
                RequestCell::Idle => Err(BackendError::SlotIdle(slot)),
            }
        });
        let model = handle.state.name.clone();

        async move {
            let mut pending = pending?;
            let Some(receiver) = pending.receiver.as_mut() else {
                return Err(BackendError::SlotIdle(slot));
            };
            let reply = receiver.await;
            pending.receiver = None;
            match reply {
                Ok(Ok(outputs)) => Ok(outputs),
                Ok(Err(reason)) => Err(BackendError::Execution { model, reason }),
                Err(_) => Err(BackendError::Disconnected(slot)),
            }
        }
    }
}

/// A receiver taken out of its request cell for the duration of a wait.
/// If the wait is dropped before the reply arrives, the receiver goes back
/// into the cell and the request stays in flight.
struct PendingReply {
    state: Arc<HostModelState>,
    slot: SlotId,
    receiver: Option<oneshot::Receiver<Result<TensorMap, String>>>,
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        let Some(receiver) = self.receiver.take() else {
            return;
        };
        let mut cell = self.state.requests[self.slot].lock();
        if matches!(*cell, RequestCell::Idle) {
            debug!(model = %self.state.name, slot = self.slot, "wait abandoned, request kept in flight");
            *cell = RequestCell::InFlight(receiver);
        }
    }
}

impl Drop for HostBackend {
    fn drop(&mut self) {
        // Closing every queue lets the workers drain and exit.
        self.queues.clear();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("host worker panicked");
            }
        }
    }
}
