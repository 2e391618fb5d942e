//! Shared helpers: an instrumented backend that records every call made to it
//! and flags any break in the submit/wait pairing on a slot.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::{ArrayD, IxDyn};
use parking_lot::Mutex;
use slot_pipeline::{
    BackendError, ComputeBackend, LoadedModel, ModelSignature, SlotId, Tensor, TensorMap, TensorSpec,
};

pub type Transform = fn(&Tensor) -> Result<Tensor, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Load(String),
    Sync { model: String, input_shape: Vec<usize> },
    Submit(String, SlotId),
    Wait(String, SlotId),
}

pub struct FakeModel {
    pub name: String,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub transform: Transform,
}

impl FakeModel {
    pub fn new(name: &str, input: &[usize], output: &[usize], transform: Transform) -> Self {
        Self {
            name: name.to_string(),
            inputs: vec![TensorSpec::new("input", input)],
            outputs: vec![TensorSpec::new("output", output)],
            transform,
        }
    }
}

pub struct FakeHandle {
    name: String,
    input: String,
    output: String,
    transform: Transform,
    slots: Mutex<Vec<Option<Result<Tensor, String>>>>,
}

#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<Call>>,
    violations: Mutex<Vec<String>>,
    reject_next_submit: AtomicBool,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    /// Makes the next `execute_async` fail before touching its slot.
    pub fn reject_next_submit(&self) {
        self.reject_next_submit.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn run(handle: &FakeHandle, mut inputs: TensorMap) -> Result<Tensor, String> {
        let input = inputs
            .remove(&handle.input)
            .ok_or_else(|| format!("missing {}", handle.input))?;
        (handle.transform)(&input)
    }
}

impl ComputeBackend for RecordingBackend {
    type Model = FakeModel;
    type Handle = FakeHandle;

    fn load(
        &self,
        model: &FakeModel,
        num_requests: usize,
        batch_size: usize,
    ) -> Result<LoadedModel<FakeHandle>, BackendError> {
        self.record(Call::Load(model.name.clone()));
        let signature = ModelSignature {
            inputs: model.inputs.iter().map(|s| s.with_batch(batch_size)).collect(),
            outputs: model.outputs.iter().map(|s| s.with_batch(batch_size)).collect(),
        };
        let handle = FakeHandle {
            name: model.name.clone(),
            input: model.inputs.first().map(|s| s.name.clone()).unwrap_or_default(),
            output: model.outputs.first().map(|s| s.name.clone()).unwrap_or_default(),
            transform: model.transform,
            slots: Mutex::new(vec![None; num_requests]),
        };
        Ok(LoadedModel {
            name: model.name.clone(),
            handle,
            signature,
        })
    }

    fn execute_sync(&self, handle: &FakeHandle, inputs: TensorMap) -> Result<TensorMap, BackendError> {
        let input_shape = inputs.get(&handle.input).map(|t| t.shape().to_vec()).unwrap_or_default();
        self.record(Call::Sync {
            model: handle.name.clone(),
            input_shape,
        });
        let output = Self::run(handle, inputs).map_err(|reason| BackendError::Execution {
            model: handle.name.clone(),
            reason,
        })?;
        Ok(TensorMap::from([(handle.output.clone(), output)]))
    }

    fn execute_async(&self, handle: &FakeHandle, inputs: TensorMap, slot: SlotId) -> Result<(), BackendError> {
        self.record(Call::Submit(handle.name.clone(), slot));
        if self.reject_next_submit.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Disconnected(slot));
        }
        let mut slots = handle.slots.lock();
        let cell = slots.get_mut(slot).ok_or(BackendError::SlotOutOfRange {
            slot,
            num_requests: 0,
        })?;
        if cell.is_some() {
            self.violations.lock().push(format!("slot {slot} submitted while busy"));
            return Err(BackendError::SlotBusy(slot));
        }
        *cell = Some(Self::run(handle, inputs));
        Ok(())
    }

    fn wait_slot(
        &self,
        handle: &FakeHandle,
        slot: SlotId,
    ) -> impl Future<Output = Result<TensorMap, BackendError>> + Send {
        self.record(Call::Wait(handle.name.clone(), slot));
        let taken = handle.slots.lock().get_mut(slot).and_then(Option::take);
        if taken.is_none() {
            self.violations.lock().push(format!("slot {slot} waited while idle"));
        }
        let model = handle.name.clone();
        let output = handle.output.clone();

        async move {
            match taken {
                Some(Ok(tensor)) => Ok(TensorMap::from([(output, tensor)])),
                Some(Err(reason)) => Err(BackendError::Execution { model, reason }),
                None => Err(BackendError::SlotIdle(slot)),
            }
        }
    }
}

pub fn scalar(value: f32) -> Tensor {
    ArrayD::from_elem(IxDyn(&[1]), value)
}

pub fn value(tensor: &Tensor) -> f32 {
    tensor.iter().copied().next().unwrap()
}

pub fn times_ten(input: &Tensor) -> Result<Tensor, String> {
    Ok(input * 10.0)
}

/// Fails on negative inputs, otherwise behaves like `times_ten`.
pub fn fails_on_negative(input: &Tensor) -> Result<Tensor, String> {
    if input.iter().any(|v| *v < 0.0) {
        return Err("negative input".to_string());
    }
    times_ten(input)
}
