// THEORY:
// Tensors are opaque to the pipeline. It never looks at the numbers inside them;
// it only moves them between the caller and the backend, and (for the staged
// pipeline) changes the declared shape of one without touching its data.
// A `TensorSpec` is the static description a loaded model publishes for each of
// its named inputs and outputs.

use std::collections::HashMap;

use ndarray::ArrayD;

/// A dense, dynamically shaped buffer of `f32` values.
pub type Tensor = ArrayD<f32>;

/// Named tensors, as exchanged with a backend.
pub type TensorMap = HashMap<String, Tensor>;

/// Address of one asynchronous request cell inside a loaded model, in `[0, N)`.
pub type SlotId = usize;

/// The declared name and shape of a model input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
        }
    }

    /// Total number of elements a tensor of this shape holds.
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns a copy with the leading (batch) dimension replaced.
    /// Scalars are returned unchanged.
    pub fn with_batch(&self, batch_size: usize) -> Self {
        let mut shape = self.shape.clone();
        if let Some(first) = shape.first_mut() {
            *first = batch_size;
        }
        Self {
            name: self.name.clone(),
            shape,
        }
    }
}

/// Inputs and outputs of a loaded model, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelSignature {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}
