// THEORY:
// The `StagedPipeline` chains two models into one logical inference call: an
// encoder that turns its input into a flat sequence of features, and a decoder
// that consumes those features laid out in its own declared input shape. Both
// stages run synchronously, one after the other.
//
// The reshape between the stages is fixed when the pipeline is composed: the
// target is the decoder's declared input shape, and composition fails right
// away if the encoder's output does not hold exactly as many elements. A
// mismatch is never discovered on the first `infer` call.

use ndarray::IxDyn;
use tracing::debug;

use crate::core_modules::backend::ComputeBackend;
use crate::core_modules::model::ModelWrapper;
use crate::core_modules::tensor::Tensor;
use crate::error::{PipelineError, Result};

/// An encoder, optionally followed by a decoder fed with the reshaped encoder output.
pub struct StagedPipeline<B: ComputeBackend> {
    encoder: ModelWrapper<B>,
    decoder: Option<ModelWrapper<B>>,
    reshape_target: Option<Vec<usize>>,
}

impl<B: ComputeBackend> StagedPipeline<B> {
    /// Composes the two stages, checking that the encoder output can be reshaped
    /// into the decoder input.
    pub fn new(encoder: ModelWrapper<B>, decoder: Option<ModelWrapper<B>>) -> Result<Self> {
        let reshape_target = match &decoder {
            Some(decoder) => {
                let produced = encoder.output_spec();
                let expected = decoder.input_spec();
                if produced.element_count() != expected.element_count() {
                    return Err(PipelineError::ReshapeMismatch {
                        encoder: produced.shape.clone(),
                        encoder_elements: produced.element_count(),
                        decoder: expected.shape.clone(),
                        decoder_elements: expected.element_count(),
                    });
                }
                debug!(
                    encoder = %encoder.name(),
                    decoder = %decoder.name(),
                    from = ?produced.shape,
                    to = ?expected.shape,
                    "stages composed"
                );
                Some(expected.shape.clone())
            }
            None => None,
        };

        Ok(Self {
            encoder,
            decoder,
            reshape_target,
        })
    }

    /// Runs the encoder on `input`, then the decoder on the reshaped encoder output.
    ///
    /// Without a decoder the encoder still runs, but there is no composed result and
    /// `None` is returned. Use `encoder()` directly to consume encoder output.
    pub fn infer(&self, input: Tensor) -> Result<Option<Tensor>> {
        let features = self.encoder.infer(input)?;
        let (Some(decoder), Some(target)) = (&self.decoder, &self.reshape_target) else {
            return Ok(None);
        };

        let reshaped = features
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(target))?;
        decoder.infer(reshaped).map(Some)
    }

    /// The fixed shape encoder output is reshaped into, if a decoder is configured.
    pub fn reshape_target(&self) -> Option<&[usize]> {
        self.reshape_target.as_deref()
    }

    pub fn encoder(&self) -> &ModelWrapper<B> {
        &self.encoder
    }

    pub fn decoder(&self) -> Option<&ModelWrapper<B>> {
        self.decoder.as_ref()
    }
}
