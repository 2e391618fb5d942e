// THEORY:
// The `pipeline` module is the top-level, latency-hiding API of the crate. The
// `AsyncPipeline` turns a stream of `infer` calls into a fixed-depth pipeline of
// asynchronous requests: every call hands a new frame to the backend and, once
// the pipeline is full, collects the oldest outstanding result. With depth N the
// backend always has up to N requests in flight, so steady-state throughput is
// bounded by one inference latency spread over N slots instead of N latencies
// run back to back.
//
// Key architectural principles:
// 1.  **Explicit Slot States**: The pool is an array of N `SlotState`s plus two
//     cursors that walk it round-robin, one for submission and one for retrieval.
//     A slot is only ever submitted to while `Free`, and it only becomes `Free`
//     again when its result has been collected. Retrieval therefore always happens
//     before a slot is reused.
// 2.  **Correlation Window**: Each submitted frame is pushed onto a FIFO, and
//     popped exactly once, when the result computed from it is returned. The window
//     never holds more than N frames.
// 3.  **Strict FIFO**: Results come back in submission order no matter in which
//     order the backend finishes them, because retrieval walks the slots in the
//     same order submission did.
// 4.  **Typed Warm-up**: The first N calls return `InferOutcome::Filling` instead of
//     an empty pair.
//
// The pipeline does no threading and no locking of its own. It is driven by a
// single caller; the only suspension point is waiting on a slot, which has no
// timeout. Every state change happens after that wait completes, so an `infer`
// or `drain_one` future can be dropped mid-wait (e.g. by `tokio::time::timeout`)
// and the pipeline picks up where it was on the next call, as long as the
// backend keeps an abandoned request in flight.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::core_modules::backend::ComputeBackend;
use crate::core_modules::model::ModelWrapper;
use crate::core_modules::tensor::{SlotId, Tensor};
use crate::error::{PipelineError, Result};

/// Occupancy of one request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Pending,
}

/// A result paired with the frame that was submitted to produce it.
#[derive(Debug, Clone)]
pub struct Completed<F> {
    /// 0-based position of the frame in the submission order.
    pub sequence: u64,
    pub result: Tensor,
    pub frame: F,
}

/// What a single `AsyncPipeline::infer` call produced.
#[derive(Debug, Clone)]
pub enum InferOutcome<F> {
    /// The frame was accepted but no result is due yet.
    Filling,
    /// The frame was accepted and the oldest outstanding result was collected.
    Ready(Completed<F>),
}

impl<F> InferOutcome<F> {
    pub fn is_ready(&self) -> bool {
        matches!(self, InferOutcome::Ready(_))
    }

    pub fn into_completed(self) -> Option<Completed<F>> {
        match self {
            InferOutcome::Ready(completed) => Some(completed),
            InferOutcome::Filling => None,
        }
    }
}

/// A depth-N pipeline over a model's asynchronous request slots.
pub struct AsyncPipeline<B: ComputeBackend, F> {
    model: ModelWrapper<B>,
    slots: Vec<SlotState>,
    submit_cursor: SlotId,
    retrieve_cursor: SlotId,
    window: VecDeque<(u64, F)>,
    /// A pair collected by a call whose own submission then failed.
    carried: Option<Completed<F>>,
    submitted: u64,
}

impl<B: ComputeBackend, F> AsyncPipeline<B, F> {
    /// Creates a pipeline of `depth` slots. `depth` must be in `1..=model.num_requests()`.
    pub fn new(model: ModelWrapper<B>, depth: usize) -> Result<Self> {
        if depth == 0 || depth > model.num_requests() {
            return Err(PipelineError::InvalidDepth {
                depth,
                num_requests: model.num_requests(),
            });
        }
        Ok(Self {
            model,
            slots: vec![SlotState::Free; depth],
            submit_cursor: 0,
            retrieve_cursor: 0,
            window: VecDeque::with_capacity(depth),
            carried: None,
            submitted: 0,
        })
    }

    /// Submits `input` (computed from `frame`) and, once the pipeline is full,
    /// returns the result and frame submitted `depth` calls earlier.
    ///
    /// The oldest result is collected before `input` is submitted. If that wait
    /// fails, or the future is dropped while waiting, `input` and `frame` are
    /// dropped without being submitted; on a failed wait the failing request's
    /// own frame is dropped too. Outstanding requests are unaffected by a drop.
    pub async fn infer(&mut self, input: Tensor, frame: F) -> Result<InferOutcome<F>> {
        let slot = self.submit_cursor;

        let collected = match self.carried.take() {
            Some(carried) => Some(carried),
            None if self.slots[slot] == SlotState::Pending => {
                debug_assert_eq!(self.retrieve_cursor, slot);
                self.retrieve().await?
            }
            None => None,
        };

        if let Err(err) = self.model.submit(input, slot) {
            warn!(model = %self.model.name(), slot, error = %err, "submission failed");
            self.carried = collected;
            return Err(err);
        }
        self.slots[slot] = SlotState::Pending;
        self.window.push_back((self.submitted, frame));
        debug!(
            sequence = self.submitted,
            slot,
            in_flight = self.in_flight(),
            "frame submitted"
        );
        self.submitted += 1;
        self.submit_cursor = (slot + 1) % self.depth();
        debug_assert!(self.window.len() <= self.depth());

        Ok(match collected {
            Some(completed) => InferOutcome::Ready(completed),
            None => InferOutcome::Filling,
        })
    }

    /// Collects the oldest outstanding result without submitting anything.
    /// Returns `None` once nothing is in flight.
    pub async fn drain_one(&mut self) -> Result<Option<Completed<F>>> {
        if let Some(carried) = self.carried.take() {
            return Ok(Some(carried));
        }
        if self.slots[self.retrieve_cursor] == SlotState::Free {
            return Ok(None);
        }
        self.retrieve().await
    }

    /// Collects every outstanding result, oldest first. Afterwards the pipeline is
    /// empty and the next `depth` calls to `infer` warm it up again.
    pub async fn flush(&mut self) -> Result<Vec<Completed<F>>> {
        let mut drained = Vec::with_capacity(self.in_flight() + 1);
        while let Some(completed) = self.drain_one().await? {
            drained.push(completed);
        }
        Ok(drained)
    }

    /// Waits on the retrieval cursor's slot and pairs its result with the oldest frame.
    /// On failure the slot is freed and its frame is dropped.
    async fn retrieve(&mut self) -> Result<Option<Completed<F>>> {
        let slot = self.retrieve_cursor;
        let waited = self.model.wait_for_slot(slot).await;

        self.slots[slot] = SlotState::Free;
        self.retrieve_cursor = (slot + 1) % self.depth();
        let entry = self.window.pop_front();

        match (waited, entry) {
            (Ok(result), Some((sequence, frame))) => {
                debug!(sequence, slot, "result retrieved");
                Ok(Some(Completed { sequence, result, frame }))
            }
            (Ok(_), None) => Ok(None),
            (Err(err), entry) => {
                warn!(
                    model = %self.model.name(),
                    slot,
                    sequence = entry.map(|(sequence, _)| sequence),
                    error = %err,
                    "request failed, frame dropped"
                );
                Err(err)
            }
        }
    }

    /// Number of slots, which is also the number of calls needed to fill the pipeline.
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Number of submitted frames whose results have not been returned yet.
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| **s == SlotState::Pending).count()
    }

    /// True when every slot has a request in flight, i.e. the next `infer` returns a result.
    pub fn is_primed(&self) -> bool {
        self.in_flight() == self.depth()
    }

    /// Total number of frames accepted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn slot_states(&self) -> &[SlotState] {
        &self.slots
    }

    pub fn model(&self) -> &ModelWrapper<B> {
        &self.model
    }
}
