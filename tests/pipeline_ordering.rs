mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Call, FakeModel, RecordingBackend, fails_on_negative, scalar, times_ten, value};
use slot_pipeline::{
    AsyncPipeline, HostBackend, HostModel, InferOutcome, ModelWrapper, PipelineError, TensorMap,
};

fn recording_pipeline(depth: usize) -> (Arc<RecordingBackend>, AsyncPipeline<RecordingBackend, usize>) {
    let backend = RecordingBackend::new();
    let model = FakeModel::new("scorer", &[1], &[1], fails_on_negative);
    let wrapper = ModelWrapper::new(Arc::clone(&backend), &model, depth, 1).unwrap();
    (backend, AsyncPipeline::new(wrapper, depth).unwrap())
}

#[tokio::test]
async fn first_depth_calls_fill_then_every_call_yields_one_pair() {
    for depth in 1..=5 {
        let (_, mut pipeline) = recording_pipeline(depth);
        for frame in 0..depth {
            let outcome = pipeline.infer(scalar(frame as f32), frame).await.unwrap();
            assert!(matches!(outcome, InferOutcome::Filling), "depth {depth}, call {frame}");
        }
        for frame in depth..depth + 7 {
            let outcome = pipeline.infer(scalar(frame as f32), frame).await.unwrap();
            assert!(outcome.is_ready(), "depth {depth}, call {frame}");
        }
    }
}

#[tokio::test]
async fn results_follow_submission_order() {
    for depth in 1..=4 {
        let (_, mut pipeline) = recording_pipeline(depth);
        let mut returned = Vec::new();
        for frame in 0..(3 * depth + 2) {
            if let Some(done) = pipeline.infer(scalar(frame as f32), frame).await.unwrap().into_completed() {
                assert_eq!(value(&done.result), done.frame as f32 * 10.0);
                assert_eq!(done.sequence, done.frame as u64);
                returned.push(done.frame);
            }
        }
        let expected: Vec<usize> = (0..returned.len()).collect();
        assert_eq!(returned, expected, "depth {depth}");
    }
}

#[tokio::test]
async fn slots_are_never_resubmitted_before_collection() {
    let (backend, mut pipeline) = recording_pipeline(3);
    for frame in 0..20 {
        pipeline.infer(scalar(frame as f32), frame).await.unwrap();
    }
    pipeline.flush().await.unwrap();

    assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    for slot in 0..3 {
        let per_slot: Vec<bool> = backend
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Submit(_, s) if s == slot => Some(true),
                Call::Wait(_, s) if s == slot => Some(false),
                _ => None,
            })
            .collect();
        assert!(per_slot.chunks(2).all(|pair| pair == [true, false]), "slot {slot}: {per_slot:?}");
    }
}

#[tokio::test]
async fn depth_two_end_to_end() {
    let (backend, mut pipeline) = recording_pipeline(2);
    let frames = ["A", "B", "C", "D"];
    let mut outcomes = Vec::new();
    for (i, _) in frames.iter().enumerate() {
        outcomes.push(pipeline.infer(scalar(i as f32), i).await.unwrap().into_completed());
    }

    assert!(outcomes[0].is_none() && outcomes[1].is_none());
    let third = outcomes[2].as_ref().unwrap();
    let fourth = outcomes[3].as_ref().unwrap();
    assert_eq!((frames[third.frame], value(&third.result)), ("A", 0.0));
    assert_eq!((frames[fourth.frame], value(&fourth.result)), ("B", 10.0));

    let scorer = "scorer".to_string();
    assert_eq!(
        backend.calls(),
        vec![
            Call::Load(scorer.clone()),
            Call::Submit(scorer.clone(), 0),
            Call::Submit(scorer.clone(), 1),
            Call::Wait(scorer.clone(), 0),
            Call::Submit(scorer.clone(), 0),
            Call::Wait(scorer.clone(), 1),
            Call::Submit(scorer, 1),
        ]
    );
}

#[tokio::test]
async fn depth_one_returns_the_preceding_frame() {
    let (_, mut pipeline) = recording_pipeline(1);
    assert!(!pipeline.infer(scalar(0.0), 0).await.unwrap().is_ready());
    for frame in 1..6 {
        let done = pipeline.infer(scalar(frame as f32), frame).await.unwrap().into_completed().unwrap();
        assert_eq!(done.frame, frame - 1);
    }
}

#[tokio::test]
async fn backend_failure_propagates_and_drops_only_that_frame() {
    let (_, mut pipeline) = recording_pipeline(2);
    pipeline.infer(scalar(1.0), 1).await.unwrap();
    pipeline.infer(scalar(-1.0), 2).await.unwrap();
    pipeline.infer(scalar(3.0), 3).await.unwrap();

    let err = pipeline.infer(scalar(4.0), 4).await.unwrap_err();
    assert!(matches!(err, PipelineError::Backend(_)));

    // Frame 4 was not accepted; the rest keeps flowing in order.
    let mut seen = Vec::new();
    for frame in 5..8 {
        if let Some(done) = pipeline.infer(scalar(frame as f32), frame).await.unwrap().into_completed() {
            seen.push(done.frame);
        }
    }
    seen.extend(pipeline.flush().await.unwrap().into_iter().map(|c| c.frame));
    assert_eq!(seen, vec![3, 5, 6, 7]);
}

#[tokio::test]
async fn rejected_submission_keeps_the_collected_pair() {
    let (backend, mut pipeline) = recording_pipeline(2);
    pipeline.infer(scalar(0.0), 0).await.unwrap();
    pipeline.infer(scalar(1.0), 1).await.unwrap();

    backend.reject_next_submit();
    assert!(pipeline.infer(scalar(2.0), 2).await.is_err());

    let mut seen = Vec::new();
    for frame in 3..6 {
        let done = pipeline.infer(scalar(frame as f32), frame).await.unwrap().into_completed().unwrap();
        seen.push(done.frame);
    }
    assert_eq!(seen, vec![0, 1, 3]);
    assert!(backend.violations().is_empty());
}

#[tokio::test]
async fn flush_returns_outstanding_pairs_oldest_first() {
    let (_, mut pipeline) = recording_pipeline(4);
    for frame in 0..6 {
        pipeline.infer(scalar(frame as f32), frame).await.unwrap();
    }
    assert!(pipeline.is_primed());
    let drained: Vec<usize> = pipeline.flush().await.unwrap().into_iter().map(|c| c.frame).collect();
    assert_eq!(drained, vec![2, 3, 4, 5]);
    assert_eq!(pipeline.in_flight(), 0);
    assert_eq!(pipeline.submitted(), 6);
}

#[tokio::test]
async fn out_of_order_completion_is_returned_in_order() {
    // Earlier frames take longer, so the workers finish them last.
    let backend = Arc::new(HostBackend::new(4).unwrap());
    let model = HostModel::new("slow_first", |inputs: &TensorMap| {
        let x = inputs.get("x").ok_or("missing x")?;
        let delay = 40u64.saturating_sub(x.sum() as u64 % 4 * 10);
        std::thread::sleep(Duration::from_millis(delay));
        Ok(TensorMap::from([("y".to_string(), x * 10.0)]))
    })
    .with_input("x", [1])
    .with_output("y", [1]);
    let wrapper = ModelWrapper::new(backend, &model, 4, 1).unwrap();
    let mut pipeline = AsyncPipeline::new(wrapper, 4).unwrap();

    let mut returned = Vec::new();
    for frame in 0..12usize {
        if let Some(done) = pipeline.infer(scalar(frame as f32), frame).await.unwrap().into_completed() {
            assert_eq!(value(&done.result), done.frame as f32 * 10.0);
            returned.push(done.frame);
        }
    }
    returned.extend(pipeline.flush().await.unwrap().into_iter().map(|c| c.frame));
    assert_eq!(returned, (0..12).collect::<Vec<_>>());
}

#[tokio::test]
async fn timed_out_infer_leaves_the_pipeline_usable() {
    let backend = Arc::new(HostBackend::new(1).unwrap());
    let model = HostModel::new("slow", |inputs: &TensorMap| {
        std::thread::sleep(Duration::from_millis(100));
        let x = inputs.get("x").ok_or("missing x")?;
        Ok(TensorMap::from([("y".to_string(), x * 10.0)]))
    })
    .with_input("x", [1])
    .with_output("y", [1]);
    let wrapper = ModelWrapper::new(backend, &model, 1, 1).unwrap();
    let mut pipeline = AsyncPipeline::new(wrapper, 1).unwrap();

    assert!(!pipeline.infer(scalar(3.0), 0usize).await.unwrap().is_ready());
    let timed_out = tokio::time::timeout(Duration::from_millis(5), pipeline.infer(scalar(1.0), 1)).await;
    assert!(timed_out.is_err());
    assert_eq!(pipeline.in_flight(), 1);

    // Frame 1 was never submitted; frame 0 is still the oldest outstanding one.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let done = pipeline.infer(scalar(2.0), 2).await.unwrap().into_completed().unwrap();
    assert_eq!((done.sequence, done.frame, value(&done.result)), (0, 0, 30.0));

    let rest: Vec<usize> = pipeline.flush().await.unwrap().into_iter().map(|c| c.frame).collect();
    assert_eq!(rest, vec![2]);
    assert_eq!(pipeline.submitted(), 2);
}

#[tokio::test]
async fn independent_pipelines_share_one_backend() {
    let backend = RecordingBackend::new();
    let a = ModelWrapper::new(Arc::clone(&backend), &FakeModel::new("a", &[1], &[1], times_ten), 2, 1).unwrap();
    let b = ModelWrapper::new(Arc::clone(&backend), &FakeModel::new("b", &[1], &[1], times_ten), 1, 1).unwrap();
    let mut first = AsyncPipeline::new(a, 2).unwrap();
    let mut second = AsyncPipeline::new(b, 1).unwrap();

    for frame in 0..4usize {
        first.infer(scalar(frame as f32), frame).await.unwrap();
        second.infer(scalar(frame as f32), frame).await.unwrap();
    }
    let (first_rest, second_rest) = futures::join!(first.flush(), second.flush());
    assert_eq!(first_rest.unwrap().len(), 2);
    assert_eq!(second_rest.unwrap().len(), 1);
    assert!(backend.violations().is_empty());
}
