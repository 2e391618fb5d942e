use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use clap::Parser;
use image::{Rgb, RgbImage};
use ndarray::{Array2, ArrayView, Axis, IxDyn};
use slot_pipeline::core_modules::preprocess::preprocess_frame;
use slot_pipeline::{
    AsyncPipeline, HostBackend, HostModel, InferOutcome, ModelWrapper, PipelineConfig, StagedPipeline, Tensor,
    TensorMap,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EMBEDDING_DIM: usize = 512;
const NUM_CLASSES: usize = 8;

/// Streams frames through the overlapped pipeline, then classifies the last clip
/// with the encoder/decoder chain.
#[derive(Debug, Parser)]
#[command(name = "pipeline_runner")]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory of images to use as frames. Synthetic frames are generated when omitted.
    #[arg(long)]
    images: Option<PathBuf>,
    /// Number of synthetic frames.
    #[arg(long, default_value_t = 64)]
    frames: usize,
    /// Frames per clip fed to the staged pipeline.
    #[arg(long, default_value_t = 16)]
    clip_len: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    if args.clip_len == 0 {
        bail!("--clip-len must be at least 1");
    }
    let config = match &args.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let size = config.preprocess.input_size;

    let backend = Arc::new(match config.backend.workers {
        Some(workers) => HostBackend::new(workers)?,
        None => HostBackend::with_default_workers()?,
    });

    // --- 2. Frame Source ---
    let frames = match &args.images {
        Some(dir) => load_frames(dir)?,
        None => (0..args.frames).map(synthetic_frame).collect(),
    };
    if frames.is_empty() {
        bail!("no frames to process");
    }

    // --- 3. Overlapped Per-Frame Encoding ---
    let encoder = frame_encoder(size);
    let wrapper = ModelWrapper::new(
        Arc::clone(&backend),
        &encoder,
        config.pipeline.num_requests,
        config.pipeline.batch_size,
    )?;
    let mut pipeline = AsyncPipeline::new(wrapper, config.pipeline.num_requests)?;

    let started = Instant::now();
    let mut clip: VecDeque<Tensor> = VecDeque::with_capacity(args.clip_len);
    let mut completed = 0usize;
    for (frame_id, frame) in frames.iter().enumerate() {
        let input = preprocess_frame(frame, size);
        if clip.len() == args.clip_len {
            clip.pop_front();
        }
        clip.push_back(input.clone());

        match pipeline.infer(input, (frame_id, Instant::now())).await? {
            InferOutcome::Filling => {}
            InferOutcome::Ready(done) => {
                completed += 1;
                report(done.sequence, done.frame, &done.result);
            }
        }
    }
    for done in pipeline.flush().await? {
        completed += 1;
        report(done.sequence, done.frame, &done.result);
    }
    let elapsed = started.elapsed();
    info!(
        frames = completed,
        depth = pipeline.depth(),
        elapsed_ms = elapsed.as_millis() as u64,
        fps = completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        "stream finished"
    );

    // --- 4. Clip Classification ---
    if clip.len() < args.clip_len {
        warn!(available = clip.len(), needed = args.clip_len, "not enough frames for a clip");
        return Ok(());
    }
    let clip_encoder = ModelWrapper::new(Arc::clone(&backend), &encoder, 1, args.clip_len)?;
    let decoder = ModelWrapper::new(Arc::clone(&backend), &clip_classifier(args.clip_len), 1, 1)?;
    let staged = StagedPipeline::new(clip_encoder, Some(decoder))?;

    let views: Vec<ArrayView<f32, IxDyn>> = clip.iter().map(|t| t.view()).collect();
    let clip_tensor = ndarray::concatenate(Axis(0), &views)?;
    if let Some(scores) = staged.infer(clip_tensor)? {
        let best = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(class, score)| (class, *score));
        info!(?best, "clip classified");
    }

    Ok(())
}

fn report(sequence: u64, (frame_id, submitted_at): (usize, Instant), embedding: &Tensor) {
    info!(
        sequence,
        frame_id,
        latency_us = submitted_at.elapsed().as_micros() as u64,
        norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt(),
        "frame encoded"
    );
}

fn load_frames(dir: &Path) -> anyhow::Result<Vec<RgbImage>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        match image::open(&path) {
            Ok(img) => frames.push(img.to_rgb8()),
            Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable file"),
        }
    }
    Ok(frames)
}

fn synthetic_frame(index: usize) -> RgbImage {
    let shift = (index * 7) as u32;
    RgbImage::from_fn(320, 240, |x, y| Rgb([((x + shift) % 256) as u8, ((y + shift) % 256) as u8, (index % 256) as u8]))
}

/// Per-frame encoder: channel means spread across the embedding.
fn frame_encoder(size: u32) -> HostModel {
    let size = size as usize;
    HostModel::new("frame_encoder", |inputs: &TensorMap| {
        let data = inputs.get("data").ok_or("missing data")?;
        let batch = data.shape().first().copied().unwrap_or(1);
        let mut embedding = Array2::<f32>::zeros((batch, EMBEDDING_DIM));
        for (b, sample) in data.axis_iter(Axis(0)).enumerate() {
            let means: Vec<f32> = sample
                .axis_iter(Axis(0))
                .map(|channel| channel.mean().unwrap_or(0.0))
                .collect();
            for (j, cell) in embedding.row_mut(b).iter_mut().enumerate() {
                *cell = means[j % means.len().max(1)] * (1.0 + j as f32 / EMBEDDING_DIM as f32);
            }
        }
        Ok(TensorMap::from([("embedding".to_string(), embedding.into_dyn())]))
    })
    .with_input("data", [1, 3, size, size])
    .with_output("embedding", [1, EMBEDDING_DIM])
}

/// Clip decoder: averages embeddings over time and folds them into class scores.
fn clip_classifier(clip_len: usize) -> HostModel {
    HostModel::new("clip_classifier", |inputs: &TensorMap| {
        let sequence = inputs.get("sequence").ok_or("missing sequence")?;
        let pooled = sequence
            .mean_axis(Axis(1))
            .ok_or("empty sequence")?;
        let mut scores = Array2::<f32>::zeros((1, NUM_CLASSES));
        for (j, v) in pooled.iter().enumerate() {
            scores[[0, j % NUM_CLASSES]] += v / EMBEDDING_DIM as f32;
        }
        Ok(TensorMap::from([("scores".to_string(), scores.into_dyn())]))
    })
    .with_input("sequence", [1, clip_len, EMBEDDING_DIM])
    .with_output("scores", [1, NUM_CLASSES])
}
