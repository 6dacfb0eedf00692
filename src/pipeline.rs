//! Decode -> transform -> encode pipeline
//!
//! The transform step is injected, so whatever edits the pixels (a resize
//! here, an external enhancer elsewhere) never becomes codec state.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::textures::{ContainerKind, ContainerMetadata, PixelBuffer, TextureCodec};

/// A pixel edit applied between decode and encode
pub trait ImageTransform: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, pixels: PixelBuffer, metadata: &ContainerMetadata) -> Result<PixelBuffer>;
}

/// Pass pixels through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl ImageTransform for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn apply(&self, pixels: PixelBuffer, _metadata: &ContainerMetadata) -> Result<PixelBuffer> {
        Ok(pixels)
    }
}

/// How a [`Resize`] picks its output size
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeTarget {
    Exact { width: u32, height: u32 },
    Scale(f32),
}

/// Lanczos3 resize
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resize {
    pub target: ResizeTarget,
}

impl Resize {
    pub fn exact(width: u32, height: u32) -> Self {
        Self {
            target: ResizeTarget::Exact { width, height },
        }
    }

    pub fn scale(factor: f32) -> Self {
        Self {
            target: ResizeTarget::Scale(factor),
        }
    }

    /// Output dimensions for an input of `width` x `height`, never below 1x1
    pub fn dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        match self.target {
            ResizeTarget::Exact { width, height } => (width.max(1), height.max(1)),
            ResizeTarget::Scale(factor) => (
                ((width as f32 * factor).round() as u32).max(1),
                ((height as f32 * factor).round() as u32).max(1),
            ),
        }
    }
}

impl ImageTransform for Resize {
    fn name(&self) -> &str {
        "resize"
    }

    fn apply(&self, pixels: PixelBuffer, _metadata: &ContainerMetadata) -> Result<PixelBuffer> {
        let (width, height) = self.dimensions(pixels.width(), pixels.height());
        if (width, height) == (pixels.width(), pixels.height()) {
            return Ok(pixels);
        }

        let resized = pixels
            .to_dynamic_image()
            .resize_exact(width, height, FilterType::Lanczos3);
        Ok(PixelBuffer::from_dynamic_image(resized))
    }
}

/// Decode `input`, run `transform`, encode into `target` at `output`
pub fn process_file(
    codec: &TextureCodec,
    transform: &dyn ImageTransform,
    input: &Path,
    target: ContainerKind,
    output: &Path,
) -> Result<PathBuf> {
    let (pixels, metadata) = codec
        .decode(input)
        .with_context(|| format!("Failed to decode {}", input.display()))?;

    let pixels = transform
        .apply(pixels, &metadata)
        .with_context(|| format!("{} transform failed on {}", transform.name(), input.display()))?;

    codec
        .encode(&pixels, &metadata, target, output)
        .with_context(|| format!("Failed to encode {}", output.display()))
}

/// One unit of batch work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub target: ContainerKind,
}

/// Run jobs in parallel; results come back in job order.
///
/// `on_done` is called once per finished job with the running count.
pub fn process_batch<F>(
    codec: &TextureCodec,
    transform: &dyn ImageTransform,
    jobs: &[BatchJob],
    on_done: F,
) -> Vec<Result<PathBuf>>
where
    F: Fn(usize) + Sync,
{
    let total = jobs.len();
    let completed = AtomicUsize::new(0);
    info!("Processing {} textures with {}", total, transform.name());

    let results: Vec<Result<PathBuf>> = jobs
        .par_iter()
        .map(|job| {
            let result = process_file(codec, transform, &job.input, job.target, &job.output);
            if let Err(e) = &result {
                warn!("{}: {:#}", job.input.display(), e);
            }
            on_done(completed.fetch_add(1, Ordering::Relaxed) + 1);
            result
        })
        .collect();

    let failed = results.iter().filter(|r| r.is_err()).count();
    info!("Processed {} textures ({} failed)", total - failed, failed);
    results
}
