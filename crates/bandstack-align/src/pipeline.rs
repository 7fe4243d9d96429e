use crate::{
    align_capture_with_budget, aligned_capture, find_crop_bounds_sized, AlignError, AlignedStack,
    AlignmentConfig, Capture, CaptureAlignment, CropError, CropRect, ResampleError,
    ResampleOptions, ResolvedAlignment, Strictness,
};
use bandstack_ecc::RegistrationBudget;
use log::{error, info};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("alignment failed: {0}")]
    Align(#[from] AlignError),
    #[error("crop failed: {0}")]
    Crop(#[from] CropError),
    #[error("resampling failed: {0}")]
    Resample(#[from] ResampleError),
}

/// Everything produced for one capture.
#[derive(Clone, Debug)]
pub struct ProcessedCapture {
    /// Raw alignment, including per-band failures and reports.
    pub alignment: CaptureAlignment,
    pub resolved: ResolvedAlignment,
    pub crop: CropRect,
    pub stack: AlignedStack,
}

/// Inputs that stay fixed across the captures of a flight.
#[derive(Clone, Debug, Default)]
pub struct PipelineOptions {
    pub alignment: AlignmentConfig,
    pub resample: ResampleOptions,
    /// Known-good alignment substituted for bands that fail.
    pub fallback: Option<ResolvedAlignment>,
    /// Drawn on by every capture processed with these options.
    pub budget: RegistrationBudget,
}

/// Align, resolve, crop and resample one capture.
pub fn process_capture(
    capture: &Capture,
    options: &PipelineOptions,
) -> Result<ProcessedCapture, PipelineError> {
    let alignment = align_capture_with_budget(capture, &options.alignment, &options.budget)?;
    let resolved = match (&options.fallback, options.alignment.strictness) {
        (Some(cached), _) if !alignment.is_complete() => {
            alignment.clone().resolve_with_fallback(cached)?
        }
        (_, strictness) => alignment.clone().resolve(strictness)?,
    };
    let crop = find_crop_bounds_sized(
        capture.bands()[resolved.reference()].size(),
        &capture.sizes(),
        resolved.transforms(),
        &capture.lenses(),
    )?;
    let stack = aligned_capture(capture, &resolved, &crop, &options.resample)?;
    info!(
        "capture aligned: crop {}x{} at ({}, {})",
        crop.width, crop.height, crop.left, crop.top
    );
    Ok(ProcessedCapture {
        alignment,
        resolved,
        crop,
        stack,
    })
}

/// Process many captures, logging failures and continuing.
///
/// Returns one entry per input capture, `None` where processing failed.
pub fn process_captures(
    captures: &[Capture],
    options: &PipelineOptions,
) -> Vec<Option<ProcessedCapture>> {
    captures
        .iter()
        .enumerate()
        .map(|(i, capture)| match process_capture(capture, options) {
            Ok(done) => Some(done),
            Err(e) => {
                error!("capture {i}: {e}");
                None
            }
        })
        .collect()
}

impl PipelineOptions {
    pub fn new(alignment: AlignmentConfig) -> Self {
        Self {
            alignment,
            ..Self::default()
        }
    }

    pub fn lenient(mut self) -> Self {
        self.alignment.strictness = Strictness::Lenient;
        self
    }
}
