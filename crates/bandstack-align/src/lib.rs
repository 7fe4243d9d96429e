//! Multi-band capture alignment.
//!
//! Registers every band of a capture into the frame of a reference band,
//! computes the rectangle that all bands cover, and resamples the capture
//! into one aligned stack.
//!
//! ```no_run
//! use bandstack_align::{
//!     align_capture, aligned_capture, find_crop_bounds, AlignmentConfig, Capture,
//!     ResampleOptions, Strictness,
//! };
//!
//! # fn run(capture: Capture) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AlignmentConfig::default().with_reference(2);
//! let resolved = align_capture(&capture, &config)?.resolve(Strictness::Strict)?;
//! let size = capture.bands()[2].size();
//! let crop = find_crop_bounds(size, resolved.transforms(), &capture.lenses())?;
//! let stack = aligned_capture(&capture, &resolved, &crop, &ResampleOptions::default())?;
//! println!("{}x{}x{}", stack.rows, stack.cols, stack.bands);
//! # Ok(())
//! # }
//! ```

mod capture;
mod crop;
mod io;
mod orchestrator;
mod pipeline;
mod resample;
mod stack;

pub use capture::{Band, Capture, CaptureError};
pub use crop::{find_crop_bounds, find_crop_bounds_sized, CropError, CropRect};
pub use io::{AlignmentReport, BandSource, CaptureConfig, FailureRecord, IoError};
pub use orchestrator::{
    align_capture, align_capture_with_budget, validate_pairs, AlignError, AlignmentConfig,
    AlignmentPair, BandFailure, BandFailureKind, BandReport, CaptureAlignment, PairError,
    ResolvedAlignment, Strictness, Topology,
};
pub use pipeline::{
    process_capture, process_captures, PipelineError, PipelineOptions, ProcessedCapture,
};
pub use resample::{aligned_capture, EdgePolicy, ResampleError, ResampleOptions};
pub use stack::{normalize, normalized_difference, AlignedStack, NormalizeMode, StackError};

/// True when registration waves and resampling run on the rayon pool.
pub const PARALLEL: bool = cfg!(feature = "rayon");
