//! Facade crate for the `bandstack-*` workspace.
//!
//! This crate provides:
//! - re-exports of the core types, the ECC registration solver and the
//!   capture alignment pipeline
//! - (feature `image`) loading of band images and JSON capture configs from
//!   disk, and writing aligned bands back out as 16-bit PNG
//!
//! ## Quickstart
//!
//! ```no_run
//! use bandstack::load::{align_config, load_config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("capture.json")?;
//! let run = align_config(&config)?;
//! println!("crop: {:?}", run.processed.crop);
//! run.report.write_json(config.report_path())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `bandstack::core`: band images, masks, lens model, warp transforms.
//! - `bandstack::ecc`: coarse-to-fine ECC registration of one band pair.
//! - `bandstack::align`: capture alignment, crop bounds, resampling.
//! - `bandstack::load` (feature `image`): disk I/O around the pipeline.

pub use bandstack_align as align;
pub use bandstack_core as core;
pub use bandstack_ecc as ecc;

pub use bandstack_align::{
    align_capture, aligned_capture, find_crop_bounds, process_capture, AlignedStack,
    AlignmentConfig, Capture, CropRect, ResolvedAlignment,
};
pub use bandstack_core::{BandImage, LensModel, MotionModel, WarpTransform};
pub use bandstack_ecc::{register, EccParams};

#[cfg(feature = "image")]
pub mod load;
