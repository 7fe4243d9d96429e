//! Core types for multi-band capture alignment.
//!
//! Band images with validity masks, bilinear sampling, the small filter set
//! used by registration, the Brown-Conrady lens model and the reference-to-band
//! transform model. No registration logic lives here.

mod distortion;
pub mod filters;
mod image;
mod logger;
mod rectify;
pub mod synthetic;
mod transform;

pub use distortion::LensModel;
pub use image::{
    sample_bilinear, sample_bilinear_clamped, sample_bilinear_masked, BandImage, BandImageView,
    ImageError, ImageSize, Mask,
};
pub use rectify::{remap, undistort_image, warp_image};
pub use transform::{compose, BandMapping, MotionModel, TransformError, WarpTransform};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, LOG_ENV};
