//! Disk I/O around the alignment pipeline, built on the `image` crate.
//!
//! Bands are read as single-channel images and scaled into `[0, 1]`
//! regardless of their bit depth. Aligned bands are written back as 16-bit
//! grayscale PNG.

use crate::align::{
    normalize, process_capture, AlignmentReport, Band, Capture, CaptureConfig, CaptureError,
    IoError, NormalizeMode, PipelineError, PipelineOptions, ProcessedCapture, StackError,
};
use crate::core::{BandImage, ImageError};
use ::image::{DynamicImage, ImageBuffer, Luma};
use log::{info, warn};
use std::path::{Path, PathBuf};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: ::image::ImageError,
    },
    #[error("failed to write {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: ::image::ImageError,
    },
    #[error(transparent)]
    Buffer(#[from] ImageError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Stack(#[from] StackError),
}

/// Convert a decoded image into a band, averaging color channels.
pub fn band_from_image(img: &DynamicImage) -> Result<BandImage, ImageError> {
    let luma = img.to_luma32f();
    let (width, height) = luma.dimensions();
    BandImage::new(width as usize, height as usize, luma.into_raw())
}

/// Read one band image from disk.
pub fn load_band(path: impl AsRef<Path>) -> Result<BandImage, LoadError> {
    let path = path.as_ref();
    let img = ::image::open(path).map_err(|source| LoadError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(band_from_image(&img)?)
}

/// Write a band as 16-bit grayscale PNG; values are clamped to `[0, 1]`.
pub fn save_band(band: &BandImage, path: impl AsRef<Path>) -> Result<(), LoadError> {
    let path = path.as_ref();
    let data: Vec<u16> = band
        .data
        .iter()
        .map(|&v| {
            let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
            (v * u16::MAX as f32).round() as u16
        })
        .collect();
    let out: ImageBuffer<Luma<u16>, Vec<u16>> =
        ImageBuffer::from_raw(band.width as u32, band.height as u32, data).ok_or(
            ImageError::BufferSize {
                width: band.width,
                height: band.height,
                expected: band.width * band.height,
                got: band.data.len(),
            },
        )?;
    out.save(path).map_err(|source| LoadError::Encode {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a capture config; relative paths resolve against its directory.
pub fn load_config(path: impl AsRef<Path>) -> Result<CaptureConfig, LoadError> {
    Ok(CaptureConfig::load_json(path)?)
}

/// Read every band named in `config`.
pub fn load_capture(config: &CaptureConfig) -> Result<Capture, LoadError> {
    let mut bands = Vec::with_capacity(config.bands.len());
    for src in &config.bands {
        let image = load_band(&src.path)?;
        let mut band = Band::new(src.index, image, src.lens);
        if let Some(name) = &src.name {
            band = band.with_name(name.clone());
        }
        info!(
            "loaded band {} ({}x{}) from {}",
            band.label(),
            band.image.width,
            band.image.height,
            src.path.display()
        );
        bands.push(band);
    }
    Ok(Capture::new(bands)?)
}

/// Result of running the pipeline on one configured capture.
#[derive(Debug)]
pub struct ConfigRun {
    pub processed: ProcessedCapture,
    /// Serializable summary including the crop.
    pub report: AlignmentReport,
}

/// Load, align, crop and resample the capture described by `config`.
///
/// When `config.cached_report` names a readable report it is used for bands
/// that fail to register.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(bands = config.bands.len()))
)]
pub fn align_config(config: &CaptureConfig) -> Result<ConfigRun, LoadError> {
    let capture = load_capture(config)?;
    let fallback = match &config.cached_report {
        Some(path) => match AlignmentReport::load_json(path) {
            Ok(report) => match report.to_resolved() {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    warn!("cached report {} not usable: {e}", path.display());
                    None
                }
            },
            Err(e) => {
                warn!("cached report {} not readable: {e}", path.display());
                None
            }
        },
        None => None,
    };
    let options = PipelineOptions {
        alignment: config.alignment.clone(),
        resample: config.resample,
        fallback,
        ..PipelineOptions::default()
    };
    let processed = process_capture(&capture, &options)?;
    let report = AlignmentReport::from_alignment(&processed.alignment).with_crop(processed.crop);
    Ok(ConfigRun { processed, report })
}

/// Write every band of the aligned stack into `dir` as `band_<index>.png`,
/// each stretched to its own range.
pub fn save_aligned_bands(
    processed: &ProcessedCapture,
    dir: impl AsRef<Path>,
) -> Result<Vec<PathBuf>, LoadError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(IoError::from)?;
    let stretched = normalize(&processed.stack, NormalizeMode::PerBand);
    (0..stretched.bands)
        .map(|b| {
            let path = dir.join(format!("band_{b}.png"));
            save_band(&stretched.band(b)?, &path)?;
            Ok(path)
        })
        .collect()
}
