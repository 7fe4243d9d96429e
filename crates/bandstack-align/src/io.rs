//! JSON capture configuration and alignment report helpers.

use crate::{
    AlignError, AlignmentConfig, AlignmentPair, BandReport, CaptureAlignment, CropRect,
    ResampleOptions, ResolvedAlignment,
};
use bandstack_core::{LensModel, WarpTransform};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, IoError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), IoError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Where to find one band on disk and how its lens distorts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSource {
    pub index: usize,
    pub path: PathBuf,
    pub lens: LensModel,
    #[serde(default)]
    pub name: Option<String>,
}

/// Configuration of one capture run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub bands: Vec<BandSource>,
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub resample: ResampleOptions,
    /// Previously accepted alignment used for failed bands.
    #[serde(default)]
    pub cached_report: Option<PathBuf>,
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl CaptureConfig {
    /// Load a JSON config from disk. Relative band paths are resolved against
    /// the config file's directory.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let mut cfg: Self = load_json(path)?;
        if let Some(dir) = path.parent() {
            for band in &mut cfg.bands {
                if band.path.is_relative() {
                    band.path = dir.join(&band.path);
                }
            }
            if let Some(cached) = cfg.cached_report.as_mut().filter(|p| p.is_relative()) {
                *cached = dir.join(&*cached);
            }
        }
        Ok(cfg)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        write_json(self, path.as_ref())
    }

    /// Resolve the output report path.
    pub fn report_path(&self) -> PathBuf {
        self.report_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("alignment_report.json"))
    }
}

/// Serializable record of a band that could not be aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub band: usize,
    pub anchor: usize,
    pub message: String,
}

/// Alignment outcome of one capture, as written to disk.
///
/// Transforms are nine row-major numbers, `null` for unresolved bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub reference: usize,
    pub transforms: Vec<Option<WarpTransform>>,
    pub pairs: Vec<AlignmentPair>,
    #[serde(default)]
    pub crop: Option<CropRect>,
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
    #[serde(default)]
    pub bands: Vec<BandReport>,
}

impl AlignmentReport {
    pub fn from_alignment(alignment: &CaptureAlignment) -> Self {
        Self {
            reference: alignment.reference,
            transforms: alignment.transforms.clone(),
            pairs: alignment.pairs.clone(),
            crop: None,
            failures: alignment
                .failures
                .iter()
                .map(|f| FailureRecord {
                    band: f.band,
                    anchor: f.anchor,
                    message: f.kind.to_string(),
                })
                .collect(),
            bands: alignment.reports.clone(),
        }
    }

    pub fn from_resolved(resolved: &ResolvedAlignment) -> Self {
        Self {
            reference: resolved.reference(),
            transforms: resolved.transforms().iter().copied().map(Some).collect(),
            pairs: resolved.pairs().to_vec(),
            crop: None,
            failures: Vec::new(),
            bands: Vec::new(),
        }
    }

    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Rebuild a validated alignment; fails if any band is unresolved.
    pub fn to_resolved(&self) -> Result<ResolvedAlignment, AlignError> {
        let missing: Vec<usize> = self
            .transforms
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_none())
            .map(|(i, _)| i)
            .collect();
        if !missing.is_empty() {
            return Err(AlignError::UnresolvedBands(missing));
        }
        let transforms = self.transforms.iter().flatten().copied().collect();
        ResolvedAlignment::from_cached(self.reference, transforms, self.pairs.clone())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        load_json(path.as_ref())
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        write_json(self, path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Topology;

    #[test]
    fn config_round_trips_and_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CaptureConfig {
            bands: vec![BandSource {
                index: 0,
                path: PathBuf::from("b0.png"),
                lens: LensModel::pinhole(10, 10, 8.0).with_radial(-0.1, 0.0, 0.0),
                name: Some("Blue".into()),
            }],
            alignment: AlignmentConfig::default().with_topology(Topology::StarWithChainFallback),
            resample: ResampleOptions::default(),
            cached_report: None,
            report_path: None,
        };
        let path = dir.path().join("capture.json");
        cfg.write_json(&path).unwrap();
        let back = CaptureConfig::load_json(&path).unwrap();
        assert_eq!(back.bands[0].path, dir.path().join("b0.png"));
        assert_eq!(back.alignment, cfg.alignment);
        assert_eq!(back.report_path(), PathBuf::from("alignment_report.json"));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let raw = r#"{"bands":[{"index":0,"path":"/a.png","lens":{"fx":1.0,"fy":1.0,"cx":0.0,"cy":0.0}}]}"#;
        let cfg: CaptureConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.alignment, AlignmentConfig::default());
        assert!(cfg.bands[0].lens.is_identity());
    }

    #[test]
    fn report_round_trips_to_resolved_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = ResolvedAlignment::from_transforms(
            1,
            vec![
                WarpTransform::translation(1.0, -2.0),
                WarpTransform::identity(),
            ],
        )
        .unwrap();
        let report = AlignmentReport::from_resolved(&resolved).with_crop(CropRect::new(2, 3, 10, 11));
        let path = dir.path().join("report.json");
        report.write_json(&path).unwrap();
        let back = AlignmentReport::load_json(&path).unwrap();
        assert_eq!(back.crop, Some(CropRect::new(2, 3, 10, 11)));
        assert_eq!(back.to_resolved().unwrap(), resolved);
    }

    #[test]
    fn report_with_unresolved_band_cannot_be_reused() {
        let report = AlignmentReport {
            reference: 0,
            transforms: vec![Some(WarpTransform::identity()), None],
            pairs: vec![],
            crop: None,
            failures: vec![],
            bands: vec![],
        };
        assert_eq!(
            report.to_resolved(),
            Err(AlignError::UnresolvedBands(vec![1]))
        );
    }
}
