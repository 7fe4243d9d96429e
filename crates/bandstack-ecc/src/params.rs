use bandstack_core::MotionModel;
use serde::{Deserialize, Serialize};

/// Smallest short side (in pixels) a pyramid level may have.
pub const MIN_LEVEL_SIDE: usize = 16;

/// Width in pixels per pyramid level used by the automatic level count.
const AUTO_LEVEL_WIDTH: f64 = 1280.0 / 3.0;

/// Configuration for pairwise ECC registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EccParams {
    /// Motion model to estimate.
    pub motion: MotionModel,
    /// Iteration cap per pyramid level.
    pub max_iterations: usize,
    /// Stop a level once the parameter update norm falls below this value.
    pub convergence_threshold: f64,
    /// Number of coarser levels below full resolution.
    ///
    /// `None` picks `floor(width / 426.67) - 1`, clamped at zero.
    pub pyramid_levels: Option<usize>,
    /// Register Sobel edge magnitudes instead of raw intensities.
    ///
    /// Bands of different wavelengths often invert contrast; their edges
    /// still line up.
    pub edge_filter: bool,
    /// Texture score below which an input is reported as
    /// [`RegistrationWarning::InsufficientFeatures`](crate::RegistrationWarning).
    pub min_texture: f64,
}

impl Default for EccParams {
    fn default() -> Self {
        Self {
            motion: MotionModel::Affine,
            max_iterations: 200,
            convergence_threshold: 1e-4,
            pyramid_levels: None,
            edge_filter: true,
            min_texture: 1e-3,
        }
    }
}

impl EccParams {
    pub fn with_motion(mut self, motion: MotionModel) -> Self {
        self.motion = motion;
        self
    }

    pub fn with_pyramid_levels(mut self, levels: usize) -> Self {
        self.pyramid_levels = Some(levels);
        self
    }

    pub fn with_edge_filter(mut self, on: bool) -> Self {
        self.edge_filter = on;
        self
    }

    /// Number of coarser levels to build for an image of this size.
    pub fn levels_for(&self, width: usize, height: usize) -> usize {
        let requested = self
            .pyramid_levels
            .unwrap_or_else(|| ((width as f64 / AUTO_LEVEL_WIDTH).floor() as usize).saturating_sub(1));
        let mut levels = 0;
        let mut side = width.min(height);
        while levels < requested && side / 2 >= MIN_LEVEL_SIDE {
            side /= 2;
            levels += 1;
        }
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_levels_follow_width() {
        let p = EccParams::default();
        assert_eq!(p.levels_for(100, 100), 0);
        assert_eq!(p.levels_for(853, 600), 0);
        assert_eq!(p.levels_for(1300, 960), 2);
        assert_eq!(p.levels_for(2064, 1544), 3);
    }

    #[test]
    fn explicit_levels_are_limited_by_image_size() {
        let p = EccParams::default().with_pyramid_levels(5);
        assert_eq!(p.levels_for(128, 64), 2);
        assert_eq!(p.levels_for(20, 20), 0);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let p: EccParams = serde_json::from_str(r#"{"motion":"translation"}"#).unwrap();
        assert_eq!(p.motion, MotionModel::Translation);
        assert_eq!(p.max_iterations, 200);
        assert!(p.edge_filter);
    }
}
