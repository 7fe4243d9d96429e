use crate::ecc::{LevelReport, LevelSolver};
use crate::params::MIN_LEVEL_SIDE;
use crate::{EccParams, ImagePyramid, ImageRole, RegistrationError, RegistrationWarning};
use bandstack_core::filters::{edge_magnitude, normalize_min_max, texture_score};
use bandstack_core::{undistort_image, BandImage, ImageSize, LensModel, WarpTransform};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Limits on registration work, checked between pyramid levels.
///
/// Every registration run against one budget, or against any of its clones,
/// draws from the same iteration count.
#[derive(Clone, Debug, Default)]
pub struct RegistrationBudget {
    /// Total parameter updates allowed across all levels of all runs.
    pub max_total_iterations: Option<usize>,
    pub deadline: Option<Instant>,
    /// Cooperative cancellation flag shared with the caller.
    pub cancel: Option<Arc<AtomicBool>>,
    spent: Arc<AtomicUsize>,
}

impl RegistrationBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_max_total_iterations(mut self, n: usize) -> Self {
        self.max_total_iterations = Some(n);
        self
    }

    /// Parameter updates charged so far.
    pub fn iterations_spent(&self) -> usize {
        self.spent.load(Ordering::Relaxed)
    }

    fn charge(&self, iterations: usize) {
        self.spent.fetch_add(iterations, Ordering::Relaxed);
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_total_iterations
            .is_some_and(|max| self.iterations_spent() >= max)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
            || self
                .cancel
                .as_ref()
                .is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// Result of a successful registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    /// Reference-to-target transform in undistorted full-resolution pixels.
    pub transform: WarpTransform,
    /// Whether the finest level stopped on the convergence threshold.
    pub converged: bool,
    /// Correlation coefficient at the finest level.
    pub correlation: f64,
    /// Per-level reports, coarsest first.
    pub levels: Vec<LevelReport>,
    pub warnings: Vec<RegistrationWarning>,
}

impl RegistrationOutcome {
    pub fn total_iterations(&self) -> usize {
        self.levels.iter().map(|l| l.iterations).sum()
    }
}

/// A band undistorted, normalized, optionally edge-filtered and decomposed
/// into a pyramid. Reusable across several registrations.
#[derive(Clone, Debug)]
pub struct PreparedBand {
    pyramid: ImagePyramid,
    size: ImageSize,
    texture: f64,
}

impl PreparedBand {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(image, lens, params), fields(width = image.width, height = image.height))
    )]
    pub fn prepare(
        image: &BandImage,
        lens: &LensModel,
        params: &EccParams,
    ) -> Result<Self, RegistrationError> {
        let (w, h) = (image.width, image.height);
        if w < MIN_LEVEL_SIDE || h < MIN_LEVEL_SIDE {
            return Err(RegistrationError::ImageTooSmall {
                width: w,
                height: h,
                min: MIN_LEVEL_SIDE,
            });
        }

        let (undistorted, mut mask) = undistort_image(image, lens);
        let normalized = normalize_min_max(&undistorted, Some(&mask));
        let texture = texture_score(&normalized, Some(&mask));

        let working = if params.edge_filter {
            // Sobel (radius 1) followed by a 3-tap blur (radius 1).
            mask = mask.eroded().eroded();
            normalize_min_max(&edge_magnitude(&normalized), Some(&mask))
        } else {
            normalized
        };

        let levels = params.levels_for(w, h);
        Ok(Self {
            pyramid: ImagePyramid::build(working, mask, levels),
            size: ImageSize::new(w, h),
            texture,
        })
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Mean gradient magnitude over intensity range of the normalized band.
    pub fn texture_score(&self) -> f64 {
        self.texture
    }

    pub fn pyramid(&self) -> &ImagePyramid {
        &self.pyramid
    }
}

/// Estimate the transform mapping `reference` pixels onto `target` pixels.
///
/// Both images are undistorted with their own lens first; the transform acts
/// between the undistorted frames.
pub fn register(
    reference: &BandImage,
    target: &BandImage,
    reference_lens: &LensModel,
    target_lens: &LensModel,
    initial: Option<WarpTransform>,
    params: &EccParams,
) -> Result<RegistrationOutcome, RegistrationError> {
    register_with_budget(
        reference,
        target,
        reference_lens,
        target_lens,
        initial,
        params,
        &RegistrationBudget::unlimited(),
    )
}

/// [`register`] with iteration, time and cancellation limits.
pub fn register_with_budget(
    reference: &BandImage,
    target: &BandImage,
    reference_lens: &LensModel,
    target_lens: &LensModel,
    initial: Option<WarpTransform>,
    params: &EccParams,
    budget: &RegistrationBudget,
) -> Result<RegistrationOutcome, RegistrationError> {
    let reference = PreparedBand::prepare(reference, reference_lens, params)?;
    let target = PreparedBand::prepare(target, target_lens, params)?;
    register_prepared(&reference, &target, initial, params, budget)
}

fn texture_warnings(
    reference: &PreparedBand,
    target: &PreparedBand,
    threshold: f64,
) -> Vec<RegistrationWarning> {
    [
        (ImageRole::Reference, reference.texture),
        (ImageRole::Target, target.texture),
    ]
    .into_iter()
    .filter(|(_, score)| *score < threshold)
    .map(|(role, score)| RegistrationWarning::InsufficientFeatures {
        role,
        score,
        threshold,
    })
    .collect()
}

/// Coarse-to-fine ECC on already prepared bands.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(motion = ?params.motion))
)]
pub fn register_prepared(
    reference: &PreparedBand,
    target: &PreparedBand,
    initial: Option<WarpTransform>,
    params: &EccParams,
    budget: &RegistrationBudget,
) -> Result<RegistrationOutcome, RegistrationError> {
    let warnings = texture_warnings(reference, target, params.min_texture);
    for w in &warnings {
        warn!("{w}");
    }

    let coarsest = reference
        .pyramid
        .num_levels()
        .min(target.pyramid.num_levels())
        - 1;
    let seed = initial
        .unwrap_or_default()
        .projected(params.motion);
    let mut current = seed.rescaled(coarsest as i32);

    let mut levels = Vec::with_capacity(coarsest + 1);
    for level in (0..=coarsest).rev() {
        if budget.is_exhausted() {
            return Err(RegistrationError::BudgetExhausted {
                completed_levels: levels.len(),
            });
        }
        let solver = LevelSolver::new(
            reference.pyramid.level(level),
            target.pyramid.level(level),
            params.motion,
            params.max_iterations,
            params.convergence_threshold,
        );
        let solution = solver
            .solve(level, current)
            .map_err(|reason| RegistrationError::Diverged { level, reason })?;
        debug!(
            "level {level} ({}x{}): {} iterations, rho {:.4} -> {:.4}{}",
            solution.report.width,
            solution.report.height,
            solution.report.iterations,
            solution.report.seed_correlation,
            solution.report.correlation,
            if solution.report.converged { "" } else { " (not converged)" }
        );
        budget.charge(solution.report.iterations);
        current = if level > 0 {
            solution.transform.to_finer()
        } else {
            solution.transform
        };
        levels.push(solution.report);
    }

    let finest = levels.last();
    Ok(RegistrationOutcome {
        transform: current,
        converged: finest.is_some_and(|l| l.converged),
        correlation: finest.map_or(f64::NAN, |l| l.correlation),
        levels,
        warnings,
    })
}
