//! Single-resolution ECC maximization (Evangelidis & Psarakis, 2008).
//!
//! Per iteration, with `t` the zero-mean template and `i` the zero-mean
//! warped target over the common valid pixels and `J` the steepest-descent
//! images:
//!
//! ```text
//! H  = Σ J Jᵀ,   ip = Σ J i,   tp = Σ J t
//! λ  = (‖i‖² − ipᵀ H⁻¹ ip) / (tᵀi − tpᵀ H⁻¹ ip)
//! Δp = H⁻¹ (λ tp − ip)
//! ```

use crate::motion::{apply_update, WarpState, MAX_PARAMS};
use crate::{DivergenceReason, PyramidLevel};
use bandstack_core::filters::central_gradient;
use bandstack_core::{sample_bilinear, sample_bilinear_masked, MotionModel, WarpTransform};
use log::trace;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Minimum number of overlapping valid pixels per estimated parameter.
const MIN_PIXELS_PER_PARAM: usize = 8;
const VARIANCE_EPS: f64 = 1e-12;

/// Outcome of one pyramid level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelReport {
    /// Pyramid level (0 = full resolution).
    pub level: usize,
    pub width: usize,
    pub height: usize,
    /// Number of parameter updates applied.
    pub iterations: usize,
    /// Correlation of the transform this level started from.
    pub seed_correlation: f64,
    /// Correlation of the transform this level returned.
    pub correlation: f64,
    /// True when the update norm fell below the threshold.
    pub converged: bool,
    /// Norm of the last applied update.
    pub last_update_norm: f64,
}

#[derive(Debug)]
pub(crate) struct LevelSolution {
    pub transform: WarpTransform,
    pub report: LevelReport,
}

/// Statistics of the current warp over the common valid region.
#[derive(Debug)]
struct Overlap {
    count: usize,
    template_norm2: f64,
    warped_norm2: f64,
    cross: f64,
}

impl Overlap {
    fn correlation(&self) -> f64 {
        self.cross / (self.template_norm2 * self.warped_norm2).sqrt()
    }
}

pub(crate) struct LevelSolver<'a> {
    template: &'a PyramidLevel,
    target: &'a PyramidLevel,
    motion: MotionModel,
    max_iterations: usize,
    threshold: f64,
}

impl<'a> LevelSolver<'a> {
    pub(crate) fn new(
        template: &'a PyramidLevel,
        target: &'a PyramidLevel,
        motion: MotionModel,
        max_iterations: usize,
        threshold: f64,
    ) -> Self {
        Self {
            template,
            target,
            motion,
            max_iterations,
            threshold,
        }
    }

    /// Maximize the correlation starting from `seed`.
    ///
    /// The returned transform is the best iterate seen, the seed included.
    pub(crate) fn solve(
        &self,
        level: usize,
        seed: WarpTransform,
    ) -> Result<LevelSolution, DivergenceReason> {
        let tpl = &self.template.image;
        let (w, h) = (tpl.width, tpl.height);
        let npix = w * h;
        let n = self.motion.num_params();

        let (gx_img, gy_img) = central_gradient(&self.target.image);
        // Gradients are only trusted where both neighbours were valid.
        let grad_mask = self.target.mask.eroded();
        let target_view = self.target.image.view();

        let mut warped = vec![0.0f64; npix];
        let mut wgx = vec![0.0f64; npix];
        let mut wgy = vec![0.0f64; npix];
        let mut valid = vec![false; npix];

        let mut current = seed;
        let mut best = (seed, f64::NEG_INFINITY);
        let mut seed_correlation = f64::NAN;
        let mut iterations = 0;
        let mut converged = false;
        let mut last_update_norm = f64::INFINITY;

        loop {
            // Warp the target and its gradients into the template grid.
            for y in 0..h {
                for x in 0..w {
                    let idx = y * w + x;
                    valid[idx] = false;
                    if !self.template.mask.data[idx] {
                        continue;
                    }
                    let p = current.apply(nalgebra::Point2::new(x as f64, y as f64));
                    let Some(v) = sample_bilinear_masked(&target_view, &grad_mask, p.x, p.y) else {
                        continue;
                    };
                    warped[idx] = v as f64;
                    wgx[idx] = sample_bilinear(&gx_img.view(), p.x, p.y).unwrap_or(0.0) as f64;
                    wgy[idx] = sample_bilinear(&gy_img.view(), p.x, p.y).unwrap_or(0.0) as f64;
                    valid[idx] = true;
                }
            }

            let (t_mean, i_mean, count) = self.means(&warped, &valid);
            if count < n * MIN_PIXELS_PER_PARAM {
                return Err(DivergenceReason::InsufficientOverlap);
            }
            let overlap = self.overlap(&warped, &valid, t_mean, i_mean, count);
            if overlap.template_norm2 <= VARIANCE_EPS || overlap.warped_norm2 <= VARIANCE_EPS {
                return Err(DivergenceReason::UniformImage);
            }
            let rho = overlap.correlation();
            if iterations == 0 {
                seed_correlation = rho;
            }
            if rho > best.1 {
                best = (current, rho);
            }
            trace!(
                "level {level} iter {iterations}: rho={rho:.6} pixels={}",
                overlap.count
            );
            if converged || iterations >= self.max_iterations {
                break;
            }

            // Steepest-descent projections.
            let state = WarpState::new(self.motion, &current);
            let mut hess = [[0.0f64; MAX_PARAMS]; MAX_PARAMS];
            let mut ip = [0.0f64; MAX_PARAMS];
            let mut tp = [0.0f64; MAX_PARAMS];
            let mut j = [0.0f64; MAX_PARAMS];
            for y in 0..h {
                for x in 0..w {
                    let idx = y * w + x;
                    if !valid[idx] {
                        continue;
                    }
                    state.jacobian(x as f64, y as f64, wgx[idx], wgy[idx], &mut j);
                    let iz = warped[idx] - i_mean;
                    let tz = tpl.data[idx] as f64 - t_mean;
                    for a in 0..n {
                        ip[a] += j[a] * iz;
                        tp[a] += j[a] * tz;
                        for b in a..n {
                            hess[a][b] += j[a] * j[b];
                        }
                    }
                }
            }

            let hess = DMatrix::from_fn(n, n, |a, b| if a <= b { hess[a][b] } else { hess[b][a] });
            let ip = DVector::from_column_slice(&ip[..n]);
            let tp = DVector::from_column_slice(&tp[..n]);
            let Some(chol) = hess.cholesky() else {
                return Err(DivergenceReason::SingularHessian);
            };
            let h_inv_ip = chol.solve(&ip);
            let lambda_num = overlap.warped_norm2 - ip.dot(&h_inv_ip);
            let lambda_den = overlap.cross - tp.dot(&h_inv_ip);
            if lambda_den <= 0.0 || !lambda_den.is_finite() {
                return Err(DivergenceReason::CorrelationDecreasing);
            }
            let lambda = lambda_num / lambda_den;
            let dp = chol.solve(&(tp * lambda - ip));
            if dp.iter().any(|v| !v.is_finite()) {
                return Err(DivergenceReason::NonFiniteUpdate);
            }

            current = apply_update(self.motion, &current, dp.as_slice());
            iterations += 1;
            last_update_norm = dp.norm();
            converged = last_update_norm < self.threshold;
        }

        Ok(LevelSolution {
            transform: best.0,
            report: LevelReport {
                level,
                width: w,
                height: h,
                iterations,
                seed_correlation,
                correlation: best.1,
                converged,
                last_update_norm,
            },
        })
    }

    fn means(&self, warped: &[f64], valid: &[bool]) -> (f64, f64, usize) {
        let tpl = &self.template.image.data;
        let mut st = 0.0;
        let mut si = 0.0;
        let mut count = 0usize;
        for (idx, _) in valid.iter().enumerate().filter(|(_, v)| **v) {
            st += tpl[idx] as f64;
            si += warped[idx];
            count += 1;
        }
        if count == 0 {
            return (0.0, 0.0, 0);
        }
        (st / count as f64, si / count as f64, count)
    }

    fn overlap(
        &self,
        warped: &[f64],
        valid: &[bool],
        t_mean: f64,
        i_mean: f64,
        count: usize,
    ) -> Overlap {
        let tpl = &self.template.image.data;
        let mut tn = 0.0;
        let mut inn = 0.0;
        let mut cross = 0.0;
        for (idx, _) in valid.iter().enumerate().filter(|(_, v)| **v) {
            let t = tpl[idx] as f64 - t_mean;
            let i = warped[idx] - i_mean;
            tn += t * t;
            inn += i * i;
            cross += t * i;
        }
        Overlap {
            count,
            template_norm2: tn,
            warped_norm2: inn,
            cross,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandstack_core::synthetic::SyntheticScene;
    use bandstack_core::{LensModel, Mask};

    fn level_from(img: bandstack_core::BandImage) -> PyramidLevel {
        let mask = Mask::full(img.width, img.height);
        PyramidLevel { image: img, mask }
    }

    #[test]
    fn identical_images_converge_immediately() {
        let img = SyntheticScene::new(64, 64, 3).render(64, 64);
        let tpl = level_from(img.clone());
        let tgt = level_from(img);
        let solver = LevelSolver::new(&tpl, &tgt, MotionModel::Affine, 50, 1e-4);
        let sol = solver.solve(0, WarpTransform::identity()).unwrap();
        assert!(sol.report.converged);
        assert!(sol.report.iterations <= 2);
        assert!(sol.report.correlation > 0.999_999);
        let (tx, ty) = sol.transform.translation_part();
        assert!(tx.abs() < 1e-3 && ty.abs() < 1e-3);
    }

    #[test]
    fn recovers_subpixel_translation() {
        let scene = SyntheticScene::new(64, 64, 11);
        let truth = WarpTransform::translation(1.4, -0.6);
        let lens = LensModel::pinhole(64, 64, 60.0);
        let tpl = level_from(scene.render(64, 64));
        let tgt = level_from(scene.render_band(64, 64, &truth, &lens, 1.0, 0.0).unwrap());
        let solver = LevelSolver::new(&tpl, &tgt, MotionModel::Translation, 100, 1e-5);
        let sol = solver.solve(0, WarpTransform::identity()).unwrap();
        let (tx, ty) = sol.transform.translation_part();
        assert!((tx - 1.4).abs() < 0.05, "tx={tx}");
        assert!((ty + 0.6).abs() < 0.05, "ty={ty}");
        assert!(sol.report.correlation >= sol.report.seed_correlation);
    }

    #[test]
    fn uniform_target_is_rejected() {
        let tpl = level_from(SyntheticScene::new(32, 32, 1).render(32, 32));
        let tgt = level_from(bandstack_core::BandImage::filled(32, 32, 0.5));
        let solver = LevelSolver::new(&tpl, &tgt, MotionModel::Affine, 10, 1e-4);
        let err = solver.solve(0, WarpTransform::identity()).unwrap_err();
        assert_eq!(err, DivergenceReason::UniformImage);
    }

    #[test]
    fn disjoint_images_report_insufficient_overlap() {
        let img = SyntheticScene::new(32, 32, 1).render(32, 32);
        let tpl = level_from(img.clone());
        let tgt = level_from(img);
        let solver = LevelSolver::new(&tpl, &tgt, MotionModel::Affine, 10, 1e-4);
        let far = WarpTransform::translation(100.0, 0.0);
        let err = solver.solve(0, far).unwrap_err();
        assert_eq!(err, DivergenceReason::InsufficientOverlap);
    }
}
