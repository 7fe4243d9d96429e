//! Per-model warp Jacobians and parameter updates.
//!
//! Parameter orders:
//! - translation: `[tx, ty]`
//! - euclidean: `[theta, tx, ty]`
//! - affine: `[a00, a01, a02, a10, a11, a12]`
//! - homography: `[h00, h01, h02, h10, h11, h12, h20, h21]` (`h22 = 1`)

use bandstack_core::{MotionModel, WarpTransform};
use nalgebra::Matrix3;

pub(crate) const MAX_PARAMS: usize = 8;

/// Current warp, with the quantities the Jacobian needs precomputed.
pub(crate) struct WarpState {
    motion: MotionModel,
    m: Matrix3<f64>,
    sin: f64,
    cos: f64,
}

impl WarpState {
    pub(crate) fn new(motion: MotionModel, w: &WarpTransform) -> Self {
        let (sin, cos) = w.m[(1, 0)].atan2(w.m[(0, 0)]).sin_cos();
        Self {
            motion,
            m: w.m,
            sin,
            cos,
        }
    }

    /// Fill `j` with `d I(W(x; p)) / dp` given the target gradient at `W(x)`.
    #[inline]
    pub(crate) fn jacobian(&self, x: f64, y: f64, gx: f64, gy: f64, j: &mut [f64; MAX_PARAMS]) {
        match self.motion {
            MotionModel::Translation => {
                j[0] = gx;
                j[1] = gy;
            }
            MotionModel::Euclidean => {
                let dx = -x * self.sin - y * self.cos;
                let dy = x * self.cos - y * self.sin;
                j[0] = gx * dx + gy * dy;
                j[1] = gx;
                j[2] = gy;
            }
            MotionModel::Affine => {
                j[0] = gx * x;
                j[1] = gx * y;
                j[2] = gx;
                j[3] = gy * x;
                j[4] = gy * y;
                j[5] = gy;
            }
            MotionModel::Homography => {
                let m = &self.m;
                let den = m[(2, 0)] * x + m[(2, 1)] * y + m[(2, 2)];
                let inv = 1.0 / den;
                let u = (m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)]) * inv;
                let v = (m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)]) * inv;
                let gxd = gx * inv;
                let gyd = gy * inv;
                let mix = -(gxd * u + gyd * v);
                j[0] = gxd * x;
                j[1] = gxd * y;
                j[2] = gxd;
                j[3] = gyd * x;
                j[4] = gyd * y;
                j[5] = gyd;
                j[6] = mix * x;
                j[7] = mix * y;
            }
        }
    }
}

/// Apply an additive parameter update.
pub(crate) fn apply_update(motion: MotionModel, w: &WarpTransform, dp: &[f64]) -> WarpTransform {
    let mut m = w.m;
    match motion {
        MotionModel::Translation => {
            m[(0, 2)] += dp[0];
            m[(1, 2)] += dp[1];
        }
        MotionModel::Euclidean => {
            let theta = m[(1, 0)].atan2(m[(0, 0)]) + dp[0];
            let (s, c) = theta.sin_cos();
            m[(0, 0)] = c;
            m[(0, 1)] = -s;
            m[(1, 0)] = s;
            m[(1, 1)] = c;
            m[(0, 2)] += dp[1];
            m[(1, 2)] += dp[2];
        }
        MotionModel::Affine => {
            m[(0, 0)] += dp[0];
            m[(0, 1)] += dp[1];
            m[(0, 2)] += dp[2];
            m[(1, 0)] += dp[3];
            m[(1, 1)] += dp[4];
            m[(1, 2)] += dp[5];
        }
        MotionModel::Homography => {
            for (k, d) in dp.iter().enumerate().take(8) {
                m[(k / 3, k % 3)] += d;
            }
        }
    }
    WarpTransform::new(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;

    /// Compare analytic Jacobians with finite differences of a linear image `I(u, v) = a u + b v`.
    #[test]
    fn jacobians_match_finite_differences() {
        let (a, b) = (0.7, -1.3);
        let image = |p: Point2<f64>| a * p.x + b * p.y;
        let w = WarpTransform::new(Matrix3::new(
            0.98, -0.05, 2.0, //
            0.04, 1.01, -1.0, //
            1e-4, -2e-4, 1.0,
        ));
        let (x, y) = (13.0, 7.0);
        for motion in [
            MotionModel::Translation,
            MotionModel::Euclidean,
            MotionModel::Affine,
            MotionModel::Homography,
        ] {
            let base = w.projected(motion);
            let state = WarpState::new(motion, &base);
            let mut j = [0.0; MAX_PARAMS];
            state.jacobian(x, y, a, b, &mut j);
            let eps = 1e-6;
            for k in 0..motion.num_params() {
                let mut dp = [0.0; MAX_PARAMS];
                dp[k] = eps;
                let plus = apply_update(motion, &base, &dp[..motion.num_params()]);
                dp[k] = -eps;
                let minus = apply_update(motion, &base, &dp[..motion.num_params()]);
                let p = Point2::new(x, y);
                let fd = (image(plus.apply(p)) - image(minus.apply(p))) / (2.0 * eps);
                assert!(
                    (fd - j[k]).abs() < 1e-5 * (1.0 + fd.abs()),
                    "{motion:?} param {k}: analytic {} vs numeric {fd}",
                    j[k]
                );
            }
        }
    }
}
