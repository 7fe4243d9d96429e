//! Pinhole intrinsics with Brown-Conrady lens distortion.
//!
//! ```text
//! x = (u - cx) / fx,  y = (v - cy) / fy,  r² = x² + y²
//! x_d = x (1 + k1 r² + k2 r⁴ + k3 r⁶) + 2 p1 x y + p2 (r² + 2 x²)
//! y_d = y (1 + k1 r² + k2 r⁴ + k3 r⁶) + p1 (r² + 2 y²) + 2 p2 x y
//! u_d = fx x_d + cx,  v_d = fy y_d + cy
//! ```
//!
//! The undistorted frame of a band keeps the same camera matrix, so both
//! frames are expressed in pixels of the same band.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

const UNDISTORT_MAX_ITERS: usize = 20;
const UNDISTORT_TOL: f64 = 1e-12;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LensModel {
    /// Focal lengths in pixels.
    pub fx: f64,
    pub fy: f64,
    /// Principal point in pixels.
    pub cx: f64,
    pub cy: f64,
    /// Radial coefficients.
    #[serde(default)]
    pub k1: f64,
    #[serde(default)]
    pub k2: f64,
    #[serde(default)]
    pub k3: f64,
    /// Tangential coefficients.
    #[serde(default)]
    pub p1: f64,
    #[serde(default)]
    pub p2: f64,
}

impl LensModel {
    /// Distortion-free lens with the principal point at the image centre.
    pub fn pinhole(width: usize, height: usize, focal_px: f64) -> Self {
        Self {
            fx: focal_px,
            fy: focal_px,
            cx: (width as f64 - 1.0) * 0.5,
            cy: (height as f64 - 1.0) * 0.5,
            k1: 0.0,
            k2: 0.0,
            k3: 0.0,
            p1: 0.0,
            p2: 0.0,
        }
    }

    pub fn with_radial(mut self, k1: f64, k2: f64, k3: f64) -> Self {
        self.k1 = k1;
        self.k2 = k2;
        self.k3 = k3;
        self
    }

    pub fn with_tangential(mut self, p1: f64, p2: f64) -> Self {
        self.p1 = p1;
        self.p2 = p2;
        self
    }

    /// True when all distortion coefficients are zero; points then map to themselves exactly.
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.k3 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0
    }

    #[inline]
    fn distort_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        (x * radial + x_tan, y * radial + y_tan)
    }

    /// Map an ideal (undistorted) pixel to where the lens actually images it.
    #[inline]
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        if self.is_identity() {
            return p;
        }
        let x = (p.x - self.cx) / self.fx;
        let y = (p.y - self.cy) / self.fy;
        let (xd, yd) = self.distort_normalized(x, y);
        Point2::new(self.fx * xd + self.cx, self.fy * yd + self.cy)
    }

    /// Inverse of [`LensModel::distort`] by fixed-point iteration.
    pub fn undistort(&self, p: Point2<f64>) -> Point2<f64> {
        if self.is_identity() {
            return p;
        }
        let xd = (p.x - self.cx) / self.fx;
        let yd = (p.y - self.cy) / self.fy;
        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_MAX_ITERS {
            let (ex, ey) = self.distort_normalized(x, y);
            let (rx, ry) = (ex - xd, ey - yd);
            x -= rx;
            y -= ry;
            if rx * rx + ry * ry < UNDISTORT_TOL * UNDISTORT_TOL {
                break;
            }
        }
        Point2::new(self.fx * x + self.cx, self.fy * y + self.cy)
    }

    pub fn undistort_points(&self, points: &[Point2<f64>]) -> Vec<Point2<f64>> {
        points.iter().map(|&p| self.undistort(p)).collect()
    }

    pub fn distort_points(&self, points: &[Point2<f64>]) -> Vec<Point2<f64>> {
        points.iter().map(|&p| self.distort(p)).collect()
    }
}
