use crate::LensModel;
use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Parametric motion model estimated by the registration solver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionModel {
    /// `tx, ty`.
    Translation,
    /// Rotation and translation.
    Euclidean,
    /// Full 2x3 affine.
    #[default]
    Affine,
    /// 8-parameter projective transform.
    Homography,
}

impl MotionModel {
    /// Number of free parameters.
    pub fn num_params(self) -> usize {
        match self {
            MotionModel::Translation => 2,
            MotionModel::Euclidean => 3,
            MotionModel::Affine => 6,
            MotionModel::Homography => 8,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("transform coefficients must be finite")]
    NonFinite,
    #[error("transform has a zero homogeneous scale (m22 = 0)")]
    ZeroScale,
}

/// 3x3 homogeneous transform from reference-frame pixels to band pixels
/// (both in undistorted coordinates). Pixel centres sit on integers.
///
/// Serialized as nine row-major numbers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f64; 9]", try_from = "[f64; 9]")]
pub struct WarpTransform {
    pub m: Matrix3<f64>,
}

impl Default for WarpTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<WarpTransform> for [f64; 9] {
    fn from(t: WarpTransform) -> Self {
        t.to_flat()
    }
}

impl TryFrom<[f64; 9]> for WarpTransform {
    type Error = TransformError;

    fn try_from(v: [f64; 9]) -> Result<Self, Self::Error> {
        Self::from_flat(v)
    }
}

/// Fine-to-coarse pixel mapping for one 2x pyramid step: `x_c = x_f / 2 - 1/4`.
fn half_scale() -> Matrix3<f64> {
    Matrix3::new(0.5, 0.0, -0.25, 0.0, 0.5, -0.25, 0.0, 0.0, 1.0)
}

fn double_scale() -> Matrix3<f64> {
    Matrix3::new(2.0, 0.0, 0.5, 0.0, 2.0, 0.5, 0.0, 0.0, 1.0)
}

impl WarpTransform {
    pub fn new(m: Matrix3<f64>) -> Self {
        Self { m }
    }

    pub fn identity() -> Self {
        Self {
            m: Matrix3::identity(),
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0))
    }

    /// Rotation by `degrees` about `center`, followed by a translation.
    pub fn euclidean(degrees: f64, center: Point2<f64>, tx: f64, ty: f64) -> Self {
        let (s, c) = degrees.to_radians().sin_cos();
        let ox = center.x - c * center.x + s * center.y;
        let oy = center.y - s * center.x - c * center.y;
        Self::new(Matrix3::new(c, -s, ox + tx, s, c, oy + ty, 0.0, 0.0, 1.0))
    }

    /// Build from the top two rows of an affine matrix.
    pub fn from_affine_rows(rows: [[f64; 3]; 2]) -> Self {
        Self::new(Matrix3::new(
            rows[0][0], rows[0][1], rows[0][2], //
            rows[1][0], rows[1][1], rows[1][2], //
            0.0, 0.0, 1.0,
        ))
    }

    /// Decode nine row-major coefficients, normalizing so that `m22 = 1`.
    pub fn from_flat(v: [f64; 9]) -> Result<Self, TransformError> {
        if v.iter().any(|c| !c.is_finite()) {
            return Err(TransformError::NonFinite);
        }
        if v[8] == 0.0 {
            return Err(TransformError::ZeroScale);
        }
        let m = Matrix3::from_row_slice(&v) / v[8];
        Ok(Self::new(m))
    }

    pub fn to_flat(&self) -> [f64; 9] {
        let m = &self.m;
        [
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
        ]
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.m * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    pub fn inverse(&self) -> Option<Self> {
        let inv = self.m.try_inverse()?;
        let s = inv[(2, 2)];
        if s.abs() < 1e-15 || !s.is_finite() {
            return None;
        }
        Some(Self::new(inv / s))
    }

    /// `self ∘ inner`: apply `inner` first, then `self`.
    pub fn compose(&self, inner: &WarpTransform) -> WarpTransform {
        let m = self.m * inner.m;
        Self::new(m / m[(2, 2)])
    }

    /// Express this transform one pyramid level coarser.
    pub fn to_coarser(&self) -> Self {
        let m = half_scale() * self.m * double_scale();
        Self::new(m / m[(2, 2)])
    }

    /// Express this transform one pyramid level finer.
    pub fn to_finer(&self) -> Self {
        let m = double_scale() * self.m * half_scale();
        Self::new(m / m[(2, 2)])
    }

    /// Move `steps` pyramid levels: positive is coarser, negative is finer.
    pub fn rescaled(&self, steps: i32) -> Self {
        let mut t = *self;
        for _ in 0..steps.unsigned_abs() {
            t = if steps > 0 { t.to_coarser() } else { t.to_finer() };
        }
        t
    }

    /// Translation column `(m02, m12)`.
    pub fn translation_part(&self) -> (f64, f64) {
        (self.m[(0, 2)], self.m[(1, 2)])
    }

    /// Rotation angle of the linear part in degrees.
    pub fn rotation_degrees(&self) -> f64 {
        self.m[(1, 0)].atan2(self.m[(0, 0)]).to_degrees()
    }

    pub fn is_affine(&self) -> bool {
        self.m[(2, 0)] == 0.0 && self.m[(2, 1)] == 0.0
    }

    /// Restrict to the degrees of freedom of `motion`.
    ///
    /// Used to sanitize caller-provided initial guesses.
    pub fn projected(&self, motion: MotionModel) -> Self {
        let m = &self.m;
        match motion {
            MotionModel::Translation => Self::translation(m[(0, 2)], m[(1, 2)]),
            MotionModel::Euclidean => {
                let (s, c) = m[(1, 0)].atan2(m[(0, 0)]).sin_cos();
                Self::new(Matrix3::new(
                    c,
                    -s,
                    m[(0, 2)],
                    s,
                    c,
                    m[(1, 2)],
                    0.0,
                    0.0,
                    1.0,
                ))
            }
            MotionModel::Affine => Self::from_affine_rows([
                [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
                [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            ]),
            MotionModel::Homography => *self,
        }
    }

    /// Largest displacement of the given points between `self` and `other`.
    pub fn max_point_distance(&self, other: &WarpTransform, points: &[Point2<f64>]) -> f64 {
        points
            .iter()
            .map(|&p| (self.apply(p) - other.apply(p)).norm())
            .fold(0.0, f64::max)
    }
}

/// One-pass mapping of a band: its registration transform composed with its lens.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BandMapping {
    pub transform: WarpTransform,
    pub inverse: WarpTransform,
    pub lens: LensModel,
}

/// Compose a band's transform with its lens model.
///
/// Returns `None` if the transform is not invertible.
pub fn compose(transform: WarpTransform, lens: LensModel) -> Option<BandMapping> {
    Some(BandMapping {
        transform,
        inverse: transform.inverse()?,
        lens,
    })
}

impl BandMapping {
    /// Reference-frame pixel to raw (distorted) band pixel. Used to pull values.
    #[inline]
    pub fn ref_to_band(&self, p: Point2<f64>) -> Point2<f64> {
        self.lens.distort(self.transform.apply(p))
    }

    /// Raw band pixel to reference-frame pixel. Used to push coordinates.
    #[inline]
    pub fn band_to_ref(&self, p: Point2<f64>) -> Point2<f64> {
        self.inverse.apply(self.lens.undistort(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_points() -> Vec<Point2<f64>> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(63.0, 10.5),
            Point2::new(120.0, 90.0),
        ]
    }

    #[test]
    fn flat_encoding_round_trips() {
        let t = WarpTransform::new(Matrix3::new(
            1.01, 0.02, 3.5, //
            -0.015, 0.99, -2.25, //
            1e-5, -2e-5, 1.0,
        ));
        let back = WarpTransform::from_flat(t.to_flat()).unwrap();
        assert_eq!(back, t);

        let json = serde_json::to_string(&t).unwrap();
        assert!(json.starts_with('[') && json.matches(',').count() == 8);
        let parsed: WarpTransform = serde_json::from_str(&json).unwrap();
        for (a, b) in parsed.to_flat().iter().zip(t.to_flat()) {
            assert_relative_eq!(*a, b, max_relative = 1e-15);
        }
    }

    #[test]
    fn flat_encoding_rejects_degenerate_values() {
        let mut v = WarpTransform::identity().to_flat();
        v[8] = 0.0;
        assert_eq!(WarpTransform::from_flat(v), Err(TransformError::ZeroScale));
        v[8] = 1.0;
        v[3] = f64::NAN;
        assert_eq!(WarpTransform::from_flat(v), Err(TransformError::NonFinite));
    }

    #[test]
    fn pyramid_rescaling_is_consistent() {
        let t = WarpTransform::euclidean(1.5, Point2::new(50.0, 40.0), 3.0, -2.0);
        let back = t.to_coarser().to_finer();
        assert!(back.max_point_distance(&t, &sample_points()) < 1e-9);
        let two = t.rescaled(2).rescaled(-2);
        assert!(two.max_point_distance(&t, &sample_points()) < 1e-9);

        let shift = WarpTransform::translation(1.25, -0.5).to_finer();
        let (tx, ty) = shift.translation_part();
        assert_relative_eq!(tx, 2.5, epsilon = 1e-12);
        assert_relative_eq!(ty, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn compose_and_inverse() {
        let a = WarpTransform::translation(2.0, 3.0);
        let b = WarpTransform::euclidean(10.0, Point2::new(0.0, 0.0), 0.0, 0.0);
        let ab = a.compose(&b);
        for p in sample_points() {
            let q = ab.apply(p);
            let expected = a.apply(b.apply(p));
            assert!((q - expected).norm() < 1e-9);
            let back = ab.inverse().unwrap().apply(q);
            assert!((back - p).norm() < 1e-9);
        }
        assert_relative_eq!(b.rotation_degrees(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn projection_keeps_only_model_dofs() {
        let t = WarpTransform::new(Matrix3::new(
            1.1, 0.2, 4.0, //
            0.1, 0.9, 5.0, //
            1e-4, 0.0, 1.0,
        ));
        let tr = t.projected(MotionModel::Translation);
        assert_eq!(tr, WarpTransform::translation(4.0, 5.0));
        assert!(t.projected(MotionModel::Affine).is_affine());
        assert!(!t.projected(MotionModel::Homography).is_affine());
    }

    #[test]
    fn band_mapping_round_trips_through_lens() {
        let lens = LensModel::pinhole(128, 96, 120.0).with_radial(-0.08, 0.01, 0.0);
        let t = WarpTransform::translation(1.5, -0.75);
        let mapping = compose(t, lens).unwrap();
        for p in sample_points().iter().skip(1) {
            let band = mapping.ref_to_band(*p);
            let back = mapping.band_to_ref(band);
            assert!((back - p).norm() < 1e-6);
        }
        let singular = WarpTransform::new(Matrix3::zeros());
        assert!(compose(singular, lens).is_none());
    }
}
