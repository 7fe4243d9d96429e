//! Deterministic textured scenes for tests and benchmarks.
//!
//! A scene is an analytic intensity field (Gaussian blobs over a gentle
//! sinusoid), so a band seen through any transform and lens can be rendered
//! exactly instead of by resampling another image.

use crate::{BandImage, LensModel, WarpTransform};
use nalgebra::Point2;

#[derive(Clone, Copy, Debug)]
struct Blob {
    x: f64,
    y: f64,
    sigma: f64,
    amplitude: f64,
}

/// Analytic scene in reference-frame pixel coordinates.
#[derive(Clone, Debug)]
pub struct SyntheticScene {
    blobs: Vec<Blob>,
    wave_period: f64,
}

/// splitmix64; enough for placing blobs reproducibly.
fn next_unit(state: &mut u64) -> f64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}

impl SyntheticScene {
    /// Scene covering roughly `width x height` pixels (with a margin so that
    /// shifted views stay textured).
    pub fn new(width: usize, height: usize, seed: u64) -> Self {
        let mut state = seed ^ 0x5DEE_CE66_D1CE_4E5B;
        let margin = 16.0;
        let area = (width as f64 + 2.0 * margin) * (height as f64 + 2.0 * margin);
        let count = ((area / 180.0) as usize).max(12);
        let blobs = (0..count)
            .map(|_| Blob {
                x: -margin + next_unit(&mut state) * (width as f64 + 2.0 * margin),
                y: -margin + next_unit(&mut state) * (height as f64 + 2.0 * margin),
                sigma: 2.5 + 4.0 * next_unit(&mut state),
                amplitude: 0.3 + 0.7 * next_unit(&mut state),
            })
            .collect();
        Self {
            blobs,
            wave_period: (width.max(height) as f64).max(32.0) * 0.75,
        }
    }

    /// Intensity at a reference-frame point.
    pub fn eval(&self, p: Point2<f64>) -> f64 {
        let k = std::f64::consts::TAU / self.wave_period;
        let mut v = 0.2 + 0.1 * (k * p.x).sin() * (k * 0.7 * p.y).cos();
        for b in &self.blobs {
            let dx = p.x - b.x;
            let dy = p.y - b.y;
            let d2 = dx * dx + dy * dy;
            let s2 = b.sigma * b.sigma;
            if d2 < 25.0 * s2 {
                v += b.amplitude * (-0.5 * d2 / s2).exp();
            }
        }
        v
    }

    /// Render the scene as the reference band sees it.
    pub fn render(&self, width: usize, height: usize) -> BandImage {
        BandImage::from_fn(width, height, |x, y| {
            self.eval(Point2::new(x as f64, y as f64)) as f32
        })
    }

    /// Render a band whose reference-to-band transform is `transform` and whose
    /// lens is `lens`, with a linear radiometric response `gain * v + offset`.
    ///
    /// Returns `None` when `transform` is singular.
    pub fn render_band(
        &self,
        width: usize,
        height: usize,
        transform: &WarpTransform,
        lens: &LensModel,
        gain: f64,
        offset: f64,
    ) -> Option<BandImage> {
        let inv = transform.inverse()?;
        Some(BandImage::from_fn(width, height, |x, y| {
            let undistorted = lens.undistort(Point2::new(x as f64, y as f64));
            let p = inv.apply(undistorted);
            (gain * self.eval(p) + offset) as f32
        }))
    }
}
