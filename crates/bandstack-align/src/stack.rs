//! Aligned multi-band rasters and the band math done on them.

use crate::CropRect;
use bandstack_core::BandImage;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("band {band} out of range ({bands} bands)")]
    BandOutOfRange { band: usize, bands: usize },
}

/// `rows x cols x bands` raster, row-major with the band index fastest.
#[derive(Clone, Debug, PartialEq)]
pub struct AlignedStack {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    pub data: Vec<f32>,
    /// Per-pixel validity (`rows x cols`), present when requested.
    pub mask: Option<Vec<bool>>,
    /// Where the stack sits in the reference frame.
    pub crop: CropRect,
}

/// How [`normalize`] picks the stretch range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMode {
    /// Each band stretched by its own min and max.
    #[default]
    PerBand,
    /// One range over all bands, preserving relative brightness.
    Joint,
}

impl AlignedStack {
    #[inline]
    pub fn get(&self, row: usize, col: usize, band: usize) -> f32 {
        self.data[(row * self.cols + col) * self.bands + band]
    }

    #[inline]
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.mask
            .as_ref()
            .is_none_or(|m| m[row * self.cols + col])
    }

    fn check_band(&self, band: usize) -> Result<(), StackError> {
        if band >= self.bands {
            return Err(StackError::BandOutOfRange {
                band,
                bands: self.bands,
            });
        }
        Ok(())
    }

    /// Copy one band out as an image.
    pub fn band(&self, band: usize) -> Result<BandImage, StackError> {
        self.check_band(band)?;
        let data = self.data.iter().skip(band).step_by(self.bands).copied().collect();
        Ok(BandImage {
            width: self.cols,
            height: self.rows,
            data,
        })
    }

    /// Three-band stack picked by index (e.g. `[red, green, blue]` or a
    /// color-infrared `[nir, red, green]`).
    pub fn composite(&self, channels: [usize; 3]) -> Result<AlignedStack, StackError> {
        for c in channels {
            self.check_band(c)?;
        }
        let data = self
            .data
            .chunks_exact(self.bands)
            .flat_map(|px| channels.map(|c| px[c]))
            .collect();
        Ok(AlignedStack {
            rows: self.rows,
            cols: self.cols,
            bands: 3,
            data,
            mask: self.mask.clone(),
            crop: self.crop,
        })
    }

    fn valid_pixels(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.data
            .chunks_exact(self.bands)
            .enumerate()
            .filter(|(i, _)| self.mask.as_ref().is_none_or(|m| m[*i]))
            .map(|(_, px)| px)
    }
}

/// Min-max stretch of a stack into `[0, 1]` over its valid pixels.
///
/// Non-finite samples are ignored when picking the range and flat bands map to 0.
pub fn normalize(stack: &AlignedStack, mode: NormalizeMode) -> AlignedStack {
    let nb = stack.bands;
    let mut lo = vec![f32::INFINITY; nb];
    let mut hi = vec![f32::NEG_INFINITY; nb];
    for px in stack.valid_pixels() {
        for (b, &v) in px.iter().enumerate() {
            if v.is_finite() {
                lo[b] = lo[b].min(v);
                hi[b] = hi[b].max(v);
            }
        }
    }
    if mode == NormalizeMode::Joint {
        let l = lo.iter().copied().fold(f32::INFINITY, f32::min);
        let h = hi.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        lo.fill(l);
        hi.fill(h);
    }
    let data = stack
        .data
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let b = i % nb;
            let span = hi[b] - lo[b];
            if span > 0.0 && v.is_finite() {
                ((v - lo[b]) / span).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect();
    AlignedStack {
        data,
        ..stack.clone()
    }
}

/// `(a - b) / (a + b)` per pixel (NDVI with `a = nir, b = red`, NDRE with
/// `b = red edge`).
///
/// Pixels with a zero denominator, invalid mask or `a < min_first` are `NaN`.
pub fn normalized_difference(
    stack: &AlignedStack,
    a: usize,
    b: usize,
    min_first: Option<f32>,
) -> Result<BandImage, StackError> {
    stack.check_band(a)?;
    stack.check_band(b)?;
    let data = stack
        .data
        .chunks_exact(stack.bands)
        .enumerate()
        .map(|(i, px)| {
            let (va, vb) = (px[a], px[b]);
            let den = va + vb;
            let masked = stack.mask.as_ref().is_some_and(|m| !m[i]);
            let dark = min_first.is_some_and(|t| va < t);
            if masked || dark || den == 0.0 {
                f32::NAN
            } else {
                (va - vb) / den
            }
        })
        .collect();
    Ok(BandImage {
        width: stack.cols,
        height: stack.rows,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn stack() -> AlignedStack {
        // 1 row, 3 cols, 2 bands.
        AlignedStack {
            rows: 1,
            cols: 3,
            bands: 2,
            data: vec![0.8, 0.2, 0.0, 0.0, 0.4, 0.6],
            mask: None,
            crop: CropRect::new(0, 0, 3, 1),
        }
    }

    #[test]
    fn band_extraction_and_composites() {
        let s = stack();
        assert_eq!(s.band(1).unwrap().data, vec![0.2, 0.0, 0.6]);
        let c = s.composite([1, 0, 1]).unwrap();
        assert_eq!(c.bands, 3);
        assert_eq!(&c.data[..3], &[0.2, 0.8, 0.2]);
        assert_eq!(
            s.composite([0, 2, 1]).unwrap_err(),
            StackError::BandOutOfRange { band: 2, bands: 2 }
        );
    }

    #[test]
    fn normalized_difference_handles_zero_and_threshold() {
        let s = stack();
        let nd = normalized_difference(&s, 0, 1, None).unwrap();
        assert!((nd.data[0] - 0.6).abs() < 1e-6);
        assert!(nd.data[1].is_nan());
        assert!((nd.data[2] + 0.2).abs() < 1e-6);

        let masked = normalized_difference(&s, 0, 1, Some(0.5)).unwrap();
        assert!(!masked.data[0].is_nan());
        assert!(masked.data[2].is_nan());
    }

    #[test]
    fn normalize_per_band_and_joint() {
        let s = stack();
        let close = |got: Vec<f32>, want: [f32; 3]| {
            for (g, w) in got.iter().zip(want) {
                assert_relative_eq!(*g, w, epsilon = 1e-6);
            }
        };
        let per = normalize(&s, NormalizeMode::PerBand);
        close(per.band(0).unwrap().data, [1.0, 0.0, 0.5]);
        close(per.band(1).unwrap().data, [1.0 / 3.0, 0.0, 1.0]);

        let joint = normalize(&s, NormalizeMode::Joint);
        close(joint.band(1).unwrap().data, [0.25, 0.0, 0.75]);
    }
}
