use serde::{Deserialize, Serialize};

/// Errors raised when constructing band images from raw buffers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid buffer length for {width}x{height} image (expected {expected}, got {got})")]
    BufferSize {
        width: usize,
        height: usize,
        expected: usize,
        got: usize,
    },
    #[error("image dimensions must be non-zero (width={width}, height={height})")]
    Empty { width: usize, height: usize },
}

/// Pixel dimensions of a band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: usize,
    pub height: usize,
}

impl ImageSize {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// True if `(x, y)` lies inside the pixel-centre grid `[0, w-1] x [0, h-1]`.
    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x <= (self.width - 1) as f64 && y <= (self.height - 1) as f64
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BandImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [f32], // row-major, len = w*h
}

impl BandImageView<'_> {
    #[inline]
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

/// Single-band floating point image (radiance or reflectance), row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct BandImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl BandImage {
    /// Wrap a row-major buffer, validating its length.
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::Empty { width, height });
        }
        let expected = width * height;
        if data.len() != expected {
            return Err(ImageError::BufferSize {
                width,
                height,
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Build an image by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub fn view(&self) -> BandImageView<'_> {
        BandImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

/// Per-pixel validity flags, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<bool>,
}

impl Mask {
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![true; width * height],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Clear every pixel that has an invalid (or missing) 4-neighbour.
    pub fn eroded(&self) -> Mask {
        let (w, h) = (self.width, self.height);
        let mut out = vec![false; w * h];
        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                out[y * w + x] = self.get(x, y)
                    && self.get(x - 1, y)
                    && self.get(x + 1, y)
                    && self.get(x, y - 1)
                    && self.get(x, y + 1);
            }
        }
        Mask {
            width: w,
            height: h,
            data: out,
        }
    }

    /// Halve the resolution; a coarse pixel is valid only if its 2x2 block is.
    pub fn downsampled_2x(&self) -> Mask {
        let w = (self.width / 2).max(1);
        let h = (self.height / 2).max(1);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let (x0, y0) = (2 * x, 2 * y);
                let x1 = (x0 + 1).min(self.width - 1);
                let y1 = (y0 + 1).min(self.height - 1);
                data.push(
                    self.get(x0, y0) && self.get(x1, y0) && self.get(x0, y1) && self.get(x1, y1),
                );
            }
        }
        Mask {
            width: w,
            height: h,
            data,
        }
    }
}

#[inline]
fn bilinear_cell(width: usize, height: usize, x: f64, y: f64) -> Option<(usize, usize, f64, f64)> {
    if !(x >= 0.0 && y >= 0.0 && x <= (width - 1) as f64 && y <= (height - 1) as f64) {
        return None;
    }
    let x0 = (x.floor() as usize).min(width.saturating_sub(2));
    let y0 = (y.floor() as usize).min(height.saturating_sub(2));
    Some((x0, y0, x - x0 as f64, y - y0 as f64))
}

#[inline]
fn interpolate(src: &BandImageView<'_>, x0: usize, y0: usize, fx: f64, fy: f64) -> f32 {
    let x1 = (x0 + 1).min(src.width - 1);
    let y1 = (y0 + 1).min(src.height - 1);
    let p00 = src.get(x0, y0) as f64;
    let p10 = src.get(x1, y0) as f64;
    let p01 = src.get(x0, y1) as f64;
    let p11 = src.get(x1, y1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    (a + fy * (b - a)) as f32
}

/// Bilinear sample at a pixel-centre coordinate; `None` outside `[0, w-1] x [0, h-1]`.
#[inline]
pub fn sample_bilinear(src: &BandImageView<'_>, x: f64, y: f64) -> Option<f32> {
    let (x0, y0, fx, fy) = bilinear_cell(src.width, src.height, x, y)?;
    Some(interpolate(src, x0, y0, fx, fy))
}

/// Bilinear sample with the coordinate clamped into the image first.
#[inline]
pub fn sample_bilinear_clamped(src: &BandImageView<'_>, x: f64, y: f64) -> f32 {
    let xc = x.clamp(0.0, (src.width - 1) as f64);
    let yc = y.clamp(0.0, (src.height - 1) as f64);
    sample_bilinear(src, xc, yc).unwrap_or(0.0)
}

/// Bilinear sample that also requires all contributing pixels to be valid in `mask`.
#[inline]
pub fn sample_bilinear_masked(src: &BandImageView<'_>, mask: &Mask, x: f64, y: f64) -> Option<f32> {
    let (x0, y0, fx, fy) = bilinear_cell(src.width, src.height, x, y)?;
    let x1 = (x0 + 1).min(src.width - 1);
    let y1 = (y0 + 1).min(src.height - 1);
    // Only neighbours with a non-zero weight need to carry valid data.
    let used = [
        (x0, y0, fx < 1.0 && fy < 1.0),
        (x1, y0, fx > 0.0 && fy < 1.0),
        (x0, y1, fx < 1.0 && fy > 0.0),
        (x1, y1, fx > 0.0 && fy > 0.0),
    ];
    if used.iter().any(|&(px, py, w)| w && !mask.get(px, py)) {
        return None;
    }
    Some(interpolate(src, x0, y0, fx, fy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_length() {
        let err = BandImage::new(4, 3, vec![0.0; 11]).unwrap_err();
        assert_eq!(
            err,
            ImageError::BufferSize {
                width: 4,
                height: 3,
                expected: 12,
                got: 11
            }
        );
    }

    #[test]
    fn bilinear_is_exact_on_pixel_centres_and_linear_between() {
        let img = BandImage::from_fn(4, 3, |x, y| (x + 10 * y) as f32);
        let view = img.view();
        assert_eq!(sample_bilinear(&view, 2.0, 1.0), Some(12.0));
        assert_eq!(sample_bilinear(&view, 3.0, 2.0), Some(23.0));
        let v = sample_bilinear(&view, 1.5, 0.5).unwrap();
        assert!((v - 6.5).abs() < 1e-6);
        assert_eq!(sample_bilinear(&view, -0.01, 1.0), None);
        assert_eq!(sample_bilinear(&view, 3.01, 1.0), None);
        assert_eq!(sample_bilinear_clamped(&view, -5.0, 1.0), 10.0);
    }

    #[test]
    fn masked_sampling_rejects_invalid_neighbours() {
        let img = BandImage::filled(3, 3, 1.0);
        let mut mask = Mask::full(3, 3);
        mask.data[4] = false;
        assert_eq!(sample_bilinear_masked(&img.view(), &mask, 0.0, 0.0), Some(1.0));
        assert_eq!(sample_bilinear_masked(&img.view(), &mask, 0.5, 0.5), None);
    }

    #[test]
    fn mask_erosion_and_downsampling() {
        let mask = Mask::full(4, 4);
        let eroded = mask.eroded();
        assert_eq!(eroded.count(), 4);
        assert!(eroded.get(1, 1) && !eroded.get(0, 1));

        let mut m = Mask::full(4, 4);
        m.data[0] = false;
        let down = m.downsampled_2x();
        assert_eq!((down.width, down.height), (2, 2));
        assert_eq!(down.data, vec![false, true, true, true]);
    }
}
