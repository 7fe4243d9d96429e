//! Small separable filters used by the registration front-end.
//!
//! All filters replicate border pixels and return a new image of the same
//! size, except [`downsample_2x`].

use crate::{BandImage, Mask};

#[inline]
fn at_clamped(img: &BandImage, x: isize, y: isize) -> f32 {
    let xc = x.clamp(0, img.width as isize - 1) as usize;
    let yc = y.clamp(0, img.height as isize - 1) as usize;
    img.get(xc, yc)
}

fn separable(img: &BandImage, kernel: &[f32]) -> BandImage {
    let r = (kernel.len() / 2) as isize;
    let (w, h) = (img.width, img.height);

    let mut tmp = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, &kv) in kernel.iter().enumerate() {
                acc += kv * at_clamped(img, x as isize + k as isize - r, y as isize);
            }
            tmp[y * w + x] = acc;
        }
    }
    let tmp = BandImage {
        width: w,
        height: h,
        data: tmp,
    };

    let mut out = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, &kv) in kernel.iter().enumerate() {
                acc += kv * at_clamped(&tmp, x as isize, y as isize + k as isize - r);
            }
            out[y * w + x] = acc;
        }
    }
    BandImage {
        width: w,
        height: h,
        data: out,
    }
}

/// 5-tap binomial blur (`[1 4 6 4 1] / 16`), used before pyramid decimation.
pub fn gaussian_blur_5(img: &BandImage) -> BandImage {
    separable(img, &[0.0625, 0.25, 0.375, 0.25, 0.0625])
}

/// 3-tap binomial blur (`[1 2 1] / 4`).
pub fn gaussian_blur_3(img: &BandImage) -> BandImage {
    separable(img, &[0.25, 0.5, 0.25])
}

/// Central-difference derivatives in pixel units; one-sided at the borders.
pub fn central_gradient(img: &BandImage) -> (BandImage, BandImage) {
    let (w, h) = (img.width, img.height);
    let mut gx = vec![0.0f32; w * h];
    let mut gy = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let (xl, xr) = (x.saturating_sub(1), (x + 1).min(w - 1));
            let (yu, yd) = (y.saturating_sub(1), (y + 1).min(h - 1));
            if xr > xl {
                gx[y * w + x] = (img.get(xr, y) - img.get(xl, y)) / (xr - xl) as f32;
            }
            if yd > yu {
                gy[y * w + x] = (img.get(x, yd) - img.get(x, yu)) / (yd - yu) as f32;
            }
        }
    }
    (
        BandImage {
            width: w,
            height: h,
            data: gx,
        },
        BandImage {
            width: w,
            height: h,
            data: gy,
        },
    )
}

/// 3x3 Sobel derivatives, scaled by 1/8 so a unit ramp yields 1.0.
pub fn sobel(img: &BandImage) -> (BandImage, BandImage) {
    let (w, h) = (img.width, img.height);
    let mut gx = vec![0.0f32; w * h];
    let mut gy = vec![0.0f32; w * h];
    for y in 0..h as isize {
        for x in 0..w as isize {
            let p = |dx: isize, dy: isize| at_clamped(img, x + dx, y + dy);
            let dx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            let dy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            let idx = y as usize * w + x as usize;
            gx[idx] = dx * 0.125;
            gy[idx] = dy * 0.125;
        }
    }
    (
        BandImage {
            width: w,
            height: h,
            data: gx,
        },
        BandImage {
            width: w,
            height: h,
            data: gy,
        },
    )
}

/// Edge image `0.5|gx| + 0.5|gy|` of the Sobel derivatives, lightly smoothed.
///
/// Registering edge images instead of raw intensities makes bands with
/// different spectral responses comparable.
pub fn edge_magnitude(img: &BandImage) -> BandImage {
    let (gx, gy) = sobel(img);
    let data = gx
        .data
        .iter()
        .zip(&gy.data)
        .map(|(a, b)| 0.5 * a.abs() + 0.5 * b.abs())
        .collect();
    gaussian_blur_3(&BandImage {
        width: img.width,
        height: img.height,
        data,
    })
}

/// Halve the resolution by averaging 2x2 blocks (odd trailing rows/cols are dropped).
pub fn downsample_2x(img: &BandImage) -> BandImage {
    let w = (img.width / 2).max(1);
    let h = (img.height / 2).max(1);
    let mut data = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let (x0, y0) = (2 * x, 2 * y);
            let x1 = (x0 + 1).min(img.width - 1);
            let y1 = (y0 + 1).min(img.height - 1);
            let s = img.get(x0, y0) + img.get(x1, y0) + img.get(x0, y1) + img.get(x1, y1);
            data.push(0.25 * s);
        }
    }
    BandImage {
        width: w,
        height: h,
        data,
    }
}

fn valid_range(img: &BandImage, mask: Option<&Mask>) -> Option<(f32, f32)> {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for (i, &v) in img.data.iter().enumerate() {
        if mask.is_some_and(|m| !m.data[i]) || !v.is_finite() {
            continue;
        }
        lo = lo.min(v);
        hi = hi.max(v);
    }
    (lo <= hi).then_some((lo, hi))
}

/// Linear min-max stretch of the valid pixels to `[0, 1]`.
///
/// Invalid pixels become 0. A constant image maps to all zeros.
pub fn normalize_min_max(img: &BandImage, mask: Option<&Mask>) -> BandImage {
    let Some((lo, hi)) = valid_range(img, mask) else {
        return BandImage::filled(img.width, img.height, 0.0);
    };
    let span = hi - lo;
    let data = img
        .data
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if span <= 0.0 || mask.is_some_and(|m| !m.data[i]) || !v.is_finite() {
                0.0
            } else {
                (v - lo) / span
            }
        })
        .collect();
    BandImage {
        width: img.width,
        height: img.height,
        data,
    }
}

/// Mean gradient magnitude over the valid interior divided by the intensity range.
///
/// Dimensionless; 0 for a constant image. Low values predict poor registration.
pub fn texture_score(img: &BandImage, mask: Option<&Mask>) -> f64 {
    let Some((lo, hi)) = valid_range(img, mask) else {
        return 0.0;
    };
    let span = (hi - lo) as f64;
    if span <= 0.0 {
        return 0.0;
    }
    let (gx, gy) = central_gradient(img);
    let interior = match mask {
        Some(m) => m.eroded(),
        None => Mask::full(img.width, img.height).eroded(),
    };
    let mut sum = 0.0f64;
    let mut n = 0usize;
    for (i, &ok) in interior.data.iter().enumerate() {
        if ok {
            sum += (gx.data[i] as f64).hypot(gy.data[i] as f64);
            n += 1;
        }
    }
    if n == 0 {
        return 0.0;
    }
    sum / n as f64 / span
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(w: usize, h: usize) -> BandImage {
        BandImage::from_fn(w, h, |x, y| 2.0 * x as f32 + 0.5 * y as f32)
    }

    #[test]
    fn blur_preserves_constant_and_linear_images() {
        let c = BandImage::filled(6, 5, 3.0);
        assert!(gaussian_blur_5(&c).data.iter().all(|&v| (v - 3.0).abs() < 1e-6));

        let r = ramp(9, 9);
        let b = gaussian_blur_5(&r);
        assert_relative_eq!(b.get(4, 4), r.get(4, 4), epsilon = 1e-5);
    }

    #[test]
    fn gradients_recover_ramp_slopes() {
        let r = ramp(8, 8);
        let (gx, gy) = central_gradient(&r);
        assert_relative_eq!(gx.get(3, 3), 2.0, epsilon = 1e-6);
        assert_relative_eq!(gy.get(3, 3), 0.5, epsilon = 1e-6);
        assert_relative_eq!(gx.get(0, 3), 2.0, epsilon = 1e-6);

        let (sx, sy) = sobel(&r);
        assert_relative_eq!(sx.get(4, 4), 2.0, epsilon = 1e-6);
        assert_relative_eq!(sy.get(4, 4), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn downsample_averages_blocks() {
        let img = BandImage::from_fn(4, 2, |x, _| x as f32);
        let d = downsample_2x(&img);
        assert_eq!((d.width, d.height), (2, 1));
        assert_eq!(d.data, vec![0.5, 2.5]);
    }

    #[test]
    fn normalize_stretches_valid_pixels_only() {
        let img = BandImage::new(2, 2, vec![1.0, 3.0, 5.0, 100.0]).unwrap();
        let mut mask = Mask::full(2, 2);
        mask.data[3] = false;
        let n = normalize_min_max(&img, Some(&mask));
        assert_eq!(n.data, vec![0.0, 0.5, 1.0, 0.0]);

        let flat = normalize_min_max(&BandImage::filled(3, 3, 7.0), None);
        assert!(flat.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn texture_score_is_zero_for_flat_images() {
        assert_eq!(texture_score(&BandImage::filled(10, 10, 0.4), None), 0.0);
        assert!(texture_score(&ramp(10, 10), None) > 0.01);
    }
}
