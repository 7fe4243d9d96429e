use crate::{sample_bilinear, sample_bilinear_masked, BandImage, BandImageView, LensModel, Mask};
use crate::WarpTransform;
use nalgebra::Point2;

/// Pull every output pixel through `map` into `src` and sample bilinearly.
///
/// Output pixels whose source falls outside `src` (or touches an invalid
/// pixel of `src_mask`) are written as 0 and cleared in the returned mask.
pub fn remap<F>(
    src: &BandImageView<'_>,
    src_mask: Option<&Mask>,
    out_w: usize,
    out_h: usize,
    map: F,
) -> (BandImage, Mask)
where
    F: Fn(Point2<f64>) -> Point2<f64>,
{
    let mut data = vec![0.0f32; out_w * out_h];
    let mut valid = vec![false; out_w * out_h];

    for y in 0..out_h {
        for x in 0..out_w {
            let p = map(Point2::new(x as f64, y as f64));
            let v = match src_mask {
                Some(m) => sample_bilinear_masked(src, m, p.x, p.y),
                None => sample_bilinear(src, p.x, p.y),
            };
            if let Some(v) = v {
                data[y * out_w + x] = v;
                valid[y * out_w + x] = true;
            }
        }
    }

    (
        BandImage {
            width: out_w,
            height: out_h,
            data,
        },
        Mask {
            width: out_w,
            height: out_h,
            data: valid,
        },
    )
}

/// Resample a raw band into its undistorted frame (same size, same camera matrix).
pub fn undistort_image(img: &BandImage, lens: &LensModel) -> (BandImage, Mask) {
    if lens.is_identity() {
        return (img.clone(), Mask::full(img.width, img.height));
    }
    remap(&img.view(), None, img.width, img.height, |p| lens.distort(p))
}

/// Warp `src` into the frame of `transform`'s domain: `out(p) = src(transform(p))`.
pub fn warp_image(
    src: &BandImage,
    src_mask: Option<&Mask>,
    transform: &WarpTransform,
    out_w: usize,
    out_h: usize,
) -> (BandImage, Mask) {
    remap(&src.view(), src_mask, out_w, out_h, |p| transform.apply(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_lens_returns_input_untouched() {
        let img = BandImage::from_fn(7, 5, |x, y| (x * y) as f32);
        let lens = LensModel::pinhole(7, 5, 10.0);
        let (out, mask) = undistort_image(&img, &lens);
        assert_eq!(out, img);
        assert_eq!(mask.count(), 35);
    }

    #[test]
    fn barrel_undistortion_invalidates_corners_only() {
        let img = BandImage::filled(64, 48, 1.0);
        let lens = LensModel::pinhole(64, 48, 60.0).with_radial(0.2, 0.0, 0.0);
        let (out, mask) = undistort_image(&img, &lens);
        assert!(!mask.get(0, 0));
        assert!(mask.get(32, 24));
        assert_eq!(out.get(0, 0), 0.0);
        assert_eq!(out.get(32, 24), 1.0);
    }

    #[test]
    fn integer_translation_shifts_pixels() {
        let img = BandImage::from_fn(6, 4, |x, y| (x + 10 * y) as f32);
        let t = WarpTransform::translation(2.0, 1.0);
        let (out, mask) = warp_image(&img, None, &t, 6, 4);
        assert_eq!(out.get(0, 0), img.get(2, 1));
        assert_eq!(out.get(3, 2), img.get(5, 3));
        assert!(!mask.get(4, 0));
        assert!(!mask.get(0, 3));
        assert_eq!(mask.count(), 4 * 3);
    }
}
