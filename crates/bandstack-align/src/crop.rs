//! Largest axis-aligned rectangle of the reference frame that every band covers.

use bandstack_core::{compose, BandMapping, ImageSize, LensModel, WarpTransform};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Safety margin (pixels) kept inside the common region.
const INSET_PX: f64 = 1.0;

/// Registration noise (pixels) tolerated before a bound snaps to the next pixel.
const SNAP_EPS: f64 = 1e-5;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CropError {
    #[error("bands do not share any overlapping region")]
    NoOverlap,
    #[error("transform of band {0} is singular")]
    SingularTransform(usize),
    #[error("got {transforms} transforms, {lenses} lenses and {sizes} band sizes")]
    LengthMismatch {
        transforms: usize,
        lenses: usize,
        sizes: usize,
    },
}

/// Integer rectangle in reference-frame pixels; `left`/`top` are inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    pub left: usize,
    pub top: usize,
    pub width: usize,
    pub height: usize,
}

impl CropRect {
    pub fn new(left: usize, top: usize, width: usize, height: usize) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Inclusive right column; `None` for an empty rectangle.
    pub fn right(&self) -> Option<usize> {
        (self.width > 0).then(|| self.left + self.width - 1)
    }

    /// Inclusive bottom row; `None` for an empty rectangle.
    pub fn bottom(&self) -> Option<usize> {
        (self.height > 0).then(|| self.top + self.height - 1)
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// True if the rectangle is non-empty and lies inside an image of `size`.
    pub fn fits_in(&self, size: ImageSize) -> bool {
        self.width > 0
            && self.height > 0
            && self.left + self.width <= size.width
            && self.top + self.height <= size.height
    }

    /// Reference-frame pixel centres on the rectangle border; empty for an
    /// empty rectangle.
    pub fn border_points(&self) -> Vec<Point2<f64>> {
        let (Some(r), Some(b)) = (self.right(), self.bottom()) else {
            return Vec::new();
        };
        let (l, t) = (self.left, self.top);
        let mut pts = Vec::with_capacity(2 * (self.width + self.height));
        for x in l..=r {
            pts.push(Point2::new(x as f64, t as f64));
            pts.push(Point2::new(x as f64, b as f64));
        }
        for y in t..=b {
            pts.push(Point2::new(l as f64, y as f64));
            pts.push(Point2::new(r as f64, y as f64));
        }
        pts
    }
}

/// Crop for bands that all share the reference band's size.
pub fn find_crop_bounds(
    image_size: ImageSize,
    transforms: &[WarpTransform],
    lenses: &[LensModel],
) -> Result<CropRect, CropError> {
    let sizes = vec![image_size; transforms.len()];
    find_crop_bounds_sized(image_size, &sizes, transforms, lenses)
}

/// Bounds of the valid region of one band, pushed into the reference frame.
#[derive(Clone, Copy, Debug)]
struct Bounds {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

impl Bounds {
    fn intersect(self, o: Bounds) -> Bounds {
        Bounds {
            left: self.left.max(o.left),
            top: self.top.max(o.top),
            right: self.right.min(o.right),
            bottom: self.bottom.min(o.bottom),
        }
    }
}

/// Push every border pixel of a band through `band_to_ref` and keep the
/// innermost coordinate of each edge (lens distortion bows the edges).
fn band_bounds(mapping: &BandMapping, size: ImageSize) -> Bounds {
    let (w, h) = (size.width, size.height);
    let (x1, y1) = ((w - 1) as f64, (h - 1) as f64);
    let mut b = Bounds {
        left: f64::NEG_INFINITY,
        top: f64::NEG_INFINITY,
        right: f64::INFINITY,
        bottom: f64::INFINITY,
    };
    for y in 0..h {
        let y = y as f64;
        b.left = b.left.max(mapping.band_to_ref(Point2::new(0.0, y)).x);
        b.right = b.right.min(mapping.band_to_ref(Point2::new(x1, y)).x);
    }
    for x in 0..w {
        let x = x as f64;
        b.top = b.top.max(mapping.band_to_ref(Point2::new(x, 0.0)).y);
        b.bottom = b.bottom.min(mapping.band_to_ref(Point2::new(x, y1)).y);
    }
    b
}

/// `size.contains` widened by `SNAP_EPS` on every side.
fn inside(p: Point2<f64>, size: ImageSize) -> bool {
    let (x1, y1) = ((size.width - 1) as f64, (size.height - 1) as f64);
    p.x.is_finite()
        && p.y.is_finite()
        && (-SNAP_EPS..=x1 + SNAP_EPS).contains(&p.x)
        && (-SNAP_EPS..=y1 + SNAP_EPS).contains(&p.y)
}

/// Which sides of `rect` pull a pixel from outside some band.
fn offending_sides(rect: &CropRect, mappings: &[BandMapping], sizes: &[ImageSize]) -> [bool; 4] {
    let (Some(r), Some(b)) = (rect.right(), rect.bottom()) else {
        return [true; 4];
    };
    let (l, t) = (rect.left, rect.top);
    let mut bad = [false; 4];
    for (m, &size) in mappings.iter().zip(sizes) {
        let ok = |x: usize, y: usize| inside(m.ref_to_band(Point2::new(x as f64, y as f64)), size);
        bad[0] |= (t..=b).any(|y| !ok(l, y));
        bad[1] |= (l..=r).any(|x| !ok(x, t));
        bad[2] |= (t..=b).any(|y| !ok(r, y));
        bad[3] |= (l..=r).any(|x| !ok(x, b));
    }
    bad
}

/// Crop for bands of individual sizes.
///
/// `reference_size` is the pixel grid of the reference frame; `sizes`,
/// `transforms` and `lenses` are indexed by band.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(bands = transforms.len()))
)]
pub fn find_crop_bounds_sized(
    reference_size: ImageSize,
    sizes: &[ImageSize],
    transforms: &[WarpTransform],
    lenses: &[LensModel],
) -> Result<CropRect, CropError> {
    if transforms.len() != lenses.len() || transforms.len() != sizes.len() {
        return Err(CropError::LengthMismatch {
            transforms: transforms.len(),
            lenses: lenses.len(),
            sizes: sizes.len(),
        });
    }
    if reference_size.width == 0 || reference_size.height == 0 {
        return Err(CropError::NoOverlap);
    }

    let mappings = transforms
        .iter()
        .zip(lenses)
        .enumerate()
        .map(|(band, (t, lens))| compose(*t, *lens).ok_or(CropError::SingularTransform(band)))
        .collect::<Result<Vec<_>, _>>()?;

    let grid = Bounds {
        left: 0.0,
        top: 0.0,
        right: (reference_size.width - 1) as f64,
        bottom: (reference_size.height - 1) as f64,
    };
    let mut common = grid;
    for (band, (m, &size)) in mappings.iter().zip(sizes).enumerate() {
        if size.width == 0 || size.height == 0 {
            return Err(CropError::NoOverlap);
        }
        let b = band_bounds(m, size);
        debug!(
            "band {band}: valid x [{:.2}, {:.2}], y [{:.2}, {:.2}]",
            b.left, b.right, b.top, b.bottom
        );
        common = common.intersect(b);
    }

    let left = (common.left + INSET_PX - SNAP_EPS).ceil();
    let top = (common.top + INSET_PX - SNAP_EPS).ceil();
    let right = (common.right - INSET_PX + SNAP_EPS).floor();
    let bottom = (common.bottom - INSET_PX + SNAP_EPS).floor();
    if !(left <= right && top <= bottom) || left < 0.0 || top < 0.0 {
        return Err(CropError::NoOverlap);
    }
    let mut rect = CropRect::new(
        left as usize,
        top as usize,
        (right - left) as usize + 1,
        (bottom - top) as usize + 1,
    );

    // Edge extrema only bound the region; shrink until the rectangle border
    // maps inside every band.
    loop {
        let bad = offending_sides(&rect, &mappings, sizes);
        if !bad.iter().any(|&b| b) {
            break;
        }
        let shrink_x = bad[0] as usize + bad[2] as usize;
        let shrink_y = bad[1] as usize + bad[3] as usize;
        if rect.width <= shrink_x || rect.height <= shrink_y {
            return Err(CropError::NoOverlap);
        }
        rect.left += bad[0] as usize;
        rect.top += bad[1] as usize;
        rect.width -= shrink_x;
        rect.height -= shrink_y;
    }

    debug!(
        "crop: left={} top={} width={} height={}",
        rect.left, rect.top, rect.width, rect.height
    );
    Ok(rect)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pinhole() -> LensModel {
        LensModel::pinhole(100, 80, 90.0)
    }

    #[test]
    fn identity_set_insets_by_one_pixel() {
        let size = ImageSize::new(100, 80);
        let rect = find_crop_bounds(size, &[WarpTransform::identity(); 3], &[pinhole(); 3]).unwrap();
        assert_eq!(rect, CropRect::new(1, 1, 98, 78));
    }

    #[test]
    fn integer_shifts_shrink_by_extreme_offsets() {
        let size = ImageSize::new(100, 80);
        let transforms = [
            WarpTransform::translation(3.0, -2.0),
            WarpTransform::identity(),
            WarpTransform::translation(-4.0, 1.0),
        ];
        let rect = find_crop_bounds(size, &transforms, &[pinhole(); 3]).unwrap();
        // x: +3 and -4 → 100 - 7 - 2; y: +1 and -2 → 80 - 3 - 2.
        assert_eq!(rect.width, 91);
        assert_eq!(rect.height, 75);
        assert_eq!((rect.left, rect.top), (5, 3));
        assert!(rect.fits_in(size));
    }

    #[test]
    fn solver_noise_does_not_cost_a_pixel() {
        let size = ImageSize::new(100, 80);
        let lenses = [pinhole(); 2];
        let exact = [WarpTransform::translation(-3.0, 2.0), WarpTransform::identity()];
        let noisy = [
            WarpTransform::translation(-3.0 - 1e-9, 2.0 + 1e-9),
            WarpTransform::identity(),
        ];
        let want = find_crop_bounds(size, &exact, &lenses).unwrap();
        assert_eq!(want, CropRect::new(4, 1, 95, 76));
        assert_eq!(find_crop_bounds(size, &noisy, &lenses).unwrap(), want);

        let noisy = [WarpTransform::translation(-3.0 + 4e-7, 2.0 - 4e-7), WarpTransform::identity()];
        assert_eq!(find_crop_bounds(size, &noisy, &lenses).unwrap(), want);
    }

    #[test]
    fn empty_rect_has_no_border() {
        let rect = CropRect::new(3, 4, 0, 5);
        assert!(rect.is_empty());
        assert_eq!(rect.right(), None);
        assert_eq!(rect.bottom(), Some(8));
        assert!(rect.border_points().is_empty());
        assert!(!rect.fits_in(ImageSize::new(10, 10)));
    }

    #[test]
    fn distorted_bands_stay_inside_their_grids() {
        let size = ImageSize::new(100, 80);
        let lens = pinhole().with_radial(0.15, 0.0, 0.0);
        let transforms = [
            WarpTransform::identity(),
            WarpTransform::euclidean(0.8, Point2::new(50.0, 40.0), 1.5, -0.5),
        ];
        let lenses = [lens, pinhole().with_radial(-0.1, 0.0, 0.0)];
        let rect = find_crop_bounds(size, &transforms, &lenses).unwrap();
        assert!(rect.fits_in(size));
        for (t, l) in transforms.iter().zip(&lenses) {
            let m = compose(*t, *l).unwrap();
            for p in rect.border_points() {
                assert!(size.contains(m.ref_to_band(p).x, m.ref_to_band(p).y), "{p:?}");
            }
        }
        assert!(rect.width > 60 && rect.height > 45);
    }

    #[test]
    fn disjoint_bands_have_no_overlap() {
        let size = ImageSize::new(50, 50);
        let transforms = [WarpTransform::identity(), WarpTransform::translation(60.0, 0.0)];
        let lenses = [LensModel::pinhole(50, 50, 40.0); 2];
        assert_eq!(
            find_crop_bounds(size, &transforms, &lenses),
            Err(CropError::NoOverlap)
        );
    }

    #[test]
    fn singular_transform_is_reported() {
        let size = ImageSize::new(50, 50);
        let singular = WarpTransform::new(nalgebra::Matrix3::zeros());
        let lenses = [LensModel::pinhole(50, 50, 40.0); 2];
        assert_eq!(
            find_crop_bounds(size, &[WarpTransform::identity(), singular], &lenses),
            Err(CropError::SingularTransform(1))
        );
    }

    #[test]
    fn per_band_sizes_are_respected() {
        let reference = ImageSize::new(100, 80);
        let sizes = [reference, ImageSize::new(60, 80)];
        let lenses = [pinhole(), LensModel::pinhole(60, 80, 90.0)];
        let rect = find_crop_bounds_sized(
            reference,
            &sizes,
            &[WarpTransform::identity(), WarpTransform::identity()],
            &lenses,
        )
        .unwrap();
        assert_eq!((rect.left, rect.width), (1, 58));
    }
}
