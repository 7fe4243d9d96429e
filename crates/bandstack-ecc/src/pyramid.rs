use bandstack_core::filters::{downsample_2x, gaussian_blur_5};
use bandstack_core::{BandImage, Mask};

/// One pyramid level with its validity mask.
#[derive(Clone, Debug)]
pub struct PyramidLevel {
    pub image: BandImage,
    pub mask: Mask,
}

/// Gaussian pyramid; level 0 is full resolution.
///
/// A coarse pixel `(x, y)` covers fine pixels `2x..=2x+1`, so its centre sits
/// at `2x + 0.5` in fine coordinates.
#[derive(Clone, Debug)]
pub struct ImagePyramid {
    levels: Vec<PyramidLevel>,
}

impl ImagePyramid {
    /// Build `coarser + 1` levels by blurring and 2x box downsampling.
    pub fn build(image: BandImage, mask: Mask, coarser: usize) -> Self {
        let mut levels = Vec::with_capacity(coarser + 1);
        levels.push(PyramidLevel { image, mask });
        for _ in 0..coarser {
            let prev = &levels[levels.len() - 1];
            let image = downsample_2x(&gaussian_blur_5(&prev.image));
            // The blur spreads invalid pixels by two fine pixels (one coarse).
            let mask = grow_invalid(prev.mask.downsampled_2x());
            levels.push(PyramidLevel { image, mask });
        }
        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, idx: usize) -> &PyramidLevel {
        &self.levels[idx]
    }

    pub fn finest(&self) -> &PyramidLevel {
        &self.levels[0]
    }
}

/// Clear the 4-neighbours of every invalid pixel; image borders stay valid.
fn grow_invalid(mask: Mask) -> Mask {
    let (w, h) = (mask.width, mask.height);
    let mut out = mask.data.clone();
    for y in 0..h {
        for x in 0..w {
            if mask.get(x, y) {
                continue;
            }
            if x > 0 {
                out[y * w + x - 1] = false;
            }
            if x + 1 < w {
                out[y * w + x + 1] = false;
            }
            if y > 0 {
                out[(y - 1) * w + x] = false;
            }
            if y + 1 < h {
                out[(y + 1) * w + x] = false;
            }
        }
    }
    Mask {
        width: w,
        height: h,
        data: out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_halve_and_keep_full_masks_full() {
        let img = BandImage::from_fn(64, 40, |x, y| (x + y) as f32);
        let pyr = ImagePyramid::build(img, Mask::full(64, 40), 2);
        assert_eq!(pyr.num_levels(), 3);
        let coarse = pyr.level(2);
        assert_eq!((coarse.image.width, coarse.image.height), (16, 10));
        assert_eq!(coarse.mask.count(), 160);
    }

    #[test]
    fn invalid_regions_grow_when_downsampled() {
        let img = BandImage::filled(16, 16, 1.0);
        let mut mask = Mask::full(16, 16);
        mask.data[0] = false;
        let pyr = ImagePyramid::build(img, mask, 1);
        let m = &pyr.level(1).mask;
        assert!(!m.get(0, 0));
        assert!(!m.get(1, 0) && !m.get(0, 1));
        assert!(m.get(1, 1));
    }
}
