use bandstack_core::{BandImage, ImageSize, LensModel};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture has no bands")]
    Empty,
    #[error("band index {0} appears more than once")]
    DuplicateIndex(usize),
    #[error("band index {index} is missing (capture has {count} bands, indices must cover 0..{count})")]
    MissingIndex { index: usize, count: usize },
}

/// One spectral band: its pixels and the lens that imaged them.
#[derive(Clone, Debug)]
pub struct Band {
    /// Position of the band in the capture, `0..n`.
    pub index: usize,
    /// Optional human-readable name ("Blue", "NIR", ...).
    pub name: Option<String>,
    pub image: BandImage,
    pub lens: LensModel,
}

impl Band {
    pub fn new(index: usize, image: BandImage, lens: LensModel) -> Self {
        Self {
            index,
            name: None,
            image,
            lens,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn size(&self) -> ImageSize {
        self.image.size()
    }

    /// Name for log messages.
    pub fn label(&self) -> String {
        match &self.name {
            Some(n) => format!("{} ({n})", self.index),
            None => self.index.to_string(),
        }
    }
}

/// All bands of one trigger event, sorted by band index.
#[derive(Clone, Debug)]
pub struct Capture {
    bands: Vec<Band>,
}

impl Capture {
    /// Validate that band indices are unique and cover `0..n`, then sort.
    pub fn new(mut bands: Vec<Band>) -> Result<Self, CaptureError> {
        if bands.is_empty() {
            return Err(CaptureError::Empty);
        }
        let count = bands.len();
        let mut seen = vec![false; count];
        for band in &bands {
            if band.index >= count {
                // Some index below `count` must then be missing.
                continue;
            }
            if std::mem::replace(&mut seen[band.index], true) {
                return Err(CaptureError::DuplicateIndex(band.index));
            }
        }
        if let Some(index) = seen.iter().position(|s| !s) {
            // Distinguish "index too large but unique" from real duplicates.
            let mut indices: Vec<usize> = bands.iter().map(|b| b.index).collect();
            indices.sort_unstable();
            if let Some(w) = indices.windows(2).find(|w| w[0] == w[1]) {
                return Err(CaptureError::DuplicateIndex(w[0]));
            }
            return Err(CaptureError::MissingIndex { index, count });
        }
        bands.sort_by_key(|b| b.index);
        Ok(Self { bands })
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band(&self, index: usize) -> Option<&Band> {
        self.bands.get(index)
    }

    pub fn sizes(&self) -> Vec<ImageSize> {
        self.bands.iter().map(Band::size).collect()
    }

    pub fn lenses(&self) -> Vec<LensModel> {
        self.bands.iter().map(|b| b.lens).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(index: usize) -> Band {
        Band::new(
            index,
            BandImage::filled(4, 4, index as f32),
            LensModel::pinhole(4, 4, 3.0),
        )
    }

    #[test]
    fn bands_are_sorted_by_index() {
        let cap = Capture::new(vec![band(2), band(0), band(1)]).unwrap();
        let order: Vec<usize> = cap.bands().iter().map(|b| b.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(cap.band(1).unwrap().image.get(0, 0), 1.0);
    }

    #[test]
    fn duplicate_and_missing_indices_are_rejected() {
        assert_eq!(
            Capture::new(vec![band(0), band(1), band(1)]).unwrap_err(),
            CaptureError::DuplicateIndex(1)
        );
        assert_eq!(
            Capture::new(vec![band(0), band(3)]).unwrap_err(),
            CaptureError::MissingIndex { index: 1, count: 2 }
        );
        assert_eq!(Capture::new(vec![]).unwrap_err(), CaptureError::Empty);
    }

    #[test]
    fn labels_include_names() {
        assert_eq!(band(3).with_name("NIR").label(), "3 (NIR)");
        assert_eq!(band(0).label(), "0");
    }
}
