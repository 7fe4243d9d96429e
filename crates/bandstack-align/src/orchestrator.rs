//! Multi-band alignment: registers every band of a capture into the frame of
//! a reference band.

use crate::Capture;
use bandstack_core::{compose, BandMapping, LensModel, WarpTransform};
use bandstack_ecc::{
    register_prepared, EccParams, PreparedBand, RegistrationBudget, RegistrationError,
    RegistrationOutcome, RegistrationWarning,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Which registration produced a band's transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlignmentPair {
    pub target: usize,
    pub anchor: usize,
}

impl AlignmentPair {
    pub const fn new(target: usize, anchor: usize) -> Self {
        Self { target, anchor }
    }
}

/// Registration graph.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "pairs", rename_all = "snake_case")]
pub enum Topology {
    /// Every band against the reference.
    #[default]
    Star,
    /// Star, then retry failed bands against resolved neighbours.
    StarWithChainFallback,
    /// Caller-provided tree rooted at the reference band.
    Explicit(Vec<AlignmentPair>),
}

/// What to do when some band could not be registered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Reject the capture.
    #[default]
    Strict,
    /// Use the identity for the band and log a warning.
    Lenient,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub reference_index: usize,
    pub ecc: EccParams,
    pub topology: Topology,
    pub strictness: Strictness,
    /// Optional starting transforms indexed by band (e.g. from a previous capture).
    pub initial_transforms: Vec<Option<WarpTransform>>,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            reference_index: 0,
            ecc: EccParams::default(),
            topology: Topology::Star,
            strictness: Strictness::Strict,
            initial_transforms: Vec::new(),
        }
    }
}

impl AlignmentConfig {
    pub fn with_reference(mut self, index: usize) -> Self {
        self.reference_index = index;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    fn initial_for(&self, band: usize) -> Option<WarpTransform> {
        self.initial_transforms.get(band).copied().flatten()
    }
}

/// Problems with an explicit registration tree.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PairError {
    #[error("pair refers to band {0}, which is not in the capture")]
    UnknownBand(usize),
    #[error("the reference band {0} cannot be a registration target")]
    TargetIsReference(usize),
    #[error("band {0} is registered more than once")]
    DuplicateTarget(usize),
    #[error("band {0} has no registration pair")]
    MissingTarget(usize),
    #[error("band {0} is anchored to itself")]
    SelfAnchor(usize),
    #[error("band {0} is not connected to the reference (cycle)")]
    Cycle(usize),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    #[error("reference index {index} out of range for {bands} bands")]
    InvalidReference { index: usize, bands: usize },
    #[error("invalid alignment pairs: {0}")]
    InvalidPairs(#[from] PairError),
    #[error("reference band could not be prepared: {0}")]
    Reference(RegistrationError),
    #[error("bands {0:?} could not be aligned")]
    UnresolvedBands(Vec<usize>),
    #[error("transform set has {got} entries, capture has {expected} bands")]
    LengthMismatch { expected: usize, got: usize },
    #[error("reference transform of band {0} is not the identity")]
    NonIdentityReference(usize),
    #[error("transform of band {0} is singular")]
    SingularTransform(usize),
}

/// Why one band has no transform.
#[derive(Clone, Debug, PartialEq)]
pub enum BandFailureKind {
    Registration(RegistrationError),
    /// The band's anchor was never resolved.
    AnchorUnresolved,
}

impl std::fmt::Display for BandFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BandFailureKind::Registration(e) => write!(f, "{e}"),
            BandFailureKind::AnchorUnresolved => f.write_str("anchor band unresolved"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BandFailure {
    pub band: usize,
    pub anchor: usize,
    pub kind: BandFailureKind,
}

/// Per-band registration summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BandReport {
    pub band: usize,
    pub anchor: usize,
    pub converged: bool,
    pub correlation: f64,
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RegistrationWarning>,
}

/// Result of [`align_capture`]. Failed bands have `None` transforms.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureAlignment {
    pub reference: usize,
    pub transforms: Vec<Option<WarpTransform>>,
    pub pairs: Vec<AlignmentPair>,
    pub failures: Vec<BandFailure>,
    pub reports: Vec<BandReport>,
}

impl CaptureAlignment {
    pub fn is_complete(&self) -> bool {
        self.transforms.iter().all(Option::is_some)
    }

    pub fn unresolved(&self) -> Vec<usize> {
        self.transforms
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Turn into a complete transform set according to `strictness`.
    pub fn resolve(self, strictness: Strictness) -> Result<ResolvedAlignment, AlignError> {
        let missing = self.unresolved();
        if !missing.is_empty() && strictness == Strictness::Strict {
            return Err(AlignError::UnresolvedBands(missing));
        }
        let reference = self.reference;
        let mut pairs = self.pairs;
        let transforms = self
            .transforms
            .into_iter()
            .enumerate()
            .map(|(band, t)| {
                t.unwrap_or_else(|| {
                    warn!("band {band}: alignment failed, falling back to identity transform");
                    pairs.push(AlignmentPair::new(band, reference));
                    WarpTransform::identity()
                })
            })
            .collect();
        ResolvedAlignment::new(reference, transforms, pairs)
    }

    /// Fill unresolved bands from a previously accepted alignment of the same rig.
    pub fn resolve_with_fallback(
        self,
        cached: &ResolvedAlignment,
    ) -> Result<ResolvedAlignment, AlignError> {
        if cached.len() != self.transforms.len() {
            return Err(AlignError::LengthMismatch {
                expected: self.transforms.len(),
                got: cached.len(),
            });
        }
        if cached.reference != self.reference {
            return Err(AlignError::InvalidReference {
                index: cached.reference,
                bands: self.transforms.len(),
            });
        }
        let mut pairs = self.pairs;
        let mut transforms = Vec::with_capacity(self.transforms.len());
        for (band, t) in self.transforms.into_iter().enumerate() {
            match t {
                Some(t) => transforms.push(t),
                None => {
                    warn!("band {band}: alignment failed, reusing cached transform");
                    // The cached transform is already in the reference frame.
                    pairs.push(AlignmentPair::new(band, self.reference));
                    transforms.push(cached.transforms[band]);
                }
            }
        }
        ResolvedAlignment::new(self.reference, transforms, pairs)
    }
}

/// Complete, validated transform set for a capture.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedAlignment {
    reference: usize,
    transforms: Vec<WarpTransform>,
    pairs: Vec<AlignmentPair>,
}

const IDENTITY_TOL: f64 = 1e-9;

impl ResolvedAlignment {
    fn new(
        reference: usize,
        transforms: Vec<WarpTransform>,
        mut pairs: Vec<AlignmentPair>,
    ) -> Result<Self, AlignError> {
        let n = transforms.len();
        if reference >= n {
            return Err(AlignError::InvalidReference { index: reference, bands: n });
        }
        let id = WarpTransform::identity();
        if (transforms[reference].m - id.m).abs().max() > IDENTITY_TOL {
            return Err(AlignError::NonIdentityReference(reference));
        }
        if let Some(band) = transforms.iter().position(|t| t.inverse().is_none()) {
            return Err(AlignError::SingularTransform(band));
        }
        pairs.sort_by_key(|p| p.target);
        validate_pairs(n, reference, &pairs)?;
        Ok(Self {
            reference,
            transforms,
            pairs,
        })
    }

    /// Rebuild from a saved alignment (see `AlignmentReport`), validating it.
    pub fn from_cached(
        reference: usize,
        transforms: Vec<WarpTransform>,
        pairs: Vec<AlignmentPair>,
    ) -> Result<Self, AlignError> {
        Self::new(reference, transforms, pairs)
    }

    /// Star alignment from bare transforms.
    pub fn from_transforms(
        reference: usize,
        transforms: Vec<WarpTransform>,
    ) -> Result<Self, AlignError> {
        let pairs = (0..transforms.len())
            .filter(|&b| b != reference)
            .map(|b| AlignmentPair::new(b, reference))
            .collect();
        Self::new(reference, transforms, pairs)
    }

    pub fn reference(&self) -> usize {
        self.reference
    }

    pub fn transforms(&self) -> &[WarpTransform] {
        &self.transforms
    }

    pub fn transform(&self, band: usize) -> Option<&WarpTransform> {
        self.transforms.get(band)
    }

    pub fn pairs(&self) -> &[AlignmentPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Per-band one-pass mappings with the given lenses.
    pub fn mappings(&self, lenses: &[LensModel]) -> Result<Vec<BandMapping>, AlignError> {
        if lenses.len() != self.transforms.len() {
            return Err(AlignError::LengthMismatch {
                expected: self.transforms.len(),
                got: lenses.len(),
            });
        }
        self.transforms
            .iter()
            .zip(lenses)
            .enumerate()
            .map(|(band, (t, lens))| compose(*t, *lens).ok_or(AlignError::SingularTransform(band)))
            .collect()
    }
}

/// Check that `pairs` form a tree over `0..n` rooted at `reference`.
pub fn validate_pairs(
    n: usize,
    reference: usize,
    pairs: &[AlignmentPair],
) -> Result<(), PairError> {
    let mut anchor_of: Vec<Option<usize>> = vec![None; n];
    for p in pairs {
        if p.target >= n {
            return Err(PairError::UnknownBand(p.target));
        }
        if p.anchor >= n {
            return Err(PairError::UnknownBand(p.anchor));
        }
        if p.target == reference {
            return Err(PairError::TargetIsReference(reference));
        }
        if p.target == p.anchor {
            return Err(PairError::SelfAnchor(p.target));
        }
        if anchor_of[p.target].replace(p.anchor).is_some() {
            return Err(PairError::DuplicateTarget(p.target));
        }
    }
    for band in (0..n).filter(|&b| b != reference) {
        let mut cur = band;
        let mut steps = 0;
        while cur != reference {
            cur = anchor_of[cur].ok_or(PairError::MissingTarget(cur))?;
            steps += 1;
            if steps > n {
                return Err(PairError::Cycle(band));
            }
        }
    }
    Ok(())
}

#[cfg(feature = "rayon")]
fn map_tasks<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    items.par_iter().map(f).collect()
}

#[cfg(not(feature = "rayon"))]
fn map_tasks<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    F: Fn(&T) -> R,
{
    items.iter().map(f).collect()
}

/// Mutable bookkeeping of one alignment run.
struct Progress {
    reference: usize,
    transforms: Vec<Option<WarpTransform>>,
    pairs: Vec<AlignmentPair>,
    reports: Vec<BandReport>,
    failures: Vec<BandFailure>,
}

impl Progress {
    fn accept(&mut self, pair: AlignmentPair, outcome: RegistrationOutcome) {
        let anchor_t = self.transforms[pair.anchor].unwrap_or_default();
        // anchor -> target composed with reference -> anchor.
        let composed = outcome.transform.compose(&anchor_t);
        let (tx, ty) = composed.translation_part();
        info!(
            "band {} <- {}: rho {:.4}, t=({tx:.2}, {ty:.2}), rot {:.3} deg{}",
            pair.target,
            pair.anchor,
            outcome.correlation,
            composed.rotation_degrees(),
            if outcome.converged { "" } else { " (not converged)" }
        );
        self.transforms[pair.target] = Some(composed);
        self.pairs.push(pair);
        self.reports.push(BandReport {
            band: pair.target,
            anchor: pair.anchor,
            converged: outcome.converged,
            correlation: outcome.correlation,
            iterations: outcome.total_iterations(),
            warnings: outcome.warnings,
        });
    }

    fn reject(&mut self, pair: AlignmentPair, kind: BandFailureKind) {
        warn!("band {} <- {}: {kind}", pair.target, pair.anchor);
        self.failures.retain(|f| f.band != pair.target);
        self.failures.push(BandFailure {
            band: pair.target,
            anchor: pair.anchor,
            kind,
        });
    }

    fn finish(mut self) -> CaptureAlignment {
        self.pairs.sort_by_key(|p| p.target);
        self.reports.sort_by_key(|r| r.band);
        self.failures.sort_by_key(|f| f.band);
        CaptureAlignment {
            reference: self.reference,
            transforms: self.transforms,
            pairs: self.pairs,
            failures: self.failures,
            reports: self.reports,
        }
    }
}

struct Aligner<'a> {
    prepared: Vec<Result<PreparedBand, RegistrationError>>,
    config: &'a AlignmentConfig,
    budget: &'a RegistrationBudget,
}

impl Aligner<'_> {
    fn initial_for(&self, pair: AlignmentPair, progress: &Progress) -> Option<WarpTransform> {
        if pair.anchor == progress.reference {
            return self.config.initial_for(pair.target);
        }
        // Relative guess from absolute guesses: W_t ∘ W_a⁻¹.
        let target = self.config.initial_for(pair.target)?;
        let anchor = self.config.initial_for(pair.anchor)?.inverse()?;
        Some(target.compose(&anchor))
    }

    fn register_pair(
        &self,
        pair: AlignmentPair,
        initial: Option<WarpTransform>,
    ) -> Result<RegistrationOutcome, RegistrationError> {
        let anchor = self.prepared[pair.anchor].as_ref().map_err(Clone::clone)?;
        let target = self.prepared[pair.target].as_ref().map_err(Clone::clone)?;
        register_prepared(anchor, target, initial, &self.config.ecc, self.budget)
    }

    /// Register one wave of independent pairs and record the results.
    fn run_wave(&self, pairs: &[AlignmentPair], progress: &mut Progress) {
        let jobs: Vec<(AlignmentPair, Option<WarpTransform>)> = pairs
            .iter()
            .map(|&p| (p, self.initial_for(p, progress)))
            .collect();
        let results = map_tasks(&jobs, |&(pair, initial)| self.register_pair(pair, initial));
        for ((pair, _), result) in jobs.into_iter().zip(results) {
            match result {
                Ok(outcome) => progress.accept(pair, outcome),
                Err(e) => progress.reject(pair, BandFailureKind::Registration(e)),
            }
        }
    }

    fn star(&self, progress: &mut Progress, n: usize) {
        let reference = progress.reference;
        let pairs: Vec<AlignmentPair> = (0..n)
            .filter(|&b| b != reference)
            .map(|b| AlignmentPair::new(b, reference))
            .collect();
        self.run_wave(&pairs, progress);
    }

    /// Retry failed bands against resolved non-reference bands, nearest index first.
    fn chain_fallback(&self, progress: &mut Progress) {
        loop {
            let failed: Vec<usize> = progress
                .failures
                .iter()
                .filter(|f| self.prepared[f.band].is_ok())
                .map(|f| f.band)
                .collect();
            let anchors: Vec<usize> = progress
                .transforms
                .iter()
                .enumerate()
                .filter(|&(b, t)| t.is_some() && b != progress.reference && self.prepared[b].is_ok())
                .map(|(b, _)| b)
                .collect();
            if failed.is_empty() || anchors.is_empty() {
                return;
            }

            let jobs: Vec<(usize, Vec<AlignmentPair>)> = failed
                .iter()
                .map(|&band| {
                    let mut candidates = anchors.clone();
                    candidates.sort_by_key(|&a| (a.abs_diff(band), a));
                    (
                        band,
                        candidates
                            .into_iter()
                            .map(|a| AlignmentPair::new(band, a))
                            .collect(),
                    )
                })
                .collect();
            let progress_ref: &Progress = progress;
            let results = map_tasks(&jobs, |(_, candidates)| {
                candidates.iter().find_map(|&pair| {
                    let initial = self.initial_for(pair, progress_ref);
                    match self.register_pair(pair, initial) {
                        Ok(outcome) => Some((pair, outcome)),
                        Err(e) => {
                            debug!("band {} <- {}: chain attempt failed: {e}", pair.target, pair.anchor);
                            None
                        }
                    }
                })
            });

            let mut progressed = false;
            for (pair, outcome) in results.into_iter().flatten() {
                progress.failures.retain(|f| f.band != pair.target);
                progress.accept(pair, outcome);
                progressed = true;
            }
            if !progressed {
                return;
            }
        }
    }

    /// Process an explicit tree in topological waves.
    fn explicit(&self, progress: &mut Progress, pairs: &[AlignmentPair]) {
        let mut pending: Vec<AlignmentPair> = pairs.to_vec();
        while !pending.is_empty() {
            let (ready, waiting): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|p| progress.transforms[p.anchor].is_some());
            if ready.is_empty() {
                // Every remaining anchor failed, directly or upstream.
                for pair in waiting {
                    progress.reject(pair, BandFailureKind::AnchorUnresolved);
                }
                return;
            }
            self.run_wave(&ready, progress);
            pending = waiting;
        }
    }
}

/// Align every band of `capture` into the frame of the reference band.
///
/// Per-band failures are collected in [`CaptureAlignment::failures`].
pub fn align_capture(
    capture: &Capture,
    config: &AlignmentConfig,
) -> Result<CaptureAlignment, AlignError> {
    align_capture_with_budget(capture, config, &RegistrationBudget::unlimited())
}

/// [`align_capture`] with a budget shared by every pairwise registration.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(bands = capture.len(), reference = config.reference_index))
)]
pub fn align_capture_with_budget(
    capture: &Capture,
    config: &AlignmentConfig,
    budget: &RegistrationBudget,
) -> Result<CaptureAlignment, AlignError> {
    let n = capture.len();
    let reference = config.reference_index;
    if reference >= n {
        return Err(AlignError::InvalidReference { index: reference, bands: n });
    }
    if let Topology::Explicit(pairs) = &config.topology {
        validate_pairs(n, reference, pairs)?;
    }

    let prepared = map_tasks(capture.bands(), |band| {
        PreparedBand::prepare(&band.image, &band.lens, &config.ecc)
    });
    if let Err(e) = &prepared[reference] {
        return Err(AlignError::Reference(e.clone()));
    }

    let mut transforms = vec![None; n];
    transforms[reference] = Some(WarpTransform::identity());
    let mut progress = Progress {
        reference,
        transforms,
        pairs: Vec::new(),
        reports: Vec::new(),
        failures: Vec::new(),
    };
    let aligner = Aligner {
        prepared,
        config,
        budget,
    };

    match &config.topology {
        Topology::Star => aligner.star(&mut progress, n),
        Topology::StarWithChainFallback => {
            aligner.star(&mut progress, n);
            aligner.chain_fallback(&mut progress);
        }
        Topology::Explicit(pairs) => aligner.explicit(&mut progress, pairs),
    }

    let result = progress.finish();
    info!(
        "aligned {}/{} bands to reference {reference}",
        result.transforms.iter().filter(|t| t.is_some()).count(),
        n
    );
    Ok(result)
}
