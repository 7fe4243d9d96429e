use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an ECC level stopped making sense.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceReason {
    /// One of the images has zero variance over the overlap.
    UniformImage,
    /// The steepest-descent Hessian could not be inverted.
    SingularHessian,
    /// Too few overlapping valid pixels to constrain the motion model.
    InsufficientOverlap,
    /// The ECC denominator became non-positive; the estimate is moving away.
    CorrelationDecreasing,
    /// The parameter update contained NaN or infinity.
    NonFiniteUpdate,
}

impl fmt::Display for DivergenceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DivergenceReason::UniformImage => "uniform image",
            DivergenceReason::SingularHessian => "singular hessian",
            DivergenceReason::InsufficientOverlap => "insufficient overlap",
            DivergenceReason::CorrelationDecreasing => "correlation decreasing",
            DivergenceReason::NonFiniteUpdate => "non-finite update",
        };
        f.write_str(s)
    }
}

/// Errors returned by pairwise registration.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RegistrationError {
    #[error("registration diverged at pyramid level {level}: {reason}")]
    Diverged {
        /// Pyramid level (0 = full resolution).
        level: usize,
        reason: DivergenceReason,
    },
    #[error("image too small for registration ({width}x{height}, need at least {min}x{min})")]
    ImageTooSmall {
        width: usize,
        height: usize,
        min: usize,
    },
    #[error("registration budget exhausted after {completed_levels} pyramid level(s)")]
    BudgetExhausted { completed_levels: usize },
}

/// Which side of a registration pair a warning refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRole {
    Reference,
    Target,
}

/// Advisory findings that do not stop registration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrationWarning {
    /// An input has little gradient energy; the estimate may be unreliable.
    InsufficientFeatures {
        role: ImageRole,
        score: f64,
        threshold: f64,
    },
}

impl fmt::Display for RegistrationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationWarning::InsufficientFeatures {
                role,
                score,
                threshold,
            } => write!(
                f,
                "{role:?} image has low texture (score {score:.2e} < {threshold:.2e})"
            ),
        }
    }
}
