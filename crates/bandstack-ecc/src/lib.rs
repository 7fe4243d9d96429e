//! Pairwise band registration by enhanced correlation coefficient (ECC)
//! maximization, run coarse to fine over a Gaussian pyramid.
//!
//! ```no_run
//! use bandstack_core::{BandImage, LensModel};
//! use bandstack_ecc::{register, EccParams};
//!
//! # fn load(_: &str) -> BandImage { unimplemented!() }
//! let reference = load("band_2.tif");
//! let target = load("band_0.tif");
//! let lens = LensModel::pinhole(reference.width, reference.height, 1450.0);
//! let outcome = register(&reference, &target, &lens, &lens, None, &EccParams::default())?;
//! println!("{:?}", outcome.transform.translation_part());
//! # Ok::<(), bandstack_ecc::RegistrationError>(())
//! ```

mod ecc;
mod error;
mod motion;
mod params;
mod pyramid;
mod register;

pub use ecc::LevelReport;
pub use error::{DivergenceReason, ImageRole, RegistrationError, RegistrationWarning};
pub use params::{EccParams, MIN_LEVEL_SIDE};
pub use pyramid::{ImagePyramid, PyramidLevel};
pub use register::{
    register, register_prepared, register_with_budget, PreparedBand, RegistrationBudget,
    RegistrationOutcome,
};
