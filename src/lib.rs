//! # wcsfix
//!
//! **Astrometric calibration** of telescope images: given the sources detected
//! in an image, a list of reference stars around its approximate pointing and
//! a rough (possibly badly wrong) header coordinate model, recover an accurate
//! pixel ↔ sky transform.
//!
//! ## Features
//!
//! - **Robust**: rotation, scale and translation are found by consensus
//!   voting, tolerating large fractions of false detections and missing stars
//! - **No initial match required**: the header model may be off by degrees of
//!   rotation, a scale factor, and most of the field in translation
//! - **Affine refinement**: least-squares fits over a schedule of match
//!   thresholds, keeping only fits that beat the input model
//! - **Header repair**: unrealistic pixel scales, missing reference pixels,
//!   pointings and projections are repaired before solving
//! - **Deterministic**: identical inputs give identical results
//!
//! ## Example
//!
//! ```no_run
//! use wcsfix::{
//!     read_catalog_csv, seed_model, solve, CoordinateModel, HeaderInfo, HeaderOverrides,
//!     HeaderRepairConfig, PixelSource, SolveConfig,
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! // Header model and keywords (FITS I/O is up to the caller)
//! let raw = CoordinateModel::tan([447.0, 452.0], [16.65733, 3.54336], 1.2e-4, 0.0, true);
//! let header = HeaderInfo { naxis: Some([1024, 1024]), ..Default::default() };
//! let seeded = seed_model(&raw, &header, &HeaderOverrides::default(), &HeaderRepairConfig::default())?;
//!
//! // Detections from any source extractor, catalog stars from any service
//! let sources = vec![PixelSource::new(101.2, 220.7, 5400.0) /* ... */];
//! let catalog = read_catalog_csv("field_stars.csv")?;
//!
//! let config = seeded.configure(SolveConfig::default());
//! let result = solve(&sources, &catalog, &seeded.model, &config)?;
//! if let Some(q) = result.quality {
//!     println!("{} matches, rms {:.3} px", q.matches, q.rms_px);
//! }
//! println!("{}", result.model);
//! println!("{}", result.diagnostics);
//! # Ok(())
//! # }
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Rotation & scale**: every pair of detections is compared with every
//!    pair of projected catalog stars; each comparison votes for a rotation
//!    angle and scale ratio in a 2D histogram, and the peak is refined by least
//!    squares
//! 2. **Offset**: every detection/catalog combination votes for a pixel
//!    offset; the densest cluster's centroid is the translation
//! 3. **Refinement**: affine fits over matched pairs at several thresholds,
//!    each scored as `matches / (rms + ε)`
//! 4. **Decomposition**: the result is put in canonical form (all magnitude in
//!    the axis scales) and compared with the input model

pub mod catalogs;
pub mod header;
pub mod solver;
pub mod source;
pub mod star;
pub mod wcs;

pub use catalogs::{
    keep_brightest, merge_catalogs, read_catalog, read_catalog_csv, select_reference_stars,
    CatalogKind, CatalogQuery, CatalogSelectConfig, LocalCatalogs,
};
pub use header::{
    seed_model, HeaderInfo, HeaderOverrides, HeaderRepairConfig, PixscaleUnit, SeededModel,
};
pub use solver::decompose::{decompose, Diagnostics, RotationDirection};
pub use solver::matching::{evaluate, match_pairs, MatchSet, MatchedPair, Quality};
pub use solver::solve::solve;
pub use solver::{SolveCondition, SolveConfig, SolveError, SolveResult};
pub use source::PixelSource;
pub use star::CatalogStar;
pub use wcs::{CoordinateModel, Projection, Projector};
