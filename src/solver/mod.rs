//! Astrometric solver: recover the pixel → sky transform of an image from
//! detected sources and a reference catalog.
//!
//! The pipeline threads one [`CoordinateModel`] value through its stages:
//!
//! 1. **Rotation & scale** ([`rotation`]): pair-vector voting recovers the
//!    rotation and uniform scale of the linear part, tolerant of false
//!    detections and a badly wrong starting model.
//! 2. **Offset** ([`offset`]): offset voting recovers the translation.
//! 3. **Refinement** ([`refine`]): affine least-squares fits over a schedule of
//!    match thresholds, keeping the best-scoring hypothesis.
//! 4. **Decomposition** ([`decompose`]): canonical form of the result and its
//!    difference from the input model.
//!
//! Matching and quality evaluation ([`matching`]) are shared by all stages.
//! Stages that cannot run report a [`SolveCondition`] and pass the model on
//! unchanged; only inputs no stage could ever work with are a [`SolveError`].

pub mod combinations;
pub mod decompose;
pub mod matching;
pub mod offset;
pub mod refine;
pub mod rotation;
pub mod solve;

use thiserror::Error;

use crate::source::{footprint, PixelSource};
use crate::wcs::CoordinateModel;

use self::decompose::Diagnostics;
use self::matching::Quality;
use self::offset::OffsetEstimate;
use self::rotation::RotationScaleEstimate;

// ── Conditions and errors ───────────────────────────────────────────────────

/// Recoverable condition met by one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveCondition {
    /// Too few sources or catalog stars for an estimator; the model was left unchanged.
    InsufficientSources,
    /// Too few matched pairs for a fit or a quality figure.
    InsufficientMatches,
    /// Refinement did not beat the input model's score; the input model was kept.
    NoImprovement,
}

/// Failure that makes the image unsolvable.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("no detected sources")]
    NoSources,
    #[error("no catalog stars")]
    NoCatalogStars,
    #[error("unsupported projection {0:?}")]
    UnsupportedProjection([String; 2]),
    #[error("coordinate model has a singular linear transform")]
    SingularModel,
}

// ── Configuration ───────────────────────────────────────────────────────────

/// Parameters controlling a solve.
#[derive(Debug, Clone)]
pub struct SolveConfig {
    /// The input pixel scale is a placeholder: search a much wider scale range
    /// with coarser bins. Default false.
    pub scale_guessed: bool,
    /// The catalog query radius was enlarged because the pointing was unknown;
    /// widen the offset search accordingly. Default false.
    pub increase_fov: bool,
    /// Estimate the offset from nearest neighbors instead of voting. Faster,
    /// but only reliable when the model is already nearly right. Default false.
    pub fast_offset: bool,
    /// Match thresholds tried by the refiner, in pixels, in order.
    pub fine_thresholds: Vec<f64>,
    /// Log stage summaries at `info` instead of `debug`. Default false.
    pub verbose: bool,

    /// Run the rotation & scale stage. Default true.
    pub estimate_rotation_scale: bool,
    /// Run the offset stage. Default true.
    pub estimate_offset: bool,
    /// Run the refinement stage. Default true.
    pub fine_transformation: bool,

    /// Match threshold in pixels used to score hypotheses and report the final quality. Default 3.
    pub score_threshold_px: f64,
    /// `ε` in `matches / (rms + ε)`. Default 10.
    pub score_epsilon: f64,
    /// Fewest matched pairs accepted for an affine fit. Default 4.
    pub min_matches: usize,
    /// Fewest sources (and catalog stars) the voting estimators accept. Default 4.
    pub min_sources: usize,

    /// Most pair vectors per side used in rotation voting, brightest first. Default 3000.
    pub max_pairs_per_side: usize,
    /// Pairs closer than this many pixels do not vote. Default 5.
    pub min_pair_separation_px: f64,
    /// Angle bin of the rotation histogram in degrees. Default 1.
    pub angle_bin_deg: f64,
    /// Natural-log scale-ratio bin of the rotation histogram. Default 0.01.
    pub log_scale_bin: f64,
    /// Largest scale ratio searched, either way. Default 1.5.
    pub scale_search_factor: f64,
    /// `angle_bin_deg` when `scale_guessed`. Default 2.
    pub guessed_angle_bin_deg: f64,
    /// `log_scale_bin` when `scale_guessed`. Default 0.02.
    pub guessed_log_scale_bin: f64,
    /// `scale_search_factor` when `scale_guessed`. Default 10.
    pub guessed_scale_search_factor: f64,

    /// Offset histogram bin in pixels. Default 2.
    pub offset_bin_px: f64,
    /// Offset search radius as a multiple of the source footprint half-diagonal. Default 1.
    pub offset_search_factor: f64,
    /// Extra radius multiplier when `increase_fov`. Default 2.5.
    pub increase_fov_factor: f64,
}

impl Default for SolveConfig {
    fn default() -> Self {
        Self {
            scale_guessed: false,
            increase_fov: false,
            fast_offset: false,
            fine_thresholds: vec![2.0, 3.0, 5.0, 8.0, 10.0, 6.0, 4.0, 20.0, 2.0, 1.0, 0.5],
            verbose: false,
            estimate_rotation_scale: true,
            estimate_offset: true,
            fine_transformation: true,
            score_threshold_px: 3.0,
            score_epsilon: 10.0,
            min_matches: 4,
            min_sources: 4,
            max_pairs_per_side: 3000,
            min_pair_separation_px: 5.0,
            angle_bin_deg: 1.0,
            log_scale_bin: 0.01,
            scale_search_factor: 1.5,
            guessed_angle_bin_deg: 2.0,
            guessed_log_scale_bin: 0.02,
            guessed_scale_search_factor: 10.0,
            offset_bin_px: 2.0,
            offset_search_factor: 1.0,
            increase_fov_factor: 2.5,
        }
    }
}

impl SolveConfig {
    /// `(angle bin, log-scale bin, scale search factor)` for the current `scale_guessed` setting.
    pub fn voting_bins(&self) -> (f64, f64, f64) {
        if self.scale_guessed {
            (
                self.guessed_angle_bin_deg,
                self.guessed_log_scale_bin,
                self.guessed_scale_search_factor,
            )
        } else {
            (self.angle_bin_deg, self.log_scale_bin, self.scale_search_factor)
        }
    }

    /// Largest source/catalog offset considered by offset voting, in pixels.
    ///
    /// Half the diagonal of the source footprint, times `offset_search_factor`,
    /// times `increase_fov_factor` when `increase_fov`. Never below two bins.
    pub fn offset_search_radius(&self, sources: &[PixelSource]) -> f64 {
        let half_diagonal = footprint(sources)
            .map(|(x0, y0, x1, y1)| 0.5 * (x1 - x0).hypot(y1 - y0))
            .unwrap_or(0.0);
        let widen = if self.increase_fov { self.increase_fov_factor } else { 1.0 };
        (half_diagonal * self.offset_search_factor * widen).max(2.0 * self.offset_bin_px)
    }
}

// ── Solve result ────────────────────────────────────────────────────────────

/// Result of [`solve::solve`].
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// Solved model in canonical form.
    pub model: CoordinateModel,
    /// Matches and RMS of `model` at `score_threshold_px`; `None` if nothing matches.
    pub quality: Option<Quality>,
    /// Difference between `model` and the input model.
    pub diagnostics: Diagnostics,
    /// Rotation & scale stage output, if it ran and succeeded.
    pub rotation_scale: Option<RotationScaleEstimate>,
    /// Offset stage output, if it ran and succeeded.
    pub offset: Option<OffsetEstimate>,
    /// Whether refinement beat the pre-refinement score.
    pub improved: bool,
    /// Conditions met along the way, in pipeline order.
    pub conditions: Vec<SolveCondition>,
    /// Wall-clock time spent solving, in milliseconds.
    pub solve_time_ms: f32,
}

impl SolveResult {
    /// True when the result has matches and no stage reported a problem
    /// other than [`SolveCondition::NoImprovement`].
    pub fn is_clean(&self) -> bool {
        self.quality.is_some()
            && self
                .conditions
                .iter()
                .all(|c| *c == SolveCondition::NoImprovement)
    }
}
