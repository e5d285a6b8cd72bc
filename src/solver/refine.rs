//! Fine transformation refinement over a schedule of match thresholds.
//!
//! For each threshold the catalog is matched against the detections through
//! the best model found so far, and a full affine transform (rotation, two
//! scales, skew and translation) is fit to the matched pairs by linear least
//! squares. Every candidate is scored at the same fixed threshold, so a loose
//! threshold that admits outliers cannot win by match count alone, and the
//! input model's own score is the baseline to beat.

use nalgebra::{Matrix2, Matrix3, Vector3};
use tracing::debug;

use crate::source::PixelSource;
use crate::star::CatalogStar;
use crate::wcs::CoordinateModel;

use super::matching::{evaluate, match_pairs, project_catalog, score_of, MatchSet, Quality};
use super::SolveConfig;

/// A candidate model and its score.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformHypothesis {
    pub model: CoordinateModel,
    /// `matches / (rms + epsilon)` at the scoring threshold; zero without matches.
    pub score: f64,
    pub quality: Option<Quality>,
}

/// Result of [`refine`].
#[derive(Debug, Clone, PartialEq)]
pub struct RefineOutcome {
    /// Best-scoring hypothesis, the baseline included.
    pub best: TransformHypothesis,
    /// The input model scored.
    pub baseline: TransformHypothesis,
    /// True only if a fitted candidate strictly beat the baseline.
    pub improved: bool,
    /// Schedule entries skipped for too few matches or a degenerate fit.
    pub skipped: usize,
}

/// Score `model` at the configured scoring threshold.
pub fn score_model(
    sources: &[PixelSource],
    catalog: &[CatalogStar],
    model: CoordinateModel,
    config: &SolveConfig,
) -> TransformHypothesis {
    let quality = evaluate(sources, catalog, &model, config.score_threshold_px);
    TransformHypothesis {
        score: score_of(quality.as_ref(), config.score_epsilon),
        model,
        quality,
    }
}

/// Run the threshold schedule and keep the best hypothesis.
///
/// Every schedule entry is tried; there is no early exit, because a later,
/// tighter threshold can still beat an earlier improvement.
pub fn refine(
    sources: &[PixelSource],
    catalog: &[CatalogStar],
    model: &CoordinateModel,
    config: &SolveConfig,
) -> RefineOutcome {
    let baseline = score_model(sources, catalog, model.clone(), config);
    debug!(
        "Refine: baseline score {:.4} ({:?})",
        baseline.score, baseline.quality
    );

    let (best, skipped) = config.fine_thresholds.iter().fold(
        (baseline.clone(), 0usize),
        |(best, skipped), &threshold| {
            let matches = match_pairs(sources, catalog, &best.model, threshold);
            if matches.len() < config.min_matches {
                debug!(
                    "Refine: threshold {:.2} px gives {} matches (< {}), skipped",
                    threshold,
                    matches.len(),
                    config.min_matches
                );
                return (best, skipped + 1);
            }
            let Some(fitted) = fit_affine(sources, catalog, &best.model, &matches) else {
                debug!("Refine: threshold {:.2} px gives a degenerate fit, skipped", threshold);
                return (best, skipped + 1);
            };
            let candidate = score_model(sources, catalog, fitted, config);
            debug!(
                "Refine: threshold {:.2} px, {} pairs fit → score {:.4} ({:?})",
                threshold,
                matches.len(),
                candidate.score,
                candidate.quality
            );
            if candidate.score > best.score {
                (candidate, skipped)
            } else {
                (best, skipped)
            }
        },
    );

    let improved = best.score > baseline.score;
    RefineOutcome {
        best,
        baseline,
        improved,
        skipped,
    }
}

/// Least-squares affine correction of `model` from matched pairs.
///
/// With `c` the projected catalog position and `p0` the reference pixel, fits
/// `s ≈ A·(c − p0) + p0 + t` over the pairs. Since projected offsets from the
/// anchor are `CD⁻¹·w`, the corrected model has `CD' = CD·A⁻¹` and anchor
/// `p0 + t`, which is then moved back to `p0`. Returns `None` for fewer than
/// three usable pairs or singular normal equations.
pub fn fit_affine(
    sources: &[PixelSource],
    catalog: &[CatalogStar],
    model: &CoordinateModel,
    matches: &MatchSet,
) -> Option<CoordinateModel> {
    let projected = project_catalog(catalog, model);
    let [x0, y0] = model.reference_pixel;

    // Design rows [dx, dy, 1] shared by both output axes
    let mut ata = Matrix3::<f64>::zeros();
    let mut atb_x = Vector3::<f64>::zeros();
    let mut atb_y = Vector3::<f64>::zeros();
    let mut n_valid = 0usize;
    for pair in &matches.pairs {
        let Some((cx, cy)) = projected[pair.catalog_index] else {
            continue;
        };
        let src = &sources[pair.source_index];
        let row = Vector3::new(cx - x0, cy - y0, 1.0);
        ata += row * row.transpose();
        atb_x += row * (src.x - x0);
        atb_y += row * (src.y - y0);
        n_valid += 1;
    }
    if n_valid < 3 {
        return None;
    }

    let lu = ata.lu();
    let sol_x = lu.solve(&atb_x)?;
    let sol_y = lu.solve(&atb_y)?;

    let a = Matrix2::new(sol_x[0], sol_x[1], sol_y[0], sol_y[1]);
    let a_inv = a.try_inverse()?;
    let cd = model.combined_matrix() * a_inv;
    if cd.determinant().abs() < 1e-30 {
        return None;
    }

    let moved = CoordinateModel {
        reference_pixel: [x0 + sol_x[2], y0 + sol_y[2]],
        ..model.with_combined_matrix(cd)
    };
    Some(moved.recentered(model.reference_pixel))
}
