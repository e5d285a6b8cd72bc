//! Pipeline driver: rotation & scale → offset → refinement → decomposition.

use std::time::Instant;

use tracing::warn;

use crate::source::PixelSource;
use crate::star::CatalogStar;
use crate::wcs::CoordinateModel;

use super::decompose::decompose;
use super::matching::evaluate;
use super::offset::estimate_offset;
use super::refine::refine;
use super::rotation::estimate_rotation_scale;
use super::{SolveCondition, SolveConfig, SolveError, SolveResult};

/// Stage summaries go to `info` when the caller asked for verbose output.
macro_rules! stage_log {
    ($verbose:expr, $($arg:tt)*) => {
        if $verbose {
            tracing::info!($($arg)*);
        } else {
            tracing::debug!($($arg)*);
        }
    };
}

/// Solve the pixel → sky transform of one image.
///
/// `initial_model` is the header-derived starting point (see
/// [`crate::header::seed_model`]). Each enabled stage replaces the model when
/// it succeeds and records a [`SolveCondition`] when it cannot run; the
/// pipeline always continues with the latest model.
///
/// # Errors
///
/// Empty source or catalog lists, a projection other than TAN, or a model
/// whose linear part is singular.
pub fn solve(
    sources: &[PixelSource],
    catalog: &[CatalogStar],
    initial_model: &CoordinateModel,
    config: &SolveConfig,
) -> Result<SolveResult, SolveError> {
    let t0 = Instant::now();

    if sources.is_empty() {
        return Err(SolveError::NoSources);
    }
    if catalog.is_empty() {
        return Err(SolveError::NoCatalogStars);
    }
    if initial_model.projection().is_none() {
        return Err(SolveError::UnsupportedProjection(
            initial_model.projection_type.clone(),
        ));
    }
    if initial_model.inverse_combined_matrix().is_none() {
        return Err(SolveError::SingularModel);
    }

    stage_log!(
        config.verbose,
        "Solving with {} sources, {} catalog stars, initial model {}",
        sources.len(),
        catalog.len(),
        initial_model
    );

    let mut model = initial_model.clone();
    let mut conditions = Vec::new();

    // ── Rotation & scale ────────────────────────────────────────────────────
    let rotation_scale = if config.estimate_rotation_scale {
        match estimate_rotation_scale(sources, catalog, &model, config) {
            Ok((next, est)) => {
                stage_log!(
                    config.verbose,
                    "Rotation {:.4}°, scale {:.6} ({} peak votes)",
                    est.rotation_deg,
                    est.scale,
                    est.peak_votes
                );
                model = next;
                Some(est)
            }
            Err(condition) => {
                warn!("Rotation/scale estimate skipped: {:?}", condition);
                conditions.push(condition);
                None
            }
        }
    } else {
        None
    };

    // ── Offset ──────────────────────────────────────────────────────────────
    let offset = if config.estimate_offset {
        match estimate_offset(sources, catalog, &model, config) {
            Ok((next, est)) => {
                stage_log!(
                    config.verbose,
                    "Offset ({:.3}, {:.3}) px ({} votes)",
                    est.offset_px[0],
                    est.offset_px[1],
                    est.votes
                );
                model = next;
                Some(est)
            }
            Err(condition) => {
                warn!("Offset estimate skipped: {:?}", condition);
                conditions.push(condition);
                None
            }
        }
    } else {
        None
    };

    // ── Refinement ──────────────────────────────────────────────────────────
    let mut improved = false;
    if config.fine_transformation {
        let outcome = refine(sources, catalog, &model, config);
        if !config.fine_thresholds.is_empty() && outcome.skipped == config.fine_thresholds.len() {
            conditions.push(SolveCondition::InsufficientMatches);
        }
        stage_log!(
            config.verbose,
            "Refinement score {:.4} → {:.4} ({} of {} thresholds skipped)",
            outcome.baseline.score,
            outcome.best.score,
            outcome.skipped,
            config.fine_thresholds.len()
        );
        improved = outcome.improved;
        if improved {
            model = outcome.best.model;
        } else {
            conditions.push(SolveCondition::NoImprovement);
        }
    }

    // ── Final form ──────────────────────────────────────────────────────────
    let (model, diagnostics) = decompose(&model, initial_model);
    let quality = evaluate(sources, catalog, &model, config.score_threshold_px);
    if quality.is_none() && conditions.last() != Some(&SolveCondition::InsufficientMatches) {
        conditions.push(SolveCondition::InsufficientMatches);
    }

    let solve_time_ms = t0.elapsed().as_secs_f32() * 1000.0;
    match &quality {
        Some(q) => stage_log!(
            config.verbose,
            "Solved in {:.1} ms: {} matches, rms {:.3} px; {}",
            solve_time_ms,
            q.matches,
            q.rms_px,
            diagnostics
        ),
        None => warn!("Solve finished in {:.1} ms without matches", solve_time_ms),
    }

    Ok(SolveResult {
        model,
        quality,
        diagnostics,
        rotation_scale,
        offset,
        improved,
        conditions,
        solve_time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wcs::Projector;

    fn model() -> CoordinateModel {
        CoordinateModel::tan([100.0, 100.0], [15.0, -40.0], 2.0e-4, 0.0, true)
    }

    fn star_at(model: &CoordinateModel, x: f64, y: f64) -> CatalogStar {
        let (ra, dec) = model.pixel_to_sky(x, y);
        CatalogStar::new(ra, dec, 12.0)
    }

    #[test]
    fn empty_inputs_are_errors() {
        let m = model();
        let catalog = vec![star_at(&m, 10.0, 10.0)];
        let sources = vec![PixelSource::new(10.0, 10.0, 1.0)];
        let config = SolveConfig::default();
        assert!(matches!(solve(&[], &catalog, &m, &config), Err(SolveError::NoSources)));
        assert!(matches!(solve(&sources, &[], &m, &config), Err(SolveError::NoCatalogStars)));
    }

    #[test]
    fn unsupported_projection_is_an_error() {
        let m = CoordinateModel {
            projection_type: ["RA---SIN".to_string(), "DEC--SIN".to_string()],
            ..model()
        };
        let catalog = vec![star_at(&model(), 10.0, 10.0)];
        let sources = vec![PixelSource::new(10.0, 10.0, 1.0)];
        let err = solve(&sources, &catalog, &m, &SolveConfig::default()).unwrap_err();
        assert!(matches!(err, SolveError::UnsupportedProjection(_)));
        assert!(err.to_string().contains("RA---SIN"));
    }

    #[test]
    fn too_few_stars_keeps_model_and_reports_conditions() {
        let m = model();
        let catalog: Vec<CatalogStar> = [(20.0, 30.0), (150.0, 40.0), (90.0, 170.0)]
            .iter()
            .map(|&(x, y)| star_at(&m, x, y))
            .collect();
        let sources: Vec<PixelSource> = [(20.0, 30.0), (150.0, 40.0), (90.0, 170.0)]
            .iter()
            .map(|&(x, y)| PixelSource::new(x, y, 1.0))
            .collect();
        let result = solve(&sources, &catalog, &m, &SolveConfig::default()).unwrap();
        assert_eq!(
            &result.conditions[..2],
            &[SolveCondition::InsufficientSources, SolveCondition::InsufficientSources]
        );
        assert!(result.conditions.contains(&SolveCondition::InsufficientMatches));
        assert!(result.rotation_scale.is_none() && result.offset.is_none());
        assert!(!result.improved);
        assert!((result.model.combined_matrix() - m.combined_matrix()).norm() < 1e-15);
        assert_eq!(result.quality.map(|q| q.matches), Some(3));
        assert!(!result.is_clean());
    }

    #[test]
    fn disabled_stages_only_decompose() {
        let m = model();
        let catalog: Vec<CatalogStar> = (0..6).map(|k| star_at(&m, 20.0 * k as f64, 15.0 * k as f64 + 3.0)).collect();
        let sources: Vec<PixelSource> = (0..6)
            .map(|k| PixelSource::new(20.0 * k as f64, 15.0 * k as f64 + 3.0, 1.0))
            .collect();
        let config = SolveConfig {
            estimate_rotation_scale: false,
            estimate_offset: false,
            fine_transformation: false,
            ..SolveConfig::default()
        };
        let result = solve(&sources, &catalog, &m, &config).unwrap();
        assert!(result.conditions.is_empty());
        assert!(result.is_clean());
        assert!(result.diagnostics.rotation_deg < 1e-5);
        let [dx, dy] = result.diagnostics.offset_px.unwrap();
        assert!(dx.abs() < 1e-9 && dy.abs() < 1e-9);
    }
}
