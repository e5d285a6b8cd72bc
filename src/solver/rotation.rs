//! Rotation and scale recovery by pair-vector voting.
//!
//! A rotation plus uniform scale about the image center maps every
//! catalog-pair separation vector onto the corresponding source-pair vector.
//! Comparing each source pair with each catalog pair gives one (angle, log
//! scale-ratio) vote. Correct correspondences pile up in one cell of a 2D
//! histogram; everything else spreads thinly over it.
//!
//! Pair orientation is arbitrary (`a→b` vs `b→a`), so angles are folded modulo
//! 180° before voting. The histogram peak is refined with a complex
//! least-squares fit over the votes near it, and the remaining 180° ambiguity
//! is settled by which of the two candidates gives the stronger translation
//! consensus.
//!
//! Voting runs in pixel space. The catalog is projected through the current
//! model, so the recovered angle and scale are corrections to that model.

use nalgebra::Matrix2;
use tracing::debug;

use crate::source::{brightness_order, PixelSource};
use crate::star::CatalogStar;
use crate::wcs::CoordinateModel;

use super::combinations::BrightestFirstPairs;
use super::matching::project_catalog;
use super::offset::offset_support;
use super::{SolveCondition, SolveConfig};

/// Result of [`estimate_rotation_scale`].
#[derive(Debug, Clone, PartialEq)]
pub struct RotationScaleEstimate {
    /// Rotation of the detections relative to the projected catalog, degrees in `(-180, 180]`.
    pub rotation_deg: f64,
    /// Size of the detection pattern relative to the projected catalog.
    pub scale: f64,
    /// Votes in the winning histogram cell.
    pub peak_votes: usize,
    /// Translation consensus of the chosen orientation.
    pub support: usize,
    /// Votes cast inside the scale search range.
    pub total_votes: usize,
}

/// A separation vector between two points.
#[derive(Debug, Clone, Copy)]
struct PairVector {
    dx: f64,
    dy: f64,
    log_len: f64,
    angle_deg: f64,
}

/// Histogram layout over folded angle `[0, 180)` and log scale ratio.
struct VoteGrid {
    angle_bin: f64,
    log_bin: f64,
    max_log: f64,
    n_angle: usize,
    n_scale: usize,
}

impl VoteGrid {
    fn new(config: &SolveConfig) -> Self {
        let (angle_bin, log_bin, factor) = config.voting_bins();
        let n_angle = (180.0 / angle_bin).round().max(1.0) as usize;
        let max_log = factor.max(1.0 + 1e-6).ln();
        let n_scale = ((2.0 * max_log) / log_bin).ceil().max(1.0) as usize;
        Self {
            angle_bin: 180.0 / n_angle as f64,
            log_bin,
            max_log,
            n_angle,
            n_scale,
        }
    }

    fn cell(&self, folded_angle: f64, log_scale: f64) -> Option<usize> {
        if log_scale.abs() >= self.max_log {
            return None;
        }
        let ia = ((folded_angle / self.angle_bin) as usize).min(self.n_angle - 1);
        let is = (((log_scale + self.max_log) / self.log_bin) as usize).min(self.n_scale - 1);
        Some(ia * self.n_scale + is)
    }

    fn center(&self, cell: usize) -> (f64, f64) {
        let ia = cell / self.n_scale;
        let is = cell % self.n_scale;
        (
            (ia as f64 + 0.5) * self.angle_bin,
            (is as f64 + 0.5) * self.log_bin - self.max_log,
        )
    }
}

/// Estimate the rotation and scale mapping the projected catalog onto the sources.
///
/// Returns the model with its linear part corrected by the estimate, together
/// with the estimate. With fewer than `config.min_sources` sources or catalog
/// stars, or no vote inside the scale search range, the model is left to the
/// caller and a [`SolveCondition`] is returned.
pub fn estimate_rotation_scale(
    sources: &[PixelSource],
    catalog: &[CatalogStar],
    model: &CoordinateModel,
    config: &SolveConfig,
) -> Result<(CoordinateModel, RotationScaleEstimate), SolveCondition> {
    if sources.len() < config.min_sources || catalog.len() < config.min_sources {
        debug!(
            "Rotation/scale: too few inputs ({} sources, {} catalog stars)",
            sources.len(),
            catalog.len()
        );
        return Err(SolveCondition::InsufficientSources);
    }

    let source_points: Vec<(f64, f64)> = brightness_order(sources)
        .into_iter()
        .map(|i| sources[i].position())
        .collect();
    let catalog_points = projected_by_brightness(catalog, model);
    if catalog_points.len() < config.min_sources {
        debug!(
            "Rotation/scale: only {} catalog stars project onto the image plane",
            catalog_points.len()
        );
        return Err(SolveCondition::InsufficientSources);
    }

    let src_pairs = pair_vectors(&source_points, config);
    let cat_pairs = pair_vectors(&catalog_points, config);

    let grid = VoteGrid::new(config);
    let mut counts = vec![0usize; grid.n_angle * grid.n_scale];
    let mut total_votes = 0usize;
    for sp in &src_pairs {
        for cp in &cat_pairs {
            let raw = (sp.angle_deg - cp.angle_deg).rem_euclid(360.0);
            if let Some(cell) = grid.cell(raw.rem_euclid(180.0), sp.log_len - cp.log_len) {
                counts[cell] += 1;
                total_votes += 1;
            }
        }
    }

    // First maximum wins, so ties resolve to the lowest cell.
    let (peak_cell, peak_votes) = counts
        .iter()
        .enumerate()
        .fold((0, 0), |best, (i, &c)| if c > best.1 { (i, c) } else { best });
    if peak_votes == 0 {
        debug!("Rotation/scale: no pair votes inside the scale search range");
        return Err(SolveCondition::InsufficientMatches);
    }

    let (peak_angle, peak_log) = grid.center(peak_cell);
    let coarse = fit_similarity(
        &src_pairs,
        &cat_pairs,
        (peak_angle, peak_log),
        (1.5 * grid.angle_bin, 1.5 * grid.log_bin),
    )
    .unwrap_or((peak_angle, peak_log));
    let (angle, log_scale) = fit_similarity(
        &src_pairs,
        &cat_pairs,
        coarse,
        (0.5 * grid.angle_bin, 0.5 * grid.log_bin),
    )
    .unwrap_or(coarse);
    let scale = log_scale.exp();

    // θ and θ + 180° explain the pair votes equally well.
    let radius = config.offset_search_radius(sources);
    let mut best: Option<(CoordinateModel, f64, usize)> = None;
    for candidate in [normalize_angle(angle), normalize_angle(angle + 180.0)] {
        let trial = apply_similarity(model, candidate, scale);
        let projected: Vec<(f64, f64)> = project_catalog(catalog, &trial).into_iter().flatten().collect();
        let support = offset_support(sources, &projected, radius, config.offset_bin_px);
        debug!("Rotation/scale: {:.3}° candidate has offset support {}", candidate, support);
        if best.as_ref().map_or(true, |b| support > b.2) {
            best = Some((trial, candidate, support));
        }
    }
    let Some((solved, rotation_deg, support)) = best else {
        return Err(SolveCondition::InsufficientMatches);
    };

    debug!(
        "Rotation/scale: {:.4}°, scale {:.6} ({} peak votes of {}, {} source pairs × {} catalog pairs)",
        rotation_deg,
        scale,
        peak_votes,
        total_votes,
        src_pairs.len(),
        cat_pairs.len(),
    );

    Ok((
        solved,
        RotationScaleEstimate {
            rotation_deg,
            scale,
            peak_votes,
            support,
            total_votes,
        },
    ))
}

/// Correct `model` so that projected catalog positions rotate by `rotation_deg`
/// and scale by `scale` about the reference pixel.
///
/// Pixel offsets from the anchor are `CD⁻¹ · w`; scaling them by `s·R(θ)` means
/// `CD' = CD · R(−θ) / s`. `axis_scale` is kept.
pub fn apply_similarity(model: &CoordinateModel, rotation_deg: f64, scale: f64) -> CoordinateModel {
    let (s, c) = rotation_deg.to_radians().sin_cos();
    let unrotate = Matrix2::new(c, s, -s, c);
    model.with_combined_matrix(model.combined_matrix() * unrotate / scale)
}

/// Projected catalog positions, brightest star first.
fn projected_by_brightness(catalog: &[CatalogStar], model: &CoordinateModel) -> Vec<(f64, f64)> {
    let projected = project_catalog(catalog, model);
    let mut order: Vec<usize> = (0..catalog.len()).collect();
    order.sort_by(|&a, &b| catalog[a].magnitude.total_cmp(&catalog[b].magnitude));
    order.into_iter().filter_map(|i| projected[i]).collect()
}

/// Separation vectors of a brightness-sorted point list, brightest pairs
/// first, up to `config.max_pairs_per_side`.
fn pair_vectors(points: &[(f64, f64)], config: &SolveConfig) -> Vec<PairVector> {
    BrightestFirstPairs::new(points.len())
        .filter_map(|(i, j)| {
            let dx = points[j].0 - points[i].0;
            let dy = points[j].1 - points[i].1;
            let len = dx.hypot(dy);
            (len >= config.min_pair_separation_px).then(|| PairVector {
                dx,
                dy,
                log_len: len.ln(),
                angle_deg: dy.atan2(dx).to_degrees(),
            })
        })
        .take(config.max_pairs_per_side)
        .collect()
}

/// Complex least-squares similarity over the votes near `center`.
///
/// With pair vectors as complex numbers, `a = Σ s·c̄ / Σ |c|²` minimizes
/// `Σ |s − a·c|²`; `arg a` is the rotation and `|a|` the scale. A source vector
/// whose vote lies nearer `center + 180°` is negated first so that both pair
/// orientations pull the same way.
fn fit_similarity(
    src_pairs: &[PairVector],
    cat_pairs: &[PairVector],
    center: (f64, f64),
    half_window: (f64, f64),
) -> Option<(f64, f64)> {
    let (center_angle, center_log) = center;
    let (mut num_re, mut num_im, mut den) = (0.0, 0.0, 0.0);
    let mut used = 0usize;

    for sp in src_pairs {
        for cp in cat_pairs {
            if (sp.log_len - cp.log_len - center_log).abs() > half_window.1 {
                continue;
            }
            let d = (sp.angle_deg - cp.angle_deg - center_angle).rem_euclid(360.0);
            let (flip, off) = if d > 90.0 && d <= 270.0 {
                (true, d - 180.0)
            } else if d > 270.0 {
                (false, d - 360.0)
            } else {
                (false, d)
            };
            if off.abs() > half_window.0 {
                continue;
            }
            let sign = if flip { -1.0 } else { 1.0 };
            let (sx, sy) = (sign * sp.dx, sign * sp.dy);
            num_re += sx * cp.dx + sy * cp.dy;
            num_im += sy * cp.dx - sx * cp.dy;
            den += cp.dx * cp.dx + cp.dy * cp.dy;
            used += 1;
        }
    }

    if used == 0 || den <= 0.0 {
        return None;
    }
    let angle = num_im.atan2(num_re).to_degrees();
    let scale = num_re.hypot(num_im) / den;
    if scale.is_nan() || scale <= 0.0 {
        return None;
    }
    Some((angle, scale.ln()))
}

/// Wrap an angle in degrees into `(-180, 180]`.
fn normalize_angle(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wcs::Projector;

    fn field(n: usize) -> (CoordinateModel, Vec<CatalogStar>) {
        let model = CoordinateModel::tan([400.0, 300.0], [210.0, 54.0], 2.5e-4, 8.0, true);
        // Deterministic scatter from a low-discrepancy sequence.
        let golden = 0.618_033_988_749_895_f64;
        let catalog = (0..n)
            .map(|k| {
                let u = (k as f64 * golden).fract();
                let v = (k as f64 * golden * golden + 0.31).fract();
                let (ra, dec) = model.pixel_to_sky(30.0 + 740.0 * u, 25.0 + 550.0 * v);
                CatalogStar::new(ra, dec, 8.0 + 0.05 * k as f64)
            })
            .collect();
        (model, catalog)
    }

    fn transformed_sources(
        model: &CoordinateModel,
        catalog: &[CatalogStar],
        rotation_deg: f64,
        scale: f64,
        shift: [f64; 2],
    ) -> Vec<PixelSource> {
        let (s, c) = rotation_deg.to_radians().sin_cos();
        let [cx, cy] = model.reference_pixel;
        catalog
            .iter()
            .enumerate()
            .map(|(k, star)| {
                let (x, y) = model.sky_to_pixel(star.ra, star.dec).unwrap();
                let (dx, dy) = (x - cx, y - cy);
                PixelSource::new(
                    cx + scale * (c * dx - s * dy) + shift[0],
                    cy + scale * (s * dx + c * dy) + shift[1],
                    1000.0 - k as f64,
                )
            })
            .collect()
    }

    #[test]
    fn recovers_rotation_and_scale() {
        let (model, catalog) = field(40);
        for &(angle, scale) in &[(12.0, 1.002), (-33.0, 0.985), (0.4, 1.0), (151.0, 1.03)] {
            let sources = transformed_sources(&model, &catalog, angle, scale, [6.0, -9.0]);
            let (_, est) =
                estimate_rotation_scale(&sources, &catalog, &model, &SolveConfig::default()).unwrap();
            assert!(
                (est.rotation_deg - angle).abs() < 0.1,
                "angle {} recovered as {}",
                angle,
                est.rotation_deg
            );
            assert!(
                (est.scale / scale - 1.0).abs() < 0.01,
                "scale {} recovered as {}",
                scale,
                est.scale
            );
            assert!(est.peak_votes > 0 && est.support >= catalog.len() / 2);
        }
    }

    #[test]
    fn nan_fluxes_still_vote() {
        let (model, catalog) = field(40);
        let mut sources = transformed_sources(&model, &catalog, -21.5, 1.0, [3.0, 4.0]);
        for s in sources.iter_mut().step_by(3) {
            s.flux = f64::NAN;
        }
        let (_, est) = estimate_rotation_scale(&sources, &catalog, &model, &SolveConfig::default()).unwrap();
        assert!((est.rotation_deg + 21.5).abs() < 0.1, "rotation {}", est.rotation_deg);
        assert!((est.scale - 1.0).abs() < 0.01, "scale {}", est.scale);
    }

    #[test]
    fn corrected_model_matches_without_translation() {
        let (model, catalog) = field(30);
        let sources = transformed_sources(&model, &catalog, -20.0, 1.01, [0.0, 0.0]);
        let (solved, _) = estimate_rotation_scale(&sources, &catalog, &model, &SolveConfig::default()).unwrap();
        for (star, src) in catalog.iter().zip(&sources) {
            let (x, y) = solved.sky_to_pixel(star.ra, star.dec).unwrap();
            assert!(
                (x - src.x).hypot(y - src.y) < 0.5,
                "residual ({}, {}) vs ({}, {})",
                x,
                y,
                src.x,
                src.y
            );
        }
    }

    #[test]
    fn guessed_scale_widens_search() {
        let (model, catalog) = field(30);
        let sources = transformed_sources(&model, &catalog, 25.0, 3.0, [0.0, 0.0]);
        let narrow = estimate_rotation_scale(&sources, &catalog, &model, &SolveConfig::default());
        assert!(narrow.map_or(true, |(_, est)| (est.scale - 3.0).abs() > 0.1));

        let config = SolveConfig {
            scale_guessed: true,
            ..SolveConfig::default()
        };
        let (_, est) = estimate_rotation_scale(&sources, &catalog, &model, &config).unwrap();
        assert!((est.scale / 3.0 - 1.0).abs() < 0.01, "scale {}", est.scale);
        assert!((est.rotation_deg - 25.0).abs() < 0.2, "angle {}", est.rotation_deg);
    }

    #[test]
    fn too_few_catalog_stars() {
        let (model, catalog) = field(3);
        let sources = transformed_sources(&model, &catalog, 5.0, 1.0, [0.0, 0.0]);
        assert_eq!(
            estimate_rotation_scale(&sources, &catalog, &model, &SolveConfig::default()),
            Err(SolveCondition::InsufficientSources)
        );
    }

    #[test]
    fn apply_similarity_rotates_about_reference_pixel() {
        let (model, catalog) = field(5);
        let turned = apply_similarity(&model, 90.0, 2.0);
        let star = &catalog[2];
        let (x0, y0) = model.sky_to_pixel(star.ra, star.dec).unwrap();
        let (x1, y1) = turned.sky_to_pixel(star.ra, star.dec).unwrap();
        let [cx, cy] = model.reference_pixel;
        assert!((x1 - (cx - 2.0 * (y0 - cy))).abs() < 1e-6);
        assert!((y1 - (cy + 2.0 * (x0 - cx))).abs() < 1e-6);
    }

    #[test]
    fn angle_normalization() {
        assert!((normalize_angle(190.0) + 170.0).abs() < 1e-12);
        assert!((normalize_angle(-190.0) - 170.0).abs() < 1e-12);
        assert!((normalize_angle(45.0) - 45.0).abs() < 1e-12);
    }
}
