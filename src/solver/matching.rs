//! Pixel-space pair matching and match-quality evaluation.
//!
//! Catalog stars are projected into pixel space through the current
//! [`CoordinateModel`] and paired with detected sources by greedy one-to-one
//! assignment in ascending distance order, so one bright catalog star cannot
//! absorb several detections.

use crate::source::PixelSource;
use crate::star::CatalogStar;
use crate::wcs::{CoordinateModel, Projector};

/// A source/catalog correspondence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchedPair {
    /// Index into the source list.
    pub source_index: usize,
    /// Index into the catalog list.
    pub catalog_index: usize,
    /// Pixel distance between the source and the projected catalog star.
    pub residual: f64,
}

/// Output of [`match_pairs`].
#[derive(Debug, Clone, Default)]
pub struct MatchSet {
    /// Matched pairs in ascending residual order.
    pub pairs: Vec<MatchedPair>,
    /// Sources left without a partner, ascending index.
    pub unmatched_sources: Vec<usize>,
    /// Catalog stars left without a partner (including unprojectable ones), ascending index.
    pub unmatched_catalog: Vec<usize>,
}

impl MatchSet {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Root-mean-square residual in pixels, `None` without matches.
    pub fn rms(&self) -> Option<f64> {
        if self.pairs.is_empty() {
            return None;
        }
        let sum_sq: f64 = self.pairs.iter().map(|p| p.residual * p.residual).sum();
        Some((sum_sq / self.pairs.len() as f64).sqrt())
    }
}

/// Match count and residual RMS of a candidate transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quality {
    pub matches: usize,
    /// RMS pixel residual over the matched pairs.
    pub rms_px: f64,
}

impl Quality {
    /// `matches / (rms + epsilon)`.
    ///
    /// `epsilon > 0` keeps the score finite for a perfect fit and trades match
    /// count against residual size.
    pub fn score(&self, epsilon: f64) -> f64 {
        self.matches as f64 / (self.rms_px + epsilon)
    }
}

/// Project every catalog star to pixel space. Unprojectable stars map to `None`.
pub fn project_catalog(catalog: &[CatalogStar], model: &CoordinateModel) -> Vec<Option<(f64, f64)>> {
    catalog
        .iter()
        .map(|star| model.sky_to_pixel(star.ra, star.dec))
        .collect()
}

/// Greedy one-to-one matching of sources against the projected catalog.
///
/// Every source/catalog combination within `threshold` pixels is a candidate;
/// candidates are consumed in ascending distance (ties: ascending source index,
/// then ascending catalog index) and a source or star is used at most once.
pub fn match_pairs(
    sources: &[PixelSource],
    catalog: &[CatalogStar],
    model: &CoordinateModel,
    threshold: f64,
) -> MatchSet {
    let projected = project_catalog(catalog, model);
    match_projected(sources, &projected, threshold)
}

/// [`match_pairs`] over an already projected catalog.
pub fn match_projected(
    sources: &[PixelSource],
    projected: &[Option<(f64, f64)>],
    threshold: f64,
) -> MatchSet {
    let threshold_sq = threshold * threshold;

    // (dist_sq, source_idx, catalog_idx)
    let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
    if threshold > 0.0 {
        for (src_idx, src) in sources.iter().enumerate() {
            for (cat_idx, pos) in projected.iter().enumerate() {
                let Some((px, py)) = *pos else {
                    continue;
                };
                let dx = src.x - px;
                let dy = src.y - py;
                let d2 = dx * dx + dy * dy;
                if d2 <= threshold_sq {
                    candidates.push((d2, src_idx, cat_idx));
                }
            }
        }
    } else if threshold == 0.0 {
        // Exact coincidences only
        for (src_idx, src) in sources.iter().enumerate() {
            for (cat_idx, pos) in projected.iter().enumerate() {
                if *pos == Some((src.x, src.y)) {
                    candidates.push((0.0, src_idx, cat_idx));
                }
            }
        }
    }

    candidates.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    let mut used_src = vec![false; sources.len()];
    let mut used_cat = vec![false; projected.len()];
    let mut pairs = Vec::new();
    for (d2, src_idx, cat_idx) in candidates {
        if used_src[src_idx] || used_cat[cat_idx] {
            continue;
        }
        used_src[src_idx] = true;
        used_cat[cat_idx] = true;
        pairs.push(MatchedPair {
            source_index: src_idx,
            catalog_index: cat_idx,
            residual: d2.sqrt(),
        });
    }

    MatchSet {
        pairs,
        unmatched_sources: unused(&used_src),
        unmatched_catalog: unused(&used_cat),
    }
}

fn unused(used: &[bool]) -> Vec<usize> {
    used.iter()
        .enumerate()
        .filter(|(_, &u)| !u)
        .map(|(i, _)| i)
        .collect()
}

/// Match count and RMS residual of `model` at `threshold` pixels.
///
/// Returns `None` when nothing matches: the RMS is undefined and callers must
/// treat it as too few matches rather than as a perfect fit.
pub fn evaluate(
    sources: &[PixelSource],
    catalog: &[CatalogStar],
    model: &CoordinateModel,
    threshold: f64,
) -> Option<Quality> {
    let set = match_pairs(sources, catalog, model, threshold);
    Some(Quality {
        matches: set.len(),
        rms_px: set.rms()?,
    })
}

/// Score of `quality` with the no-match case mapped to zero.
pub fn score_of(quality: Option<&Quality>, epsilon: f64) -> f64 {
    quality.map_or(0.0, |q| q.score(epsilon))
}
