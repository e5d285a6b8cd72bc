//! Translation recovery with the linear part held fixed.
//!
//! Every source/catalog combination implies a pixel offset. True
//! correspondences all imply the same offset while false ones scatter, so the
//! densest cell of a 2D offset histogram marks the translation. Its centroid is
//! then sharpened by a few iterations of local averaging.
//!
//! In `fast` mode the histogram is skipped: each source is paired with its
//! nearest projected catalog star and the median offset is taken. That is only
//! reliable when the model is already within about half a star spacing.

use std::collections::HashMap;

use tracing::debug;

use crate::source::PixelSource;
use crate::star::CatalogStar;
use crate::wcs::CoordinateModel;

use super::matching::project_catalog;
use super::{SolveCondition, SolveConfig};

/// Local-averaging passes after the histogram peak is found.
const CENTROID_ITERATIONS: usize = 3;

/// Translation found by [`estimate_offset`] plus diagnostic counts.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetEstimate {
    /// Offset `(dx, dy)` in pixels from projected catalog positions to detections.
    pub offset_px: [f64; 2],
    /// Offsets supporting the estimate (peak neighborhood, or nearest-neighbor count in fast mode).
    pub votes: usize,
    /// Offsets considered within the search radius.
    pub candidates: usize,
    /// Search radius in pixels.
    pub search_radius_px: f64,
}

/// Recover the translation of `model` and return the shifted model.
///
/// The returned model keeps the original reference pixel; the recovered shift is
/// carried by a new reference sky position. Fewer than `config.min_sources`
/// sources or projectable catalog stars leaves the model to the caller and
/// signals [`SolveCondition::InsufficientSources`].
pub fn estimate_offset(
    sources: &[PixelSource],
    catalog: &[CatalogStar],
    model: &CoordinateModel,
    config: &SolveConfig,
) -> Result<(CoordinateModel, OffsetEstimate), SolveCondition> {
    if sources.len() < config.min_sources || catalog.len() < config.min_sources {
        debug!(
            "Offset: too few inputs ({} sources, {} catalog stars)",
            sources.len(),
            catalog.len()
        );
        return Err(SolveCondition::InsufficientSources);
    }

    let projected: Vec<(f64, f64)> = project_catalog(catalog, model).into_iter().flatten().collect();
    if projected.len() < config.min_sources {
        debug!("Offset: only {} catalog stars project onto the image plane", projected.len());
        return Err(SolveCondition::InsufficientSources);
    }

    let radius = config.offset_search_radius(sources);
    let estimate = if config.fast_offset {
        nearest_neighbor_offset(sources, &projected, radius)
    } else {
        voted_offset(sources, &projected, radius, config.offset_bin_px)
    };
    let Some(estimate) = estimate else {
        debug!("Offset: no source/catalog offsets within {:.1} px", radius);
        return Err(SolveCondition::InsufficientSources);
    };

    debug!(
        "Offset: ({:.3}, {:.3}) px from {} of {} candidate offsets (radius {:.1} px, fast={})",
        estimate.offset_px[0],
        estimate.offset_px[1],
        estimate.votes,
        estimate.candidates,
        radius,
        config.fast_offset,
    );

    Ok((apply_offset(model, estimate.offset_px), estimate))
}

/// Shift the pixel footprint of `model` by `offset` pixels.
///
/// Catalog stars projected through the result land `offset` further along than
/// through `model`. The tangent point is then moved back under the original
/// reference pixel.
pub fn apply_offset(model: &CoordinateModel, offset: [f64; 2]) -> CoordinateModel {
    let shifted = CoordinateModel {
        reference_pixel: [
            model.reference_pixel[0] + offset[0],
            model.reference_pixel[1] + offset[1],
        ],
        ..model.clone()
    };
    shifted.recentered(model.reference_pixel)
}

/// Number of offsets around the histogram peak; a consensus strength measure.
pub(crate) fn offset_support(
    sources: &[PixelSource],
    projected: &[(f64, f64)],
    radius: f64,
    bin: f64,
) -> usize {
    let offsets = collect_offsets(sources, projected, radius);
    densest_bin(&histogram(&offsets, bin)).map_or(0, |(_, votes)| votes)
}

// ── Voting ──────────────────────────────────────────────────────────────────

fn collect_offsets(sources: &[PixelSource], projected: &[(f64, f64)], radius: f64) -> Vec<[f64; 2]> {
    let radius_sq = radius * radius;
    let mut offsets = Vec::new();
    for src in sources {
        for &(px, py) in projected {
            let dx = src.x - px;
            let dy = src.y - py;
            if dx * dx + dy * dy <= radius_sq {
                offsets.push([dx, dy]);
            }
        }
    }
    offsets
}

#[inline]
fn bin_key(offset: &[f64; 2], bin: f64) -> (i64, i64) {
    ((offset[0] / bin).floor() as i64, (offset[1] / bin).floor() as i64)
}

fn histogram(offsets: &[[f64; 2]], bin: f64) -> HashMap<(i64, i64), usize> {
    let mut counts = HashMap::new();
    for o in offsets {
        *counts.entry(bin_key(o, bin)).or_insert(0) += 1;
    }
    counts
}

/// Occupied cell with the most votes in its 3×3 neighborhood.
///
/// Summing neighbors keeps a cluster split across a cell boundary together.
/// Ties go to the smallest key so the result does not depend on hash order.
fn densest_bin(counts: &HashMap<(i64, i64), usize>) -> Option<((i64, i64), usize)> {
    let mut best: Option<((i64, i64), usize)> = None;
    for &key in counts.keys() {
        let mut votes = 0;
        for di in -1..=1 {
            for dj in -1..=1 {
                votes += counts.get(&(key.0 + di, key.1 + dj)).copied().unwrap_or(0);
            }
        }
        best = match best {
            Some((bk, bv)) if bv > votes || (bv == votes && bk < key) => Some((bk, bv)),
            _ => Some((key, votes)),
        };
    }
    best
}

fn mean_where<F>(offsets: &[[f64; 2]], keep: F) -> Option<[f64; 2]>
where
    F: Fn(&[f64; 2]) -> bool,
{
    let (mut sx, mut sy, mut n) = (0.0, 0.0, 0usize);
    for o in offsets.iter().filter(|o| keep(o)) {
        sx += o[0];
        sy += o[1];
        n += 1;
    }
    (n > 0).then(|| [sx / n as f64, sy / n as f64])
}

fn voted_offset(
    sources: &[PixelSource],
    projected: &[(f64, f64)],
    radius: f64,
    bin: f64,
) -> Option<OffsetEstimate> {
    let offsets = collect_offsets(sources, projected, radius);
    let (peak, votes) = densest_bin(&histogram(&offsets, bin))?;

    let mut center = mean_where(&offsets, |o| {
        let k = bin_key(o, bin);
        (k.0 - peak.0).abs() <= 1 && (k.1 - peak.1).abs() <= 1
    })?;
    for _ in 0..CENTROID_ITERATIONS {
        let c = center;
        match mean_where(&offsets, |o| (o[0] - c[0]).hypot(o[1] - c[1]) <= bin) {
            Some(next) => center = next,
            None => break,
        }
    }

    Some(OffsetEstimate {
        offset_px: center,
        votes,
        candidates: offsets.len(),
        search_radius_px: radius,
    })
}

// ── Fast mode ───────────────────────────────────────────────────────────────

fn nearest_neighbor_offset(
    sources: &[PixelSource],
    projected: &[(f64, f64)],
    radius: f64,
) -> Option<OffsetEstimate> {
    let radius_sq = radius * radius;
    let mut dxs = Vec::with_capacity(sources.len());
    let mut dys = Vec::with_capacity(sources.len());
    for src in sources {
        let nearest = projected
            .iter()
            .map(|&(px, py)| (src.x - px, src.y - py))
            .min_by(|a, b| (a.0 * a.0 + a.1 * a.1).total_cmp(&(b.0 * b.0 + b.1 * b.1)));
        if let Some((dx, dy)) = nearest {
            if dx * dx + dy * dy <= radius_sq {
                dxs.push(dx);
                dys.push(dy);
            }
        }
    }

    let votes = dxs.len();
    Some(OffsetEstimate {
        offset_px: [median(&mut dxs)?, median(&mut dys)?],
        votes,
        candidates: votes,
        search_radius_px: radius,
    })
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    })
}
