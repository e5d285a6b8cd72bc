//! Define a pixel source (a detected point source) in an image.
//! Sources are the output of the external star-detection backend and are used
//! as input to every matching and estimation stage of the solver.
//!

/// A detected point source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSource {
    /// Position in pixels along columns (image x-axis), 0-based.
    pub x: f64,
    /// Position in pixels along rows (image y-axis), 0-based.
    pub y: f64,
    /// Integrated brightness (brighter = higher). The exact meaning is
    /// detector-dependent; it is only used for ordering.
    pub flux: f64,
}

impl PixelSource {
    pub fn new(x: f64, y: f64, flux: f64) -> Self {
        Self { x, y, flux }
    }

    /// Position as an `(x, y)` tuple.
    #[inline]
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

/// Indices of `sources` sorted brightest-first.
///
/// Ties keep their input order. NaN fluxes rank as the faintest, also in
/// input order.
pub fn brightness_order(sources: &[PixelSource]) -> Vec<usize> {
    let key = |i: usize| {
        let f = sources[i].flux;
        if f.is_nan() {
            f64::NEG_INFINITY
        } else {
            f
        }
    };
    let mut order: Vec<usize> = (0..sources.len()).collect();
    order.sort_by(|&a, &b| key(b).total_cmp(&key(a)));
    order
}

/// Axis-aligned footprint `(x_min, y_min, x_max, y_max)` covered by the sources.
pub fn footprint(sources: &[PixelSource]) -> Option<(f64, f64, f64, f64)> {
    let first = sources.first()?;
    Some(sources.iter().fold(
        (first.x, first.y, first.x, first.y),
        |(x0, y0, x1, y1), s| (x0.min(s.x), y0.min(s.y), x1.max(s.x), y1.max(s.y)),
    ))
}
