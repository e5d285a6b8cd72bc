//! Coordinate model: the pixel ↔ sky transform state of one image.
//!
//! `CoordinateModel` mirrors the FITS WCS keywords the solver manipulates
//! (CRPIX, CRVAL, PC, CDELT, CTYPE) and implements the gnomonic (TAN)
//! projection between pixel and sky coordinates.
//!
//! # Coordinate conventions
//!
//! - **Pixel coordinates**: 0-based, +X along columns, +Y along rows.
//! - **Intermediate coordinates** `(ξ, η)`: degrees on the tangent plane at the
//!   reference sky position, ξ = East, η = North.
//! - **Sky coordinates**: ICRS `(ra, dec)` in degrees, `ra` in `[0, 360)`.
//!
//! # Pipeline
//!
//! ```text
//! pixel → subtract reference_pixel → linear_matrix · diag(axis_scale) → (ξ, η) → inverse TAN → sky
//! sky → TAN at reference_sky → (ξ, η) → inverse combined matrix → add reference_pixel → pixel
//! ```

use std::fmt;

use nalgebra::{Matrix2, Vector2};

/// Default projection codes when a header carries none.
pub const TAN_CTYPE: [&str; 2] = ["RA---TAN", "DEC--TAN"];

/// Determinants below this magnitude are treated as singular.
const SINGULAR_DET: f64 = 1e-30;

// ── TAN projection ─────────────────────────────────────────────────────────

/// Forward gnomonic (TAN) projection.
///
/// Projects celestial point `(ra, dec)` onto the tangent plane at `(crval_ra, crval_dec)`.
/// All angles in radians. Returns `(ξ, η)` in radians, or `None` if the point is on or
/// behind the tangent plane.
///
/// Reference: Calabretta & Greisen (2002), FITS WCS Paper II, §5.1.1.
#[inline]
pub fn tan_project(ra: f64, dec: f64, crval_ra: f64, crval_dec: f64) -> Option<(f64, f64)> {
    let da = ra - crval_ra;
    let (sin_dec, cos_dec) = dec.sin_cos();
    let (sin_dec0, cos_dec0) = crval_dec.sin_cos();
    let (sin_da, cos_da) = da.sin_cos();

    let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_da;
    if denom <= 1e-12 {
        return None;
    }

    let xi = cos_dec * sin_da / denom;
    let eta = (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_da) / denom;
    Some((xi, eta))
}

/// Inverse gnomonic (TAN) projection.
///
/// Given tangent-plane coordinates `(ξ, η)` in radians at reference point
/// `(crval_ra, crval_dec)`, returns celestial coordinates `(ra, dec)` in radians.
#[inline]
pub fn inverse_tan_project(xi: f64, eta: f64, crval_ra: f64, crval_dec: f64) -> (f64, f64) {
    let rho_sq = xi * xi + eta * eta;
    if rho_sq < 1e-30 {
        return (crval_ra, crval_dec);
    }

    let (sin_dec0, cos_dec0) = crval_dec.sin_cos();
    let rho = rho_sq.sqrt();
    let (sin_c, cos_c) = rho.atan().sin_cos();

    let dec = (cos_c * sin_dec0 + eta * sin_c * cos_dec0 / rho).asin();
    let ra = crval_ra + (xi * sin_c).atan2(rho * cos_dec0 * cos_c - eta * sin_dec0 * sin_c);
    (ra, dec)
}

// ── Projector seam ─────────────────────────────────────────────────────────

/// Forward/inverse mapping between pixel and sky coordinates.
///
/// The solver only ever calls these two operations; [`CoordinateModel`] is the
/// implementation shipped with the crate.
pub trait Projector {
    /// Pixel `(x, y)` → sky `(ra, dec)` in degrees.
    fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64);

    /// Sky `(ra, dec)` in degrees → pixel `(x, y)`.
    ///
    /// Returns `None` when the point cannot be projected (behind the tangent
    /// plane, or a singular linear transform).
    fn sky_to_pixel(&self, ra: f64, dec: f64) -> Option<(f64, f64)>;
}

// ── Projection type ────────────────────────────────────────────────────────

/// Sky projection named by the `projection_type` axis codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Gnomonic tangent-plane projection (`RA---TAN` / `DEC--TAN`).
    Tan,
}

impl Projection {
    /// Parse a pair of CTYPE strings.
    ///
    /// Empty codes are accepted as TAN, the documented default. Any other
    /// algorithm code yields `None`.
    pub fn from_ctype(ctype: &[String; 2]) -> Option<Self> {
        let code = |s: &str| -> Option<String> {
            let s = s.trim();
            if s.is_empty() {
                return Some("TAN".to_string());
            }
            // "RA---TAN" → "TAN"; the algorithm code is the last three characters
            s.get(s.len().saturating_sub(3)..).map(|c| c.to_ascii_uppercase())
        };
        match (code(&ctype[0])?.as_str(), code(&ctype[1])?.as_str()) {
            ("TAN", "TAN") => Some(Projection::Tan),
            _ => None,
        }
    }
}

// ── Coordinate model ───────────────────────────────────────────────────────

/// Pixel ↔ sky transform state of one image.
///
/// The effective linear transform from pixel offsets to intermediate
/// coordinates is `linear_matrix · diag(axis_scale)`. In canonical form (see
/// [`crate::solver::decompose`]) `axis_scale` carries all magnitude and
/// `linear_matrix` is a pure rotation/skew with unit-norm columns.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateModel {
    /// Anchor pixel `(x, y)` (CRPIX, 0-based).
    pub reference_pixel: [f64; 2],
    /// Sky position `(ra, dec)` in degrees of the anchor pixel (CRVAL).
    pub reference_sky: [f64; 2],
    /// Rotation/skew part of the transform (PC).
    pub linear_matrix: Matrix2<f64>,
    /// Per-pixel-axis scale in degrees per pixel (CDELT).
    pub axis_scale: [f64; 2],
    /// Axis projection codes (CTYPE), e.g. `["RA---TAN", "DEC--TAN"]`.
    pub projection_type: [String; 2],
}

impl Default for CoordinateModel {
    /// An empty header: everything zero except an identity linear matrix and unit scale.
    fn default() -> Self {
        Self {
            reference_pixel: [0.0, 0.0],
            reference_sky: [0.0, 0.0],
            linear_matrix: Matrix2::identity(),
            axis_scale: [1.0, 1.0],
            projection_type: [String::new(), String::new()],
        }
    }
}

impl CoordinateModel {
    /// A TAN model with square pixels, rotated by `rotation_deg` and optionally
    /// flipped so that RA increases to the left.
    pub fn tan(
        reference_pixel: [f64; 2],
        reference_sky: [f64; 2],
        scale_deg_per_px: f64,
        rotation_deg: f64,
        east_left: bool,
    ) -> Self {
        let (s, c) = rotation_deg.to_radians().sin_cos();
        let parity = if east_left { -1.0 } else { 1.0 };
        Self {
            reference_pixel,
            reference_sky,
            linear_matrix: Matrix2::new(parity * c, -s, parity * s, c),
            axis_scale: [scale_deg_per_px, scale_deg_per_px],
            projection_type: [TAN_CTYPE[0].to_string(), TAN_CTYPE[1].to_string()],
        }
    }

    /// Projection named by `projection_type`, or `None` if unsupported.
    pub fn projection(&self) -> Option<Projection> {
        Projection::from_ctype(&self.projection_type)
    }

    /// `linear_matrix · diag(axis_scale)`: pixel offsets → intermediate degrees.
    pub fn combined_matrix(&self) -> Matrix2<f64> {
        self.linear_matrix * Matrix2::from_diagonal(&Vector2::new(self.axis_scale[0], self.axis_scale[1]))
    }

    /// Replace the linear part by `combined`, keeping `axis_scale`.
    ///
    /// The new `linear_matrix` is `combined · diag(axis_scale)⁻¹`; axis scales
    /// below 1e-10 are clamped to avoid dividing by zero.
    pub fn with_combined_matrix(&self, combined: Matrix2<f64>) -> Self {
        let inv_scale = Matrix2::from_diagonal(&Vector2::new(
            1.0 / clamp_norm(self.axis_scale[0]),
            1.0 / clamp_norm(self.axis_scale[1]),
        ));
        Self {
            linear_matrix: combined * inv_scale,
            ..self.clone()
        }
    }

    /// Inverse of the combined matrix, or `None` if singular.
    pub fn inverse_combined_matrix(&self) -> Option<Matrix2<f64>> {
        let cd = self.combined_matrix();
        if cd.determinant().abs() < SINGULAR_DET {
            return None;
        }
        cd.try_inverse()
    }

    /// Per-pixel-axis scale in degrees per pixel: the column norms of the combined matrix.
    pub fn pixel_scales(&self) -> [f64; 2] {
        let cd = self.combined_matrix();
        [cd.column(0).norm(), cd.column(1).norm()]
    }

    /// Move the anchor to `pixel`, keeping the linear part.
    ///
    /// The new reference sky position is the current sky position of `pixel`, so
    /// the mapping is unchanged at the anchor and agrees elsewhere to second order
    /// in the anchor shift.
    pub fn recentered(&self, pixel: [f64; 2]) -> Self {
        let (ra, dec) = self.pixel_to_sky(pixel[0], pixel[1]);
        Self {
            reference_pixel: pixel,
            reference_sky: [ra, dec],
            ..self.clone()
        }
    }

    /// Pixel → intermediate tangent-plane coordinates in degrees.
    #[inline]
    pub fn pixel_to_intermediate(&self, x: f64, y: f64) -> (f64, f64) {
        let d = Vector2::new(x - self.reference_pixel[0], y - self.reference_pixel[1]);
        let w = self.combined_matrix() * d;
        (w.x, w.y)
    }

    /// Sky → intermediate tangent-plane coordinates in degrees.
    #[inline]
    pub fn sky_to_intermediate(&self, ra: f64, dec: f64) -> Option<(f64, f64)> {
        let (xi, eta) = tan_project(
            ra.to_radians(),
            dec.to_radians(),
            self.reference_sky[0].to_radians(),
            self.reference_sky[1].to_radians(),
        )?;
        Some((xi.to_degrees(), eta.to_degrees()))
    }
}

impl Projector for CoordinateModel {
    fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let (xi, eta) = self.pixel_to_intermediate(x, y);
        let (ra, dec) = inverse_tan_project(
            xi.to_radians(),
            eta.to_radians(),
            self.reference_sky[0].to_radians(),
            self.reference_sky[1].to_radians(),
        );
        (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    fn sky_to_pixel(&self, ra: f64, dec: f64) -> Option<(f64, f64)> {
        let (xi, eta) = self.sky_to_intermediate(ra, dec)?;
        let p = self.inverse_combined_matrix()? * Vector2::new(xi, eta);
        Some((p.x + self.reference_pixel[0], p.y + self.reference_pixel[1]))
    }
}

impl fmt::Display for CoordinateModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.linear_matrix;
        write!(
            f,
            "CTYPE = {:?} CRPIX = ({:.3}, {:.3}) CRVAL = ({:.6}°, {:.6}°) \
             PC = [{:.6}, {:.6}; {:.6}, {:.6}] CDELT = ({:.6e}, {:.6e})",
            self.projection_type,
            self.reference_pixel[0],
            self.reference_pixel[1],
            self.reference_sky[0],
            self.reference_sky[1],
            m[(0, 0)],
            m[(0, 1)],
            m[(1, 0)],
            m[(1, 1)],
            self.axis_scale[0],
            self.axis_scale[1],
        )
    }
}

/// Clamp a magnitude away from zero, keeping its sign.
#[inline]
pub(crate) fn clamp_norm(v: f64) -> f64 {
    const MIN_NORM: f64 = 1e-10;
    if v.abs() < MIN_NORM {
        MIN_NORM.copysign(v)
    } else {
        v
    }
}
