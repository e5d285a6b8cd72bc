//! Seed coordinate model from image header values.
//!
//! Real headers are often incomplete or wrong. [`seed_model`] applies the
//! repairs needed before a solve can start and reports which solver flags they
//! imply: a placeholder pixel scale sets `scale_guessed`, and an unknown
//! pointing or projection sets `increase_fov` and widens the catalog query.

use anyhow::bail;
use nalgebra::Matrix2;
use tracing::{info, warn};

use crate::solver::SolveConfig;
use crate::wcs::{CoordinateModel, Projector, TAN_CTYPE};

/// Unit of a `PIXSCALE` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixscaleUnit {
    ArcsecPerPixel,
    DegreesPerPixel,
}

/// Header keywords outside the WCS set that the repairs consult.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderInfo {
    /// Image size `(NAXIS1, NAXIS2)` in pixels.
    pub naxis: Option<[usize; 2]>,
    /// `PIXSCALE` value and unit.
    pub pixscale: Option<(f64, PixscaleUnit)>,
    /// `RA` keyword in degrees.
    pub ra: Option<f64>,
    /// `DEC` keyword in degrees.
    pub dec: Option<f64>,
}

/// User-supplied values that take precedence over the header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderOverrides {
    /// Right ascension of the image center in degrees.
    pub ra: Option<f64>,
    /// Declination of the image center in degrees.
    pub dec: Option<f64>,
    /// Projection codes to use when the header has none.
    pub projection: Option<[String; 2]>,
}

/// Constants of the header repairs.
#[derive(Debug, Clone)]
pub struct HeaderRepairConfig {
    /// Smallest believable pixel scale in deg/px. Default 1e-7.
    pub min_pixel_scale: f64,
    /// Largest believable pixel scale in deg/px. Default 5e-3.
    pub max_pixel_scale: f64,
    /// Scale used when the header's is unbelievable, deg/px. Default 8.43785734e-5 (0.30″/px).
    pub fallback_pixel_scale: f64,
    /// `PIXSCALE` is only trusted if the implied image size in arcmin lies in
    /// this open interval on both axes. Default (0.5, 20).
    pub pixscale_image_size_arcmin: (f64, f64),
    /// Model and `PIXSCALE` scales differing by more than this factor
    /// make `PIXSCALE` win. Default 10.
    pub pixscale_mismatch_factor: f64,
    /// Catalog query radius in arcmin. Default 4.
    pub fov_radius_arcmin: f64,
    /// Query radius multiplier when the pointing is uncertain. Default 2.5.
    pub increase_fov_factor: f64,
}

impl Default for HeaderRepairConfig {
    fn default() -> Self {
        Self {
            min_pixel_scale: 1e-7,
            max_pixel_scale: 5e-3,
            fallback_pixel_scale: 8.43785734e-05,
            pixscale_image_size_arcmin: (0.5, 20.0),
            pixscale_mismatch_factor: 10.0,
            fov_radius_arcmin: 4.0,
            increase_fov_factor: 2.5,
        }
    }
}

/// A repaired starting model and what the repairs imply for the solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SeededModel {
    pub model: CoordinateModel,
    /// Catalog query radius in arcmin.
    pub fov_radius_arcmin: f64,
    /// The pointing or projection was unknown.
    pub increase_fov: bool,
    /// The pixel scale is a placeholder.
    pub scale_guessed: bool,
    /// Sky position `(ra, dec)` in degrees to center the catalog query on.
    pub query_center: [f64; 2],
}

impl SeededModel {
    /// `config` with the flags implied by the repairs set.
    pub fn configure(&self, config: SolveConfig) -> SolveConfig {
        SolveConfig {
            scale_guessed: self.scale_guessed,
            increase_fov: self.increase_fov,
            ..config
        }
    }
}

/// Repair `raw` using header keywords and user overrides.
///
/// # Errors
///
/// Fails when the image size (`NAXIS1`/`NAXIS2`) is unknown; every repair
/// depends on it.
pub fn seed_model(
    raw: &CoordinateModel,
    header: &HeaderInfo,
    overrides: &HeaderOverrides,
    config: &HeaderRepairConfig,
) -> anyhow::Result<SeededModel> {
    let Some([nx, ny]) = header.naxis else {
        bail!("NAXIS1 or NAXIS2 missing from header");
    };
    let center = [nx as f64 / 2.0, ny as f64 / 2.0];

    let mut model = raw.clone();
    let mut fov_radius = config.fov_radius_arcmin;
    let mut increase_fov = false;
    let mut scale_guessed = false;

    // ── Pixel scale ─────────────────────────────────────────────────────────
    let scales = model.pixel_scales();
    if scales
        .iter()
        .any(|&s| s < config.min_pixel_scale || s > config.max_pixel_scale)
    {
        warn!(
            "Pixel scale ({:.3e}, {:.3e}) deg/px is unrealistic, guessing {:.3e}",
            scales[0], scales[1], config.fallback_pixel_scale
        );
        model.linear_matrix = Matrix2::identity();
        model.axis_scale = [config.fallback_pixel_scale; 2];
        scale_guessed = true;
    }

    if let Some((value, unit)) = header.pixscale {
        let arcsec = match unit {
            PixscaleUnit::ArcsecPerPixel => value,
            PixscaleUnit::DegreesPerPixel => value * 3600.0,
        };
        let size = [nx as f64 * arcsec / 60.0, ny as f64 * arcsec / 60.0];
        let (lo, hi) = config.pixscale_image_size_arcmin;
        if size.iter().all(|&s| s > lo && s < hi) {
            let header_scale = arcsec / 3600.0;
            let factor = config.pixscale_mismatch_factor;
            let mismatched = model.pixel_scales().iter().any(|&s| {
                let ratio = s / header_scale;
                ratio < 1.0 / factor || ratio > factor
            });
            if mismatched {
                warn!(
                    "Model pixel scale disagrees with PIXSCALE, using {:.3e} deg/px",
                    header_scale
                );
                model.linear_matrix = Matrix2::identity();
                model.axis_scale = [header_scale; 2];
                fov_radius = (size[0] / 2.0 + size[1] / 2.0) / std::f64::consts::SQRT_2;
                scale_guessed = true;
            }
        }
    }

    // ── Reference pixel and sky position ────────────────────────────────────
    if model.reference_pixel == [0.0, 0.0] {
        model.reference_pixel = center;
    }

    if model.reference_sky == [0.0, 0.0] {
        increase_fov = true;
        if let (Some(ra), Some(dec)) = (header.ra, header.dec) {
            info!("Using header RA/DEC ({:.5}°, {:.5}°) as reference sky position", ra, dec);
            model.reference_sky = [ra, dec];
        }
    }
    if let Some(ra) = overrides.ra {
        model.reference_sky[0] = ra;
        model.reference_pixel[0] = center[0];
    }
    if let Some(dec) = overrides.dec {
        model.reference_sky[1] = dec;
        model.reference_pixel[1] = center[1];
    }
    if model.reference_sky == [0.0, 0.0] {
        warn!("No sky position known for this image; supply RA/DEC overrides or header keywords");
    }

    // ── Projection ──────────────────────────────────────────────────────────
    if model.projection_type.iter().all(|c| c.trim().is_empty()) {
        increase_fov = true;
        model.projection_type = match &overrides.projection {
            Some(p) => p.clone(),
            None => {
                warn!("No projection in header, assuming {:?}", TAN_CTYPE);
                [TAN_CTYPE[0].to_string(), TAN_CTYPE[1].to_string()]
            }
        };
    }

    if increase_fov {
        fov_radius *= config.increase_fov_factor;
    }

    // ── Catalog query center ────────────────────────────────────────────────
    let [px, py] = model.reference_pixel;
    let outside = px < 0.0 || py < 0.0 || px > nx as f64 || py > ny as f64;
    let query_center = if !scale_guessed && outside {
        info!("Reference pixel outside the image, querying around the image center");
        let (ra, dec) = model.pixel_to_sky(center[0], center[1]);
        [ra, dec]
    } else {
        model.reference_sky
    };

    Ok(SeededModel {
        model,
        fov_radius_arcmin: fov_radius,
        increase_fov,
        scale_guessed,
        query_center,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> HeaderInfo {
        HeaderInfo {
            naxis: Some([1000, 800]),
            ..Default::default()
        }
    }

    fn good_model() -> CoordinateModel {
        CoordinateModel::tan([480.0, 410.0], [16.65733, 3.54336], 1.25e-4, 3.0, true)
    }

    #[test]
    fn good_header_is_untouched() {
        let raw = good_model();
        let seeded = seed_model(&raw, &header(), &HeaderOverrides::default(), &HeaderRepairConfig::default()).unwrap();
        assert_eq!(seeded.model, raw);
        assert!(!seeded.increase_fov && !seeded.scale_guessed);
        assert_eq!(seeded.fov_radius_arcmin, 4.0);
        assert_eq!(seeded.query_center, raw.reference_sky);
    }

    #[test]
    fn missing_naxis_is_an_error() {
        let err = seed_model(
            &good_model(),
            &HeaderInfo::default(),
            &HeaderOverrides::default(),
            &HeaderRepairConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("NAXIS"));
    }

    #[test]
    fn unrealistic_scale_is_replaced() {
        let raw = CoordinateModel {
            axis_scale: [1.0, 1.0],
            ..good_model()
        };
        let seeded = seed_model(&raw, &header(), &HeaderOverrides::default(), &HeaderRepairConfig::default()).unwrap();
        assert!(seeded.scale_guessed);
        assert_eq!(seeded.model.linear_matrix, Matrix2::identity());
        assert_eq!(seeded.model.axis_scale, [8.43785734e-05; 2]);
    }

    #[test]
    fn pixscale_keyword_wins_on_large_mismatch() {
        let header = HeaderInfo {
            pixscale: Some((0.45, PixscaleUnit::ArcsecPerPixel)),
            ..header()
        };
        // 1.25e-4 deg/px = 0.45″/px: consistent, nothing changes
        let seeded = seed_model(&good_model(), &header, &HeaderOverrides::default(), &HeaderRepairConfig::default()).unwrap();
        assert!(!seeded.scale_guessed);

        let raw = CoordinateModel {
            axis_scale: [2.0e-3, 2.0e-3],
            ..good_model()
        };
        let seeded = seed_model(&raw, &header, &HeaderOverrides::default(), &HeaderRepairConfig::default()).unwrap();
        assert!(seeded.scale_guessed);
        assert!((seeded.model.axis_scale[0] - 0.45 / 3600.0).abs() < 1e-15);
        // 7.5′ × 6′ image
        let expected = (7.5 / 2.0 + 6.0 / 2.0) / std::f64::consts::SQRT_2;
        assert!((seeded.fov_radius_arcmin - expected).abs() < 1e-12);
    }

    #[test]
    fn pixscale_in_degrees_and_out_of_range_sizes() {
        let raw = CoordinateModel {
            axis_scale: [2.0e-3, 2.0e-3],
            ..good_model()
        };
        let in_degrees = HeaderInfo {
            pixscale: Some((1.25e-4, PixscaleUnit::DegreesPerPixel)),
            ..header()
        };
        let seeded = seed_model(&raw, &in_degrees, &HeaderOverrides::default(), &HeaderRepairConfig::default()).unwrap();
        assert!((seeded.model.axis_scale[0] - 1.25e-4).abs() < 1e-15);

        // 3″/px on 1000 px is 50′: PIXSCALE ignored
        let huge = HeaderInfo {
            pixscale: Some((3.0, PixscaleUnit::ArcsecPerPixel)),
            ..header()
        };
        let seeded = seed_model(&raw, &huge, &HeaderOverrides::default(), &HeaderRepairConfig::default()).unwrap();
        assert!(!seeded.scale_guessed);
        assert_eq!(seeded.model.axis_scale, [2.0e-3; 2]);
    }

    #[test]
    fn missing_pointing_uses_header_radec_and_widens_fov() {
        let raw = CoordinateModel {
            reference_pixel: [0.0, 0.0],
            reference_sky: [0.0, 0.0],
            ..good_model()
        };
        let header = HeaderInfo {
            ra: Some(210.5),
            dec: Some(-12.25),
            ..header()
        };
        let seeded = seed_model(&raw, &header, &HeaderOverrides::default(), &HeaderRepairConfig::default()).unwrap();
        assert_eq!(seeded.model.reference_pixel, [500.0, 400.0]);
        assert_eq!(seeded.model.reference_sky, [210.5, -12.25]);
        assert!(seeded.increase_fov);
        assert_eq!(seeded.fov_radius_arcmin, 10.0);

        let config = seeded.configure(SolveConfig::default());
        assert!(config.increase_fov && !config.scale_guessed);
    }

    #[test]
    fn overrides_move_reference_to_center() {
        let overrides = HeaderOverrides {
            ra: Some(33.0),
            dec: Some(44.0),
            projection: None,
        };
        let seeded = seed_model(&good_model(), &header(), &overrides, &HeaderRepairConfig::default()).unwrap();
        assert_eq!(seeded.model.reference_sky, [33.0, 44.0]);
        assert_eq!(seeded.model.reference_pixel, [500.0, 400.0]);
        assert!(!seeded.increase_fov);
    }

    #[test]
    fn missing_projection_defaults_to_tan() {
        let raw = CoordinateModel {
            projection_type: [String::new(), String::new()],
            ..good_model()
        };
        let seeded = seed_model(&raw, &header(), &HeaderOverrides::default(), &HeaderRepairConfig::default()).unwrap();
        assert_eq!(seeded.model.projection_type, [TAN_CTYPE[0].to_string(), TAN_CTYPE[1].to_string()]);
        assert!(seeded.increase_fov);

        let overrides = HeaderOverrides {
            projection: Some(["RA---SIN".to_string(), "DEC--SIN".to_string()]),
            ..Default::default()
        };
        let seeded = seed_model(&raw, &header(), &overrides, &HeaderRepairConfig::default()).unwrap();
        assert_eq!(seeded.model.projection_type[0], "RA---SIN");
    }

    #[test]
    fn reference_outside_image_moves_query_center() {
        let raw = CoordinateModel {
            reference_pixel: [-300.0, 400.0],
            ..good_model()
        };
        let seeded = seed_model(&raw, &header(), &HeaderOverrides::default(), &HeaderRepairConfig::default()).unwrap();
        let (ra, dec) = raw.pixel_to_sky(500.0, 400.0);
        assert!((seeded.query_center[0] - ra).abs() < 1e-12 && (seeded.query_center[1] - dec).abs() < 1e-12);
    }
}
