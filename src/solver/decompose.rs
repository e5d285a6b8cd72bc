//! Canonical form of a solved model and its difference from the input model.

use std::fmt;

use nalgebra::{Matrix2, Vector2};

use crate::wcs::{clamp_norm, CoordinateModel, Projector};

/// Sense of the rotation between two models, in pixel coordinates with +Y up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationDirection {
    Clockwise,
    CounterClockwise,
}

impl fmt::Display for RotationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationDirection::Clockwise => write!(f, "clockwise"),
            RotationDirection::CounterClockwise => write!(f, "counter-clockwise"),
        }
    }
}

/// How far the solved model moved from the input model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Diagnostics {
    /// Angle between the canonical linear matrices, degrees in `[0, 180]`.
    pub rotation_deg: f64,
    pub rotation_direction: RotationDirection,
    /// Pixel shift of the field: solved reference pixel minus the input
    /// model's pixel for the solved reference sky position. `None` if that
    /// position does not project through the input model.
    pub offset_px: Option<[f64; 2]>,
    /// Solved over input pixel scale, per axis.
    pub scale_ratio: [f64; 2],
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rotated {:.4}° {}, scale ratio ({:.6}, {:.6}), ",
            self.rotation_deg, self.rotation_direction, self.scale_ratio[0], self.scale_ratio[1]
        )?;
        match self.offset_px {
            Some([dx, dy]) => write!(f, "offset ({:.3}, {:.3}) px", dx, dy),
            None => write!(f, "offset unavailable"),
        }
    }
}

/// Move all magnitude into `axis_scale`.
///
/// `axis_scale` becomes the column norms of the combined matrix and
/// `linear_matrix` its columns normalized to unit length, so the combined
/// matrix is unchanged. Parity stays in `linear_matrix`.
pub fn canonicalize(model: &CoordinateModel) -> CoordinateModel {
    let cd = model.combined_matrix();
    let scale = [clamp_norm(cd.column(0).norm()), clamp_norm(cd.column(1).norm())];
    let inv = Matrix2::from_diagonal(&Vector2::new(1.0 / scale[0], 1.0 / scale[1]));
    CoordinateModel {
        linear_matrix: cd * inv,
        axis_scale: scale,
        ..model.clone()
    }
}

/// Angle between two matrices treated as flattened 4-vectors, degrees.
///
/// The normalized dot product is clipped to `[-1, 1]` before `acos`; near-zero
/// matrices are clamped rather than divided by.
pub fn matrix_angle_deg(a: &Matrix2<f64>, b: &Matrix2<f64>) -> f64 {
    let na = clamp_norm(a.norm());
    let nb = clamp_norm(b.norm());
    let cos = (a.dot(b) / (na * nb)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// Canonical form of `solved` and its [`Diagnostics`] relative to `original`.
pub fn decompose(solved: &CoordinateModel, original: &CoordinateModel) -> (CoordinateModel, Diagnostics) {
    let canonical = canonicalize(solved);
    let original_canonical = canonicalize(original);

    let rotation_deg = matrix_angle_deg(&canonical.linear_matrix, &original_canonical.linear_matrix);
    // Pixel-frame rotation from the input to the solved model
    let relative = original_canonical.linear_matrix.transpose() * canonical.linear_matrix;
    let rotation_direction = if relative[(0, 1)] > 0.0 {
        RotationDirection::CounterClockwise
    } else {
        RotationDirection::Clockwise
    };

    let offset_px = original
        .sky_to_pixel(solved.reference_sky[0], solved.reference_sky[1])
        .map(|(x, y)| [solved.reference_pixel[0] - x, solved.reference_pixel[1] - y]);

    let before = original.pixel_scales();
    let scale_ratio = [
        canonical.axis_scale[0] / clamp_norm(before[0]),
        canonical.axis_scale[1] / clamp_norm(before[1]),
    ];

    (
        canonical,
        Diagnostics {
            rotation_deg,
            rotation_direction,
            offset_px,
            scale_ratio,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::offset::apply_offset;
    use crate::solver::rotation::apply_similarity;

    #[test]
    fn canonical_form_reconstructs_combined_matrix() {
        let model = CoordinateModel {
            linear_matrix: Matrix2::new(0.7, -2.1, 1.3, 0.4),
            axis_scale: [3.0e-4, 2.5e-4],
            ..CoordinateModel::tan([10.0, 20.0], [1.0, 2.0], 1.0, 0.0, false)
        };
        let canonical = canonicalize(&model);
        let before = model.combined_matrix();
        let after = canonical.combined_matrix();
        assert!(
            (after - before).norm() <= 1e-9 * before.norm(),
            "{} vs {}",
            after,
            before
        );
        for c in 0..2 {
            assert!((canonical.linear_matrix.column(c).norm() - 1.0).abs() < 1e-12);
        }
        assert!(canonical.axis_scale.iter().all(|&s| s > 0.0));
    }

    #[test]
    fn canonical_form_keeps_parity() {
        let model = CoordinateModel::tan([0.0, 0.0], [0.0, 0.0], 2.0e-4, 30.0, true);
        let canonical = canonicalize(&model);
        assert!(canonical.linear_matrix.determinant() < 0.0);
        assert!((canonical.axis_scale[0] - 2.0e-4).abs() < 1e-15);
    }

    #[test]
    fn matrix_angle_of_rotations() {
        let a = CoordinateModel::tan([0.0, 0.0], [0.0, 0.0], 1.0, 10.0, false).linear_matrix;
        let b = CoordinateModel::tan([0.0, 0.0], [0.0, 0.0], 1.0, 35.0, false).linear_matrix;
        assert!((matrix_angle_deg(&a, &b) - 25.0).abs() < 1e-9);
        assert!(matrix_angle_deg(&a, &a).abs() < 1e-5);
        assert!(matrix_angle_deg(&Matrix2::zeros(), &a).is_finite());
    }

    #[test]
    fn reports_rotation_scale_and_offset() {
        for east_left in [false, true] {
            let original = CoordinateModel::tan([256.0, 256.0], [150.0, 40.0], 2.0e-4, 5.0, east_left);
            let shifted = apply_offset(&original, [3.0, -2.0]);
            let solved = apply_similarity(&shifted, 7.0, 1.01);

            let (canonical, diag) = decompose(&solved, &original);
            assert!((diag.rotation_deg - 7.0).abs() < 1e-6, "rotation {}", diag.rotation_deg);
            assert_eq!(diag.rotation_direction, RotationDirection::CounterClockwise);
            for r in diag.scale_ratio {
                assert!((r - 1.0 / 1.01).abs() < 1e-9, "scale ratio {}", r);
            }
            let [dx, dy] = diag.offset_px.unwrap();
            assert!((dx - 3.0).abs() < 1e-6 && (dy + 2.0).abs() < 1e-6, "offset ({}, {})", dx, dy);
            assert_eq!(canonical.reference_pixel, solved.reference_pixel);
        }

        let original = CoordinateModel::tan([0.0, 0.0], [0.0, 0.0], 2.0e-4, 0.0, true);
        let (_, diag) = decompose(&apply_similarity(&original, -4.0, 1.0), &original);
        assert_eq!(diag.rotation_direction, RotationDirection::Clockwise);
    }
}
