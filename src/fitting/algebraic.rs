//! Algebraic least-squares sphere fit.
//!
//! Every point `p` on a sphere with center `c` and radius `r` satisfies
//!
//! ```text
//! ‖p‖² = 2·p·c − (‖c‖² − r²)
//! ```
//!
//! With the unknown `u = (cx, cy, cz, k)`, `k = ‖c‖² − r²`, each point gives one
//! row `(−2x, −2y, −2z, 1)` of `A` and one entry `−‖p‖²` of `b`. The
//! overdetermined system `A·u ≈ b` is solved with an SVD after moving the points
//! to their centroid and scaling them to unit mean distance, which keeps the
//! columns of `A` comparable in magnitude. This minimises the linearised
//! residual, not the geometric distance; see [`super::geometric`] for the latter.

use super::{SphereFitError, SphereFitResult, MIN_POINTS};
use crate::geometry::{Point3D, PointCloud};
use log::debug;
use nalgebra::{DMatrix, DVector, Vector4};

/// Fits a sphere to `points` with the default rank tolerance (`1e-10`).
///
/// # Errors
///
/// * [`SphereFitError::InsufficientData`] for fewer than 4 points.
/// * [`SphereFitError::InvalidParams`] if a coordinate is not finite.
/// * [`SphereFitError::SingularSystem`] if the points are coincident, colinear or coplanar.
/// * [`SphereFitError::DegenerateFit`] if the squared radius comes out negative.
///
/// # Examples
///
/// ```rust
/// use fiducial_sphere::fitting::fit_sphere;
/// use fiducial_sphere::geometry::{Point3D, PointCloud};
///
/// let points = PointCloud::from(vec![
///     Point3D::new(1.0, 0.0, 0.0),
///     Point3D::new(-1.0, 0.0, 0.0),
///     Point3D::new(0.0, 1.0, 0.0),
///     Point3D::new(0.0, 0.0, 1.0),
/// ]);
/// let fit = fit_sphere(&points).unwrap();
/// assert!((fit.radius - 1.0).abs() < 1e-9);
/// assert!(fit.center.coords.norm() < 1e-9);
/// ```
pub fn fit_sphere(points: &PointCloud) -> Result<SphereFitResult, SphereFitError> {
    fit_sphere_with_tolerance(points, 1e-10)
}

/// Fits a sphere to `points`, reporting [`SphereFitError::SingularSystem`] when
/// the smallest singular value of the normalised design matrix is at most
/// `tolerance` times the largest one.
pub fn fit_sphere_with_tolerance(
    points: &PointCloud,
    tolerance: f64,
) -> Result<SphereFitResult, SphereFitError> {
    let n = points.len();
    if n < MIN_POINTS {
        return Err(SphereFitError::InsufficientData {
            needed: MIN_POINTS,
            got: n,
        });
    }
    if let Some(i) = points.iter().position(|p| !p.coords.iter().all(|v| v.is_finite())) {
        return Err(SphereFitError::InvalidParams(format!(
            "Point {i} has a non-finite coordinate"
        )));
    }

    let (mean, scale) = normalization_params(points);

    let mut a = DMatrix::<f64>::zeros(n, 4);
    let mut b = DVector::<f64>::zeros(n);
    for (i, p) in points.iter().enumerate() {
        let q = (p - mean) * scale;
        a[(i, 0)] = -2.0 * q.x;
        a[(i, 1)] = -2.0 * q.y;
        a[(i, 2)] = -2.0 * q.z;
        a[(i, 3)] = 1.0;
        b[i] = -q.norm_squared();
    }

    let svd = a.svd(true, true);
    let sigma_max = svd.singular_values.max();
    let sigma_min = svd.singular_values.min();
    debug!("Sphere fit singular values: {}", svd.singular_values.transpose());
    if sigma_max <= 0.0 || sigma_min <= tolerance * sigma_max {
        return Err(SphereFitError::SingularSystem);
    }

    let solution = svd
        .solve(&b, tolerance * sigma_max)
        .map_err(|e| SphereFitError::NumericalError(e.to_string()))?;

    let normalized = sphere_from_solution(&Vector4::new(
        solution[0],
        solution[1],
        solution[2],
        solution[3],
    ))?;

    Ok(SphereFitResult {
        center: mean + normalized.center.coords / scale,
        radius: normalized.radius / scale,
    })
}

/// Converts a solution `u = (cx, cy, cz, k)` into a center and radius.
fn sphere_from_solution(u: &Vector4<f64>) -> Result<SphereFitResult, SphereFitError> {
    if !u.iter().all(|v| v.is_finite()) {
        return Err(SphereFitError::NumericalError(
            "Least-squares solution is not finite".to_string(),
        ));
    }

    let center = Point3D::new(u[0], u[1], u[2]);
    let radius_squared = center.coords.norm_squared() - u[3];
    if radius_squared < 0.0 {
        return Err(SphereFitError::DegenerateFit { radius_squared });
    }

    Ok(SphereFitResult {
        center,
        radius: radius_squared.sqrt(),
    })
}

/// Centroid of the cloud and the scale that brings the mean distance to it to 1.
fn normalization_params(points: &PointCloud) -> (Point3D, f64) {
    let mean = points.centroid().unwrap_or_else(Point3D::origin);

    let mean_dist = points.iter().map(|p| (p - mean).norm()).sum::<f64>() / points.len() as f64;

    let scale = if mean_dist > 1e-15 { 1.0 / mean_dist } else { 1.0 };

    (mean, scale)
}
