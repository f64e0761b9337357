//! Geometric refinement of a sphere fit.
//!
//! It uses the `tiny_solver` crate to minimise the sum of squared
//! point-to-surface distances `Σ (‖pᵢ − c‖ − r)²` over `(cx, cy, cz, r)` with
//! Levenberg-Marquardt. The algebraic fit provides the starting point.

use super::{compute_fit_residual, SphereFitError, SphereFitResult, MIN_POINTS};
use crate::geometry::{Point3D, PointCloud};

use log::{info, warn};
use nalgebra::{DVector, Vector3};
use std::collections::HashMap;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

/// Cost function for `tiny_solver` optimization of a sphere.
///
/// One residual per point: the signed distance of the point to the sphere
/// surface described by the parameter block `[cx, cy, cz, r]`.
#[derive(Debug, Clone)]
struct SphereDistanceCost {
    points: Vec<Vector3<f64>>,
}

impl SphereDistanceCost {
    fn new(points: &PointCloud) -> Self {
        Self {
            points: points.iter().map(|p| p.coords).collect(),
        }
    }
}

impl<T: nalgebra::RealField> Factor<T> for SphereDistanceCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let sphere = &params[0];
        let cx = sphere[0].clone();
        let cy = sphere[1].clone();
        let cz = sphere[2].clone();
        let r = sphere[3].clone();

        let mut residuals = DVector::zeros(self.points.len());

        for (i, p) in self.points.iter().enumerate() {
            let dx = nalgebra::convert::<f64, T>(p.x) - cx.clone();
            let dy = nalgebra::convert::<f64, T>(p.y) - cy.clone();
            let dz = nalgebra::convert::<f64, T>(p.z) - cz.clone();

            let distance = (dx.clone() * dx + dy.clone() * dy + dz.clone() * dz).sqrt();
            residuals[i] = distance - r.clone();
        }
        residuals
    }
}

/// Refines `initial` by minimising the geometric distance of `points` to the sphere.
///
/// # Errors
///
/// * [`SphereFitError::InsufficientData`] for fewer than 4 points.
/// * [`SphereFitError::NumericalError`] if the optimizer fails or produces a
///   non-finite center or a negative radius.
pub fn refine_sphere(
    points: &PointCloud,
    initial: &SphereFitResult,
) -> Result<SphereFitResult, SphereFitError> {
    refine_sphere_with_limit(points, initial, 100)
}

/// Same as [`refine_sphere`] with an explicit iteration cap.
pub fn refine_sphere_with_limit(
    points: &PointCloud,
    initial: &SphereFitResult,
    max_iterations: usize,
) -> Result<SphereFitResult, SphereFitError> {
    if points.len() < MIN_POINTS {
        return Err(SphereFitError::InsufficientData {
            needed: MIN_POINTS,
            got: points.len(),
        });
    }

    let initial_params = DVector::from_vec(vec![
        initial.center.x,
        initial.center.y,
        initial.center.z,
        initial.radius,
    ]);

    let mut problem = tiny_solver::Problem::new();
    let cost_function = SphereDistanceCost::new(points);
    problem.add_residual_block(points.len(), &["sphere"], Box::new(cost_function), None);

    let mut initial_values = HashMap::new();
    initial_values.insert("sphere".to_string(), initial_params);

    info!(
        "Starting sphere refinement with tiny-solver Levenberg-Marquardt on {} points...",
        points.len()
    );

    let optimizer = LevenbergMarquardtOptimizer::default();
    let options = tiny_solver::optimizer::OptimizerOptions {
        max_iteration: max_iterations,
        ..Default::default()
    };

    let result = optimizer
        .optimize(&problem, &initial_values, Some(options))
        .ok_or_else(|| SphereFitError::NumericalError("Optimization failed".to_string()))?;

    let optimized = result.get("sphere").ok_or_else(|| {
        SphereFitError::NumericalError("Optimizer returned no sphere parameters".to_string())
    })?;

    if !optimized.iter().all(|v| v.is_finite()) {
        return Err(SphereFitError::NumericalError(
            "Refined sphere parameters are not finite".to_string(),
        ));
    }
    if optimized[3] < 0.0 {
        return Err(SphereFitError::NumericalError(format!(
            "Refined radius is negative: {}",
            optimized[3]
        )));
    }

    let refined = SphereFitResult {
        center: Point3D::new(optimized[0], optimized[1], optimized[2]),
        radius: optimized[3],
    };

    select_better_fit(points, initial, &refined)
}

/// Returns `refined` unless it fits `points` worse (higher rmse) than `initial`.
fn select_better_fit(
    points: &PointCloud,
    initial: &SphereFitResult,
    refined: &SphereFitResult,
) -> Result<SphereFitResult, SphereFitError> {
    let before = compute_fit_residual(points, initial)?;
    let after = compute_fit_residual(points, refined)?;
    info!(
        "Sphere refinement finished: rmse {:.6} -> {:.6}",
        before.rmse, after.rmse
    );
    if after.rmse > before.rmse {
        warn!("Refinement increased the rmse, keeping the initial estimate");
        return Ok(*initial);
    }

    Ok(*refined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitting::fit_sphere;
    use crate::geometry::sample_sphere_points;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn test_sphere_distance_cost_residuals() {
        let points = PointCloud::from(vec![
            Point3D::new(2.0, 0.0, 0.0),
            Point3D::new(0.0, 0.5, 0.0),
        ]);
        let cost = SphereDistanceCost::new(&points);
        let params = vec![DVector::from_vec(vec![0.0, 0.0, 0.0, 1.0])];

        let residuals: DVector<f64> = cost.residual_func(&params);
        assert_relative_eq!(residuals[0], 1.0);
        assert_relative_eq!(residuals[1], -0.5);
    }

    #[test]
    fn test_refine_recovers_sphere_from_perturbed_guess() {
        let center = Point3D::new(4.0, -2.0, 7.0);
        let points = sample_sphere_points(&center, 3.0, 60);
        let initial = SphereFitResult {
            center: Point3D::new(4.3, -1.8, 6.9),
            radius: 2.6,
        };

        let refined = refine_sphere(&points, &initial).unwrap();
        assert_relative_eq!(refined.center.x, center.x, epsilon = 1e-6);
        assert_relative_eq!(refined.center.y, center.y, epsilon = 1e-6);
        assert_relative_eq!(refined.center.z, center.z, epsilon = 1e-6);
        assert_relative_eq!(refined.radius, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_refine_noisy_cap_does_not_increase_rmse() {
        // Edge points of a marker often cover only part of the surface.
        let center = Point3D::new(0.0, 0.0, 0.0);
        let radius = 4.0;
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, 0.02 * radius).unwrap();

        let points: PointCloud = sample_sphere_points(&center, radius, 300)
            .iter()
            .filter(|p| p.z > 0.0)
            .map(|p| {
                Point3D::new(
                    p.x + noise.sample(&mut rng),
                    p.y + noise.sample(&mut rng),
                    p.z + noise.sample(&mut rng),
                )
            })
            .collect();

        let algebraic = fit_sphere(&points).unwrap();
        let refined = refine_sphere(&points, &algebraic).unwrap();

        let before = compute_fit_residual(&points, &algebraic).unwrap();
        let after = compute_fit_residual(&points, &refined).unwrap();
        assert!(after.rmse <= before.rmse);
        assert!((refined.radius - radius).abs() / radius < 0.05);
    }

    #[test]
    fn test_select_better_fit_keeps_initial_when_refined_is_worse() {
        let center = Point3D::new(1.0, 2.0, 3.0);
        let mut rng = StdRng::seed_from_u64(11);
        let noise = Normal::new(0.0, 0.05).unwrap();
        let points: PointCloud = sample_sphere_points(&center, 5.0, 80)
            .iter()
            .map(|p| Point3D::new(p.x + noise.sample(&mut rng), p.y, p.z))
            .collect();

        let initial = fit_sphere(&points).unwrap();
        let worse = SphereFitResult {
            center: Point3D::new(1.5, 2.0, 3.0),
            radius: 5.5,
        };

        let selected = select_better_fit(&points, &initial, &worse).unwrap();
        assert_eq!(selected, initial);

        let selected = select_better_fit(&points, &worse, &initial).unwrap();
        assert_eq!(selected, initial);
    }

    #[test]
    fn test_refine_single_iteration_never_worsens_fit() {
        let center = Point3D::new(-2.0, 0.0, 4.0);
        let mut rng = StdRng::seed_from_u64(3);
        let noise = Normal::new(0.0, 0.1).unwrap();
        let points: PointCloud = sample_sphere_points(&center, 3.0, 50)
            .iter()
            .map(|p| {
                Point3D::new(
                    p.x + noise.sample(&mut rng),
                    p.y + noise.sample(&mut rng),
                    p.z + noise.sample(&mut rng),
                )
            })
            .collect();

        let initial = refine_sphere(&points, &fit_sphere(&points).unwrap()).unwrap();
        let refined = refine_sphere_with_limit(&points, &initial, 1).unwrap();

        let before = compute_fit_residual(&points, &initial).unwrap();
        let after = compute_fit_residual(&points, &refined).unwrap();
        assert!(after.rmse <= before.rmse);
    }

    #[test]
    fn test_refine_insufficient_data() {
        let points = PointCloud::from(vec![Point3D::new(1.0, 0.0, 0.0); 3]);
        let initial = SphereFitResult {
            center: Point3D::origin(),
            radius: 1.0,
        };
        assert!(matches!(
            refine_sphere(&points, &initial),
            Err(SphereFitError::InsufficientData { needed: 4, got: 3 })
        ));
    }
}
