//! The `fitting` module estimates spheres from 3D point clouds.
//!
//! Two estimators are provided:
//! 1. An algebraic least-squares fit ([`algebraic`]) that linearises the sphere
//!    equation and solves it in closed form with an SVD. It is fast, needs no
//!    initial guess and is the default.
//! 2. A geometric refinement ([`geometric`]) that minimises the true
//!    point-to-surface distance with Levenberg-Marquardt, started from the
//!    algebraic solution.
//!
//! [`SphereFitter`] ties both together according to a [`FitConfig`].

use crate::geometry::{Point3D, PointCloud};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use yaml_rust::YamlLoader;

pub mod algebraic;
pub mod geometric;

pub use algebraic::fit_sphere;
pub use geometric::refine_sphere;

/// Minimum number of points that determines a sphere (cx, cy, cz, k).
pub const MIN_POINTS: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum SphereFitError {
    #[error("Insufficient data: need at least {needed} points, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("Least-squares system is singular (coincident, colinear or coplanar points)")]
    SingularSystem,
    #[error("Degenerate fit: squared radius is negative ({radius_squared})")]
    DegenerateFit { radius_squared: f64 },
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("IO Error: {0}")]
    IOError(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("Failed to read CSV: {0}")]
    CsvError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<std::io::Error> for SphereFitError {
    fn from(err: std::io::Error) -> Self {
        SphereFitError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for SphereFitError {
    fn from(err: yaml_rust::ScanError) -> Self {
        SphereFitError::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for SphereFitError {
    fn from(err: serde_json::Error) -> Self {
        SphereFitError::SerializationError(err.to_string())
    }
}

impl From<csv::Error> for SphereFitError {
    fn from(err: csv::Error) -> Self {
        SphereFitError::CsvError(err.to_string())
    }
}

/// A fitted sphere: center and radius in the units of the input points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SphereFitResult {
    pub center: Point3D,
    pub radius: f64,
}

impl SphereFitResult {
    /// Signed distance of `point` to the sphere surface (positive outside).
    pub fn signed_distance(&self, point: &Point3D) -> f64 {
        (point - self.center).norm() - self.radius
    }

    /// Saves the fitted sphere to a YAML file under a `sphere` key.
    ///
    /// # Errors
    ///
    /// * [`SphereFitError::YamlError`] if serialization fails.
    /// * [`SphereFitError::IOError`] if the file cannot be written.
    pub fn save_to_yaml(&self, path: &str) -> Result<(), SphereFitError> {
        let yaml = serde_yaml::to_value(serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("sphere".to_string()),
            serde_yaml::to_value(serde_yaml::Mapping::from_iter([
                (
                    serde_yaml::Value::String("center".to_string()),
                    serde_yaml::to_value(vec![self.center.x, self.center.y, self.center.z])
                        .map_err(|e| SphereFitError::YamlError(e.to_string()))?,
                ),
                (
                    serde_yaml::Value::String("radius".to_string()),
                    serde_yaml::Value::from(self.radius),
                ),
            ]))
            .map_err(|e| SphereFitError::YamlError(e.to_string()))?,
        )]))
        .map_err(|e| SphereFitError::YamlError(e.to_string()))?;

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| SphereFitError::YamlError(e.to_string()))?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }
}

impl fmt::Display for SphereFitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "center: ({:.6}, {:.6}, {:.6}), radius: {:.6}",
            self.center.x, self.center.y, self.center.z, self.radius
        )
    }
}

/// Statistics of the absolute point-to-surface distances of a fit.
#[derive(Clone, Serialize, Deserialize)]
pub struct FitResidual {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for FitResidual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fit Residual [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

/// Computes distance statistics of `points` with respect to the sphere `fit`.
///
/// # Errors
///
/// [`SphereFitError::InsufficientData`] if `points` is empty.
pub fn compute_fit_residual(
    points: &PointCloud,
    fit: &SphereFitResult,
) -> Result<FitResidual, SphereFitError> {
    let errors: Vec<f64> = points
        .iter()
        .map(|p| fit.signed_distance(p).abs())
        .collect();

    if errors.is_empty() {
        return Err(SphereFitError::InsufficientData { needed: 1, got: 0 });
    }

    let n = errors.len() as f64;
    let mean = errors.iter().sum::<f64>() / n;

    let variance: f64 = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();

    let sum_squared: f64 = errors.iter().map(|x| x.powi(2)).sum::<f64>();
    let rmse = (sum_squared / n).sqrt();

    let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    let mut sorted_errors = errors;
    sorted_errors.sort_by(|a, b| a.total_cmp(b));
    let median = if sorted_errors.len() % 2 == 0 {
        let mid = sorted_errors.len() / 2;
        (sorted_errors[mid - 1] + sorted_errors[mid]) / 2.0
    } else {
        sorted_errors[sorted_errors.len() / 2]
    };

    Ok(FitResidual {
        rmse,
        min,
        max,
        mean,
        stddev,
        median,
    })
}

/// Tuning knobs of [`SphereFitter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    /// Relative threshold `σ_min / σ_max` below which the linear system is
    /// considered rank-deficient.
    pub singular_value_tolerance: f64,
    /// Run the geometric refinement after the algebraic fit.
    pub refine: bool,
    /// Iteration cap of the Levenberg-Marquardt refinement.
    pub max_iterations: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            singular_value_tolerance: 1e-10,
            refine: false,
            max_iterations: 100,
        }
    }
}

impl FitConfig {
    /// Loads a configuration from a YAML file.
    ///
    /// The file is expected to hold a `sphere_fit` mapping. Missing keys keep
    /// their [`Default`] values.
    ///
    /// ```yaml
    /// sphere_fit:
    ///   singular_value_tolerance: 1.0e-10
    ///   refine: true
    ///   max_iterations: 50
    /// ```
    ///
    /// # Errors
    ///
    /// * [`SphereFitError::IOError`] if the file cannot be read.
    /// * [`SphereFitError::YamlError`] if the YAML is malformed.
    /// * [`SphereFitError::InvalidParams`] if a key has the wrong type or the
    ///   resulting configuration fails [`FitConfig::validate`].
    pub fn load_from_yaml(path: &str) -> Result<Self, SphereFitError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| SphereFitError::YamlError("Empty YAML document".to_string()))?;

        let section = &doc["sphere_fit"];
        if section.is_badvalue() {
            return Err(SphereFitError::InvalidParams(
                "YAML missing 'sphere_fit' section".to_string(),
            ));
        }

        let mut config = FitConfig::default();

        let tolerance = &section["singular_value_tolerance"];
        if !tolerance.is_badvalue() {
            config.singular_value_tolerance = tolerance.as_f64().ok_or_else(|| {
                SphereFitError::InvalidParams(
                    "Invalid singular_value_tolerance: not a float".to_string(),
                )
            })?;
        }

        let refine = &section["refine"];
        if !refine.is_badvalue() {
            config.refine = refine.as_bool().ok_or_else(|| {
                SphereFitError::InvalidParams("Invalid refine: not a boolean".to_string())
            })?;
        }

        let max_iterations = &section["max_iterations"];
        if !max_iterations.is_badvalue() {
            let value = max_iterations.as_i64().ok_or_else(|| {
                SphereFitError::InvalidParams("Invalid max_iterations: not an integer".to_string())
            })?;
            config.max_iterations = usize::try_from(value).map_err(|_| {
                SphereFitError::InvalidParams("Invalid max_iterations: negative".to_string())
            })?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Saves the configuration to a YAML file readable by [`FitConfig::load_from_yaml`].
    pub fn save_to_yaml(&self, path: &str) -> Result<(), SphereFitError> {
        let yaml = serde_yaml::to_value(serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("sphere_fit".to_string()),
            serde_yaml::to_value(self).map_err(|e| SphereFitError::YamlError(e.to_string()))?,
        )]))
        .map_err(|e| SphereFitError::YamlError(e.to_string()))?;

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| SphereFitError::YamlError(e.to_string()))?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }

    /// Checks that the tolerance lies in `(0, 1)` and the iteration cap is non-zero.
    pub fn validate(&self) -> Result<(), SphereFitError> {
        if !self.singular_value_tolerance.is_finite()
            || self.singular_value_tolerance <= 0.0
            || self.singular_value_tolerance >= 1.0
        {
            return Err(SphereFitError::InvalidParams(format!(
                "singular_value_tolerance must be in (0, 1), got {}",
                self.singular_value_tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(SphereFitError::InvalidParams(
                "max_iterations must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of [`SphereFitter::fit_report`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub num_points: usize,
    pub algebraic: SphereFitResult,
    pub algebraic_residual: FitResidual,
    pub refined: Option<SphereFitResult>,
    pub refined_residual: Option<FitResidual>,
}

impl FitReport {
    /// The best available estimate: the refined sphere when present.
    pub fn best(&self) -> &SphereFitResult {
        self.refined.as_ref().unwrap_or(&self.algebraic)
    }
}

/// Sphere estimator holding a validated [`FitConfig`].
///
/// The fitter is stateless between calls and can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct SphereFitter {
    config: FitConfig,
}

impl SphereFitter {
    /// Creates a fitter, validating `config` first.
    pub fn new(config: FitConfig) -> Result<Self, SphereFitError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Algebraic least-squares sphere fit of `points`.
    ///
    /// # Errors
    ///
    /// * [`SphereFitError::InsufficientData`] for fewer than 4 points.
    /// * [`SphereFitError::SingularSystem`] for coincident, colinear or coplanar points.
    /// * [`SphereFitError::DegenerateFit`] if the squared radius comes out negative.
    pub fn fit(&self, points: &PointCloud) -> Result<SphereFitResult, SphereFitError> {
        algebraic::fit_sphere_with_tolerance(points, self.config.singular_value_tolerance)
    }

    /// Algebraic fit, optionally followed by the geometric refinement, with
    /// residual statistics for each stage.
    pub fn fit_report(&self, points: &PointCloud) -> Result<FitReport, SphereFitError> {
        let algebraic = self.fit(points)?;
        let algebraic_residual = compute_fit_residual(points, &algebraic)?;
        info!("Algebraic fit: {algebraic}");
        debug!("Algebraic residual: {:?}", algebraic_residual);

        let (refined, refined_residual) = if self.config.refine {
            let refined =
                geometric::refine_sphere_with_limit(points, &algebraic, self.config.max_iterations)?;
            let residual = compute_fit_residual(points, &refined)?;
            info!("Refined fit: {refined}");
            debug!("Refined residual: {:?}", residual);
            (Some(refined), Some(residual))
        } else {
            (None, None)
        };

        Ok(FitReport {
            num_points: points.len(),
            algebraic,
            algebraic_residual,
            refined,
            refined_residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::sample_sphere_points;
    use approx::assert_relative_eq;

    #[test]
    fn test_compute_fit_residual_exact_sphere() {
        let center = Point3D::new(1.0, 2.0, 3.0);
        let points = sample_sphere_points(&center, 4.0, 30);
        let fit = SphereFitResult {
            center,
            radius: 4.0,
        };

        let residual = compute_fit_residual(&points, &fit).unwrap();
        assert!(residual.rmse < 1e-12);
        assert!(residual.max < 1e-12);
    }

    #[test]
    fn test_compute_fit_residual_statistics() {
        let points = PointCloud::from(vec![
            Point3D::new(1.0, 0.0, 0.0),
            Point3D::new(2.0, 0.0, 0.0),
            Point3D::new(0.0, 4.0, 0.0),
        ]);
        let fit = SphereFitResult {
            center: Point3D::origin(),
            radius: 2.0,
        };

        // Distances to the surface: 1, 0, 2
        let residual = compute_fit_residual(&points, &fit).unwrap();
        assert_relative_eq!(residual.min, 0.0);
        assert_relative_eq!(residual.max, 2.0);
        assert_relative_eq!(residual.mean, 1.0);
        assert_relative_eq!(residual.median, 1.0);
        assert_relative_eq!(residual.rmse, (5.0_f64 / 3.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_compute_fit_residual_empty() {
        let fit = SphereFitResult {
            center: Point3D::origin(),
            radius: 1.0,
        };
        let result = compute_fit_residual(&PointCloud::new(), &fit);
        assert!(matches!(
            result,
            Err(SphereFitError::InsufficientData { needed: 1, got: 0 })
        ));
    }

    #[test]
    fn test_fit_config_validation() {
        assert!(FitConfig::default().validate().is_ok());

        let bad_tolerance = FitConfig {
            singular_value_tolerance: 0.0,
            ..FitConfig::default()
        };
        assert!(matches!(
            SphereFitter::new(bad_tolerance),
            Err(SphereFitError::InvalidParams(_))
        ));

        let bad_iterations = FitConfig {
            max_iterations: 0,
            ..FitConfig::default()
        };
        assert!(bad_iterations.validate().is_err());
    }

    #[test]
    fn test_fit_config_load_from_yaml() {
        let config = FitConfig::load_from_yaml("samples/sphere_fit.yaml").unwrap();
        assert_eq!(config.singular_value_tolerance, 1e-9);
        assert!(config.refine);
        assert_eq!(config.max_iterations, 50);
    }

    #[test]
    fn test_fit_config_yaml_save_and_load() {
        let path = std::env::temp_dir().join("fiducial_sphere_config_test.yaml");
        let path = path.to_str().unwrap();

        let config = FitConfig {
            singular_value_tolerance: 1e-8,
            refine: true,
            max_iterations: 25,
        };
        config.save_to_yaml(path).unwrap();

        let loaded = FitConfig::load_from_yaml(path).unwrap();
        assert_eq!(loaded, config);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_fit_config_missing_section() {
        let path = std::env::temp_dir().join("fiducial_sphere_bad_config_test.yaml");
        let path = path.to_str().unwrap();
        fs::write(path, "other:\n  refine: true\n").unwrap();

        let result = FitConfig::load_from_yaml(path);
        assert!(matches!(result, Err(SphereFitError::InvalidParams(_))));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_sphere_fit_result_save_to_yaml() {
        let path = std::env::temp_dir().join("fiducial_sphere_result_test.yaml");
        let path = path.to_str().unwrap();

        let fit = SphereFitResult {
            center: Point3D::new(1.5, -2.0, 10.0),
            radius: 3.25,
        };
        fit.save_to_yaml(path).unwrap();

        let docs = YamlLoader::load_from_str(&fs::read_to_string(path).unwrap()).unwrap();
        let sphere = &docs[0]["sphere"];
        assert_eq!(sphere["radius"].as_f64(), Some(3.25));
        assert_eq!(sphere["center"][0].as_f64(), Some(1.5));
        assert_eq!(sphere["center"][2].as_f64(), Some(10.0));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_fit_report_without_refinement() {
        let center = Point3D::new(-3.0, 5.0, 12.0);
        let points = sample_sphere_points(&center, 2.5, 40);

        let report = SphereFitter::default().fit_report(&points).unwrap();
        assert_eq!(report.num_points, 40);
        assert!(report.refined.is_none());
        assert!(report.refined_residual.is_none());
        assert_relative_eq!(report.best().radius, 2.5, epsilon = 1e-6);
    }

    #[test]
    fn test_fit_sample_marker_edges() {
        let points = PointCloud::load_from_csv("samples/marker_edges.csv").unwrap();
        let fit = SphereFitter::default().fit(&points).unwrap();

        assert_relative_eq!(fit.center.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(fit.center.y, -4.0, epsilon = 1e-9);
        assert_relative_eq!(fit.center.z, 30.0, epsilon = 1e-9);
        assert_relative_eq!(fit.radius, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fit_report_with_refinement() {
        let center = Point3D::new(0.5, 0.5, 0.5);
        let points = sample_sphere_points(&center, 6.0, 60);

        let fitter = SphereFitter::new(FitConfig {
            refine: true,
            ..FitConfig::default()
        })
        .unwrap();
        let report = fitter.fit_report(&points).unwrap();

        let refined = report.refined.expect("refinement requested");
        assert_relative_eq!(refined.radius, 6.0, epsilon = 1e-6);
        assert_eq!(report.best(), &refined);
    }
}
