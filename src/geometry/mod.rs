//! Point clouds in physical (scanner) coordinates.
//!
//! A [`PointCloud`] is what an external segmentation or edge-detection step
//! hands to the fitters: surface points of one marker, in millimetres or any
//! other consistent unit.

use crate::fitting::SphereFitError;
use nalgebra::{Matrix3xX, Point3};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

pub mod roi;

pub use roi::RegionOfInterest;

/// A point in physical space.
pub type Point3D = Point3<f64>;

/// An ordered collection of [`Point3D`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    points: Vec<Point3D>,
}

impl PointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, point: Point3D) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point3D> {
        self.points.iter()
    }

    pub fn as_slice(&self) -> &[Point3D] {
        &self.points
    }

    /// Mean of all points, `None` for an empty cloud.
    pub fn centroid(&self) -> Option<Point3D> {
        if self.points.is_empty() {
            return None;
        }
        let sum = self
            .points
            .iter()
            .fold(nalgebra::Vector3::zeros(), |acc, p| acc + p.coords);
        Some(Point3D::from(sum / self.points.len() as f64))
    }

    /// Builds a cloud from a 3×N matrix, one point per column.
    pub fn from_matrix(matrix: &Matrix3xX<f64>) -> Self {
        (0..matrix.ncols())
            .map(|i| Point3D::from(matrix.column(i).into_owned()))
            .collect()
    }

    /// Packs the cloud into a 3×N matrix, one point per column.
    pub fn to_matrix(&self) -> Matrix3xX<f64> {
        let mut matrix = Matrix3xX::zeros(self.points.len());
        for (i, p) in self.points.iter().enumerate() {
            matrix.set_column(i, &p.coords);
        }
        matrix
    }

    /// Loads points from a CSV file with one `x,y,z` row per point.
    ///
    /// Lines starting with `#` are skipped. A leading header row is skipped
    /// only when none of its fields is a number.
    ///
    /// # Errors
    ///
    /// * [`SphereFitError::CsvError`] if the file cannot be opened or parsed.
    /// * [`SphereFitError::InvalidParams`] if a row does not hold three numbers.
    pub fn load_from_csv(path: &str) -> Result<Self, SphereFitError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)?;

        let mut cloud = PointCloud::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != 3 {
                return Err(SphereFitError::InvalidParams(format!(
                    "Row {row}: expected 3 columns, got {}",
                    record.len()
                )));
            }

            let values: Result<Vec<f64>, _> = record.iter().map(|v| v.parse::<f64>()).collect();
            match values {
                Ok(v) => cloud.push(Point3D::new(v[0], v[1], v[2])),
                Err(_) if row == 0 && record.iter().all(|v| v.parse::<f64>().is_err()) => {
                    continue
                }
                Err(e) => {
                    return Err(SphereFitError::InvalidParams(format!(
                        "Row {row}: invalid coordinate: {e}"
                    )))
                }
            }
        }

        Ok(cloud)
    }

    /// Saves the points to a CSV file readable by [`PointCloud::load_from_csv`].
    pub fn save_to_csv(&self, path: &str) -> Result<(), SphereFitError> {
        let mut file = File::create(path)?;
        writeln!(file, "# Total points: {}", self.points.len())?;
        writeln!(file, "x,y,z")?;
        for p in &self.points {
            writeln!(file, "{},{},{}", p.x, p.y, p.z)?;
        }
        Ok(())
    }
}

impl From<Vec<Point3D>> for PointCloud {
    fn from(points: Vec<Point3D>) -> Self {
        Self { points }
    }
}

impl FromIterator<Point3D> for PointCloud {
    fn from_iter<I: IntoIterator<Item = Point3D>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PointCloud {
    type Item = &'a Point3D;
    type IntoIter = std::slice::Iter<'a, Point3D>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Generate points evenly distributed over the surface of a sphere
///
/// Points follow a Fibonacci spiral, which spreads them with near-uniform
/// density and no clustering at the poles.
///
/// # Arguments
///
/// * `center` - Center of the sphere
/// * `radius` - Radius of the sphere
/// * `n` - The number of points to generate
///
/// # Returns
///
/// A point cloud of exactly `n` points on the sphere surface
pub fn sample_sphere_points(center: &Point3D, radius: f64, n: usize) -> PointCloud {
    let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());

    (0..n)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let ring = (1.0 - z * z).sqrt();
            let theta = golden_angle * i as f64;
            Point3D::new(
                center.x + radius * ring * theta.cos(),
                center.y + radius * ring * theta.sin(),
                center.z + radius * z,
            )
        })
        .collect()
}
