//! Axis-aligned region of interest.
//!
//! A marker is usually isolated by drawing a rectangle on an axial slice and
//! picking a z range. [`RegionOfInterest::from_rectangle`] turns that request
//! into an axis-aligned box that can be used to crop a point cloud before
//! fitting.

use super::{Point3D, PointCloud};
use crate::fitting::SphereFitError;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Axis-aligned box, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub min: Point3D,
    pub max: Point3D,
}

impl RegionOfInterest {
    /// Builds the box spanned by two opposite corners of an axial rectangle
    /// and a z range.
    ///
    /// Corners and range bounds may be given in any order.
    ///
    /// # Errors
    ///
    /// [`SphereFitError::InvalidParams`] if any coordinate is not finite.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fiducial_sphere::geometry::{Point3D, RegionOfInterest};
    /// use nalgebra::Point2;
    ///
    /// let roi = RegionOfInterest::from_rectangle(
    ///     &Point2::new(10.0, 5.0),
    ///     &Point2::new(2.0, 8.0),
    ///     (40.0, 30.0),
    /// )
    /// .unwrap();
    /// assert_eq!(roi.min, Point3D::new(2.0, 5.0, 30.0));
    /// assert_eq!(roi.max, Point3D::new(10.0, 8.0, 40.0));
    /// ```
    pub fn from_rectangle(
        corner_a: &Point2<f64>,
        corner_b: &Point2<f64>,
        z_range: (f64, f64),
    ) -> Result<Self, SphereFitError> {
        let values = [
            corner_a.x, corner_a.y, corner_b.x, corner_b.y, z_range.0, z_range.1,
        ];
        if !values.iter().all(|v| v.is_finite()) {
            return Err(SphereFitError::InvalidParams(
                "Region of interest bounds must be finite".to_string(),
            ));
        }

        Ok(RegionOfInterest {
            min: Point3D::new(
                corner_a.x.min(corner_b.x),
                corner_a.y.min(corner_b.y),
                z_range.0.min(z_range.1),
            ),
            max: Point3D::new(
                corner_a.x.max(corner_b.x),
                corner_a.y.max(corner_b.y),
                z_range.0.max(z_range.1),
            ),
        })
    }

    pub fn contains(&self, point: &Point3D) -> bool {
        (0..3).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }

    /// Extent of the box along each axis.
    pub fn size(&self) -> nalgebra::Vector3<f64> {
        self.max - self.min
    }

    /// Keeps the points inside the box, preserving their order.
    pub fn crop(&self, cloud: &PointCloud) -> PointCloud {
        cloud.iter().filter(|p| self.contains(p)).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x0: f64, y0: f64, x1: f64, y1: f64, z0: f64, z1: f64) -> RegionOfInterest {
        RegionOfInterest::from_rectangle(&Point2::new(x0, y0), &Point2::new(x1, y1), (z0, z1))
            .unwrap()
    }

    #[test]
    fn test_from_rectangle_orders_corners() {
        let ordered = region(1.0, 2.0, 5.0, 7.0, 3.0, 9.0);
        let reversed = region(5.0, 7.0, 1.0, 2.0, 9.0, 3.0);

        assert_eq!(ordered, reversed);
        assert_eq!(ordered.size(), nalgebra::Vector3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_from_rectangle_rejects_non_finite() {
        let result = RegionOfInterest::from_rectangle(
            &Point2::new(0.0, 0.0),
            &Point2::new(f64::INFINITY, 1.0),
            (0.0, 1.0),
        );
        assert!(matches!(result, Err(SphereFitError::InvalidParams(_))));
    }

    #[test]
    fn test_contains_is_inclusive() {
        let roi = region(0.0, 0.0, 1.0, 1.0, 0.0, 1.0);

        assert!(roi.contains(&Point3D::new(0.0, 0.0, 0.0)));
        assert!(roi.contains(&Point3D::new(1.0, 1.0, 1.0)));
        assert!(roi.contains(&Point3D::new(0.5, 0.5, 0.5)));
        assert!(!roi.contains(&Point3D::new(1.0, 1.0, 1.01)));
        assert!(!roi.contains(&Point3D::new(-0.01, 0.5, 0.5)));
    }

    #[test]
    fn test_crop_keeps_inside_points_in_order() {
        let roi = region(-1.0, -1.0, 1.0, 1.0, -1.0, 1.0);
        let cloud = PointCloud::from(vec![
            Point3D::new(0.5, 0.0, 0.0),
            Point3D::new(3.0, 0.0, 0.0),
            Point3D::new(0.0, -0.5, 0.9),
            Point3D::new(0.0, 0.0, -2.0),
        ]);

        let cropped = roi.crop(&cloud);
        assert_eq!(
            cropped,
            PointCloud::from(vec![
                Point3D::new(0.5, 0.0, 0.0),
                Point3D::new(0.0, -0.5, 0.9),
            ])
        );
    }
}
