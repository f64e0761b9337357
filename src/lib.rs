//! Fiducial Sphere Library
//!
//! A Rust library for estimating the center and radius of spherical fiducial
//! markers from 3D point clouds, such as the surface voxels or edge points of a
//! marker segmented from a CT volume. This library provides:
//! - Algebraic least-squares sphere fitting (closed form, SVD based)
//! - Geometric refinement of the fit using the tiny-solver optimization framework
//! - Fit quality statistics
//! - Region-of-interest cropping of point clouds
//! - Equivalent spherical radius from connected-component volumes
//!
//! Volume I/O, segmentation and edge detection are left to an imaging toolkit;
//! this crate starts from the points they produce.

pub mod fitting;
pub mod geometry;
pub mod marker;
pub mod util;

// Re-export commonly used types
pub use fitting::{
    compute_fit_residual, fit_sphere, refine_sphere, FitConfig, FitReport, FitResidual,
    SphereFitError, SphereFitResult, SphereFitter,
};

pub use geometry::{sample_sphere_points, Point3D, PointCloud, RegionOfInterest};

pub use marker::{equivalent_sphere_radius, ComponentStatistics};
