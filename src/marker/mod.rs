//! Radius estimates from segmented marker components.
//!
//! Thresholding a CT volume and labelling connected components gives, per
//! marker, a voxel count. The radius of the sphere with the same physical
//! volume is a cheap estimate that does not need surface points at all.

use crate::fitting::SphereFitError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Radius of the sphere whose volume equals `volume`: `cbrt(3V / 4π)`.
///
/// # Errors
///
/// [`SphereFitError::InvalidParams`] if `volume` is negative or not finite.
pub fn equivalent_sphere_radius(volume: f64) -> Result<f64, SphereFitError> {
    if !volume.is_finite() || volume < 0.0 {
        return Err(SphereFitError::InvalidParams(format!(
            "Volume must be finite and non-negative, got {volume}"
        )));
    }
    Ok((3.0 * volume / (4.0 * PI)).cbrt())
}

/// Shape statistics of one connected component of a labelled volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentStatistics {
    pub label: u32,
    pub voxel_count: u64,
    /// Voxel spacing (sx, sy, sz) in physical units.
    pub spacing: [f64; 3],
}

impl ComponentStatistics {
    pub fn new(label: u32, voxel_count: u64, spacing: [f64; 3]) -> Result<Self, SphereFitError> {
        let stats = ComponentStatistics {
            label,
            voxel_count,
            spacing,
        };
        stats.validate()?;
        Ok(stats)
    }

    /// Spacing values must be finite and strictly positive.
    pub fn validate(&self) -> Result<(), SphereFitError> {
        if self.spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(SphereFitError::InvalidParams(format!(
                "Voxel spacing must be positive, got {:?}",
                self.spacing
            )));
        }
        Ok(())
    }

    pub fn voxel_volume(&self) -> f64 {
        self.spacing.iter().product()
    }

    pub fn physical_volume(&self) -> f64 {
        self.voxel_count as f64 * self.voxel_volume()
    }

    /// Equivalent spherical radius of the component, in the spacing units.
    pub fn equivalent_radius(&self) -> Result<f64, SphereFitError> {
        self.validate()?;
        equivalent_sphere_radius(self.physical_volume())
    }
}
