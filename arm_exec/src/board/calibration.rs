//! Surface calibration from probe touch-downs

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use super::BoardError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Least squares plane `z = a x + b y + c`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneFit {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// Result of a calibration sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    /// Measured touch-down positions.
    ///
    /// Units: meters,
    /// Frame: Board
    pub probes_m: Vec<[f64; 3]>,

    /// Plane fitted through the probes.
    ///
    /// Frame: Board
    pub plane: PlaneFit,

    /// RMS distance (along board z) of the probes from the fitted plane.
    ///
    /// Units: meters
    pub rms_residual_m: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PlaneFit {
    /// Fit a plane through the points by least squares on z.
    pub fn fit(points: &[Vector3<f64>]) -> Result<Self, BoardError> {
        if points.len() < 3 {
            return Err(BoardError::NotEnoughProbes(points.len()));
        }

        // Normal equations of [x y 1] [a b c]^T = z
        let mut ata = Matrix3::zeros();
        let mut atz = Vector3::zeros();
        for p in points {
            let row = Vector3::new(p.x, p.y, 1.0);
            ata += row * row.transpose();
            atz += row * p.z;
        }

        let sol = ata
            .cholesky()
            .ok_or(BoardError::NotEnoughProbes(points.len()))?
            .solve(&atz);

        Ok(Self {
            a: sol.x,
            b: sol.y,
            c: sol.z,
        })
    }

    /// Height of the plane at the given point.
    pub fn z_at(&self, x: f64, y: f64) -> f64 {
        self.a * x + self.b * y + self.c
    }
}

impl CalibrationReport {
    /// Fit the surface through the probe positions.
    pub fn from_probes(probes_m: &[Vector3<f64>]) -> Result<Self, BoardError> {
        let plane = PlaneFit::fit(probes_m)?;

        let sum_sq: f64 = probes_m
            .iter()
            .map(|p| (p.z - plane.z_at(p.x, p.y)).powi(2))
            .sum();

        Ok(Self {
            probes_m: probes_m.iter().map(|p| [p.x, p.y, p.z]).collect(),
            plane,
            rms_residual_m: (sum_sq / probes_m.len() as f64).sqrt(),
        })
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fit_tilted_plane() {
        let mut probes = Vec::new();
        for x in &[-0.05, 0.0, 0.05] {
            for y in &[-0.05, 0.0, 0.05] {
                probes.push(Vector3::new(*x, *y, 0.01 * x - 0.02 * y + 0.003));
            }
        }

        let report = CalibrationReport::from_probes(&probes).unwrap();
        assert_relative_eq!(report.plane.a, 0.01, epsilon = 1e-9);
        assert_relative_eq!(report.plane.b, -0.02, epsilon = 1e-9);
        assert_relative_eq!(report.plane.c, 0.003, epsilon = 1e-9);
        assert!(report.rms_residual_m < 1e-9);
        assert_eq!(report.probes_m.len(), 9);
    }

    #[test]
    fn test_residual() {
        let probes = [
            Vector3::new(0.0, 0.0, 0.001),
            Vector3::new(1.0, 0.0, -0.001),
            Vector3::new(0.0, 1.0, -0.001),
            Vector3::new(1.0, 1.0, 0.001),
        ];

        // Best fit is the flat z = 0 plane, 1 mm from every probe
        let report = CalibrationReport::from_probes(&probes).unwrap();
        assert_relative_eq!(report.plane.a, 0.0, epsilon = 1e-12);
        assert_relative_eq!(report.plane.b, 0.0, epsilon = 1e-12);
        assert_relative_eq!(report.rms_residual_m, 0.001, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_probes() {
        assert!(matches!(
            PlaneFit::fit(&[Vector3::zeros(), Vector3::x()]),
            Err(BoardError::NotEnoughProbes(2))
        ));

        let colinear = [Vector3::zeros(), Vector3::x(), Vector3::x() * 2.0];
        assert!(PlaneFit::fit(&colinear).is_err());
    }
}
