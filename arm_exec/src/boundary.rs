//! # Boundary potential field
//!
//! A repulsive field above the forbidden z-plane under the drawing surface. The field only
//! biases the velocity IK optimizer, it never constrains it.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Smallest clearance used when evaluating the field, keeps the field finite at or below the
/// plane.
///
/// Units: meters
pub const MIN_CLEARANCE_M: f64 = 1e-4;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters describing how the boundary is derived from the drawing board.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryParams {
    /// Distance of the forbidden plane below the drawing board origin.
    ///
    /// Units: meters
    pub offset_m: f64,

    /// Distance from the plane inside which the field is active.
    ///
    /// Units: meters
    pub influence_m: f64,
}

/// The forbidden plane and its influence distance, constant for a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyBoundary {
    /// Height of the forbidden plane.
    ///
    /// Units: meters,
    /// Frame: World
    pub z_m: f64,

    /// Units: meters
    pub influence_m: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for BoundaryParams {
    fn default() -> Self {
        Self {
            offset_m: 0.005,
            influence_m: 0.004,
        }
    }
}

impl SafetyBoundary {
    /// Place the boundary `params.offset_m` below the given board origin height.
    pub fn below(board_origin_z_m: f64, params: &BoundaryParams) -> Self {
        Self {
            z_m: board_origin_z_m - params.offset_m,
            influence_m: params.influence_m,
        }
    }

    /// Clearance between the point and the plane, floored at `MIN_CLEARANCE_M`.
    pub fn clearance(&self, position_m: &Vector3<f64>) -> f64 {
        (position_m.z - self.z_m).max(MIN_CLEARANCE_M)
    }

    /// Value of the repulsive potential at the point.
    pub fn potential(&self, position_m: &Vector3<f64>) -> f64 {
        let rho = self.clearance(position_m);

        if rho < self.influence_m {
            0.5 * (1.0 / rho - 1.0 / self.influence_m).powi(2)
        } else {
            0.0
        }
    }

    /// Repulsion gradient at the point, pointing away from the plane (world +z).
    ///
    /// Zero outside the influence distance.
    pub fn gradient(&self, position_m: &Vector3<f64>) -> Vector3<f64> {
        let rho = self.clearance(position_m);

        if rho < self.influence_m {
            Vector3::z() * (1.0 / rho.powi(3)) * (1.0 / rho - 1.0 / self.influence_m)
        } else {
            Vector3::zeros()
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn boundary() -> SafetyBoundary {
        SafetyBoundary {
            z_m: 0.1,
            influence_m: 0.02,
        }
    }

    #[test]
    fn test_zero_outside_influence() {
        let b = boundary();

        for z in &[0.1201, 0.121, 0.2, 1.0] {
            let p = Vector3::new(0.3, -0.1, *z);
            assert_eq!(b.gradient(&p), Vector3::zeros());
            assert_eq!(b.potential(&p), 0.0);
        }
    }

    #[test]
    fn test_vanishes_at_influence_edge() {
        let b = boundary();

        // Rounding may leave the point a hair inside, where both terms are already negligible
        let p = Vector3::new(0.0, 0.0, 0.12);
        assert_abs_diff_eq!(b.gradient(&p), Vector3::zeros(), epsilon = 1e-6);
        assert_abs_diff_eq!(b.potential(&p), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_repels_inside_influence() {
        let b = boundary();

        let mut last = 0.0;
        for z in &[0.119, 0.11, 0.105, 0.1001] {
            let g = b.gradient(&Vector3::new(0.0, 0.0, *z));
            assert_eq!(g.x, 0.0);
            assert_eq!(g.y, 0.0);
            assert!(g.z > 0.0);

            // Stronger the closer we get
            assert!(g.z > last);
            last = g.z;

            assert!(b.potential(&Vector3::new(0.0, 0.0, *z)) > 0.0);
        }
    }

    #[test]
    fn test_finite_at_and_below_plane() {
        let b = boundary();

        for z in &[0.1, 0.09, -5.0] {
            let p = Vector3::new(0.0, 0.0, *z);
            assert_eq!(b.clearance(&p), MIN_CLEARANCE_M);

            let g = b.gradient(&p);
            assert!(g.z.is_finite() && g.z > 0.0);
            assert!(b.potential(&p).is_finite());
        }
    }

    #[test]
    fn test_below_board() {
        let b = SafetyBoundary::below(0.25, &BoundaryParams::default());
        assert!((b.z_m - 0.245).abs() < 1e-12);
        assert_eq!(b.influence_m, 0.004);
    }
}
