//! Parameters structure for OxoPlayer

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::kinematics::{JointVector, NUM_JOINTS};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerParams {
    // ---- GEOMETRY ----
    /// Height the pen is lifted off the board between strokes.
    ///
    /// Units: meters
    pub lift_height_m: f64,

    /// Half the side of the square an X is drawn across, as a fraction of the cell edge.
    pub x_half_length_frac: f64,

    /// Radius of an O, as a fraction of the cell edge.
    pub o_radius_frac: f64,

    // ---- MOTION ----
    /// Servo gain used while tracing an O, stiffer than the default so that the short steps
    /// between points are taken quickly.
    pub o_gain: f64,

    /// Joint configuration to return to after every drawing. No rest move is made if this is
    /// absent or all zero.
    ///
    /// Units: degrees
    pub rest_joints_deg: Option<[f64; NUM_JOINTS]>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for PlayerParams {
    fn default() -> Self {
        Self {
            lift_height_m: 0.01,
            x_half_length_frac: 0.3,
            o_radius_frac: 0.3,
            o_gain: 10.0,
            rest_joints_deg: None,
        }
    }
}

impl PlayerParams {
    /// The rest configuration in radians, or `None` if no rest move should be made.
    pub fn rest_joints(&self) -> Option<JointVector> {
        self.rest_joints_deg
            .filter(|q| q.iter().any(|x| *x != 0.0))
            .map(|q| JointVector::from_column_slice(&util::maths::deg_to_rad(q)))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rest_joints() {
        let mut p = PlayerParams::default();
        assert!(p.rest_joints().is_none());

        p.rest_joints_deg = Some([0.0; NUM_JOINTS]);
        assert!(p.rest_joints().is_none());

        p.rest_joints_deg = Some([0.0, -42.0, 30.0, 0.0, 50.0, 0.0]);
        let q = p.rest_joints().unwrap();
        assert!((q[1] + 42f64.to_radians()).abs() < 1e-12);
    }
}
