//! # Arm Executable Parameters
//!
//! This module provides parameters for the arm executable, loaded from `arm_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::{
    boundary::BoundaryParams,
    kinematics::{JointVector, NUM_JOINTS},
    oxo_player::PlayerParams,
    servo_ctrl::ServoParams,
    vel_ik::VelIkParams,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmExecParams {
    /// Frequency of the servo loop.
    ///
    /// Units: Hertz
    pub control_frequency_hz: f64,

    /// Kinematic chain parameter file, relative to the params directory.
    pub kinematics_file: String,

    /// If true the simulator sleeps so that simulated time follows wall clock time.
    #[serde(default)]
    pub sim_realtime: bool,

    /// Joint configuration the simulator starts from when no arm is connected.
    ///
    /// Units: degrees
    pub sim_initial_joints_deg: [f64; NUM_JOINTS],

    /// If true the safety boundary biases every Cartesian move.
    #[serde(default = "default_true")]
    pub boundary_enabled: bool,

    pub servo: ServoParams,

    #[serde(default)]
    pub vel_ik: VelIkParams,

    #[serde(default)]
    pub boundary: BoundaryParams,

    #[serde(default)]
    pub player: PlayerParams,

    pub board: BoardParams,
}

/// Taught joint configurations defining the drawing board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardParams {
    /// Pen on the board origin.
    ///
    /// Units: degrees
    pub origin_joints_deg: [f64; NUM_JOINTS],

    /// Pen on a point along the board's x axis.
    ///
    /// Units: degrees
    pub x_joints_deg: [f64; NUM_JOINTS],

    /// Pen on a third point of the board, on the +y side.
    ///
    /// Units: degrees
    pub y_joints_deg: [f64; NUM_JOINTS],
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl BoardParams {
    /// The three taught configurations in radians, origin first.
    pub fn taught_joints(&self) -> (JointVector, JointVector, JointVector) {
        (
            to_rad(self.origin_joints_deg),
            to_rad(self.x_joints_deg),
            to_rad(self.y_joints_deg),
        )
    }
}

impl ArmExecParams {
    pub fn sim_initial_joints(&self) -> JointVector {
        to_rad(self.sim_initial_joints_deg)
    }
}

fn to_rad(deg: [f64; NUM_JOINTS]) -> JointVector {
    JointVector::from_column_slice(&util::maths::deg_to_rad(deg))
}

fn default_true() -> bool {
    true
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const PARAMS: &str = r#"
control_frequency_hz = 25.0
kinematics_file = "lite6.toml"
sim_initial_joints_deg = [0.0, -42.0, 30.0, 0.0, 50.0, 0.0]

[servo]
gain = 3.0

[player]
rest_joints_deg = [0.0, -42.0, 30.0, 0.0, 50.0, 0.0]

[board]
origin_joints_deg = [32.1, 82.4, 165.0, -178.7, -72.7, -190.5]
x_joints_deg = [-34.5, 62.2, 128.6, -175.1, -53.0, -29.0]
y_joints_deg = [72.4, 28.3, 74.8, -187.8, -52.5, 98.5]
"#;

    #[test]
    fn test_defaults_fill_in() {
        let p: ArmExecParams = util::params::from_str(PARAMS).unwrap();

        assert!(!p.sim_realtime);
        assert!(p.boundary_enabled);
        assert_eq!(p.servo.gain, 3.0);
        assert_eq!(p.servo.max_ticks, ServoParams::default().max_ticks);
        assert_eq!(p.boundary.offset_m, 0.005);
        assert!(p.player.rest_joints().is_some());

        let (o, _, _) = p.board.taught_joints();
        assert!((o[0] - 32.1f64.to_radians()).abs() < 1e-12);
        assert!((p.sim_initial_joints()[4] - 50f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn test_missing_board() {
        let trimmed: String = PARAMS.split("[board]").next().unwrap_or_default().into();
        assert!(util::params::from_str::<ArmExecParams>(&trimmed).is_err());
    }
}
