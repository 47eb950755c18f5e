//! # Kinematics module
//!
//! Provides the kinematic model of the arm: forward kinematics, the velocity Jacobian, and the
//! proportional servo laws used by `ServoCtrl` to turn a pose or joint error into a velocity
//! demand.
//!
//! Frames are named after the convention used throughout the crate:
//! - World (W): the frame the arm base is placed in.
//! - End effector (E): the tool centre point of the pen.
//! - Board (B): the drawing-board frame, see `board`.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod dh_chain;
mod servo;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Isometry3, Matrix6, Translation3, UnitQuaternion, Vector6};
use serde::{Deserialize, Serialize};

pub use dh_chain::*;
pub use servo::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// The number of joints on the arm.
pub const NUM_JOINTS: usize = comms_if::eqpt::arm::NUM_ARM_JOINTS;

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// A rigid transform, rotation and translation.
pub type Pose = Isometry3<f64>;

/// Joint positions (radians) or rates (radians/second), ordered base to wrist.
pub type JointVector = Vector6<f64>;

/// Velocity Jacobian mapping joint rates to a spatial velocity.
pub type Jacobian = Matrix6<f64>;

/// Spatial velocity, linear (m/s) in the first three elements and angular (rad/s) in the last
/// three.
pub type SpatialVelocity = Vector6<f64>;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Kinematic model of the arm.
pub trait Kinematics {
    /// End effector pose in the world frame for the given joint positions.
    fn fkine(&self, q: &JointVector) -> Pose;

    /// Pose of every link frame in the world frame, base first, end effector last.
    ///
    /// Used for trajectory snapshots, the default only reports the end effector.
    fn fkine_all(&self, q: &JointVector) -> Vec<Pose> {
        vec![self.fkine(q)]
    }

    /// Velocity Jacobian expressed in the end effector frame.
    fn jacobe(&self, q: &JointVector) -> Jacobian;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Human-editable pose used in parameter files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseParams {
    /// Position of the frame origin.
    ///
    /// Units: meters
    pub position_m: [f64; 3],

    /// Roll, pitch and yaw of the frame, applied as extrinsic X-Y-Z rotations.
    ///
    /// Units: degrees
    #[serde(default)]
    pub rpy_deg: [f64; 3],
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur while building a kinematic model.
#[derive(Debug, thiserror::Error)]
pub enum KinematicsError {
    #[error("Expected {expected} links in the chain but found {found}")]
    WrongNumLinks { expected: usize, found: usize },

    #[error("Link {0} has a non-finite parameter")]
    NonFiniteLink(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PoseParams {
    /// Convert into a pose.
    pub fn to_pose(&self) -> Pose {
        let [x, y, z] = self.position_m;
        let [r, p, yaw] = self.rpy_deg;

        Pose::from_parts(
            Translation3::new(x, y, z),
            UnitQuaternion::from_euler_angles(r.to_radians(), p.to_radians(), yaw.to_radians()),
        )
    }
}

impl<K: Kinematics + ?Sized> Kinematics for Box<K> {
    fn fkine(&self, q: &JointVector) -> Pose {
        (**self).fkine(q)
    }

    fn fkine_all(&self, q: &JointVector) -> Vec<Pose> {
        (**self).fkine_all(q)
    }

    fn jacobe(&self, q: &JointVector) -> Jacobian {
        (**self).jacobe(q)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
