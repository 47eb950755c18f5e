//! Proportional servo laws.
//!
//! Both laws return a velocity demand proportional to the remaining error along with an arrival
//! flag, raised once the L1 norm of the error falls below the threshold.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use util::maths::sum_abs;

use super::{JointVector, Pose, SpatialVelocity};

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Error between the current and target end effector poses, expressed in the end effector frame.
///
/// The first three elements are the translation error, the last three the rotation error as an
/// axis scaled by the angle.
pub fn pose_error(current: &Pose, target: &Pose) -> SpatialVelocity {
    let ete = current.inverse() * target;
    let lin = ete.translation.vector;
    let ang = ete.rotation.scaled_axis();

    SpatialVelocity::new(lin.x, lin.y, lin.z, ang.x, ang.y, ang.z)
}

/// Cartesian servo, returns the desired end effector velocity (in the end effector frame) and
/// whether the target has been reached.
pub fn cartesian_servo(
    current: &Pose,
    target: &Pose,
    gain: f64,
    threshold: f64,
) -> (SpatialVelocity, bool) {
    let e = pose_error(current, target);
    let arrived = sum_abs(e.iter()) < threshold;

    (e * gain, arrived)
}

/// Joint servo, returns the desired joint rates and whether the target has been reached.
///
/// Rates are not limited here, `ServoCtrl` clamps them to the configured maximum.
pub fn joint_servo(
    q: &JointVector,
    target: &JointVector,
    gain: f64,
    threshold: f64,
) -> (JointVector, bool) {
    let e = target - q;
    let arrived = sum_abs(e.iter()) < threshold;

    (e * gain, arrived)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
