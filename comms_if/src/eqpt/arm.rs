//! # Arm Equipment Requests
//!
//! Messages exchanged between the `ArmClient` in `arm_exec` and the arm server which bridges to
//! the arm's vendor controller. Every request gets exactly one response.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of joints on the arm.
pub const NUM_ARM_JOINTS: usize = 6;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A request sent from the ArmClient to the arm server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ArmRequest {
    /// Read the current joint positions.
    GetJointPositions,

    /// Command joint velocities.
    ///
    /// Units: radians/second
    SetJointVelocities([f64; NUM_ARM_JOINTS]),

    /// Command joint positions.
    ///
    /// Units: radians
    SetJointPositions([f64; NUM_ARM_JOINTS]),
}

/// Response from the arm server to a request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ArmResponse {
    /// Current joint positions, in response to `ArmRequest::GetJointPositions`.
    ///
    /// Units: radians
    JointPositions([f64; NUM_ARM_JOINTS]),

    /// Demands were valid and will be executed
    Ok,

    /// Demands were invalid and have been rejected
    Invalid,

    /// The arm controller reported a fault, so demands cannot be actuated
    EqptFault(String),
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_json() {
        let req = ArmRequest::SetJointVelocities([0.0, 0.1, -0.1, 0.0, 0.0, 1.0]);
        let s = serde_json::to_string(&req).unwrap();

        assert_eq!(s, r#"{"SetJointVelocities":[0.0,0.1,-0.1,0.0,0.0,1.0]}"#);
        assert_eq!(serde_json::from_str::<ArmRequest>(&s).unwrap(), req);
        assert_eq!(
            serde_json::to_string(&ArmRequest::GetJointPositions).unwrap(),
            r#""GetJointPositions""#
        );
    }

    #[test]
    fn test_response_json() {
        let rsp: ArmResponse = serde_json::from_str(r#"{"EqptFault":"error code 22"}"#).unwrap();
        assert_eq!(rsp, ArmResponse::EqptFault("error code 22".into()));
    }
}
