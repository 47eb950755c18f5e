//! # Arm Client
//!
//! This module provides networking abstractions to connect to the arm server, which bridges
//! requests to the arm's vendor controller.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::arm::{ArmRequest, ArmResponse, NUM_ARM_JOINTS},
    net::{zmq, MonitoredSocket, MonitoredSocketError, NetParams, SocketOptions},
};
use log::debug;

use crate::{
    backend::{ArmInterface, BackendError},
    kinematics::JointVector,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct ArmClient {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum ArmClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("The client is not connected to the server")]
    NotConnected,

    #[error("Could not send the request to the server: {0}")]
    SendError(zmq::Error),

    #[error("Could not recieve a message from the server: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not deserialize the response from the server: {0}")]
    DeserializeError(serde_json::Error),

    #[error("The server responded with {0:?}, which does not answer the request")]
    UnexpectedResponse(ArmResponse),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ArmClient {
    /// Create a new instance of the arm client.
    pub fn new(ctx: &zmq::Context, params: &NetParams) -> Result<Self, ArmClientError> {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::REQ,
            SocketOptions::realtime_req_client(params.arm_recv_timeout_ms),
            &params.arm_endpoint,
        )
        .map_err(ArmClientError::SocketError)?;

        Ok(Self { socket })
    }

    /// Send a request to the server and wait for its response.
    ///
    /// If the server does not respond within the configured timeout an `Err()` is returned.
    pub fn request(&mut self, request: &ArmRequest) -> Result<ArmResponse, ArmClientError> {
        // If not connected return now
        if !self.socket.connected() {
            return Err(ArmClientError::NotConnected);
        }

        let req_str = serde_json::to_string(request).map_err(ArmClientError::SerializationError)?;

        self.socket
            .send(&req_str, 0)
            .map_err(ArmClientError::SendError)?;

        let msg = self.socket.recv_msg(0).map_err(ArmClientError::RecvError)?;

        serde_json::from_str(msg.as_str().unwrap_or("")).map_err(ArmClientError::DeserializeError)
    }

    /// Send a demand, mapping the server's response onto a backend result.
    fn demand(&mut self, request: &ArmRequest) -> Result<(), BackendError> {
        match self.request(request)? {
            ArmResponse::Ok => Ok(()),
            rsp => Err(response_error(rsp)),
        }
    }
}

impl ArmInterface for ArmClient {
    fn get_joint_positions(&mut self) -> Result<JointVector, BackendError> {
        match self.request(&ArmRequest::GetJointPositions)? {
            ArmResponse::JointPositions(q) => Ok(JointVector::from_column_slice(&q)),
            rsp => Err(response_error(rsp)),
        }
    }

    fn set_joint_velocities(&mut self, qd: &JointVector) -> Result<(), BackendError> {
        debug!("Arm velocity demand: {:?}", qd.as_slice());
        self.demand(&ArmRequest::SetJointVelocities(to_array(qd)))
    }

    fn set_joint_positions(&mut self, q: &JointVector) -> Result<(), BackendError> {
        debug!("Arm position demand: {:?}", q.as_slice());
        self.demand(&ArmRequest::SetJointPositions(to_array(q)))
    }
}

impl From<ArmClientError> for BackendError {
    fn from(e: ArmClientError) -> Self {
        BackendError::ArmUnavailable(e.to_string())
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn to_array(v: &JointVector) -> [f64; NUM_ARM_JOINTS] {
    let mut a = [0.0; NUM_ARM_JOINTS];
    a.copy_from_slice(v.as_slice());
    a
}

fn response_error(rsp: ArmResponse) -> BackendError {
    match rsp {
        ArmResponse::Invalid => BackendError::CommandRejected,
        ArmResponse::EqptFault(s) => BackendError::ArmFault(s),
        r => ArmClientError::UnexpectedResponse(r).into(),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_response_errors() {
        assert!(matches!(
            response_error(ArmResponse::Invalid),
            BackendError::CommandRejected
        ));
        assert!(matches!(
            response_error(ArmResponse::EqptFault("overcurrent".into())),
            BackendError::ArmFault(s) if s == "overcurrent"
        ));
        assert!(matches!(
            response_error(ArmResponse::Ok),
            BackendError::ArmUnavailable(_)
        ));
    }

    #[test]
    fn test_to_array() {
        let v = JointVector::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0);
        assert_eq!(to_array(&v), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
