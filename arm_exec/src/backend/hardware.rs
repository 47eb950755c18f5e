//! Hardware backend

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::error;

use super::{ArmInterface, Backend, BackendError, CyclePacer, JointCommand, KinematicSim, Simulator};
use crate::kinematics::JointVector;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Backend driving the physical arm.
///
/// If a simulator mirror is attached it follows the arm telemetry and its stepping governs the
/// loop timing. Without a mirror the backend sleeps for the remainder of each tick.
pub struct HardwareBackend<A: ArmInterface, S: Simulator = KinematicSim> {
    arm: A,
    mirror: Option<S>,
    pacer: CyclePacer,
    dt: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<A: ArmInterface, S: Simulator> HardwareBackend<A, S> {
    pub fn new(arm: A, mirror: Option<S>, dt: f64) -> Self {
        Self {
            arm,
            mirror,
            pacer: CyclePacer::new(dt),
            dt,
        }
    }

    pub fn arm(&self) -> &A {
        &self.arm
    }

    pub fn mirror(&self) -> Option<&S> {
        self.mirror.as_ref()
    }

    /// Number of consecutive ticks that overran the tick period.
    pub fn num_consec_overruns(&self) -> u64 {
        self.pacer.num_consec_overruns
    }
}

impl<A: ArmInterface, S: Simulator> Backend for HardwareBackend<A, S> {
    fn read_joints(&mut self) -> Result<JointVector, BackendError> {
        let q = self.arm.get_joint_positions().map_err(|e| {
            error!("Could not read the arm joint positions: {}", e);
            e
        })?;

        if let Some(ref mut mirror) = self.mirror {
            mirror.set_joint_positions(&q);
        }

        Ok(q)
    }

    fn tick(&mut self, cmd: &JointCommand) -> Result<(), BackendError> {
        let res = match cmd {
            JointCommand::Velocity(qd) => self.arm.set_joint_velocities(qd),
            JointCommand::Position(q) => self.arm.set_joint_positions(q),
        };
        res.map_err(|e| {
            error!("Could not command the arm: {}", e);
            e
        })?;

        match self.mirror {
            Some(ref mut mirror) => {
                match cmd {
                    JointCommand::Velocity(qd) => mirror.set_joint_velocities(qd),
                    JointCommand::Position(q) => mirror.set_joint_positions(q),
                }
                mirror.step(self.dt)
            }
            None => {
                self.pacer.wait();
                Ok(())
            }
        }
    }

    fn halt(&mut self) -> Result<(), BackendError> {
        let zero = JointVector::zeros();

        if let Some(ref mut mirror) = self.mirror {
            mirror.set_joint_velocities(&zero);
            mirror.restart_pacing();
        }

        // The time until the next move is idle, not part of a cycle
        self.pacer.reset();

        self.arm.set_joint_velocities(&zero)
    }

    fn dt(&self) -> f64 {
        self.dt
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
