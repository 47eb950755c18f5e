//! Simulation backend and the kinematic simulator

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::trace;

use super::{Backend, BackendError, CyclePacer, JointCommand, Simulator};
use crate::kinematics::JointVector;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Backend which only drives a simulator. The simulator's stepping governs the loop timing.
pub struct SimBackend<S: Simulator = KinematicSim> {
    sim: S,
    dt: f64,
}

/// A purely kinematic simulator, integrates the commanded joint rates.
///
/// When `realtime` is set each step sleeps so that simulated time tracks wall-clock time,
/// otherwise stepping is as fast as possible (the usual case for tests).
#[derive(Debug)]
pub struct KinematicSim {
    q: JointVector,
    qd: JointVector,
    sim_time_s: f64,
    pacer: Option<CyclePacer>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<S: Simulator> SimBackend<S> {
    pub fn new(sim: S, dt: f64) -> Self {
        Self { sim, dt }
    }

    pub fn sim(&self) -> &S {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut S {
        &mut self.sim
    }
}

impl<S: Simulator> Backend for SimBackend<S> {
    fn read_joints(&mut self) -> Result<JointVector, BackendError> {
        Ok(self.sim.joints())
    }

    fn tick(&mut self, cmd: &JointCommand) -> Result<(), BackendError> {
        match cmd {
            JointCommand::Velocity(qd) => self.sim.set_joint_velocities(qd),
            JointCommand::Position(q) => self.sim.set_joint_positions(q),
        }

        self.sim.step(self.dt)
    }

    fn halt(&mut self) -> Result<(), BackendError> {
        self.sim.set_joint_velocities(&JointVector::zeros());
        self.sim.restart_pacing();
        Ok(())
    }

    fn dt(&self) -> f64 {
        self.dt
    }
}

impl KinematicSim {
    /// Create a new simulator with the arm at `q`.
    pub fn new(q: JointVector, realtime: bool) -> Self {
        Self {
            q,
            qd: JointVector::zeros(),
            sim_time_s: 0.0,
            pacer: if realtime {
                Some(CyclePacer::new(0.0))
            } else {
                None
            },
        }
    }

    /// Simulated time elapsed since creation.
    ///
    /// Units: seconds
    pub fn sim_time_s(&self) -> f64 {
        self.sim_time_s
    }

    pub fn joint_velocities(&self) -> JointVector {
        self.qd
    }
}

impl Simulator for KinematicSim {
    fn joints(&self) -> JointVector {
        self.q
    }

    fn set_joint_positions(&mut self, q: &JointVector) {
        self.q = *q;
        self.qd = JointVector::zeros();
    }

    fn set_joint_velocities(&mut self, qd: &JointVector) {
        self.qd = *qd;
    }

    fn step(&mut self, dt: f64) -> Result<(), BackendError> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(BackendError::Simulator(format!("Invalid timestep {}", dt)));
        }

        if let Some(ref mut pacer) = self.pacer {
            pacer.set_period(dt);
            pacer.wait();
        }

        self.q += self.qd * dt;
        self.sim_time_s += dt;

        trace!("Sim step to t = {:.3} s", self.sim_time_s);

        Ok(())
    }

    fn restart_pacing(&mut self) {
        if let Some(ref mut pacer) = self.pacer {
            pacer.reset();
        }
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
    fn test_integrates_velocity() {
        let mut backend = SimBackend::new(KinematicSim::new(JointVector::zeros(), false), 0.04);

        let qd = JointVector::new(1.0, -0.5, 0.0, 0.0, 0.25, 0.0);
        for _ in 0..25 {
            backend.tick(&JointCommand::Velocity(qd)).unwrap();
        }

        let q = backend.read_joints().unwrap();
        assert_relative_eq!(q[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(q[1], -0.5, epsilon = 1e-9);
        assert_relative_eq!(q[4], 0.25, epsilon = 1e-9);
        assert_relative_eq!(backend.sim().sim_time_s(), 1.0, epsilon = 1e-9);

        // Halting stops integration without advancing time
        backend.halt().unwrap();
        backend.tick(&JointCommand::zero()).unwrap();
        assert_relative_eq!(backend.read_joints().unwrap()[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_position_command() {
        let mut backend = SimBackend::new(KinematicSim::new(JointVector::zeros(), false), 0.04);
        let target = JointVector::repeat(0.3);

        backend
            .tick(&JointCommand::Velocity(JointVector::repeat(1.0)))
            .unwrap();
        backend.tick(&JointCommand::Position(target)).unwrap();

        assert_eq!(backend.read_joints().unwrap(), target);
        assert_eq!(backend.sim().joint_velocities(), JointVector::zeros());
    }

    #[test]
    fn test_invalid_step() {
        let mut sim = KinematicSim::new(JointVector::zeros(), false);
        assert!(sim.step(f64::NAN).is_err());
        assert!(sim.step(-0.1).is_err());
    }
}
