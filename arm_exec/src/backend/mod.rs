//! # Execution backend
//!
//! A backend applies one joint command and advances time by one control tick. Two backends are
//! provided:
//! - `HardwareBackend`: pulls telemetry from and pushes demands to the physical arm through an
//!   `ArmInterface`, optionally mirroring the arm in a simulator.
//! - `SimBackend`: steps a `Simulator` only.
//!
//! The backend is chosen once at construction and owns the loop timing, `ServoCtrl` never sleeps.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod hardware;
mod sim;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::kinematics::JointVector;

pub use hardware::*;
pub use sim::*;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Something that can execute joint commands one control tick at a time.
pub trait Backend {
    /// Current joint positions of the arm.
    fn read_joints(&mut self) -> Result<JointVector, BackendError>;

    /// Apply the command and advance time by one tick.
    fn tick(&mut self, cmd: &JointCommand) -> Result<(), BackendError>;

    /// Command zero joint velocity without advancing time.
    fn halt(&mut self) -> Result<(), BackendError>;

    /// Duration of one tick.
    ///
    /// Units: seconds
    fn dt(&self) -> f64;
}

/// Telemetry and actuation interface of a physical arm.
pub trait ArmInterface {
    /// Units: radians
    fn get_joint_positions(&mut self) -> Result<JointVector, BackendError>;

    /// Units: radians/second
    fn set_joint_velocities(&mut self, qd: &JointVector) -> Result<(), BackendError>;

    /// Units: radians
    fn set_joint_positions(&mut self, q: &JointVector) -> Result<(), BackendError>;
}

/// A simulator stepping the arm state.
pub trait Simulator {
    /// Current joint positions of the simulated arm.
    fn joints(&self) -> JointVector;

    /// Overwrite the simulated joint positions, used when the simulator mirrors hardware or for
    /// position commands.
    fn set_joint_positions(&mut self, q: &JointVector);

    /// Set the joint rates applied on subsequent steps.
    fn set_joint_velocities(&mut self, qd: &JointVector);

    /// Advance the simulation by `dt` seconds.
    fn step(&mut self, dt: f64) -> Result<(), BackendError>;

    /// Forget the timing of the last step, called when the arm is halted between moves.
    fn restart_pacing(&mut self) {}
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Keeps a loop running at a fixed period by sleeping for the remainder of each cycle.
#[derive(Debug)]
pub struct CyclePacer {
    period: Duration,

    cycle_start: Option<Instant>,

    /// Number of consecutive cycles which took longer than the period.
    pub num_consec_overruns: u64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A joint command for a single tick. The variant selects the control variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JointCommand {
    /// Units: radians/second
    Velocity(JointVector),

    /// Units: radians
    Position(JointVector),
}

/// Errors raised by a backend. Any of these aborts the current motion.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("The arm is unavailable: {0}")]
    ArmUnavailable(String),

    #[error("The arm rejected the command")]
    CommandRejected,

    #[error("The arm reported a fault: {0}")]
    ArmFault(String),

    #[error("Simulator error: {0}")]
    Simulator(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl JointCommand {
    /// A command holding the arm still.
    pub fn zero() -> Self {
        JointCommand::Velocity(JointVector::zeros())
    }

    pub fn value(&self) -> &JointVector {
        match self {
            JointCommand::Velocity(v) => v,
            JointCommand::Position(v) => v,
        }
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn read_joints(&mut self) -> Result<JointVector, BackendError> {
        (**self).read_joints()
    }

    fn tick(&mut self, cmd: &JointCommand) -> Result<(), BackendError> {
        (**self).tick(cmd)
    }

    fn halt(&mut self) -> Result<(), BackendError> {
        (**self).halt()
    }

    fn dt(&self) -> f64 {
        (**self).dt()
    }
}

impl CyclePacer {
    pub fn new(period_s: f64) -> Self {
        Self {
            period: Duration::from_secs_f64(period_s.max(0.0)),
            cycle_start: None,
            num_consec_overruns: 0,
        }
    }

    pub fn set_period(&mut self, period_s: f64) {
        self.period = Duration::from_secs_f64(period_s.max(0.0));
    }

    /// Sleep until one period has passed since the last call, then start a new cycle.
    ///
    /// The first call returns immediately.
    pub fn wait(&mut self) {
        if let Some(start) = self.cycle_start {
            let cycle_dur = Instant::now() - start;

            match self.period.checked_sub(cycle_dur) {
                Some(d) => {
                    self.num_consec_overruns = 0;
                    thread::sleep(d);
                }
                None => {
                    warn!(
                        "Cycle overran by {:.06} s",
                        cycle_dur.as_secs_f64() - self.period.as_secs_f64()
                    );
                    self.num_consec_overruns += 1;
                }
            }
        }

        self.cycle_start = Some(Instant::now());
    }

    /// Forget the current cycle, so the next `wait` returns immediately without counting the
    /// idle time as an overrun.
    pub fn reset(&mut self) {
        self.cycle_start = None;
        self.num_consec_overruns = 0;
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
