//! # Servo control module
//!
//! Provides `ServoCtrl::move_to`, the closed-loop motion primitive. Each tick the controller:
//!
//! 1. Refreshes the joint positions from the backend.
//! 2. Computes a velocity demand, through the Cartesian servo and the velocity IK optimizer for
//!    pose targets or through the joint servo for joint targets.
//! 3. Commands the demand through the backend for one tick.
//!
//! The loop ends when the target is reached, when the tick budget runs out, when the move is
//! cancelled, or when the backend fails. Zero velocity is commanded exactly once on the way out.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, error, trace, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    backend::{Backend, BackendError, JointCommand},
    boundary::SafetyBoundary,
    kinematics::{cartesian_servo, joint_servo, JointVector, Kinematics, Pose},
    traj_log::{FrameSnapshot, TickRecord, TickSink},
    vel_ik::{VelIk, VelIkError},
};
use util::maths::{clamp, sum_abs};

pub use params::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The servo controller.
pub struct ServoCtrl<K: Kinematics, B: Backend> {
    kin: K,
    backend: B,
    vel_ik: VelIk,
    boundary: Option<SafetyBoundary>,
    sink: Option<Box<dyn TickSink>>,
    cancel: Arc<AtomicBool>,

    /// Ticks executed since creation, used to timestamp trajectory records.
    num_ticks: u64,

    /// Ticks where the optimizer failed and zero velocity was held.
    num_ik_failures: u64,
}

/// Result of a successful move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveOutcome {
    /// Joint positions at arrival.
    pub q: JointVector,

    /// Always true for a successful move.
    pub arrived: bool,

    /// Number of ticks the move took.
    pub ticks: u64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Target of a move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveTarget {
    /// End effector pose in the world frame.
    Cartesian(Pose),

    /// Joint positions.
    ///
    /// Units: radians
    Joint(JointVector),
}

#[derive(Debug, thiserror::Error)]
pub enum ServoCtrlError {
    #[error("Backend failure: {0}")]
    Backend(#[from] BackendError),

    #[error("Target not reached after {ticks} ticks (remaining error {remaining:.6})")]
    NotConverged { ticks: u64, remaining: f64 },

    #[error("Move cancelled after {0} ticks")]
    Cancelled(u64),

    #[error("Invalid servo parameters: {0}")]
    InvalidParams(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<K: Kinematics, B: Backend> ServoCtrl<K, B> {
    /// Create a new controller.
    ///
    /// If `boundary` is given the optimizer is biased away from it for every Cartesian move.
    pub fn new(kin: K, backend: B, vel_ik: VelIk, boundary: Option<SafetyBoundary>) -> Self {
        Self {
            kin,
            backend,
            vel_ik,
            boundary,
            sink: None,
            cancel: Arc::new(AtomicBool::new(false)),
            num_ticks: 0,
            num_ik_failures: 0,
        }
    }

    /// Install a sink which receives a record every tick.
    pub fn set_sink(&mut self, sink: Box<dyn TickSink>) {
        self.sink = Some(sink);
    }

    /// Token which cancels the current move when raised. The controller lowers it again at the
    /// start of every move, so a cancellation only applies to the move in progress.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn kinematics(&self) -> &K {
        &self.kin
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn boundary(&self) -> Option<&SafetyBoundary> {
        self.boundary.as_ref()
    }

    pub fn num_ticks(&self) -> u64 {
        self.num_ticks
    }

    pub fn num_ik_failures(&self) -> u64 {
        self.num_ik_failures
    }

    /// Current joint positions, read from the backend.
    pub fn read_joints(&mut self) -> Result<JointVector, BackendError> {
        self.backend.read_joints()
    }

    /// Current end effector pose in the world frame.
    pub fn current_pose(&mut self) -> Result<Pose, BackendError> {
        let q = self.backend.read_joints()?;
        Ok(self.kin.fkine(&q))
    }

    /// Drive the arm to the target.
    ///
    /// Blocks until the target is reached or the move fails. Zero velocity is commanded once
    /// before returning in every case.
    pub fn move_to(
        &mut self,
        target: &MoveTarget,
        params: &ServoParams,
    ) -> Result<MoveOutcome, ServoCtrlError> {
        params.validate()?;

        self.cancel.store(false, Ordering::Relaxed);

        let result = self.servo_loop(target, params);

        match (result, self.backend.halt()) {
            (Ok(outcome), Ok(())) => {
                debug!("Arrived in {} ticks", outcome.ticks);
                Ok(outcome)
            }
            (Ok(_), Err(e)) => {
                error!("Could not halt the arm after arriving: {}", e);
                Err(e.into())
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(halt_err)) => {
                error!("Could not halt the arm after a failed move: {}", halt_err);
                Err(e)
            }
        }
    }

    fn servo_loop(
        &mut self,
        target: &MoveTarget,
        params: &ServoParams,
    ) -> Result<MoveOutcome, ServoCtrlError> {
        let mut ticks = 0;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                warn!("Move cancelled after {} ticks", ticks);
                return Err(ServoCtrlError::Cancelled(ticks));
            }

            let q = self.backend.read_joints()?;

            let (demand, arrived, remaining) = match target {
                MoveTarget::Cartesian(wtep) => self.cartesian_demand(&q, wtep, params),
                MoveTarget::Joint(q_target) => {
                    let (qd, arrived) = joint_servo(&q, q_target, params.gain, params.threshold);
                    let remaining = sum_abs(qd.iter()) / params.gain;
                    let qd = qd.map(|x| clamp(x, -params.qd_max_rads, params.qd_max_rads));
                    (Ok(qd), arrived, remaining)
                }
            };

            if arrived {
                return Ok(MoveOutcome {
                    q,
                    arrived,
                    ticks,
                });
            }

            if ticks >= params.max_ticks {
                warn!(
                    "Move did not converge in {} ticks, remaining error {:.6}",
                    ticks, remaining
                );
                return Err(ServoCtrlError::NotConverged { ticks, remaining });
            }

            // Only a tick which is actually commanded counts as a failure
            let qd = match demand {
                Ok(qd) => qd,
                Err(e) => {
                    warn!("VelIk failed, holding zero velocity: {}", e);
                    self.num_ik_failures += 1;
                    JointVector::zeros()
                }
            };

            let cmd = match params.control {
                ControlVariable::Velocity => JointCommand::Velocity(qd),
                ControlVariable::Position => {
                    JointCommand::Position(q + qd * self.backend.dt())
                }
            };

            trace!(
                "Tick {}: error {:.6}, cmd {:?}",
                self.num_ticks,
                remaining,
                cmd.value().as_slice()
            );

            self.backend.tick(&cmd)?;
            self.record(&q, cmd);

            ticks += 1;
            self.num_ticks += 1;
        }
    }

    /// Velocity demand towards a pose target, with the arrival flag and remaining error.
    ///
    /// An optimizer failure is passed back so the caller decides whether the tick is commanded.
    fn cartesian_demand(
        &mut self,
        q: &JointVector,
        wtep: &Pose,
        params: &ServoParams,
    ) -> (Result<JointVector, VelIkError>, bool, f64) {
        let wte = self.kin.fkine(q);
        let (v, arrived) = cartesian_servo(&wte, wtep, params.gain, params.threshold);
        let remaining = sum_abs(v.iter()) / params.gain;

        if arrived {
            return (Ok(JointVector::zeros()), true, remaining);
        }

        let jac = self.kin.jacobe(q);
        let boundary = self.boundary.as_ref().map(|b| (&wte, b));

        (
            self.vel_ik.solve(&jac, &v, params.qd_max_rads, boundary),
            false,
            remaining,
        )
    }

    fn record(&mut self, q: &JointVector, cmd: JointCommand) {
        let sink = match self.sink {
            Some(ref mut s) => s,
            None => return,
        };

        let frames = if sink.wants_frames() {
            self.kin
                .fkine_all(q)
                .iter()
                .map(FrameSnapshot::from)
                .collect()
        } else {
            Vec::new()
        };

        sink.record(TickRecord {
            tick: self.num_ticks,
            time_s: self.num_ticks as f64 * self.backend.dt(),
            q: *q,
            cmd,
            frames,
        });
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        backend::{KinematicSim, SimBackend},
        boundary::BoundaryParams,
        kinematics::{DhChain, Kinematics},
        traj_log::TrajRecorder,
    };
    use nalgebra::Vector3;

    type SimCtrl = ServoCtrl<DhChain, SimBackend>;

    fn q_rest() -> JointVector {
        JointVector::from_column_slice(&util::maths::deg_to_rad([0.0, -42.0, 30.0, 0.0, 50.0, 0.0]))
    }

    fn ctrl() -> SimCtrl {
        ServoCtrl::new(
            DhChain::lite6(),
            SimBackend::new(KinematicSim::new(q_rest(), false), 0.04),
            VelIk::default(),
            None,
        )
    }

    /// Backend that counts calls and can be told to fail.
    struct CountingBackend {
        inner: SimBackend,
        num_ticks: usize,
        num_halts: usize,
        nonzero_cmds: usize,
        fail_after: Option<usize>,
    }

    impl CountingBackend {
        fn new() -> Self {
            Self {
                inner: SimBackend::new(KinematicSim::new(q_rest(), false), 0.04),
                num_ticks: 0,
                num_halts: 0,
                nonzero_cmds: 0,
                fail_after: None,
            }
        }
    }

    impl Backend for CountingBackend {
        fn read_joints(&mut self) -> Result<JointVector, BackendError> {
            match self.fail_after {
                Some(n) if self.num_ticks >= n => {
                    Err(BackendError::ArmUnavailable("telemetry lost".into()))
                }
                _ => self.inner.read_joints(),
            }
        }

        fn tick(&mut self, cmd: &JointCommand) -> Result<(), BackendError> {
            self.num_ticks += 1;
            if cmd.value().iter().any(|x| *x != 0.0) {
                self.nonzero_cmds += 1;
            }
            self.inner.tick(cmd)
        }

        fn halt(&mut self) -> Result<(), BackendError> {
            self.num_halts += 1;
            self.inner.halt()
        }

        fn dt(&self) -> f64 {
            self.inner.dt()
        }
    }

    fn counting_ctrl() -> ServoCtrl<DhChain, CountingBackend> {
        ServoCtrl::new(
            DhChain::lite6(),
            CountingBackend::new(),
            VelIk::default(),
            None,
        )
    }

    #[test]
    fn test_move_to_current_pose() {
        let mut ctrl = counting_ctrl();
        let pose = ctrl.current_pose().unwrap();

        let outcome = ctrl
            .move_to(&MoveTarget::Cartesian(pose), &ServoParams::default())
            .unwrap();

        assert!(outcome.arrived);
        assert_eq!(outcome.ticks, 0);
        assert_eq!(ctrl.backend().num_ticks, 0);
        assert_eq!(ctrl.backend().nonzero_cmds, 0);
        assert_eq!(ctrl.backend().num_halts, 1);
    }

    #[test]
    fn test_cartesian_move_converges() {
        let mut ctrl = ctrl();
        let start = ctrl.current_pose().unwrap();

        // 3 cm along world x and 2 cm down, same orientation
        let target = Pose::from_parts(
            (start.translation.vector + Vector3::new(0.03, 0.0, -0.02)).into(),
            start.rotation,
        );
        let params = ServoParams::default();

        let outcome = ctrl
            .move_to(&MoveTarget::Cartesian(target), &params)
            .unwrap();
        assert!(outcome.arrived);
        assert!(outcome.ticks > 0);

        let reached = ctrl.kinematics().fkine(&outcome.q);
        let (_, arrived) =
            cartesian_servo(&reached, &target, params.gain, params.threshold);
        assert!(arrived);
        assert!((reached.translation.vector - target.translation.vector).norm() < 1e-3);
        assert_eq!(ctrl.num_ik_failures(), 0);
    }

    #[test]
    fn test_joint_move_respects_rate_limit() {
        let mut ctrl = counting_ctrl();
        let target = q_rest() + JointVector::new(0.5, -0.2, 0.1, 0.0, 0.3, -0.4);
        let params = ServoParams {
            qd_max_rads: 0.5,
            ..Default::default()
        };

        let recorder = TrajRecorder::new();
        ctrl.set_sink(Box::new(recorder.clone()));

        let outcome = ctrl.move_to(&MoveTarget::Joint(target), &params).unwrap();
        assert!(sum_abs((target - outcome.q).iter()) < params.threshold);

        let records = recorder.records();
        assert_eq!(records.len() as u64, outcome.ticks);
        for r in records.iter() {
            for x in r.cmd.value().iter() {
                assert!(x.abs() <= 0.5 + 1e-12);
            }
        }

        // Frames run from the base to the end effector
        assert_eq!(records[0].frames.len(), 8);
        assert!((records[1].time_s - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_position_control_moves() {
        let mut ctrl = ctrl();
        let start = ctrl.current_pose().unwrap();
        let params = ServoParams {
            control: ControlVariable::Position,
            ..Default::default()
        };

        let recorder = TrajRecorder::new();
        ctrl.set_sink(Box::new(recorder.clone()));

        // 2 cm along world x and 1 cm down
        let target = Pose::from_parts(
            (start.translation.vector + Vector3::new(0.02, 0.0, -0.01)).into(),
            start.rotation,
        );
        let outcome = ctrl
            .move_to(&MoveTarget::Cartesian(target), &params)
            .unwrap();
        assert!(outcome.arrived);
        assert!(outcome.ticks > 0);

        let reached = ctrl.kinematics().fkine(&outcome.q);
        assert!((reached.translation.vector - target.translation.vector).norm() < 1e-3);

        for r in recorder.records().iter() {
            assert!(matches!(r.cmd, JointCommand::Position(_)));
        }
        recorder.take().unwrap();

        // Back to the start configuration in joint space
        let outcome = ctrl
            .move_to(&MoveTarget::Joint(q_rest()), &params)
            .unwrap();
        assert!(outcome.arrived);
        assert!(sum_abs((q_rest() - outcome.q).iter()) < params.threshold);

        // Each command is one tick of the clamped joint servo ahead of the measured joints
        let records = recorder.records();
        assert_eq!(records.len() as u64, outcome.ticks);
        for r in records.iter() {
            let (qd, _) = joint_servo(&r.q, &q_rest(), params.gain, params.threshold);
            let qd = qd.map(|x| clamp(x, -params.qd_max_rads, params.qd_max_rads));

            match r.cmd {
                JointCommand::Position(q_cmd) => {
                    approx::assert_relative_eq!(q_cmd, r.q + qd * 0.04, epsilon = 1e-12)
                }
                c => panic!("Expected a position command, got {:?}", c),
            }
        }
    }

    #[test]
    fn test_not_converged() {
        let mut ctrl = counting_ctrl();
        let target = q_rest() + JointVector::repeat(1.0);
        let params = ServoParams {
            max_ticks: 5,
            ..Default::default()
        };

        match ctrl.move_to(&MoveTarget::Joint(target), &params) {
            Err(ServoCtrlError::NotConverged { ticks, remaining }) => {
                assert_eq!(ticks, 5);
                assert!(remaining > 0.0);
            }
            r => panic!("Expected NotConverged, got {:?}", r),
        }

        assert_eq!(ctrl.backend().num_ticks, 5);
        assert_eq!(ctrl.backend().num_halts, 1);
    }

    #[test]
    fn test_backend_failure_aborts() {
        let mut ctrl = counting_ctrl();
        ctrl.backend_mut().fail_after = Some(3);
        let target = q_rest() + JointVector::repeat(0.5);

        let res = ctrl.move_to(&MoveTarget::Joint(target), &ServoParams::default());
        assert!(matches!(
            res,
            Err(ServoCtrlError::Backend(BackendError::ArmUnavailable(_)))
        ));
        assert_eq!(ctrl.backend().num_ticks, 3);
        assert_eq!(ctrl.backend().num_halts, 1);
    }

    #[test]
    fn test_cancelled() {
        let mut ctrl = counting_ctrl();
        let token = ctrl.cancel_token();

        /// Sink raising the cancel token on the second tick.
        struct Canceller(Arc<AtomicBool>);
        impl TickSink for Canceller {
            fn wants_frames(&self) -> bool {
                false
            }
            fn record(&mut self, record: TickRecord) {
                assert!(record.frames.is_empty());
                if record.tick == 1 {
                    self.0.store(true, Ordering::Relaxed);
                }
            }
        }
        ctrl.set_sink(Box::new(Canceller(token)));

        let target = q_rest() + JointVector::repeat(0.5);
        let res = ctrl.move_to(&MoveTarget::Joint(target), &ServoParams::default());
        assert!(matches!(res, Err(ServoCtrlError::Cancelled(2))));
        assert_eq!(ctrl.backend().num_halts, 1);

        // The token is lowered for the next move
        let pose = ctrl.current_pose().unwrap();
        assert!(ctrl
            .move_to(&MoveTarget::Cartesian(pose), &ServoParams::default())
            .is_ok());
    }

    #[test]
    fn test_ik_failure_holds_still() {
        let mut ctrl = counting_ctrl();
        let start = ctrl.current_pose().unwrap();
        let target = start * Pose::translation(0.01, 0.0, 0.0);

        // Without an iteration budget every solve fails, so the arm must never move
        let params = ServoParams {
            max_ticks: 3,
            ..Default::default()
        };
        ctrl.vel_ik = VelIk::new(crate::vel_ik::VelIkParams {
            max_iterations: 0,
            ..Default::default()
        });

        let res = ctrl.move_to(&MoveTarget::Cartesian(target), &params);
        assert!(matches!(res, Err(ServoCtrlError::NotConverged { ticks: 3, .. })));
        assert_eq!(ctrl.num_ik_failures(), 3);
        assert_eq!(ctrl.backend().nonzero_cmds, 0);
        assert_eq!(ctrl.read_joints().unwrap(), q_rest());
    }

    #[test]
    fn test_invalid_params() {
        let mut ctrl = ctrl();
        let params = ServoParams {
            gain: -1.0,
            ..Default::default()
        };

        assert!(matches!(
            ctrl.move_to(&MoveTarget::Joint(q_rest()), &params),
            Err(ServoCtrlError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_boundary_biases_without_blocking() {
        let chain = DhChain::lite6();
        let start = chain.fkine(&q_rest());

        // Target 2 cm under the start pose, 1 mm above the forbidden plane
        let target = Pose::from_parts(
            (start.translation.vector - Vector3::new(0.0, 0.0, 0.02)).into(),
            start.rotation,
        );
        let boundary = SafetyBoundary::below(
            target.translation.z - 0.001,
            &BoundaryParams {
                offset_m: 0.0,
                influence_m: 0.004,
            },
        );

        let mut ctrl = ServoCtrl::new(
            chain,
            SimBackend::new(KinematicSim::new(q_rest(), false), 0.04),
            VelIk::default(),
            Some(boundary),
        );

        let outcome = ctrl
            .move_to(&MoveTarget::Cartesian(target), &ServoParams::default())
            .unwrap();
        assert!(outcome.arrived);

        // The pen settles slightly above the target, pushed away from the plane
        let reached = ctrl.kinematics().fkine(&outcome.q);
        assert!(reached.translation.z > target.translation.z);
        assert!(reached.translation.z - target.translation.z < 0.001);
    }
}
