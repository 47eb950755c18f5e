//! # OXO player
//!
//! The caller-facing drawing operations. The player turns "draw the grid here" or "draw an O in
//! that cell" into strokes from `traj_gen`, resolves them into the world frame through the
//! drawing board, and executes every waypoint with `ServoCtrl::move_to`.
//!
//! Operations are synchronous. A multithreaded caller must serialise access to the player, one
//! instance per arm.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::sync::{atomic::AtomicBool, Arc};

use crate::{
    backend::{Backend, BackendError},
    board::{BoardError, CalibrationReport, CellIndex, DrawingBoard, GridGeometry, GridSession},
    kinematics::{Kinematics, Pose},
    servo_ctrl::{MoveTarget, ServoCtrl, ServoCtrlError, ServoParams},
    traj_gen::{self, Stroke},
};

pub use params::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Draws tic-tac-toe on the board with the arm.
pub struct OxoPlayer<K: Kinematics, B: Backend> {
    ctrl: ServoCtrl<K, B>,
    board: DrawingBoard,
    session: GridSession,
    params: PlayerParams,
    servo: ServoParams,
    last_calibration: Option<CalibrationReport>,
}

/// Summary of a completed drawing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawReport {
    /// Number of waypoints reached, including the rest move.
    pub waypoints: usize,

    /// Number of control ticks the drawing took.
    pub ticks: u64,
}

/// A single planned move.
struct Waypoint {
    target: MoveTarget,
    servo: ServoParams,

    /// Whether the pen is on the surface at this waypoint.
    on_surface: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A mark a player can make in a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Usage error: {0}")]
    Usage(#[from] BoardError),

    #[error("Motion failed before any waypoint was reached: {0}")]
    Motion(#[from] ServoCtrlError),

    #[error("Drawing abandoned after {completed} of {total} waypoints: {source}")]
    PartialCompletion {
        completed: usize,
        total: usize,
        source: ServoCtrlError,
    },

    #[error("Could not read the arm state: {0}")]
    Backend(#[from] BackendError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<K: Kinematics, B: Backend> OxoPlayer<K, B> {
    pub fn new(
        ctrl: ServoCtrl<K, B>,
        board: DrawingBoard,
        params: PlayerParams,
        servo: ServoParams,
    ) -> Self {
        Self {
            ctrl,
            board,
            session: GridSession::new(),
            params,
            servo,
            last_calibration: None,
        }
    }

    pub fn board(&self) -> &DrawingBoard {
        &self.board
    }

    /// The grid currently on the board, if one has been drawn.
    pub fn grid(&self) -> Option<&GridGeometry> {
        self.session.grid()
    }

    pub fn ctrl(&self) -> &ServoCtrl<K, B> {
        &self.ctrl
    }

    pub fn ctrl_mut(&mut self) -> &mut ServoCtrl<K, B> {
        &mut self.ctrl
    }

    /// Token cancelling the move in progress, see `ServoCtrl::cancel_token`.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.ctrl.cancel_token()
    }

    pub fn last_calibration(&self) -> Option<&CalibrationReport> {
        self.last_calibration.as_ref()
    }

    /// World pose and edge length of a cell of the current grid.
    pub fn cell_center(&self, cell: CellIndex) -> Result<(Pose, f64), PlayerError> {
        Ok(self.session.cell_center(cell)?)
    }

    /// Draw a grid centred on `center`, given in the board frame, and make it the current grid.
    pub fn draw_grid(&mut self, center: &Pose, size_m: f64) -> Result<DrawReport, PlayerError> {
        let world_center = self.board.to_world(center);
        self.session.set_grid(world_center, size_m)?;

        info!(
            "Drawing a {:.3} m grid at {:?} on the board",
            size_m,
            center.translation.vector.as_slice()
        );

        let strokes: Vec<Stroke> =
            traj_gen::grid_strokes(center, size_m, self.params.lift_height_m)
                .iter()
                .map(|s| s.in_frame(self.board.origin()))
                .collect();

        let plan = self.plan(&strokes, &self.servo);
        self.execute(plan, false).map(|(report, _)| report)
    }

    /// Draw a mark in a cell of the current grid.
    pub fn draw_mark(&mut self, mark: Mark, cell: CellIndex) -> Result<DrawReport, PlayerError> {
        let (cell_center, cell_size) = self.session.cell_center(cell)?;
        let lift = self.params.lift_height_m;

        info!("Drawing {:?} in cell {}", mark, cell);

        let (strokes, path_servo) = match mark {
            Mark::X => (
                traj_gen::x_strokes(&cell_center, cell_size * self.params.x_half_length_frac, lift),
                self.servo,
            ),
            Mark::O => (
                vec![traj_gen::o_stroke(
                    &cell_center,
                    cell_size * self.params.o_radius_frac,
                    lift,
                )],
                self.servo.with_gain(self.params.o_gain),
            ),
        };

        let plan = self.plan(&strokes, &path_servo);
        self.execute(plan, false).map(|(report, _)| report)
    }

    /// Probe the surface at a 3x3 grid of points spanning `size_m` around `center` (board frame)
    /// and fit a plane through the touch-down positions.
    pub fn calibrate(
        &mut self,
        center: &Pose,
        size_m: f64,
    ) -> Result<CalibrationReport, PlayerError> {
        if !(size_m.is_finite() && size_m > 0.0) {
            return Err(BoardError::InvalidGridSize(size_m).into());
        }

        info!("Calibrating the surface over {:.3} m", size_m);

        let strokes: Vec<Stroke> =
            traj_gen::calibration_strokes(center, size_m, self.params.lift_height_m)
                .iter()
                .map(|s| s.in_frame(self.board.origin()))
                .collect();

        let plan = self.plan(&strokes, &self.servo);
        let (_, probes) = self.execute(plan, true)?;

        let report = CalibrationReport::from_probes(&probes)?;
        info!(
            "Surface plane fitted: z = {:.5} x + {:.5} y + {:.5} (rms {:.5} m)",
            report.plane.a, report.plane.b, report.plane.c, report.rms_residual_m
        );
        self.last_calibration = Some(report.clone());

        Ok(report)
    }

    /// Move to the rest configuration, if one is configured.
    pub fn go_to_rest(&mut self) -> Result<(), PlayerError> {
        if let Some(q_rest) = self.params.rest_joints() {
            self.ctrl.move_to(&MoveTarget::Joint(q_rest), &self.servo)?;
        }
        Ok(())
    }

    /// Flatten strokes into waypoints, points on the surface use `path_servo`.
    fn plan(&self, strokes: &[Stroke], path_servo: &ServoParams) -> Vec<Waypoint> {
        let mut plan = Vec::new();

        for s in strokes {
            if let Some(a) = s.approach {
                plan.push(Waypoint {
                    target: MoveTarget::Cartesian(a),
                    servo: self.servo,
                    on_surface: false,
                });
            }
            for p in s.path.iter() {
                plan.push(Waypoint {
                    target: MoveTarget::Cartesian(*p),
                    servo: *path_servo,
                    on_surface: true,
                });
            }
            if let Some(r) = s.retreat {
                plan.push(Waypoint {
                    target: MoveTarget::Cartesian(r),
                    servo: self.servo,
                    on_surface: false,
                });
            }
        }

        if let Some(q_rest) = self.params.rest_joints() {
            plan.push(Waypoint {
                target: MoveTarget::Joint(q_rest),
                servo: self.servo,
                on_surface: false,
            });
        }

        plan
    }

    /// Run the waypoints in order. With `probe` set the board frame position reached at every
    /// waypoint on the surface is returned alongside the report.
    fn execute(
        &mut self,
        plan: Vec<Waypoint>,
        probe: bool,
    ) -> Result<(DrawReport, Vec<Vector3<f64>>), PlayerError> {
        let total = plan.len();
        let mut ticks = 0;
        let mut probes = Vec::new();

        for (i, w) in plan.iter().enumerate() {
            debug!("Waypoint {}/{}: {:?}", i + 1, total, w.target);

            match self.ctrl.move_to(&w.target, &w.servo) {
                Ok(outcome) => {
                    ticks += outcome.ticks;

                    if probe && w.on_surface {
                        let reached = self.ctrl.kinematics().fkine(&outcome.q);
                        probes.push(self.board.to_board(&reached.translation.vector));
                    }
                }
                Err(e) if i == 0 => {
                    warn!("Drawing abandoned at the first waypoint: {}", e);
                    return Err(PlayerError::Motion(e));
                }
                Err(e) => {
                    warn!("Drawing abandoned after {} of {} waypoints: {}", i, total, e);
                    return Err(PlayerError::PartialCompletion {
                        completed: i,
                        total,
                        source: e,
                    });
                }
            }
        }

        Ok((
            DrawReport {
                waypoints: total,
                ticks,
            },
            probes,
        ))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
