//! # Drawing board
//!
//! The drawing-board frame, the grid drawn on it during a session, and the mapping from a logical
//! cell index to a pose on the board.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod calibration;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::{
    boundary::{BoundaryParams, SafetyBoundary},
    kinematics::{JointVector, Kinematics, Pose},
};

pub use calibration::*;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of cells along each side of the grid.
pub const GRID_CELLS_PER_SIDE: usize = 3;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The drawing board, a frame on the drawing surface whose z axis points into the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawingBoard {
    origin: Pose,
}

/// Geometry of the last grid drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    /// Pose of the grid center.
    ///
    /// Frame: World
    pub center: Pose,

    /// Edge length of the whole grid.
    ///
    /// Units: meters
    pub size_m: f64,
}

/// Session state of a game, the grid currently on the board.
///
/// Only the most recently drawn grid is valid.
#[derive(Debug, Clone, Default)]
pub struct GridSession {
    grid: Option<GridGeometry>,
}

/// Index of a cell in the grid, row and column both in `0..3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellIndex {
    pub row: usize,
    pub col: usize,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("No grid has been drawn yet")]
    NoGrid,

    #[error("Cell ({row}, {col}) is outside the 3x3 grid")]
    CellOutOfRange { row: usize, col: usize },

    #[error("Could not parse a cell index from {0:?}, expected \"row,col\"")]
    CellParseError(String),

    #[error("The taught points do not span a plane")]
    DegenerateFrame,

    #[error("Invalid grid size {0} m")]
    InvalidGridSize(f64),

    #[error("At least 3 non-colinear probes are needed to fit the surface, found {0}")]
    NotEnoughProbes(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DrawingBoard {
    pub fn new(origin: Pose) -> Self {
        Self { origin }
    }

    /// Build the board frame from three points on the surface.
    ///
    /// The x axis points from `origin` towards `x_point`, z is normal to the plane containing
    /// all three points (`x × (y_point - origin)`), and y completes the right handed frame.
    pub fn from_points(
        origin: &Vector3<f64>,
        x_point: &Vector3<f64>,
        y_point: &Vector3<f64>,
    ) -> Result<Self, BoardError> {
        let x = (x_point - origin)
            .try_normalize(1e-9)
            .ok_or(BoardError::DegenerateFrame)?;
        let z = x
            .cross(&(y_point - origin))
            .try_normalize(1e-9)
            .ok_or(BoardError::DegenerateFrame)?;
        let y = z.cross(&x);

        let rot = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[x, y, z]));

        Ok(Self {
            origin: Pose::from_parts(
                Translation3::from(*origin),
                UnitQuaternion::from_rotation_matrix(&rot),
            ),
        })
    }

    /// Build the board frame from the end effector positions at three taught joint
    /// configurations, see `from_points`.
    pub fn from_taught_configs<K: Kinematics>(
        kin: &K,
        origin_q: &JointVector,
        x_q: &JointVector,
        y_q: &JointVector,
    ) -> Result<Self, BoardError> {
        let p = |q: &JointVector| kin.fkine(q).translation.vector;

        Self::from_points(&p(origin_q), &p(x_q), &p(y_q))
    }

    /// Pose of the board in the world frame.
    pub fn origin(&self) -> &Pose {
        &self.origin
    }

    /// Resolve a pose given in the board frame into the world frame.
    pub fn to_world(&self, board_pose: &Pose) -> Pose {
        self.origin * board_pose
    }

    /// Position of a world point in the board frame.
    pub fn to_board(&self, world_point: &Vector3<f64>) -> Vector3<f64> {
        (self.origin.inverse() * Point3::from(*world_point)).coords
    }

    /// The safety boundary under this board.
    pub fn safety_boundary(&self, params: &BoundaryParams) -> SafetyBoundary {
        SafetyBoundary::below(self.origin.translation.z, params)
    }
}

impl GridSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current grid.
    pub fn set_grid(&mut self, center: Pose, size_m: f64) -> Result<(), BoardError> {
        if !(size_m.is_finite() && size_m > 0.0) {
            return Err(BoardError::InvalidGridSize(size_m));
        }

        self.grid = Some(GridGeometry { center, size_m });
        Ok(())
    }

    pub fn grid(&self) -> Option<&GridGeometry> {
        self.grid.as_ref()
    }

    /// World pose of the center of a cell and the cell edge length.
    ///
    /// With `half = size / 2` and `cell = size / 3` the cell center sits at
    /// `(-half + (col + 0.5) * cell, -half + (row + 0.5) * cell)` in the grid frame.
    pub fn cell_center(&self, cell: CellIndex) -> Result<(Pose, f64), BoardError> {
        cell.check()?;
        let grid = self.grid.as_ref().ok_or(BoardError::NoGrid)?;

        let cell_size = grid.size_m / GRID_CELLS_PER_SIDE as f64;
        let half = grid.size_m / 2.0;

        let x = -half + (cell.col as f64 + 0.5) * cell_size;
        let y = -half + (cell.row as f64 + 0.5) * cell_size;

        Ok((grid.center * Pose::translation(x, y, 0.0), cell_size))
    }
}

impl CellIndex {
    pub fn new(row: usize, col: usize) -> Result<Self, BoardError> {
        let c = Self { row, col };
        c.check()?;
        Ok(c)
    }

    fn check(&self) -> Result<(), BoardError> {
        if self.row >= GRID_CELLS_PER_SIDE || self.col >= GRID_CELLS_PER_SIDE {
            Err(BoardError::CellOutOfRange {
                row: self.row,
                col: self.col,
            })
        } else {
            Ok(())
        }
    }
}

impl FromStr for CellIndex {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_err = || BoardError::CellParseError(s.into());

        let mut parts = s.split(',').map(|p| p.trim().parse::<usize>());
        let row = parts.next().ok_or_else(parse_err)?.map_err(|_| parse_err())?;
        let col = parts.next().ok_or_else(parse_err)?.map_err(|_| parse_err())?;
        if parts.next().is_some() {
            return Err(parse_err());
        }

        Self::new(row, col)
    }
}

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
