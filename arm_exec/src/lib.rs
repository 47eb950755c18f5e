//! # Arm library.
//!
//! This library allows the executable, the integration tests and the benchmarks to access items
//! defined inside the arm crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Arm client - requests joint telemetry from and sends demands to the arm server
#[cfg(feature = "hardware")]
pub mod arm_client;

/// Execution backends - advance the arm by one control tick, in hardware or in simulation
pub mod backend;

/// Drawing board - the board frame, the current grid and the cell geometry
pub mod board;

/// Safety boundary - repulsive potential under the drawing surface
pub mod boundary;

/// Kinematics - forward kinematics, Jacobians and servo laws for the arm
pub mod kinematics;

/// OXO player - draws the grid and the marks
pub mod oxo_player;

/// Executable parameters
pub mod params;

/// Servo control - the closed-loop `move_to` primitive
pub mod servo_ctrl;

/// Trajectory generators - strokes of target poses for every drawing
pub mod traj_gen;

/// Trajectory log - per tick recording of the arm state
pub mod traj_log;

/// Velocity inverse kinematics - the per tick joint velocity optimizer
pub mod vel_ik;
