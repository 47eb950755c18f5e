//! # Trajectory generators
//!
//! Pure functions turning a drawing intent into strokes of target poses. All poses are expressed
//! in the drawing-board frame, whose z axis points into the drawing surface, so a lift is a move
//! along -z.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::Vector3;
use std::f64::consts::{FRAC_PI_4, PI};

use crate::kinematics::Pose;
use util::maths::lin_map;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of points on an O mark.
pub const O_NUM_POINTS: usize = 50;

/// Number of probe points along each side of the calibration sweep.
pub const CALIB_POINTS_PER_SIDE: usize = 3;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A single pen stroke.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    /// Waypoint above the start of the path, the pen is lowered from here.
    pub approach: Option<Pose>,

    /// Poses traced with the pen on the surface.
    pub path: Vec<Pose>,

    /// Waypoint above the end of the path, the pen is raised to here.
    pub retreat: Option<Pose>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Stroke {
    /// A stroke along `path` which is lowered onto and lifted off the surface by `lift_height`.
    pub fn lifted(path: Vec<Pose>, lift_height: f64) -> Self {
        Self {
            approach: path.first().map(|p| lift(p, lift_height)),
            retreat: path.last().map(|p| lift(p, lift_height)),
            path,
        }
    }

    /// All waypoints in execution order.
    pub fn waypoints(&self) -> impl Iterator<Item = &Pose> {
        self.approach
            .iter()
            .chain(self.path.iter())
            .chain(self.retreat.iter())
    }

    pub fn num_waypoints(&self) -> usize {
        self.path.len() + self.approach.iter().count() + self.retreat.iter().count()
    }

    /// The stroke expressed in a parent frame, `frame` being the pose of the stroke's frame in the
    /// parent.
    pub fn in_frame(&self, frame: &Pose) -> Self {
        Self {
            approach: self.approach.map(|p| frame * p),
            path: self.path.iter().map(|p| frame * p).collect(),
            retreat: self.retreat.map(|p| frame * p),
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Offset a pose away from the surface.
pub fn lift(pose: &Pose, lift_height: f64) -> Pose {
    pose * Pose::translation(0.0, 0.0, -lift_height)
}

/// The four lines of a tic-tac-toe grid centred on `center`.
///
/// The first two strokes are the dividers parallel to the y axis, the last two those parallel to
/// the x axis. Each line spans the full `grid_size`.
pub fn grid_strokes(center: &Pose, grid_size: f64, lift_height: f64) -> Vec<Stroke> {
    let third = grid_size / 6.0;
    let half = grid_size / 2.0;
    let mut strokes = Vec::with_capacity(4);

    for i in [-1.0, 1.0].iter() {
        strokes.push(Stroke::lifted(
            vec![
                offset(center, third * i, half * i),
                offset(center, third * i, -half * i),
            ],
            lift_height,
        ));
    }

    for i in [-1.0, 1.0].iter() {
        strokes.push(Stroke::lifted(
            vec![
                offset(center, -half * i, third * i),
                offset(center, half * i, third * i),
            ],
            lift_height,
        ));
    }

    strokes
}

/// The two diagonals of an X mark across a square of the given half-length.
///
/// The tool is yawed by +45 degrees for the first diagonal and -45 degrees for the second so
/// that it points along the stroke.
pub fn x_strokes(center: &Pose, half_length: f64, lift_height: f64) -> Vec<Stroke> {
    let h = half_length;

    vec![
        Stroke::lifted(
            vec![
                offset_yawed(center, -h, -h, FRAC_PI_4),
                offset_yawed(center, h, h, FRAC_PI_4),
            ],
            lift_height,
        ),
        Stroke::lifted(
            vec![
                offset_yawed(center, -h, h, -FRAC_PI_4),
                offset_yawed(center, h, -h, -FRAC_PI_4),
            ],
            lift_height,
        ),
    ]
}

/// An O mark, a circle of `O_NUM_POINTS` points starting on the +x axis.
pub fn o_stroke(center: &Pose, radius: f64, lift_height: f64) -> Stroke {
    let path = (0..O_NUM_POINTS)
        .map(|i| {
            let theta = 2.0 * PI * (i as f64) / (O_NUM_POINTS as f64);
            offset(center, radius * theta.cos(), radius * theta.sin())
        })
        .collect();

    Stroke::lifted(path, lift_height)
}

/// Probe points for calibrating the surface height, a square grid of
/// `CALIB_POINTS_PER_SIDE` x `CALIB_POINTS_PER_SIDE` points spanning `size`.
///
/// Each probe touches down at a single point.
pub fn calibration_strokes(center: &Pose, size: f64, lift_height: f64) -> Vec<Stroke> {
    let last = (CALIB_POINTS_PER_SIDE - 1) as f64;
    let span = (-size / 2.0, size / 2.0);
    let mut strokes = Vec::with_capacity(CALIB_POINTS_PER_SIDE * CALIB_POINTS_PER_SIDE);

    for i in 0..CALIB_POINTS_PER_SIDE {
        for j in 0..CALIB_POINTS_PER_SIDE {
            let x = lin_map((0.0, last), span, i as f64);
            let y = lin_map((0.0, last), span, j as f64);

            strokes.push(Stroke::lifted(vec![offset(center, x, y)], lift_height));
        }
    }

    strokes
}

fn offset(center: &Pose, x: f64, y: f64) -> Pose {
    center * Pose::translation(x, y, 0.0)
}

fn offset_yawed(center: &Pose, x: f64, y: f64, yaw: f64) -> Pose {
    center * Pose::new(Vector3::new(x, y, 0.0), Vector3::z() * yaw)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn center() -> Pose {
        Pose::translation(0.2, 0.1, 0.0)
    }

    #[test]
    fn test_o_stroke() {
        let radius = 0.01;
        let stroke = o_stroke(&center(), radius, 0.01);

        assert_eq!(stroke.path.len(), 50);

        let angles: Vec<f64> = stroke
            .path
            .iter()
            .map(|p| {
                let d = p.translation.vector - center().translation.vector;
                assert_relative_eq!(d.norm(), radius, epsilon = 1e-12);
                assert_relative_eq!(d.z, 0.0, epsilon = 1e-12);
                d.y.atan2(d.x)
            })
            .collect();

        assert_relative_eq!(angles[0], 0.0, epsilon = 1e-12);
        for w in angles.windows(2) {
            let mut step = w[1] - w[0];
            if step < 0.0 {
                step += 2.0 * PI;
            }
            assert_relative_eq!(step, 2.0 * PI / 50.0, epsilon = 1e-9);
        }

        // Lifted over the first and last points
        let approach = stroke.approach.unwrap();
        assert_relative_eq!(
            approach.translation.vector,
            stroke.path[0].translation.vector - Vector3::new(0.0, 0.0, 0.01),
            epsilon = 1e-12
        );
        assert!(stroke.retreat.is_some());
        assert_eq!(stroke.num_waypoints(), 52);
    }

    #[test]
    fn test_grid_strokes() {
        let strokes = grid_strokes(&center(), 0.09, 0.01);
        assert_eq!(strokes.len(), 4);

        for (n, s) in strokes.iter().enumerate() {
            assert_eq!(s.path.len(), 2);
            assert!(s.approach.is_some() && s.retreat.is_some());

            let d = s.path[1].translation.vector - s.path[0].translation.vector;
            assert_relative_eq!(d.norm(), 0.09, epsilon = 1e-12);

            // First two lines run along y, the others along x
            if n < 2 {
                assert_relative_eq!(d.x, 0.0, epsilon = 1e-12);
            } else {
                assert_relative_eq!(d.y, 0.0, epsilon = 1e-12);
            }
        }

        // The dividers sit a third of the way across
        let x0 = strokes[0].path[0].translation.x - 0.2;
        let x1 = strokes[1].path[0].translation.x - 0.2;
        assert_relative_eq!(x0, -0.015, epsilon = 1e-12);
        assert_relative_eq!(x1, 0.015, epsilon = 1e-12);
    }

    #[test]
    fn test_x_strokes() {
        let strokes = x_strokes(&Pose::identity(), 0.01, 0.005);
        assert_eq!(strokes.len(), 2);

        let yaw0 = strokes[0].path[0].rotation.euler_angles().2;
        let yaw1 = strokes[1].path[1].rotation.euler_angles().2;
        assert_relative_eq!(yaw0, FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(yaw1, -FRAC_PI_4, epsilon = 1e-12);

        let start = strokes[1].path[0].translation.vector;
        let end = strokes[1].path[1].translation.vector;
        assert_relative_eq!(start, Vector3::new(-0.01, 0.01, 0.0), epsilon = 1e-12);
        assert_relative_eq!(end, Vector3::new(0.01, -0.01, 0.0), epsilon = 1e-12);

        // The lift is along the board -z, whatever the yaw
        let retreat = strokes[0].retreat.unwrap().translation.vector;
        assert_relative_eq!(retreat, Vector3::new(0.01, 0.01, -0.005), epsilon = 1e-12);
    }

    #[test]
    fn test_calibration_strokes() {
        let strokes = calibration_strokes(&center(), 0.1, 0.01);
        assert_eq!(strokes.len(), 9);

        let xs: Vec<f64> = strokes.iter().map(|s| s.path[0].translation.x).collect();
        let ys: Vec<f64> = strokes.iter().map(|s| s.path[0].translation.y).collect();
        assert_relative_eq!(xs[0], 0.15, epsilon = 1e-12);
        assert_relative_eq!(xs[8], 0.25, epsilon = 1e-12);
        assert_relative_eq!(ys[1], 0.1, epsilon = 1e-12);
        assert_relative_eq!(ys[2], 0.15, epsilon = 1e-12);

        for s in strokes.iter() {
            assert_eq!(s.num_waypoints(), 3);
        }
    }

    #[test]
    fn test_in_frame() {
        let stroke = o_stroke(&Pose::identity(), 0.01, 0.01);
        let frame = Pose::new(Vector3::new(1.0, 0.0, 0.5), Vector3::x() * PI);
        let moved = stroke.in_frame(&frame);

        assert_eq!(moved.num_waypoints(), stroke.num_waypoints());
        for (a, b) in moved.waypoints().zip(stroke.waypoints()) {
            assert_relative_eq!(
                a.translation.vector,
                (frame * b).translation.vector,
                epsilon = 1e-12
            );
        }

        // Flipped about x, so the lift now points up in the parent frame
        assert!(moved.approach.unwrap().translation.z > 0.5);
    }
}
