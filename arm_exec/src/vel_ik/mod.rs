//! # Velocity IK optimizer
//!
//! Finds the joint rates which best track a desired end effector velocity, subject to a joint
//! rate limit, by solving a small box-constrained quadratic program every control tick:
//!
//! ```text
//! minimise    |J qd - v|^2 + lambda |qd|^2 + c^T qd
//! subject to  -qd_max <= qd <= qd_max
//! ```
//!
//! `c` is an optional bias which pushes the end effector away from the safety boundary. It is
//! scaled and clamped so that it nudges the solution rather than overriding the tracking term.
//!
//! The QP is solved with a primal active-set method. With six variables the method terminates in
//! a handful of iterations, and each iteration is a single 6x6 Cholesky solve.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::trace;
use serde::{Deserialize, Serialize};

use crate::{
    boundary::SafetyBoundary,
    kinematics::{Jacobian, JointVector, Pose, SpatialVelocity, NUM_JOINTS},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters of the optimizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct VelIkParams {
    /// Tikhonov damping on the joint rates, keeps the problem well posed near singularities.
    pub damping: f64,

    /// Weight applied to the boundary bias.
    pub bias_weight: f64,

    /// The boundary gradient is clamped to this magnitude before weighting.
    pub max_bias_gradient: f64,

    /// Maximum number of active-set iterations before giving up.
    pub max_iterations: usize,

    /// Tolerance on the KKT multipliers of the bound constraints.
    pub kkt_tolerance: f64,
}

/// The velocity IK optimizer.
#[derive(Debug, Clone, Default)]
pub struct VelIk {
    params: VelIkParams,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Reasons the optimizer can fail. The servo controller holds zero velocity for the tick when it
/// sees any of these.
#[derive(Debug, thiserror::Error)]
pub enum VelIkError {
    #[error("The joint rate limit ({0}) gives an empty feasible set")]
    Infeasible(f64),

    #[error("Non-finite value found in the {0}")]
    InvalidInput(&'static str),

    #[error("The QP is not positive definite")]
    NotPositiveDefinite,

    #[error("The solver did not converge within {0} iterations")]
    NotConverged(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bound {
    Free,
    Lower,
    Upper,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for VelIkParams {
    fn default() -> Self {
        Self {
            damping: 1e-6,
            bias_weight: 1e-3,
            max_bias_gradient: 1.0,
            max_iterations: 50,
            kkt_tolerance: 1e-12,
        }
    }
}

impl VelIk {
    pub fn new(params: VelIkParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &VelIkParams {
        &self.params
    }

    /// Compute the joint rates tracking `v`.
    ///
    /// ## Arguments
    /// - `jac`: Jacobian in the same frame as `v` (the end effector frame in normal use)
    /// - `v`: desired spatial velocity
    /// - `qd_max`: joint rate limit, applied symmetrically to every joint
    /// - `boundary`: the current end effector pose in the world frame and the boundary to bias
    ///    away from, or `None` for an unbiased solve
    pub fn solve(
        &self,
        jac: &Jacobian,
        v: &SpatialVelocity,
        qd_max: f64,
        boundary: Option<(&Pose, &SafetyBoundary)>,
    ) -> Result<JointVector, VelIkError> {
        if qd_max.is_nan() || qd_max < 0.0 {
            return Err(VelIkError::Infeasible(qd_max));
        }
        if jac.iter().any(|x| !x.is_finite()) {
            return Err(VelIkError::InvalidInput("Jacobian"));
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(VelIkError::InvalidInput("desired velocity"));
        }

        let bias = match boundary {
            Some((wte, b)) => self.boundary_bias(jac, wte, b),
            None => JointVector::zeros(),
        };
        if bias.iter().any(|x| !x.is_finite()) {
            return Err(VelIkError::InvalidInput("boundary bias"));
        }

        // A zero limit pins every joint
        if qd_max == 0.0 {
            return Ok(JointVector::zeros());
        }

        // Expand the cost into 0.5 x^T H x + g^T x
        let jt = jac.transpose();
        let h = (jt * jac + Jacobian::identity() * self.params.damping) * 2.0;
        let g = jt * v * -2.0 + bias;

        let qd = self.solve_box_qp(&h, &g, qd_max)?;

        if qd.iter().any(|x| !x.is_finite()) {
            return Err(VelIkError::InvalidInput("solution"));
        }

        Ok(qd)
    }

    /// Joint space bias pushing the end effector along the boundary repulsion.
    ///
    /// The world frame gradient is rotated into the end effector frame and mapped through the
    /// translational rows of `jac`. A zero vector is returned outside the influence distance.
    pub fn boundary_bias(
        &self,
        jac: &Jacobian,
        wte: &Pose,
        boundary: &SafetyBoundary,
    ) -> JointVector {
        let mut grad_w = boundary.gradient(&wte.translation.vector);

        let mag = grad_w.norm();
        if mag == 0.0 {
            return JointVector::zeros();
        }
        if mag > self.params.max_bias_gradient {
            grad_w *= self.params.max_bias_gradient / mag;
        }

        let grad_e = wte.rotation.inverse() * grad_w;

        let mut c = JointVector::zeros();
        for j in 0..NUM_JOINTS {
            let mut dot = 0.0;
            for r in 0..3 {
                dot += jac[(r, j)] * grad_e[r];
            }
            c[j] = -self.params.bias_weight * dot;
        }

        c
    }

    /// Minimise `0.5 x^T H x + g^T x` inside the box `[-bound, bound]`.
    fn solve_box_qp(
        &self,
        h: &Jacobian,
        g: &JointVector,
        bound: f64,
    ) -> Result<JointVector, VelIkError> {
        // The origin is always feasible
        let mut x = JointVector::zeros();
        let mut state = [Bound::Free; NUM_JOINTS];

        for iter in 0..self.params.max_iterations {
            // Minimise over the free joints with the bound joints held at their limits
            let mut m = Jacobian::identity();
            let mut rhs = JointVector::zeros();

            for i in 0..NUM_JOINTS {
                if state[i] != Bound::Free {
                    rhs[i] = x[i];
                    continue;
                }

                rhs[i] = -g[i];
                for k in 0..NUM_JOINTS {
                    if state[k] == Bound::Free {
                        m[(i, k)] = h[(i, k)];
                    } else {
                        rhs[i] -= h[(i, k)] * x[k];
                    }
                }
            }

            let target = m
                .cholesky()
                .ok_or(VelIkError::NotPositiveDefinite)?
                .solve(&rhs);
            let step = target - x;

            // Walk towards the target until the first free joint hits a limit
            let mut alpha = 1.0;
            let mut blocking = None;
            for i in 0..NUM_JOINTS {
                if state[i] != Bound::Free {
                    continue;
                }

                if x[i] + step[i] > bound {
                    let a = ((bound - x[i]) / step[i]).max(0.0);
                    if a < alpha {
                        alpha = a;
                        blocking = Some((i, Bound::Upper));
                    }
                } else if x[i] + step[i] < -bound {
                    let a = ((-bound - x[i]) / step[i]).max(0.0);
                    if a < alpha {
                        alpha = a;
                        blocking = Some((i, Bound::Lower));
                    }
                }
            }

            x += step * alpha;

            if let Some((i, b)) = blocking {
                x[i] = match b {
                    Bound::Upper => bound,
                    _ => -bound,
                };
                state[i] = b;
                continue;
            }

            // At the subproblem optimum, release the bound joint whose multiplier has the wrong
            // sign, if any
            let grad = h * x + g;
            let mut release = None;
            let mut worst = self.params.kkt_tolerance * (1.0 + g.amax());
            for i in 0..NUM_JOINTS {
                let violation = match state[i] {
                    Bound::Free => continue,
                    Bound::Lower => -grad[i],
                    Bound::Upper => grad[i],
                };

                if violation > worst {
                    worst = violation;
                    release = Some(i);
                }
            }

            match release {
                Some(i) => state[i] = Bound::Free,
                None => {
                    trace!("VelIk converged in {} iterations", iter + 1);
                    return Ok(x);
                }
            }
        }

        Err(VelIkError::NotConverged(self.params.max_iterations))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::kinematics::{DhChain, Kinematics};
    use approx::assert_relative_eq;

    fn q_rest() -> JointVector {
        JointVector::from_column_slice(&util::maths::deg_to_rad([0.0, -42.0, 30.0, 0.0, 50.0, 0.0]))
    }

    fn jac() -> Jacobian {
        DhChain::lite6().jacobe(&q_rest())
    }

    #[test]
    fn test_zero_velocity_gives_zero() {
        let ik = VelIk::default();
        let qd = ik
            .solve(&jac(), &SpatialVelocity::zeros(), 1.0, None)
            .unwrap();

        assert_eq!(qd, JointVector::zeros());
    }

    #[test]
    fn test_unconstrained_tracks_velocity() {
        let ik = VelIk::default();
        let j = jac();
        let v = SpatialVelocity::new(0.01, -0.02, 0.005, 0.0, 0.01, 0.0);

        let qd = ik.solve(&j, &v, 10.0, None).unwrap();
        let achieved = j * qd;

        for i in 0..6 {
            assert_relative_eq!(achieved[i], v[i], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_respects_bounds() {
        let ik = VelIk::default();
        let chain = DhChain::lite6();

        let velocities = [
            SpatialVelocity::new(1.0, 0.0, 0.0, 0.0, 0.0, 0.0),
            SpatialVelocity::new(-2.0, 3.0, 1.0, 0.5, -0.5, 4.0),
            SpatialVelocity::new(0.0, 0.0, -0.7, 2.0, 0.0, 0.0),
            SpatialVelocity::new(0.3, 0.3, 0.3, 0.3, 0.3, 0.3),
        ];
        let configs = [
            q_rest(),
            JointVector::new(0.3, -0.2, 0.9, 0.1, 1.2, -0.4),
            JointVector::new(-1.0, 0.1, 0.4, 0.5, 0.2, 2.0),
        ];

        for q in configs.iter() {
            let j = chain.jacobe(q);
            for v in velocities.iter() {
                for qd_max in &[0.0, 0.05, 0.5, 1.0] {
                    let qd = ik.solve(&j, v, *qd_max, None).unwrap();
                    for x in qd.iter() {
                        assert!(x.abs() <= qd_max + 1e-9, "{} > {}", x, qd_max);
                    }
                }
            }
        }
    }

    #[test]
    fn test_bounded_solution_is_optimal() {
        // With the limit active the cost must not improve by nudging any joint inside the box
        let ik = VelIk::default();
        let j = jac();
        let v = SpatialVelocity::new(0.8, -0.4, 0.2, 0.0, 0.0, 1.0);
        let qd_max = 0.2;

        let cost = |qd: &JointVector| (j * qd - v).norm_squared() + 1e-6 * qd.norm_squared();

        let qd = ik.solve(&j, &v, qd_max, None).unwrap();
        let best = cost(&qd);

        for i in 0..6 {
            for delta in &[-1e-4, 1e-4] {
                let mut nudged = qd;
                nudged[i] = util::maths::clamp(nudged[i] + delta, -qd_max, qd_max);
                assert!(cost(&nudged) >= best - 1e-12);
            }
        }
    }

    #[test]
    fn test_infeasible_is_error() {
        let ik = VelIk::default();
        let v = SpatialVelocity::new(0.1, 0.0, 0.0, 0.0, 0.0, 0.0);

        assert!(matches!(
            ik.solve(&jac(), &v, -1.0, None),
            Err(VelIkError::Infeasible(_))
        ));
        assert!(matches!(
            ik.solve(&jac(), &v, f64::NAN, None),
            Err(VelIkError::Infeasible(_))
        ));

        let mut bad_v = v;
        bad_v[2] = f64::NAN;
        assert!(matches!(
            ik.solve(&jac(), &bad_v, 1.0, None),
            Err(VelIkError::InvalidInput(_))
        ));

        let mut bad_j = jac();
        bad_j[(0, 0)] = f64::INFINITY;
        assert!(matches!(
            ik.solve(&bad_j, &v, 1.0, None),
            Err(VelIkError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_boundary_bias_lifts_effector() {
        let ik = VelIk::default();
        let chain = DhChain::lite6();
        let q = q_rest();
        let wte = chain.fkine(&q);
        let j = chain.jacobe(&q);

        // Boundary just under the effector
        let boundary = SafetyBoundary {
            z_m: wte.translation.z - 0.001,
            influence_m: 0.004,
        };

        let qd = ik
            .solve(&j, &SpatialVelocity::zeros(), 1.0, Some((&wte, &boundary)))
            .unwrap();

        // Small upward velocity in the world frame
        let v_e = j * qd;
        let v_w = wte.rotation * nalgebra::Vector3::new(v_e[0], v_e[1], v_e[2]);
        assert!(v_w.z > 0.0);
        assert!(v_w.z < 0.01);
        assert!(v_w.x.abs() < 0.05 * v_w.z);
        assert!(v_w.y.abs() < 0.05 * v_w.z);

        // Far from the boundary there is no bias
        let far = SafetyBoundary {
            z_m: wte.translation.z - 0.5,
            influence_m: 0.004,
        };
        assert_eq!(ik.boundary_bias(&j, &wte, &far), JointVector::zeros());
    }
}
