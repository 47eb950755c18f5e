//! Serial chain kinematics described by modified Denavit-Hartenberg parameters.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use super::{Jacobian, JointVector, Kinematics, KinematicsError, Pose, PoseParams, NUM_JOINTS};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters of a serial chain, loaded from the kinematics params file (e.g. `lite6.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhChainParams {
    /// Name of the arm, only used for logging.
    pub name: String,

    /// Placement of the arm base in the world frame.
    pub base: PoseParams,

    /// Transform from the last link frame to the pen tip.
    #[serde(default)]
    pub tool: PoseParams,

    /// Links ordered from the base to the wrist.
    pub links: Vec<DhLinkParams>,
}

/// A single link in modified DH form.
///
/// The link transform is `Rx(alpha) * Tx(a) * Rz(theta + offset) * Tz(d)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DhLinkParams {
    /// Units: meters
    pub a_m: f64,

    /// Units: degrees
    pub alpha_deg: f64,

    /// Units: meters
    pub d_m: f64,

    /// Joint angle offset between the joint zero and the DH zero.
    ///
    /// Units: degrees
    #[serde(default)]
    pub offset_deg: f64,
}

/// A revolute serial chain.
#[derive(Debug, Clone)]
pub struct DhChain {
    name: String,
    base: Pose,
    tool: Pose,
    links: Vec<DhLink>,
}

#[derive(Debug, Clone, Copy)]
struct DhLink {
    a: f64,
    alpha: f64,
    d: f64,
    offset: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DhChain {
    /// Build a chain from its parameters.
    ///
    /// The chain must have exactly `NUM_JOINTS` links, all of them finite.
    pub fn new(params: &DhChainParams) -> Result<Self, KinematicsError> {
        if params.links.len() != NUM_JOINTS {
            return Err(KinematicsError::WrongNumLinks {
                expected: NUM_JOINTS,
                found: params.links.len(),
            });
        }

        let mut links = Vec::with_capacity(NUM_JOINTS);
        for (i, l) in params.links.iter().enumerate() {
            let link = DhLink {
                a: l.a_m,
                alpha: l.alpha_deg.to_radians(),
                d: l.d_m,
                offset: l.offset_deg.to_radians(),
            };

            if !(link.a.is_finite()
                && link.alpha.is_finite()
                && link.d.is_finite()
                && link.offset.is_finite())
            {
                return Err(KinematicsError::NonFiniteLink(i));
            }

            links.push(link);
        }

        Ok(Self {
            name: params.name.clone(),
            base: params.base.to_pose(),
            tool: params.tool.to_pose(),
            links,
        })
    }

    /// The built-in UFactory Lite6 model, base rotated -90 degrees about z and lifted 0.7 m.
    pub fn lite6() -> Self {
        let links = [
            // (a, alpha, d, offset)
            (0.0, 0.0, 0.2433, 0.0),
            (0.0, -90.0, 0.0, -90.0),
            (0.2, 180.0, 0.0, -90.0),
            (0.087, 90.0, 0.2276, 0.0),
            (0.0, 90.0, 0.0, 0.0),
            (0.0, -90.0, 0.0615, 0.0),
        ];

        Self {
            name: "lite6".into(),
            base: PoseParams {
                position_m: [0.0, 0.0, 0.7],
                rpy_deg: [0.0, 0.0, -90.0],
            }
            .to_pose(),
            tool: Pose::identity(),
            links: links
                .iter()
                .map(|&(a, alpha, d, offset): &(f64, f64, f64, f64)| DhLink {
                    a,
                    alpha: alpha.to_radians(),
                    d,
                    offset: offset.to_radians(),
                })
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frames of each joint in the world frame, base first, last link last. The tool transform is
    /// not applied.
    fn link_frames(&self, q: &JointVector) -> Vec<Pose> {
        let mut frames = Vec::with_capacity(NUM_JOINTS + 1);
        let mut t = self.base;
        frames.push(t);

        for (link, q_i) in self.links.iter().zip(q.iter()) {
            t *= link.transform(*q_i);
            frames.push(t);
        }

        frames
    }

    /// Geometric Jacobian in the world frame.
    pub fn jacob0(&self, q: &JointVector) -> Jacobian {
        let frames = self.link_frames(q);
        let wte = frames[NUM_JOINTS] * self.tool;
        let p_e = wte.translation.vector;

        let mut jac = Jacobian::zeros();

        // Joint i rotates about the z axis of frame i+1 (modified DH places the joint axis in the
        // link's own frame)
        for (i, frame) in frames.iter().skip(1).enumerate() {
            let z_i = frame.rotation * Vector3::z();
            let p_i = frame.translation.vector;
            let lin = z_i.cross(&(p_e - p_i));

            for r in 0..3 {
                jac[(r, i)] = lin[r];
                jac[(r + 3, i)] = z_i[r];
            }
        }

        jac
    }
}

impl Kinematics for DhChain {
    fn fkine(&self, q: &JointVector) -> Pose {
        let mut t = self.base;
        for (link, q_i) in self.links.iter().zip(q.iter()) {
            t *= link.transform(*q_i);
        }
        t * self.tool
    }

    fn fkine_all(&self, q: &JointVector) -> Vec<Pose> {
        let mut frames = self.link_frames(q);
        if let Some(last) = frames.last().copied() {
            frames.push(last * self.tool);
        }
        frames
    }

    fn jacobe(&self, q: &JointVector) -> Jacobian {
        let j0 = self.jacob0(q);
        let ret: Matrix3<f64> = self.fkine(q).rotation.to_rotation_matrix().into_inner();
        let r_t = ret.transpose();

        // Rotate both the linear and angular rows into the end effector frame
        let mut je = Jacobian::zeros();
        for c in 0..NUM_JOINTS {
            let lin = r_t * Vector3::new(j0[(0, c)], j0[(1, c)], j0[(2, c)]);
            let ang = r_t * Vector3::new(j0[(3, c)], j0[(4, c)], j0[(5, c)]);

            for r in 0..3 {
                je[(r, c)] = lin[r];
                je[(r + 3, c)] = ang[r];
            }
        }

        je
    }
}

impl DhLink {
    fn transform(&self, q: f64) -> Pose {
        Pose::rotation(Vector3::x() * self.alpha)
            * Pose::translation(self.a, 0.0, 0.0)
            * Pose::rotation(Vector3::z() * (q + self.offset))
            * Pose::translation(0.0, 0.0, self.d)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn q_rest() -> JointVector {
        JointVector::from_column_slice(&util::maths::deg_to_rad([0.0, -42.0, 30.0, 0.0, 50.0, 0.0]))
    }

    #[test]
    fn test_params_checked() {
        let mut params = DhChainParams {
            name: "short".into(),
            base: PoseParams::default(),
            tool: PoseParams::default(),
            links: vec![
                DhLinkParams {
                    a_m: 0.0,
                    alpha_deg: 0.0,
                    d_m: 0.1,
                    offset_deg: 0.0,
                };
                5
            ],
        };

        assert!(matches!(
            DhChain::new(&params),
            Err(KinematicsError::WrongNumLinks {
                expected: 6,
                found: 5
            })
        ));

        params.links.push(DhLinkParams {
            a_m: f64::NAN,
            alpha_deg: 0.0,
            d_m: 0.0,
            offset_deg: 0.0,
        });
        assert!(matches!(
            DhChain::new(&params),
            Err(KinematicsError::NonFiniteLink(5))
        ));
    }

    #[test]
    fn test_fkine_all_ends_at_fkine() {
        let chain = DhChain::lite6();
        let q = q_rest();

        let frames = chain.fkine_all(&q);
        assert_eq!(frames.len(), NUM_JOINTS + 2);

        let ee = chain.fkine(&q);
        let last = frames[frames.len() - 1];
        assert_relative_eq!(
            last.translation.vector,
            ee.translation.vector,
            epsilon = 1e-12
        );

        // The base frame is where the arm is mounted
        assert_relative_eq!(frames[0].translation.z, 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_jacobian_matches_finite_difference() {
        let chain = DhChain::lite6();
        let q = q_rest();
        let j0 = chain.jacob0(&q);
        let h = 1e-7;

        let t0 = chain.fkine(&q);

        for i in 0..NUM_JOINTS {
            let mut q_h = q;
            q_h[i] += h;
            let t1 = chain.fkine(&q_h);

            let dp = (t1.translation.vector - t0.translation.vector) / h;
            let dr = (t1.rotation * t0.rotation.inverse()).scaled_axis() / h;

            for r in 0..3 {
                assert_relative_eq!(j0[(r, i)], dp[r], epsilon = 1e-5);
                assert_relative_eq!(j0[(r + 3, i)], dr[r], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_jacobe_is_rotated_jacob0() {
        let chain = DhChain::lite6();
        let q = q_rest();
        let qd = JointVector::new(0.1, -0.2, 0.3, 0.05, -0.1, 0.2);

        let rot: UnitQuaternion<f64> = chain.fkine(&q).rotation;
        let v0 = chain.jacob0(&q) * qd;
        let ve = chain.jacobe(&q) * qd;

        let lin = rot * Vector3::new(ve[0], ve[1], ve[2]);
        let ang = rot * Vector3::new(ve[3], ve[4], ve[5]);

        for r in 0..3 {
            assert_relative_eq!(lin[r], v0[r], epsilon = 1e-12);
            assert_relative_eq!(ang[r], v0[r + 3], epsilon = 1e-12);
        }
    }
}
