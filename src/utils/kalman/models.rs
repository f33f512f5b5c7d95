use crate::graph::Pose;
use crate::utils::kalman::imm::{ImmConfig, MotionModel, IMM_DIM};
use nalgebra::{Matrix2, SMatrix, SVector, Vector2};

pub type ImmVector = SVector<f64, IMM_DIM>;
pub type ImmMatrix = SMatrix<f64, IMM_DIM, IMM_DIM>;
pub type ObservationMatrix = SMatrix<f64, 2, IMM_DIM>;

// state layout: [x, y, vx, vy, ax, ay, w]
pub const X: usize = 0;
pub const Y: usize = 1;
pub const VX: usize = 2;
pub const VY: usize = 3;
pub const AX: usize = 4;
pub const AY: usize = 5;
pub const W: usize = 6;

/// Below this turn rate the CT model uses its straight-line limit
const MIN_TURN_RATE: f64 = 1e-6;

/// Position-only observation `z = H x`, shared by every model
///
pub fn observation_matrix() -> ObservationMatrix {
    let mut h = ObservationMatrix::zeros();
    h[(0, X)] = 1.0;
    h[(1, Y)] = 1.0;
    h
}

/// Position measurement obtained from a range/bearing reading taken at the
/// sensor origin, converted to Cartesian coordinates with a first order
/// propagation of the polar noise.
///
#[derive(Debug, Clone, Copy)]
pub struct RangeBearing {
    pub origin: Pose,
    pub range: f64,
    pub bearing: f64,
}

impl RangeBearing {
    pub fn from_point(origin: &Pose, x: f64, y: f64) -> Self {
        let (dx, dy) = (x - origin.x, y - origin.y);
        Self {
            origin: *origin,
            range: dx.hypot(dy),
            bearing: dy.atan2(dx),
        }
    }

    /// `(z, R)` where `R = J · diag(σr², σθ²) · Jᵀ`
    ///
    pub fn cartesian(&self, sigma_r: f64, sigma_theta: f64) -> (Vector2<f64>, Matrix2<f64>) {
        let (s, c) = self.bearing.sin_cos();
        let z = Vector2::new(
            self.origin.x + self.range * c,
            self.origin.y + self.range * s,
        );
        let jacobian = Matrix2::new(c, -self.range * s, s, self.range * c);
        let polar = Matrix2::new(sigma_r * sigma_r, 0.0, 0.0, sigma_theta * sigma_theta);
        let r = jacobian * polar * jacobian.transpose();
        (z, (r + r.transpose()) * 0.5)
    }
}

/// Propagates the mean through the model's motion equations.
///
pub fn transition(model: MotionModel, x: &ImmVector, dt: f64) -> ImmVector {
    match model {
        MotionModel::ConstantVelocity | MotionModel::ConstantAcceleration => {
            transition_matrix(model, x, dt) * x
        }
        MotionModel::ConstantTurnRate => {
            let (vx, vy, w) = (x[VX], x[VY], x[W]);
            let mut next = ImmVector::zeros();
            if w.abs() < MIN_TURN_RATE {
                next[X] = x[X] + vx * dt;
                next[Y] = x[Y] + vy * dt;
                next[VX] = vx;
                next[VY] = vy;
            } else {
                let (s, c) = (w * dt).sin_cos();
                next[X] = x[X] + s / w * vx - (1.0 - c) / w * vy;
                next[Y] = x[Y] + (1.0 - c) / w * vx + s / w * vy;
                next[VX] = c * vx - s * vy;
                next[VY] = s * vx + c * vy;
            }
            next[W] = w;
            next
        }
    }
}

/// Transition matrix `F(Δt)`; for the CT model this is the Jacobian of
/// [transition] evaluated at `x`.
///
/// Components a model does not describe are reset to zero on every step and
/// receive their full a priori variance through [process_noise].
///
pub fn transition_matrix(model: MotionModel, x: &ImmVector, dt: f64) -> ImmMatrix {
    let mut f = ImmMatrix::zeros();
    match model {
        MotionModel::ConstantVelocity => {
            for (p, v) in [(X, VX), (Y, VY)] {
                f[(p, p)] = 1.0;
                f[(p, v)] = dt;
                f[(v, v)] = 1.0;
            }
        }
        MotionModel::ConstantAcceleration => {
            for (p, v, a) in [(X, VX, AX), (Y, VY, AY)] {
                f[(p, p)] = 1.0;
                f[(p, v)] = dt;
                f[(p, a)] = dt * dt / 2.0;
                f[(v, v)] = 1.0;
                f[(v, a)] = dt;
                f[(a, a)] = 1.0;
            }
        }
        MotionModel::ConstantTurnRate => {
            let (vx, vy, w) = (x[VX], x[VY], x[W]);
            f[(X, X)] = 1.0;
            f[(Y, Y)] = 1.0;
            f[(W, W)] = 1.0;
            if w.abs() < MIN_TURN_RATE {
                f[(X, VX)] = dt;
                f[(Y, VY)] = dt;
                f[(VX, VX)] = 1.0;
                f[(VY, VY)] = 1.0;
                f[(X, W)] = -vy * dt * dt / 2.0;
                f[(Y, W)] = vx * dt * dt / 2.0;
                f[(VX, W)] = -dt * vy;
                f[(VY, W)] = dt * vx;
            } else {
                let (s, c) = (w * dt).sin_cos();
                let wt = w * dt;
                let w2 = w * w;
                f[(X, VX)] = s / w;
                f[(X, VY)] = -(1.0 - c) / w;
                f[(Y, VX)] = (1.0 - c) / w;
                f[(Y, VY)] = s / w;
                f[(VX, VX)] = c;
                f[(VX, VY)] = -s;
                f[(VY, VX)] = s;
                f[(VY, VY)] = c;
                f[(X, W)] = vx * (wt * c - s) / w2 - vy * (wt * s - 1.0 + c) / w2;
                f[(Y, W)] = vx * (wt * s - 1.0 + c) / w2 + vy * (wt * c - s) / w2;
                f[(VX, W)] = -dt * s * vx - dt * c * vy;
                f[(VY, W)] = dt * c * vx - dt * s * vy;
            }
        }
    }
    f
}

/// Process noise `Q(Δt)` for continuous white noise driving the highest
/// modeled derivative.
///
pub fn process_noise(model: MotionModel, config: &ImmConfig, dt: f64) -> ImmMatrix {
    let mut q = ImmMatrix::zeros();
    let (dt2, dt3) = (dt * dt, dt * dt * dt);
    let max_a = config.max_a * config.max_a;
    let max_w = config.max_w * config.max_w;
    match model {
        MotionModel::ConstantVelocity | MotionModel::ConstantTurnRate => {
            let sigma = if model == MotionModel::ConstantVelocity {
                config.sigma_s
            } else {
                config.sigma_vct
            };
            let s2 = sigma * sigma;
            for (p, v) in [(X, VX), (Y, VY)] {
                q[(p, p)] = s2 * dt3 / 3.0;
                q[(p, v)] = s2 * dt2 / 2.0;
                q[(v, p)] = s2 * dt2 / 2.0;
                q[(v, v)] = s2 * dt;
            }
            q[(AX, AX)] = max_a;
            q[(AY, AY)] = max_a;
            q[(W, W)] = if model == MotionModel::ConstantVelocity {
                max_w
            } else {
                config.sigma_w * config.sigma_w * dt
            };
        }
        MotionModel::ConstantAcceleration => {
            let s2 = config.sigma_vca * config.sigma_vca;
            let (dt4, dt5) = (dt3 * dt, dt3 * dt2);
            for (p, v, a) in [(X, VX, AX), (Y, VY, AY)] {
                q[(p, p)] = s2 * dt5 / 20.0;
                q[(p, v)] = s2 * dt4 / 8.0;
                q[(v, p)] = s2 * dt4 / 8.0;
                q[(p, a)] = s2 * dt3 / 6.0;
                q[(a, p)] = s2 * dt3 / 6.0;
                q[(v, v)] = s2 * dt3 / 3.0;
                q[(v, a)] = s2 * dt2 / 2.0;
                q[(a, v)] = s2 * dt2 / 2.0;
                q[(a, a)] = s2 * dt;
            }
            q[(W, W)] = max_w;
        }
    }
    q
}

#[cfg(test)]
mod tests {
    use crate::graph::Pose;
    use crate::utils::kalman::imm::{ImmConfig, MotionModel};
    use crate::utils::kalman::models::{
        process_noise, transition, transition_matrix, ImmVector, RangeBearing, VX, VY, W, X, Y,
    };

    fn state(vx: f64, vy: f64, w: f64) -> ImmVector {
        let mut x = ImmVector::zeros();
        x[X] = 1.0;
        x[Y] = 2.0;
        x[VX] = vx;
        x[VY] = vy;
        x[W] = w;
        x
    }

    #[test]
    fn linear_models_agree_with_their_matrix() {
        let x = state(1.0, -0.5, 0.0);
        for model in [
            MotionModel::ConstantVelocity,
            MotionModel::ConstantAcceleration,
        ] {
            let next = transition(model, &x, 0.5);
            assert!((next[X] - 1.5).abs() < 1e-12);
            assert!((next[Y] - 1.75).abs() < 1e-12);
        }
    }

    #[test]
    fn turn_model_rotates_velocity() {
        let w = std::f64::consts::FRAC_PI_2;
        let next = transition(MotionModel::ConstantTurnRate, &state(1.0, 0.0, w), 1.0);
        assert!(next[VX].abs() < 1e-12);
        assert!((next[VY] - 1.0).abs() < 1e-12);
        // quarter circle of radius 1/w
        assert!((next[X] - (1.0 + 1.0 / w)).abs() < 1e-12);
        assert!((next[Y] - (2.0 + 1.0 / w)).abs() < 1e-12);
    }

    #[test]
    fn turn_jacobian_matches_finite_differences() {
        let dt = 0.7;
        for w in [0.0, 0.3] {
            let x = state(1.2, -0.4, w);
            let f = transition_matrix(MotionModel::ConstantTurnRate, &x, dt);
            let h = 1e-4;
            for col in [VX, VY, W] {
                let mut xp = x;
                let mut xm = x;
                xp[col] += h;
                xm[col] -= h;
                let d = (transition(MotionModel::ConstantTurnRate, &xp, dt)
                    - transition(MotionModel::ConstantTurnRate, &xm, dt))
                    / (2.0 * h);
                for row in [X, Y, VX, VY] {
                    assert!(
                        (d[row] - f[(row, col)]).abs() < 1e-4,
                        "w={} row={} col={} numeric={} analytic={}",
                        w,
                        row,
                        col,
                        d[row],
                        f[(row, col)]
                    );
                }
            }
        }
    }

    #[test]
    fn process_noise_is_symmetric() {
        let config = ImmConfig::default();
        for model in MotionModel::ALL {
            let q = process_noise(model, &config, 0.4);
            assert!((q - q.transpose()).abs().max() < 1e-15);
            assert!(q.diagonal().iter().all(|v| *v >= 0.0));
        }
    }

    #[test]
    fn range_bearing_round_trip() {
        let origin = Pose::new(1.0, 1.0, 0.0);
        let rb = RangeBearing::from_point(&origin, 4.0, 5.0);
        assert!((rb.range - 5.0).abs() < 1e-12);
        let (z, r) = rb.cartesian(0.3, 0.01);
        assert!((z[0] - 4.0).abs() < 1e-12);
        assert!((z[1] - 5.0).abs() < 1e-12);
        // radial variance along the line of sight
        let los = nalgebra::Vector2::new(0.6, 0.8);
        assert!(((los.transpose() * r * los)[0] - 0.09).abs() < 1e-9);
    }
}
