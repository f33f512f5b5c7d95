use crate::graph::Pose;
use crate::utils::angle::angle_diff;
use crate::utils::kalman::models::{
    observation_matrix, process_noise, transition, transition_matrix, ImmMatrix, ImmVector,
    RangeBearing, AX, AY, VX, VY, W, X, Y,
};
use crate::utils::kalman::{predict, update, KalmanState};
use crate::Errors;
use anyhow::Result;
use log::{debug, trace};

/// Dimension of the state shared by all models: `[x, y, vx, vy, ax, ay, w]`
pub const IMM_DIM: usize = 7;

pub const NUM_MODELS: usize = 3;

/// Model switching probabilities `p[i][j]` (from `i` to `j`)
pub const DEFAULT_MODEL_TRANSITION: [[f64; NUM_MODELS]; NUM_MODELS] = [
    [0.998, 0.001, 0.001],
    [0.001, 0.998, 0.001],
    [0.001, 0.001, 0.998],
];

const MIN_PROBABILITY: f64 = 1e-30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionModel {
    ConstantVelocity,
    ConstantAcceleration,
    ConstantTurnRate,
}

impl MotionModel {
    pub const ALL: [MotionModel; NUM_MODELS] = [
        MotionModel::ConstantVelocity,
        MotionModel::ConstantAcceleration,
        MotionModel::ConstantTurnRate,
    ];

    pub fn index(self) -> usize {
        match self {
            MotionModel::ConstantVelocity => 0,
            MotionModel::ConstantAcceleration => 1,
            MotionModel::ConstantTurnRate => 2,
        }
    }
}

/// Physical noise parameters of the motion and measurement models.
///
/// Angles are in radians, angular rates in radians per second.
///
#[derive(Debug, Clone, PartialEq)]
pub struct ImmConfig {
    /// CV white acceleration noise
    pub sigma_s: f64,
    /// CA white jerk noise
    pub sigma_vca: f64,
    /// CT white acceleration noise
    pub sigma_vct: f64,
    /// CT turn rate noise
    pub sigma_w: f64,
    /// a priori spread of accelerations a model does not estimate
    pub max_a: f64,
    /// a priori spread of turn rates a model does not estimate
    pub max_w: f64,
    /// range noise
    pub sigma_r: f64,
    /// bearing noise
    pub sigma_theta: f64,
    pub model_transition: [[f64; NUM_MODELS]; NUM_MODELS],
}

impl Default for ImmConfig {
    fn default() -> Self {
        Self {
            sigma_s: 0.1,
            sigma_vca: 0.3,
            sigma_vct: 0.2,
            sigma_w: 5.5_f64.to_radians(),
            max_a: 3.0,
            max_w: 5.0_f64.to_radians(),
            sigma_r: 0.3,
            sigma_theta: 0.05_f64.to_radians(),
            model_transition: DEFAULT_MODEL_TRANSITION,
        }
    }
}

impl ImmConfig {
    pub fn sigma_s(mut self, v: f64) -> Self {
        self.sigma_s = v;
        self
    }

    pub fn sigma_vca(mut self, v: f64) -> Self {
        self.sigma_vca = v;
        self
    }

    pub fn sigma_vct(mut self, v: f64) -> Self {
        self.sigma_vct = v;
        self
    }

    pub fn sigma_w(mut self, v: f64) -> Self {
        self.sigma_w = v;
        self
    }

    pub fn max_a(mut self, v: f64) -> Self {
        self.max_a = v;
        self
    }

    pub fn max_w(mut self, v: f64) -> Self {
        self.max_w = v;
        self
    }

    pub fn measurement_noise(mut self, sigma_r: f64, sigma_theta: f64) -> Self {
        self.sigma_r = sigma_r;
        self.sigma_theta = sigma_theta;
        self
    }

    pub fn model_transition(mut self, p: [[f64; NUM_MODELS]; NUM_MODELS]) -> Self {
        self.model_transition = p;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let sigmas = [
            ("sigma_s", self.sigma_s),
            ("sigma_vca", self.sigma_vca),
            ("sigma_vct", self.sigma_vct),
            ("sigma_w", self.sigma_w),
            ("max_a", self.max_a),
            ("max_w", self.max_w),
            ("sigma_r", self.sigma_r),
            ("sigma_theta", self.sigma_theta),
        ];
        for (name, v) in sigmas {
            if !v.is_finite() || v <= 0.0 {
                return Err(Errors::InvalidParameter(name, format!("{} must be positive", v)).into());
            }
        }
        for row in &self.model_transition {
            let sum: f64 = row.iter().sum();
            if row.iter().any(|v| !(0.0..=1.0).contains(v)) || (sum - 1.0).abs() > 1e-6 {
                return Err(Errors::InvalidParameter(
                    "model_transition",
                    format!("row {:?} is not a probability distribution", row),
                )
                .into());
            }
        }
        Ok(())
    }
}

/// One detection as seen by the filter: where and when it was observed and
/// from which sensor origin.
///
#[derive(Debug, Clone, Copy)]
pub struct PositionFix {
    pub timestamp: f64,
    pub origin: Pose,
    pub pose: Pose,
}

impl PositionFix {
    pub fn range_bearing(&self) -> RangeBearing {
        RangeBearing::from_point(&self.origin, self.pose.x, self.pose.y)
    }
}

/// Per-model estimates, mode probabilities `u_k` and the fused estimate
///
#[derive(Debug, Clone)]
pub struct ImmState {
    models: [KalmanState<IMM_DIM>; NUM_MODELS],
    mode_probabilities: [f64; NUM_MODELS],
    fused: KalmanState<IMM_DIM>,
}

impl ImmState {
    fn uniform(state: KalmanState<IMM_DIM>) -> Self {
        Self {
            models: [state; NUM_MODELS],
            mode_probabilities: [1.0 / NUM_MODELS as f64; NUM_MODELS],
            fused: state,
        }
    }

    pub fn model(&self, model: MotionModel) -> &KalmanState<IMM_DIM> {
        &self.models[model.index()]
    }

    pub fn mode_probabilities(&self) -> [f64; NUM_MODELS] {
        self.mode_probabilities
    }

    pub fn mode_probability(&self, model: MotionModel) -> f64 {
        self.mode_probabilities[model.index()]
    }

    pub fn dominant_model(&self) -> MotionModel {
        MotionModel::ALL
            .into_iter()
            .max_by(|a, b| {
                self.mode_probability(*a)
                    .total_cmp(&self.mode_probability(*b))
            })
            .unwrap_or(MotionModel::ConstantVelocity)
    }

    /// Fused estimate `imm_x_k_k` / `imm_P_k_k`
    pub fn fused(&self) -> &KalmanState<IMM_DIM> {
        &self.fused
    }

    pub fn position(&self) -> (f64, f64) {
        (self.fused.mean[X], self.fused.mean[Y])
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.fused.mean[VX], self.fused.mean[VY])
    }

    pub fn speed(&self) -> f64 {
        let (vx, vy) = self.velocity();
        vx.hypot(vy)
    }

    pub fn acceleration(&self) -> (f64, f64) {
        (self.fused.mean[AX], self.fused.mean[AY])
    }

    pub fn turn_rate(&self) -> f64 {
        self.fused.mean[W]
    }
}

/// Outcome of one fused transition, attached to the obstacle it ends at
///
#[derive(Debug, Clone)]
pub struct MotionEstimate {
    pub state: ImmState,
    /// Total measurement likelihood of the transition under the IMM
    pub confidence: f64,
}

/// Interacting multiple model filter over CV, CA and CT models
///
#[derive(Debug, Clone, Default)]
pub struct ImmFilter {
    config: ImmConfig,
}

impl ImmFilter {
    pub fn new(config: ImmConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ImmConfig {
        &self.config
    }

    /// Fuses the transition `previous -> current`. Without a previous state
    /// the models are initialized from the two fixes.
    ///
    pub fn extend(
        &self,
        previous_state: Option<&ImmState>,
        previous: &PositionFix,
        current: &PositionFix,
    ) -> Result<MotionEstimate> {
        match previous_state {
            Some(state) => {
                let dt = time_step(previous.timestamp, current.timestamp)?;
                Ok(self.step(state, dt, current))
            }
            None => self.initiate(previous, current),
        }
    }

    /// Two-point initialization at `previous`, followed by the first filter
    /// cycle against `current`.
    ///
    pub fn initiate(&self, previous: &PositionFix, current: &PositionFix) -> Result<MotionEstimate> {
        let dt = time_step(previous.timestamp, current.timestamp)?;
        let (sigma_r, sigma_theta) = (self.config.sigma_r, self.config.sigma_theta);
        let (z0, r0) = previous.range_bearing().cartesian(sigma_r, sigma_theta);
        let (z1, r1) = current.range_bearing().cartesian(sigma_r, sigma_theta);
        let velocity = (z1 - z0) / dt;

        let mut mean = ImmVector::zeros();
        mean[X] = z0[0];
        mean[Y] = z0[1];
        mean[VX] = velocity[0];
        mean[VY] = velocity[1];
        mean[W] = angle_diff(current.pose.theta, previous.pose.theta) / dt;

        let velocity_cov = (r0 + r1) / (dt * dt);
        let mut covariance = ImmMatrix::zeros();
        for i in 0..2 {
            for j in 0..2 {
                covariance[(X + i, X + j)] = r0[(i, j)];
                covariance[(VX + i, VX + j)] = velocity_cov[(i, j)];
            }
        }
        covariance[(AX, AX)] = self.config.max_a * self.config.max_a;
        covariance[(AY, AY)] = self.config.max_a * self.config.max_a;
        covariance[(W, W)] = self.config.max_w * self.config.max_w;

        let state = ImmState::uniform(KalmanState::new(mean, covariance));
        Ok(self.step(&state, dt, current))
    }

    /// One IMM cycle: mix, filter, re-weight, combine.
    ///
    /// `dt` must be validated by the caller (see [time_step]).
    ///
    pub fn step(&self, state: &ImmState, dt: f64, fix: &PositionFix) -> MotionEstimate {
        let p = &self.config.model_transition;
        let u = state.mode_probabilities;

        let c_bar: [f64; NUM_MODELS] = std::array::from_fn(|j| {
            (0..NUM_MODELS)
                .map(|i| p[i][j] * u[i])
                .sum::<f64>()
                .max(MIN_PROBABILITY)
        });

        let mixed: [KalmanState<IMM_DIM>; NUM_MODELS] = std::array::from_fn(|j| {
            let weights: [f64; NUM_MODELS] = std::array::from_fn(|i| p[i][j] * u[i] / c_bar[j]);
            combine(&state.models, &weights)
        });

        let (z, r) = fix
            .range_bearing()
            .cartesian(self.config.sigma_r, self.config.sigma_theta);
        let h = observation_matrix();

        let mut models = mixed;
        let mut likelihoods = [0.0; NUM_MODELS];
        for model in MotionModel::ALL {
            let j = model.index();
            let x = &mixed[j].mean;
            let predicted = predict(
                &mixed[j],
                transition(model, x, dt),
                &transition_matrix(model, x, dt),
                &process_noise(model, &self.config, dt),
            );
            match update(&predicted, &h, &z, &r) {
                Ok(res) => {
                    models[j] = res.state;
                    likelihoods[j] = res.likelihood;
                }
                Err(e) => {
                    debug!("{:?} update skipped, keeping prediction: {}", model, e);
                    models[j] = predicted;
                }
            }
        }

        let confidence: f64 = (0..NUM_MODELS).map(|j| likelihoods[j] * c_bar[j]).sum();
        let mode_probabilities: [f64; NUM_MODELS] =
            if confidence.is_finite() && confidence > MIN_PROBABILITY {
                std::array::from_fn(|j| likelihoods[j] * c_bar[j] / confidence)
            } else {
                let total: f64 = c_bar.iter().sum();
                std::array::from_fn(|j| c_bar[j] / total)
            };
        let confidence = if confidence.is_finite() { confidence } else { 0.0 };

        let fused = combine(&models, &mode_probabilities);
        trace!(
            "IMM step dt={:.3}: u_k={:?}, confidence={:.4e}",
            dt,
            mode_probabilities,
            confidence
        );

        MotionEstimate {
            state: ImmState {
                models,
                mode_probabilities,
                fused,
            },
            confidence,
        }
    }
}

/// Validated `to - from`.
///
pub fn time_step(from: f64, to: f64) -> Result<f64> {
    let dt = to - from;
    if !dt.is_finite() || dt <= 0.0 {
        return Err(Errors::NonPositiveTimeStep(dt).into());
    }
    Ok(dt)
}

/// Moment-matched mixture of the model estimates
///
fn combine(
    models: &[KalmanState<IMM_DIM>; NUM_MODELS],
    weights: &[f64; NUM_MODELS],
) -> KalmanState<IMM_DIM> {
    let mean = models
        .iter()
        .zip(weights)
        .fold(ImmVector::zeros(), |acc, (m, w)| acc + m.mean * *w);
    let covariance = models
        .iter()
        .zip(weights)
        .fold(ImmMatrix::zeros(), |acc, (m, w)| {
            let d = m.mean - mean;
            acc + (m.covariance + d * d.transpose()) * *w
        });
    KalmanState::new(mean, covariance)
}
