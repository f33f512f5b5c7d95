use crate::track::{log_length_prior, Track};
use crate::tracks::Tracks;
use crate::utils::angle::angle_diff;
use crate::Errors;
use anyhow::Result;
use std::fmt::Debug;

pub const DEFAULT_LENGTH_LAMBDA: f64 = 0.5;
pub const DEFAULT_TRACK_COST: f64 = 1.0;
pub const DEFAULT_DETECTION_LOG_ODDS: f64 = 2.0;
pub const DEFAULT_CLUTTER_DENSITY: f64 = 0.1;
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 1e-9;
pub const DEFAULT_POSE_SIGMA_XY: f64 = 0.2;
pub const DEFAULT_POSE_SIGMA_THETA: f64 = 0.1;

/// Unnormalized scene posterior, in the log domain.
///
/// The sampler only ever compares two scores, so implementations are free to
/// drop any term that does not depend on the track partition.
///
pub trait Posterior: Debug + Send + Sync {
    fn log_p(&self, tracks: &Tracks) -> f64;

    /// Checks the parameters before the sampler starts
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Same score for every scene: every proposal is accepted
///
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantPosterior;

impl Posterior for ConstantPosterior {
    fn log_p(&self, _tracks: &Tracks) -> f64 {
        0.0
    }
}

/// Scene score built from per-track terms:
///
/// * length prior `ln P_L(|τ|; λ)`;
/// * fixed cost per track;
/// * reward per explained detection;
/// * IMM confidence of every fused transition against a clutter density;
/// * fidelity of the diffused poses to their detections.
///
/// An empty scene scores zero.
///
#[derive(Debug, Clone, PartialEq)]
pub struct LengthMotionPosterior {
    lambda: f64,
    track_cost: f64,
    detection_log_odds: f64,
    clutter_density: f64,
    confidence_floor: f64,
    pose_sigma_xy: f64,
    pose_sigma_theta: f64,
}

impl Default for LengthMotionPosterior {
    fn default() -> Self {
        Self {
            lambda: DEFAULT_LENGTH_LAMBDA,
            track_cost: DEFAULT_TRACK_COST,
            detection_log_odds: DEFAULT_DETECTION_LOG_ODDS,
            clutter_density: DEFAULT_CLUTTER_DENSITY,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            pose_sigma_xy: DEFAULT_POSE_SIGMA_XY,
            pose_sigma_theta: DEFAULT_POSE_SIGMA_THETA,
        }
    }
}

impl LengthMotionPosterior {
    /// Shape of the track length prior
    pub fn lambda(mut self, v: f64) -> Self {
        self.lambda = v;
        self
    }

    pub fn track_cost(mut self, v: f64) -> Self {
        self.track_cost = v;
        self
    }

    pub fn detection_log_odds(mut self, v: f64) -> Self {
        self.detection_log_odds = v;
        self
    }

    /// Likelihood of a transition that is not explained by a moving object
    pub fn clutter_density(mut self, v: f64) -> Self {
        self.clutter_density = v;
        self
    }

    pub fn confidence_floor(mut self, v: f64) -> Self {
        self.confidence_floor = v;
        self
    }

    pub fn pose_noise(mut self, sigma_xy: f64, sigma_theta: f64) -> Self {
        self.pose_sigma_xy = sigma_xy;
        self.pose_sigma_theta = sigma_theta;
        self
    }

    fn track_log_p(&self, track: &Track) -> f64 {
        let motion: f64 = track
            .obstacles()
            .iter()
            .filter_map(|o| o.confidence())
            .map(|c| (c.max(self.confidence_floor) / self.clutter_density).ln())
            .sum();

        let fidelity: f64 = track
            .obstacles()
            .iter()
            .map(|o| {
                let d = &o.detection.pose;
                let dxy = (o.pose.x - d.x).powi(2) + (o.pose.y - d.y).powi(2);
                let dtheta = angle_diff(o.pose.theta, d.theta);
                dxy / self.pose_sigma_xy.powi(2) + (dtheta / self.pose_sigma_theta).powi(2)
            })
            .sum();

        log_length_prior(track.len(), self.lambda) - self.track_cost
            + self.detection_log_odds * track.len() as f64
            + motion
            - 0.5 * fidelity
    }
}

impl Posterior for LengthMotionPosterior {
    fn log_p(&self, tracks: &Tracks) -> f64 {
        tracks.tracks().iter().map(|t| self.track_log_p(t)).sum()
    }

    fn validate(&self) -> Result<()> {
        if !self.lambda.is_finite() || self.lambda <= 0.0 {
            return Err(Errors::InvalidParameter("lambda", self.lambda.to_string()).into());
        }
        for (name, v) in [
            ("track_cost", self.track_cost),
            ("detection_log_odds", self.detection_log_odds),
        ] {
            if !v.is_finite() {
                return Err(Errors::InvalidParameter(name, v.to_string()).into());
            }
        }
        for (name, v) in [
            ("clutter_density", self.clutter_density),
            ("confidence_floor", self.confidence_floor),
            ("pose_sigma_xy", self.pose_sigma_xy),
            ("pose_sigma_theta", self.pose_sigma_theta),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(Errors::InvalidParameter(name, v.to_string()).into());
            }
        }
        Ok(())
    }
}
