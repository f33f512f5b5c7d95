use crate::graph::Pose;
use crate::track::Track;
use crate::utils::angle::angle_diff;
use crate::utils::kalman::imm::MotionModel;
use crate::EPS;

/// Summary of a track at its latest detection, ready for publication
///
#[derive(Debug, Clone, PartialEq)]
pub struct MovingObject {
    pub track_id: u64,
    pub timestamp: f64,
    pub pose: Pose,
    pub velocity: (f64, f64),
    pub turn_rate: f64,
    pub width: f64,
    pub length: f64,
    pub class_id: u64,
    /// Mean IMM confidence along the track, zero when nothing was fused
    pub confidence: f64,
    /// Dominant motion model, `None` when the track has no IMM state
    pub model: Option<MotionModel>,
}

impl MovingObject {
    /// Uses the fused IMM state of the last obstacle when there is one, a
    /// finite difference over the last two obstacles otherwise.
    ///
    pub fn from_track(track: &Track) -> Option<Self> {
        let last = track.obstacles().back()?;
        let (velocity, turn_rate, pose, model) = match &last.motion {
            Some(m) => {
                let (x, y) = m.state.position();
                (
                    m.state.velocity(),
                    m.state.turn_rate(),
                    Pose::new(x, y, last.pose.theta),
                    Some(m.state.dominant_model()),
                )
            }
            None => {
                let n = track.len();
                let (velocity, turn_rate) = if n >= 2 {
                    let prev = track.obstacle(n - 2);
                    let dt = last.timestamp - prev.timestamp;
                    if dt > EPS {
                        (
                            (
                                (last.pose.x - prev.pose.x) / dt,
                                (last.pose.y - prev.pose.y) / dt,
                            ),
                            angle_diff(last.pose.theta, prev.pose.theta) / dt,
                        )
                    } else {
                        ((0.0, 0.0), 0.0)
                    }
                } else {
                    ((0.0, 0.0), 0.0)
                };
                (velocity, turn_rate, last.pose, None)
            }
        };

        Some(Self {
            track_id: track.get_id(),
            timestamp: last.timestamp,
            pose,
            velocity,
            turn_rate,
            width: last.detection.width,
            length: last.detection.length,
            class_id: last.detection.class_id,
            confidence: track.mean_confidence().unwrap_or(0.0),
            model,
        })
    }

    pub fn speed(&self) -> f64 {
        self.velocity.0.hypot(self.velocity.1)
    }
}
