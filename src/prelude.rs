use crate::graph;
use crate::tracker;
use crate::tracks;
use crate::utils;

pub use graph::neighborhood::{BoxModelHypotheses, NeighborhoodGraphUpdater, WindowedGraphUpdater};
pub use graph::{BoxModel, HypothesisGraph, NodeId, Pose, SensorState, SubGraphId};
pub use tracker::moving_object::MovingObject;
pub use tracker::options::TrackerOptions;
pub use tracker::{SamplerStats, Tracker};
pub use tracks::posterior::{ConstantPosterior, LengthMotionPosterior, Posterior};
pub use tracks::{MoveKind, ProposalOptions, Tracks};
pub use utils::kalman::imm::{ImmConfig, ImmFilter, MotionModel};

pub use crate::track::{DiffusionNoise, Obstacle, Track};
