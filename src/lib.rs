//! Multi-object tracking over a time-windowed graph of box-model hypotheses.
//!
//! Tracks are found by reversible-jump MCMC search over partitions of the
//! [hypothesis graph](graph::HypothesisGraph) into disjoint chains. Every chain
//! is scored with an IMM (CV/CA/CT) Kalman filter that fuses its detections
//! into a kinematic estimate and a motion-consistency confidence.

use thiserror::Error;

/// Hypothesis graph, its node arena and the neighborhood updater
pub mod graph;

/// Single track (a chain of graph nodes) and its local moves
pub mod track;

/// Scene hypothesis (set of disjoint tracks), the move set and the posterior
pub mod tracks;

/// Metropolis-Hastings sampler
pub mod tracker;

/// Kalman/IMM filters and geometric helpers
pub mod utils;

/// Synthetic hypothesis generators used by tests, demos and benches
pub mod examples;

pub mod prelude;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Errors {
    #[error("Graph node {0} is not known.")]
    UnknownNode(usize),
    #[error("Complete sub-graph {0} is not known.")]
    UnknownSubGraph(usize),
    #[error("Edge must go forward in time: parent at {parent}, child at {child}.")]
    NonIncreasingTimestamp { parent: f64, child: f64 },
    #[error("Scan at {current} arrived after the scan at {last}.")]
    OutOfOrderScan { last: f64, current: f64 },
    #[error("A complete sub-graph requires at least one hypothesis.")]
    EmptyCluster,
    #[error("Time step must be finite and strictly positive, got {0}.")]
    NonPositiveTimeStep(f64),
    #[error("Innovation covariance is not positive definite.")]
    SingularInnovationCovariance,
    #[error("Kalman update produced non-finite values.")]
    NonFiniteEstimate,
    #[error("Invalid parameter `{0}`: {1}")]
    InvalidParameter(&'static str, String),
}

pub(crate) const EPS: f64 = 1e-9;
