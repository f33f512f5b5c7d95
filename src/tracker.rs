use crate::graph::neighborhood::{BoxModelHypotheses, NeighborhoodGraphUpdater};
use crate::graph::HypothesisGraph;
use crate::tracker::options::TrackerOptions;
use crate::tracks::posterior::Posterior;
use crate::tracks::{ProposalOptions, Tracks};
use crate::utils::kalman::imm::ImmFilter;
use anyhow::Result;
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Track summaries for publication
pub mod moving_object;

/// Tracker configuration
pub mod options;

/// Counters of the last sampling run
///
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SamplerStats {
    /// Proposals drawn
    pub iterations: usize,
    pub accepted: usize,
    /// Proposals where no move applied
    pub identity: usize,
    /// How many times the best sample was replaced
    pub improvements: usize,
    pub elapsed: Duration,
}

impl SamplerStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.iterations == 0 {
            0.0
        } else {
            self.accepted as f64 / self.iterations as f64
        }
    }
}

/// Metropolis-Hastings tracker over a windowed hypothesis graph.
///
/// Keeps the current sample `tracks_n` and the best sample found so far
/// `tracks_star` between scans, so every call of [track](Tracker::track)
/// continues the chain on the updated graph.
///
pub struct Tracker {
    graph: HypothesisGraph,
    updater: Box<dyn NeighborhoodGraphUpdater + Send>,
    tracks_n: Tracks,
    tracks_star: Tracks,
    log_p_n: f64,
    log_p_star: f64,
    rng: StdRng,
    n_mc: usize,
    time_budget: Option<Duration>,
    proposal: ProposalOptions,
    posterior: Arc<dyn Posterior>,
    filter: ImmFilter,
    stats: SamplerStats,
}

impl Tracker {
    /// Creates the tracker with the [WindowedGraphUpdater](crate::graph::neighborhood::WindowedGraphUpdater)
    /// configured by `opts`.
    ///
    pub fn new(opts: &TrackerOptions) -> Result<Self> {
        let parts = opts.clone().build()?;
        let rng = match parts.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            graph: HypothesisGraph::new(),
            updater: Box::new(parts.updater),
            tracks_n: Tracks::default(),
            tracks_star: Tracks::default(),
            log_p_n: 0.0,
            log_p_star: 0.0,
            rng,
            n_mc: parts.n_mc,
            time_budget: parts.time_budget,
            proposal: parts.proposal,
            posterior: parts.posterior,
            filter: parts.filter,
            stats: SamplerStats::default(),
        })
    }

    /// Replaces the graph updater
    pub fn with_updater<U>(mut self, updater: U) -> Self
    where
        U: NeighborhoodGraphUpdater + Send + 'static,
    {
        self.updater = Box::new(updater);
        self
    }

    pub fn graph(&self) -> &HypothesisGraph {
        &self.graph
    }

    /// Direct access to the graph for callers that build it themselves and
    /// drive the chain with [sample](Tracker::sample).
    ///
    /// Call [rebuild_disconnected_sub_graphs](HypothesisGraph::rebuild_disconnected_sub_graphs)
    /// after changing nodes or edges and before sampling: births are drawn
    /// from the disconnected sub-graphs, so without it no track is ever
    /// started on the new nodes. Samples that reference nodes changed here
    /// are not revalidated.
    ///
    pub fn graph_mut(&mut self) -> &mut HypothesisGraph {
        &mut self.graph
    }

    pub fn tracks_n(&self) -> &Tracks {
        &self.tracks_n
    }

    pub fn tracks_star(&self) -> &Tracks {
        &self.tracks_star
    }

    pub fn log_p_star(&self) -> f64 {
        self.log_p_star
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Folds a scan into the graph and continues the chain on it.
    ///
    /// # Parameters
    /// * `hypotheses` - box model clusters of one scan; scans must come in strictly increasing time order.
    ///
    pub fn track(&mut self, hypotheses: &BoxModelHypotheses) -> Result<&Tracks> {
        self.updater.update(&mut self.graph, hypotheses)?;

        let dropped_n = self.tracks_n.retain_live(&self.graph);
        let dropped_star = self.tracks_star.retain_live(&self.graph);
        if dropped_n + dropped_star > 0 {
            debug!(
                "Scan {:.3}: {} current and {} best tracks left the window",
                hypotheses.timestamp, dropped_n, dropped_star
            );
        }
        self.tracks_n.refresh_motion(&self.filter);
        self.tracks_star.refresh_motion(&self.filter);
        self.log_p_n = self.tracks_n.log_p(self.posterior.as_ref());
        self.log_p_star = self.tracks_star.log_p(self.posterior.as_ref());

        Ok(self.sample())
    }

    /// Runs up to `n_mc` Metropolis-Hastings iterations against the current
    /// graph and returns the best sample.
    ///
    pub fn sample(&mut self) -> &Tracks {
        let started = Instant::now();
        let mut stats = SamplerStats::default();

        for _ in 0..self.n_mc {
            if let Some(budget) = self.time_budget {
                if started.elapsed() >= budget {
                    debug!("Time budget of {:?} exhausted", budget);
                    break;
                }
            }
            stats.iterations += 1;

            let (proposal, kind) =
                self.tracks_n
                    .propose(&self.graph, &self.filter, &self.proposal, &mut self.rng);
            if kind.is_none() {
                stats.identity += 1;
            }
            let log_p_new = proposal.log_p(self.posterior.as_ref());

            let u: f64 = self.rng.gen();
            if u.ln() < log_p_new - self.log_p_n {
                trace!(
                    "Accepted {:?}: {:.3} -> {:.3}",
                    kind,
                    self.log_p_n,
                    log_p_new
                );
                stats.accepted += 1;
                self.tracks_n = proposal;
                self.log_p_n = log_p_new;
                if self.log_p_n > self.log_p_star {
                    stats.improvements += 1;
                    self.tracks_star = self.tracks_n.clone();
                    self.log_p_star = self.log_p_n;
                }
            }
        }

        stats.elapsed = started.elapsed();
        debug!(
            "Sampled {} proposals: {} accepted, {} identity, {} improvements, best {:.3} with {} tracks, {:?}",
            stats.iterations,
            stats.accepted,
            stats.identity,
            stats.improvements,
            self.log_p_star,
            self.tracks_star.len(),
            stats.elapsed
        );
        self.stats = stats;
        &self.tracks_star
    }
}
