use crate::graph::neighborhood::{WindowedGraphUpdater, DEFAULT_MAX_SPEED, DEFAULT_WINDOW};
use crate::track::DiffusionNoise;
use crate::tracks::posterior::{LengthMotionPosterior, Posterior};
use crate::tracks::ProposalOptions;
use crate::utils::kalman::imm::{ImmConfig, ImmFilter};
use crate::Errors;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_N_MC: usize = 100;

/// Class that is used to configure the [Tracker](crate::tracker::Tracker)
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    n_mc: usize,
    seed: Option<u64>,
    time_budget: Option<Duration>,
    proposal: ProposalOptions,
    posterior: Arc<dyn Posterior>,
    imm: ImmConfig,
    window: f64,
    max_speed: f64,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            n_mc: DEFAULT_N_MC,
            seed: None,
            time_budget: None,
            proposal: ProposalOptions::default(),
            posterior: Arc::new(LengthMotionPosterior::default()),
            imm: ImmConfig::default(),
            window: DEFAULT_WINDOW,
            max_speed: DEFAULT_MAX_SPEED,
        }
    }
}

pub(crate) struct TrackerParts {
    pub n_mc: usize,
    pub seed: Option<u64>,
    pub time_budget: Option<Duration>,
    pub proposal: ProposalOptions,
    pub posterior: Arc<dyn Posterior>,
    pub filter: ImmFilter,
    pub updater: WindowedGraphUpdater,
}

impl TrackerOptions {
    pub(crate) fn build(self) -> Result<TrackerParts> {
        if self.n_mc == 0 {
            return Err(Errors::InvalidParameter("n_mc", "0".to_string()).into());
        }
        self.proposal.validate()?;
        self.posterior.validate()?;
        Ok(TrackerParts {
            n_mc: self.n_mc,
            seed: self.seed,
            time_budget: self.time_budget,
            proposal: self.proposal,
            posterior: self.posterior,
            filter: ImmFilter::new(self.imm)?,
            updater: WindowedGraphUpdater::new(self.window, self.max_speed)?,
        })
    }

    /// Number of Metropolis-Hastings iterations per call of `track`.
    ///
    pub fn n_mc(mut self, n: usize) -> Self {
        self.n_mc = n;
        self
    }

    /// Seeds the sampler's random engine. Without a seed the engine is seeded
    /// from the operating system.
    ///
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Wall-clock limit of one sampling run. When it is exhausted the run
    /// stops early and the best scene found so far is returned.
    ///
    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// How many move kinds a proposal may draw before it falls back to the
    /// unchanged scene.
    ///
    pub fn max_proposal_attempts(mut self, n: usize) -> Self {
        self.proposal = self.proposal.max_attempts(n);
        self
    }

    pub fn diffusion(mut self, noise: DiffusionNoise) -> Self {
        self.proposal = self.proposal.diffusion(noise);
        self
    }

    /// Scene score used for acceptance and for the best-sample choice.
    ///
    pub fn posterior<P: Posterior + 'static>(mut self, posterior: P) -> Self {
        self.posterior = Arc::new(posterior);
        self
    }

    pub fn imm(mut self, config: ImmConfig) -> Self {
        self.imm = config;
        self
    }

    /// Hypotheses older than `window` seconds are retired from the graph.
    ///
    pub fn window(mut self, window: f64) -> Self {
        self.window = window;
        self
    }

    /// Maximal object speed (m/s) used to gate associations between consecutive
    /// scans.
    ///
    pub fn max_speed(mut self, speed: f64) -> Self {
        self.max_speed = speed;
        self
    }
}
