use crate::graph::{BoxModel, HypothesisGraph, NodeId, Pose, SensorState, SubGraphId};
use crate::track::selection::SelectionMap;
use crate::utils::angle::normalize_theta;
use crate::utils::kalman::imm::{ImmFilter, MotionEstimate, PositionFix};
use crate::Errors;
use anyhow::Result;
use log::warn;
use rand::Rng;
use rand_distr::StandardNormal;
use std::collections::VecDeque;

/// Per-scene bitmap of selected complete sub-graphs
pub mod selection;

pub const DEFAULT_DIFFUSION_SIGMA_XY: f64 = 0.01;
pub const DEFAULT_DIFFUSION_SIGMA_THETA: f64 = 0.002;

/// Track point: a working copy of a graph node.
///
/// The detection, timestamp and sensor state are copied from the node and never
/// change; `pose` starts at the detection pose and is what diffusion perturbs.
/// `motion` holds the fused estimate of the transition that ends here.
///
#[derive(Debug, Clone)]
pub struct Obstacle {
    pub node: NodeId,
    pub sub_graph: SubGraphId,
    pub timestamp: f64,
    pub sensor: SensorState,
    pub detection: BoxModel,
    pub pose: Pose,
    pub motion: Option<MotionEstimate>,
}

impl Obstacle {
    pub fn new(graph: &HypothesisGraph, node: NodeId) -> Self {
        let n = graph.node(node);
        Self {
            node,
            sub_graph: n.complete_sub_graph,
            timestamp: n.timestamp,
            sensor: n.sensor,
            detection: n.box_model,
            pose: n.box_model.pose,
            motion: None,
        }
    }

    pub fn fix(&self) -> PositionFix {
        PositionFix {
            timestamp: self.timestamp,
            origin: self.sensor.pose,
            pose: self.pose,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        self.motion.as_ref().map(|m| m.confidence)
    }
}

/// Gaussian noise scales of the pose diffusion move
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffusionNoise {
    sigma_xy: f64,
    sigma_theta: f64,
}

impl Default for DiffusionNoise {
    fn default() -> Self {
        Self {
            sigma_xy: DEFAULT_DIFFUSION_SIGMA_XY,
            sigma_theta: DEFAULT_DIFFUSION_SIGMA_THETA,
        }
    }
}

impl DiffusionNoise {
    pub fn new(sigma_xy: f64, sigma_theta: f64) -> Result<Self> {
        for (name, v) in [("sigma_xy", sigma_xy), ("sigma_theta", sigma_theta)] {
            if !v.is_finite() || v < 0.0 {
                return Err(Errors::InvalidParameter(name, v.to_string()).into());
            }
        }
        Ok(Self {
            sigma_xy,
            sigma_theta,
        })
    }

    pub fn sigma_xy(&self) -> f64 {
        self.sigma_xy
    }

    pub fn sigma_theta(&self) -> f64 {
        self.sigma_theta
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> (f64, f64, f64) {
        let mut n = || -> f64 { rng.sample(StandardNormal) };
        (
            self.sigma_xy * n(),
            self.sigma_xy * n(),
            self.sigma_theta * n(),
        )
    }
}

/// `ln P_L(L)` for `λ > 0`, written as `λ(1 - e^-λ) / (1 - e^-λL)` so long
/// tracks do not overflow. Callers validate `λ`; [Track::p_l] is the checked
/// form.
///
pub(crate) fn log_length_prior(len: usize, lambda: f64) -> f64 {
    debug_assert!(lambda.is_finite() && lambda > 0.0, "lambda = {}", lambda);
    let l = len as f64;
    lambda.ln() + (-(-lambda).exp_m1()).ln() - (-(-lambda * l).exp_m1()).ln()
}

/// One candidate trajectory: a chain of graph nodes linked by parent/child
/// edges, with scene-unique id.
///
#[derive(Debug, Clone)]
pub struct Track {
    id: u64,
    obstacles: VecDeque<Obstacle>,
}

impl Track {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            obstacles: VecDeque::default(),
        }
    }

    pub fn with_obstacle(id: u64, obstacle: Obstacle) -> Self {
        let mut t = Self::new(id);
        t.append_back(obstacle);
        t
    }

    pub fn get_id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    pub fn obstacles(&self) -> &VecDeque<Obstacle> {
        &self.obstacles
    }

    pub fn obstacle(&self, i: usize) -> &Obstacle {
        &self.obstacles[i]
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.obstacles.iter().map(|o| o.node)
    }

    pub fn front_node(&self) -> Option<NodeId> {
        self.obstacles.front().map(|o| o.node)
    }

    pub fn back_node(&self) -> Option<NodeId> {
        self.obstacles.back().map(|o| o.node)
    }

    /// Caller guarantees that the obstacle's node is a parent of the front node.
    ///
    pub fn append_front(&mut self, obstacle: Obstacle) {
        self.invalidate_motion(0);
        self.obstacles.push_front(obstacle);
    }

    /// Caller guarantees that the obstacle's node is a child of the back node.
    ///
    pub fn append_back(&mut self, mut obstacle: Obstacle) {
        obstacle.motion = None;
        self.obstacles.push_back(obstacle);
    }

    /// Drops motion estimates from index `from` onward
    fn invalidate_motion(&mut self, from: usize) {
        for o in self.obstacles.iter_mut().skip(from) {
            o.motion = None;
        }
    }

    /// Keeps obstacles `0..=r`, releasing the sub-graphs of the dropped ones.
    /// Returns the number of dropped obstacles.
    ///
    pub fn track_forward_reduction(&mut self, r: usize, selection: &mut SelectionMap) -> usize {
        if r + 1 >= self.len() {
            return 0;
        }
        let dropped = self.obstacles.split_off(r + 1);
        for o in &dropped {
            selection.release(o.sub_graph);
        }
        dropped.len()
    }

    /// Drops obstacles `0..r`, releasing their sub-graphs. Returns the number of
    /// dropped obstacles.
    ///
    pub fn track_backward_reduction(&mut self, r: usize, selection: &mut SelectionMap) -> usize {
        let r = r.min(self.len());
        for o in self.obstacles.drain(..r) {
            selection.release(o.sub_graph);
        }
        if r > 0 {
            self.invalidate_motion(0);
        }
        r
    }

    /// Moves the obstacles after index `s` (all of them when `s` is `None`) to
    /// the back of `tau`.
    ///
    pub fn track_move(&mut self, tau: &mut Track, s: Option<usize>) {
        let from = s.map(|s| s + 1).unwrap_or(0).min(self.len());
        let moved = self.obstacles.split_off(from);
        for o in moved {
            tau.append_back(o);
        }
    }

    /// `tau` starts at a child of this track's last node
    pub fn is_mergeable(&self, tau: &Track, graph: &HypothesisGraph) -> bool {
        match (self.back_node(), tau.front_node()) {
            (Some(back), Some(front)) => graph.is_parent(back, front),
            _ => false,
        }
    }

    /// Appends the whole of `tau`, leaving it empty.
    ///
    pub fn track_merge(&mut self, tau: &mut Track) {
        tau.track_move(self, None);
    }

    /// Finds the first crossing `(p, q)`: `self[p+1]` is a child of `tau[q]`
    /// and `tau[q+1]` is a child of `self[p]`.
    ///
    pub fn is_switchable(&self, tau: &Track, graph: &HypothesisGraph) -> Option<(usize, usize)> {
        for p in 0..self.len().saturating_sub(1) {
            for q in 0..tau.len().saturating_sub(1) {
                let (this_p, this_next) = (self.obstacles[p].node, self.obstacles[p + 1].node);
                let (tau_q, tau_next) = (tau.obstacles[q].node, tau.obstacles[q + 1].node);
                if graph.is_parent(tau_q, this_next) && graph.is_parent(this_p, tau_next) {
                    return Some((p, q));
                }
            }
        }
        None
    }

    /// Exchanges the suffixes after the crossing found by [is_switchable](Track::is_switchable).
    ///
    pub fn track_switch(&mut self, tau: &mut Track, (p, q): (usize, usize)) {
        let mut this_suffix = Track::new(self.id);
        let mut tau_suffix = Track::new(tau.id);
        self.track_move(&mut this_suffix, Some(p));
        tau.track_move(&mut tau_suffix, Some(q));
        tau_suffix.track_move(self, None);
        this_suffix.track_move(tau, None);
    }

    /// Diffusion: perturbs the pose of one uniformly chosen obstacle. Returns
    /// `false` for an empty track.
    ///
    pub fn track_update<R: Rng>(&mut self, rng: &mut R, noise: &DiffusionNoise) -> bool {
        if self.is_empty() {
            return false;
        }
        let i = rng.gen_range(0..self.len());
        let (dx, dy, dtheta) = noise.sample(rng);
        let o = &mut self.obstacles[i];
        o.pose.x += dx;
        o.pose.y += dy;
        o.pose.theta = normalize_theta(o.pose.theta + dtheta);
        self.invalidate_motion(i);
        true
    }

    /// Length prior of this track.
    ///
    /// # Parameters
    /// * `lambda` - shape of the prior, finite and non-zero
    ///
    pub fn p_l(&self, lambda: f64) -> Result<f64> {
        if !lambda.is_finite() || lambda == 0.0 {
            return Err(Errors::InvalidParameter("lambda", lambda.to_string()).into());
        }
        if lambda > 0.0 {
            return Ok(log_length_prior(self.len(), lambda).exp());
        }
        let l = self.len() as f64;
        Ok(lambda * (lambda * (l - 1.0)).exp() * lambda.exp_m1() / (lambda * l).exp_m1())
    }

    /// Releases every held sub-graph and empties the track
    pub fn release(&mut self, selection: &mut SelectionMap) {
        for o in self.obstacles.drain(..) {
            selection.release(o.sub_graph);
        }
    }

    /// Drops the leading obstacles whose nodes left the graph window, releasing
    /// them. Motion estimates of the remaining obstacles are kept.
    ///
    pub fn retain_live(&mut self, graph: &HypothesisGraph, selection: &mut SelectionMap) -> usize {
        let retired = self
            .obstacles
            .iter()
            .take_while(|o| graph.is_retired(o.node))
            .count();
        for o in self.obstacles.drain(..retired) {
            selection.release(o.sub_graph);
        }
        retired
    }

    /// Recomputes the missing motion estimates, front to back.
    ///
    pub fn refresh_motion(&mut self, filter: &ImmFilter) {
        let start = match (1..self.len()).find(|k| self.obstacles[*k].motion.is_none()) {
            Some(k) => k,
            None => return,
        };
        for k in start..self.len() {
            let previous = &self.obstacles[k - 1];
            let res = filter.extend(
                previous.motion.as_ref().map(|m| &m.state),
                &previous.fix(),
                &self.obstacles[k].fix(),
            );
            match res {
                Ok(m) => self.obstacles[k].motion = Some(m),
                Err(e) => {
                    warn!(
                        "Track {}: motion estimation stopped at obstacle {}: {}",
                        self.id, k, e
                    );
                    self.invalidate_motion(k);
                    return;
                }
            }
        }
    }

    /// Mean IMM confidence over the obstacles that carry an estimate
    pub fn mean_confidence(&self) -> Option<f64> {
        let c = self
            .obstacles
            .iter()
            .filter_map(|o| o.confidence())
            .collect::<Vec<_>>();
        if c.is_empty() {
            None
        } else {
            Some(c.iter().sum::<f64>() / c.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::{BoxModel, HypothesisGraph, NodeId, SensorState};
    use crate::track::selection::SelectionMap;
    use crate::track::{log_length_prior, DiffusionNoise, Obstacle, Track};
    use crate::utils::kalman::imm::ImmFilter;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Two 4-frame lanes at y = 0 and y = 4 with lane edges and one crossing
    /// between frames 1 and 2. Node ids: lane 0 is `2t`, lane 1 is `2t + 1`.
    fn lanes() -> HypothesisGraph {
        let mut g = HypothesisGraph::new();
        for t in 0..4 {
            for y in [0.0, 4.0] {
                g.add_complete_sub_graph(
                    t as f64,
                    SensorState::default(),
                    &[BoxModel::new(10.0 + t as f64, y, 0.0, 1.0, 2.0, 0)],
                )
                .unwrap();
            }
        }
        for t in 0..3 {
            g.link(NodeId(2 * t), NodeId(2 * t + 2)).unwrap();
            g.link(NodeId(2 * t + 1), NodeId(2 * t + 3)).unwrap();
        }
        g.link(NodeId(2), NodeId(5)).unwrap();
        g.link(NodeId(3), NodeId(4)).unwrap();
        g
    }

    fn lane(g: &HypothesisGraph, id: u64, lane: usize, sel: &mut SelectionMap) -> Track {
        let mut t = Track::new(id);
        for k in 0..4 {
            let o = Obstacle::new(g, NodeId(2 * k + lane));
            sel.select(o.sub_graph);
            t.append_back(o);
        }
        t
    }

    #[test]
    fn reduction_releases_dropped_nodes() {
        let g = lanes();
        let mut sel = SelectionMap::default();
        let mut t = lane(&g, 0, 0, &mut sel);
        assert_eq!(sel.count(), 4);

        assert_eq!(t.track_forward_reduction(1, &mut sel), 2);
        assert_eq!(t.nodes().collect::<Vec<_>>(), vec![NodeId(0), NodeId(2)]);
        assert_eq!(sel.count(), 2);
        assert_eq!(t.track_forward_reduction(5, &mut sel), 0);

        assert_eq!(t.track_backward_reduction(1, &mut sel), 1);
        assert_eq!(t.front_node(), Some(NodeId(2)));
        assert_eq!(sel.count(), 1);
        assert!(!sel.is_selected(g.node(NodeId(0)).complete_sub_graph));
    }

    #[test]
    fn split_then_merge_restores_track() {
        let g = lanes();
        let mut sel = SelectionMap::default();
        let mut t = lane(&g, 0, 0, &mut sel);
        let before = t.nodes().collect::<Vec<_>>();

        let mut tail = Track::new(1);
        t.track_move(&mut tail, Some(1));
        assert_eq!(t.len(), 2);
        assert_eq!(tail.len(), 2);
        assert!(t.is_mergeable(&tail, &g));
        assert!(!tail.is_mergeable(&t, &g));

        t.track_merge(&mut tail);
        assert!(tail.is_empty());
        assert_eq!(t.nodes().collect::<Vec<_>>(), before);
        assert_eq!(t.get_id(), 0);
        assert_eq!(sel.count(), 4);
    }

    #[test]
    fn switch_keeps_chains_contiguous() {
        let g = lanes();
        let mut sel = SelectionMap::default();
        let mut a = lane(&g, 0, 0, &mut sel);
        let mut b = lane(&g, 1, 1, &mut sel);

        let mut all = a.nodes().chain(b.nodes()).collect::<Vec<_>>();
        all.sort();

        let crossing = a.is_switchable(&b, &g).unwrap();
        assert_eq!(crossing, (1, 1));
        a.track_switch(&mut b, crossing);

        assert_eq!(
            a.nodes().collect::<Vec<_>>(),
            vec![NodeId(0), NodeId(2), NodeId(5), NodeId(7)]
        );
        assert_eq!(
            b.nodes().collect::<Vec<_>>(),
            vec![NodeId(1), NodeId(3), NodeId(4), NodeId(6)]
        );
        for t in [&a, &b] {
            let nodes = t.nodes().collect::<Vec<_>>();
            assert!(nodes.windows(2).all(|w| g.is_parent(w[0], w[1])));
        }
        let mut after = a.nodes().chain(b.nodes()).collect::<Vec<_>>();
        after.sort();
        assert_eq!(all, after);
        assert_eq!((a.get_id(), b.get_id()), (0, 1));
    }

    #[test]
    fn motion_is_refreshed_after_changes() {
        let g = lanes();
        let f = ImmFilter::default();
        let mut sel = SelectionMap::default();
        let mut t = lane(&g, 0, 0, &mut sel);
        t.refresh_motion(&f);
        assert!(t.obstacle(0).motion.is_none());
        assert!(t.obstacles().iter().skip(1).all(|o| o.motion.is_some()));
        let (vx, _) = t.obstacle(3).motion.as_ref().unwrap().state.velocity();
        assert!((vx - 1.0).abs() < 1e-3);

        let mut tail = Track::new(1);
        t.track_move(&mut tail, Some(1));
        assert!(tail.obstacles().iter().all(|o| o.motion.is_none()));
        assert!(t.obstacle(1).motion.is_some());
        tail.refresh_motion(&f);
        assert!(tail.obstacle(1).motion.is_some());
        assert!(t.mean_confidence().unwrap() > 0.0);
    }

    #[test]
    fn diffusion_moves_one_pose_copy() {
        let g = lanes();
        let mut sel = SelectionMap::default();
        let mut t = lane(&g, 0, 0, &mut sel);
        let mut rng = StdRng::seed_from_u64(7);
        assert!(t.track_update(&mut rng, &DiffusionNoise::default()));
        let moved = t
            .obstacles()
            .iter()
            .filter(|o| o.pose != o.detection.pose)
            .count();
        assert_eq!(moved, 1);
        assert!(t
            .obstacles()
            .iter()
            .all(|o| o.detection == g.node(o.node).box_model));
        assert!(!Track::new(3).track_update(&mut rng, &DiffusionNoise::default()));
        assert!(DiffusionNoise::new(-1.0, 0.1).is_err());
    }

    #[test]
    fn length_prior() {
        let g = lanes();
        let mut sel = SelectionMap::default();
        let t = lane(&g, 0, 0, &mut sel);
        let l = 4.0;
        let closed_form = |lambda: f64| {
            ((lambda * l).exp() - (lambda * (l - 1.0)).exp()) / (((lambda * l).exp() - 1.0) / lambda)
        };
        for lambda in [0.5, 2.0, -0.3] {
            assert!((t.p_l(lambda).unwrap() - closed_form(lambda)).abs() < 1e-12);
        }
        assert!((log_length_prior(1, 0.5) - 0.5f64.ln()).abs() < 1e-12);
        assert!(log_length_prior(10_000, 0.5).is_finite());
        assert!(t.p_l(0.0).is_err());
        assert!(t.p_l(f64::INFINITY).is_err());
    }
}
