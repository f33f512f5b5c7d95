use crate::graph::{HypothesisGraph, NodeId, SubGraphId};
use crate::track::selection::SelectionMap;
use crate::track::{DiffusionNoise, Obstacle, Track};
use crate::tracker::moving_object::MovingObject;
use crate::tracks::posterior::Posterior;
use crate::utils::kalman::imm::ImmFilter;
use crate::Errors;
use anyhow::Result;
use itertools::Itertools;
use log::trace;
use rand::Rng;
use std::collections::HashSet;

/// Scene scoring
pub mod posterior;

pub const DEFAULT_MAX_PROPOSAL_ATTEMPTS: usize = 64;

/// Reversible-jump move kinds
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveKind {
    Birth,
    Death,
    Diffusion,
    Extension,
    Merge,
    Reduction,
    Split,
    Switch,
}

impl MoveKind {
    pub const ALL: [MoveKind; 8] = [
        MoveKind::Birth,
        MoveKind::Death,
        MoveKind::Diffusion,
        MoveKind::Extension,
        MoveKind::Merge,
        MoveKind::Reduction,
        MoveKind::Split,
        MoveKind::Switch,
    ];
}

/// Proposal parameters
///
/// # Parameters
/// * `max_attempts` - how many move kinds are drawn before the proposal falls back to the unchanged scene;
/// * `diffusion` - pose noise of the diffusion move.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProposalOptions {
    pub(crate) max_attempts: usize,
    pub(crate) diffusion: DiffusionNoise,
}

impl Default for ProposalOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_PROPOSAL_ATTEMPTS,
            diffusion: DiffusionNoise::default(),
        }
    }
}

impl ProposalOptions {
    pub fn max_attempts(mut self, n: usize) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn diffusion(mut self, noise: DiffusionNoise) -> Self {
        self.diffusion = noise;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Errors::InvalidParameter("max_attempts", "0".to_string()).into());
        }
        Ok(())
    }
}

/// Scene hypothesis: a set of disjoint tracks and the complete sub-graphs they
/// hold.
///
/// Every move either applies and returns `true`, or leaves the scene untouched
/// and returns `false`.
///
#[derive(Debug, Clone, Default)]
pub struct Tracks {
    tracks: Vec<Track>,
    selection: SelectionMap,
    next_track_id: u64,
}

fn pick<R: Rng, T: Copy>(rng: &mut R, items: &[T]) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[rng.gen_range(0..items.len())])
    }
}

fn pair_mut(tracks: &mut [Track], i: usize, j: usize) -> (&mut Track, &mut Track) {
    assert_ne!(i, j);
    if i < j {
        let (l, r) = tracks.split_at_mut(j);
        (&mut l[i], &mut r[0])
    } else {
        let (l, r) = tracks.split_at_mut(i);
        (&mut r[0], &mut l[j])
    }
}

impl Tracks {
    /// Scene made of prebuilt tracks; their sub-graphs are marked selected.
    ///
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        let mut selection = SelectionMap::default();
        for o in tracks.iter().flat_map(|t| t.obstacles().iter()) {
            selection.select(o.sub_graph);
        }
        let next_track_id = tracks.iter().map(|t| t.get_id() + 1).max().unwrap_or(0);
        Self {
            tracks,
            selection,
            next_track_id,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&Track> {
        self.tracks.iter().find(|t| t.get_id() == id)
    }

    pub fn selection(&self) -> &SelectionMap {
        &self.selection
    }

    pub fn is_selected(&self, sub_graph: SubGraphId) -> bool {
        self.selection.is_selected(sub_graph)
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_track_id;
        self.next_track_id += 1;
        id
    }

    fn is_free(&self, graph: &HypothesisGraph, node: NodeId) -> bool {
        !graph.is_retired(node) && !self.is_selected(graph.node(node).complete_sub_graph)
    }

    fn free_children(&self, graph: &HypothesisGraph, node: NodeId) -> Vec<NodeId> {
        graph
            .node(node)
            .children
            .iter()
            .copied()
            .filter(|n| self.is_free(graph, *n))
            .collect()
    }

    fn free_parents(&self, graph: &HypothesisGraph, node: NodeId) -> Vec<NodeId> {
        graph
            .node(node)
            .parents
            .iter()
            .copied()
            .filter(|n| self.is_free(graph, *n))
            .collect()
    }

    fn can_grow(&self, graph: &HypothesisGraph, track: &Track) -> bool {
        let back = track
            .back_node()
            .map(|n| !self.free_children(graph, n).is_empty());
        let front = track
            .front_node()
            .map(|n| !self.free_parents(graph, n).is_empty());
        back.unwrap_or(false) || front.unwrap_or(false)
    }

    /// Starts a track at a free node and grows it by one node. A track that
    /// cannot grow is discarded together with its selection.
    ///
    pub fn track_birth<R: Rng>(&mut self, graph: &HypothesisGraph, rng: &mut R) -> bool {
        let free_sub_graphs = |sub_graphs: &[SubGraphId]| {
            sub_graphs
                .iter()
                .copied()
                .filter(|sg| !graph.sub_graph(*sg).retired && !self.is_selected(*sg))
                .collect::<Vec<_>>()
        };
        let components = graph
            .disconnected_sub_graphs()
            .iter()
            .filter(|d| !free_sub_graphs(&d.sub_graphs).is_empty())
            .collect::<Vec<_>>();
        let component = match pick(rng, &components) {
            Some(c) => c,
            None => return false,
        };
        let sub_graph = match pick(rng, &free_sub_graphs(&component.sub_graphs)) {
            Some(sg) => sg,
            None => return false,
        };
        let node = match pick(rng, &graph.sub_graph(sub_graph).nodes) {
            Some(n) => n,
            None => return false,
        };

        self.selection.select(sub_graph);
        let id = self.next_track_id;
        self.tracks
            .push(Track::with_obstacle(id, Obstacle::new(graph, node)));
        let idx = self.tracks.len() - 1;
        if self.extend(idx, graph, rng) {
            self.next_track_id += 1;
            true
        } else {
            let mut track = self.tracks.remove(idx);
            track.release(&mut self.selection);
            false
        }
    }

    /// Grows the track at `idx` by a free child of its back node.
    ///
    pub fn forward_extension<R: Rng>(
        &mut self,
        idx: usize,
        graph: &HypothesisGraph,
        rng: &mut R,
    ) -> bool {
        let back = match self.tracks.get(idx).and_then(|t| t.back_node()) {
            Some(n) => n,
            None => return false,
        };
        match pick(rng, &self.free_children(graph, back)) {
            Some(child) => {
                let o = Obstacle::new(graph, child);
                self.selection.select(o.sub_graph);
                self.tracks[idx].append_back(o);
                true
            }
            None => false,
        }
    }

    /// Grows the track at `idx` by a free parent of its front node.
    ///
    pub fn backward_extension<R: Rng>(
        &mut self,
        idx: usize,
        graph: &HypothesisGraph,
        rng: &mut R,
    ) -> bool {
        let front = match self.tracks.get(idx).and_then(|t| t.front_node()) {
            Some(n) => n,
            None => return false,
        };
        match pick(rng, &self.free_parents(graph, front)) {
            Some(parent) => {
                let o = Obstacle::new(graph, parent);
                self.selection.select(o.sub_graph);
                self.tracks[idx].append_front(o);
                true
            }
            None => false,
        }
    }

    /// Random direction first, the other one when it is blocked
    fn extend<R: Rng>(&mut self, idx: usize, graph: &HypothesisGraph, rng: &mut R) -> bool {
        if rng.gen_bool(0.5) {
            self.forward_extension(idx, graph, rng) || self.backward_extension(idx, graph, rng)
        } else {
            self.backward_extension(idx, graph, rng) || self.forward_extension(idx, graph, rng)
        }
    }

    pub fn track_extension<R: Rng>(&mut self, graph: &HypothesisGraph, rng: &mut R) -> bool {
        let eligible = (0..self.tracks.len())
            .filter(|i| self.can_grow(graph, &self.tracks[*i]))
            .collect::<Vec<_>>();
        match pick(rng, &eligible) {
            Some(idx) => self.extend(idx, graph, rng),
            None => false,
        }
    }

    /// Shortens a track of at least 3 nodes from either end, keeping at least
    /// 2 nodes.
    ///
    pub fn track_reduction<R: Rng>(&mut self, rng: &mut R) -> bool {
        let eligible = (0..self.tracks.len())
            .filter(|i| self.tracks[*i].len() >= 3)
            .collect::<Vec<_>>();
        let idx = match pick(rng, &eligible) {
            Some(i) => i,
            None => return false,
        };
        let len = self.tracks[idx].len();
        let r = rng.gen_range(1..=len - 2);
        let track = &mut self.tracks[idx];
        let dropped = if rng.gen_bool(0.5) {
            track.track_forward_reduction(r, &mut self.selection)
        } else {
            track.track_backward_reduction(r, &mut self.selection)
        };
        dropped > 0
    }

    /// Cuts a track of at least 4 nodes in two, each part keeping at least 2
    /// nodes. The tail gets a new id.
    ///
    pub fn track_split<R: Rng>(&mut self, rng: &mut R) -> bool {
        let eligible = (0..self.tracks.len())
            .filter(|i| self.tracks[*i].len() >= 4)
            .collect::<Vec<_>>();
        let idx = match pick(rng, &eligible) {
            Some(i) => i,
            None => return false,
        };
        let s = rng.gen_range(1..=self.tracks[idx].len() - 3);
        let mut tail = Track::new(self.next_id());
        self.tracks[idx].track_move(&mut tail, Some(s));
        self.tracks.push(tail);
        true
    }

    /// Joins two tracks where the second starts at a child of the first one's
    /// end. The joined track keeps the first id.
    ///
    pub fn track_merge<R: Rng>(&mut self, graph: &HypothesisGraph, rng: &mut R) -> bool {
        let candidates = (0..self.tracks.len())
            .tuple_combinations()
            .flat_map(|(i, j)| [(i, j), (j, i)])
            .filter(|(i, j)| self.tracks[*i].is_mergeable(&self.tracks[*j], graph))
            .collect::<Vec<_>>();
        let (i, j) = match pick(rng, &candidates) {
            Some(p) => p,
            None => return false,
        };
        let (head, tail) = pair_mut(&mut self.tracks, i, j);
        head.track_merge(tail);
        self.tracks.remove(j);
        true
    }

    /// Exchanges the tails of two crossing tracks.
    ///
    pub fn track_switch<R: Rng>(&mut self, graph: &HypothesisGraph, rng: &mut R) -> bool {
        let candidates = (0..self.tracks.len())
            .tuple_combinations()
            .flat_map(|(i, j)| [(i, j), (j, i)])
            .filter_map(|(i, j)| {
                self.tracks[i]
                    .is_switchable(&self.tracks[j], graph)
                    .map(|crossing| (i, j, crossing))
            })
            .collect::<Vec<_>>();
        let (i, j, crossing) = match pick(rng, &candidates) {
            Some(c) => c,
            None => return false,
        };
        let (this, tau) = pair_mut(&mut self.tracks, i, j);
        this.track_switch(tau, crossing);
        true
    }

    /// Removes a random track and releases its nodes.
    ///
    pub fn track_death<R: Rng>(&mut self, rng: &mut R) -> bool {
        if self.tracks.is_empty() {
            return false;
        }
        let idx = rng.gen_range(0..self.tracks.len());
        let mut track = self.tracks.remove(idx);
        track.release(&mut self.selection);
        true
    }

    pub fn track_diffusion<R: Rng>(&mut self, rng: &mut R, noise: &DiffusionNoise) -> bool {
        if self.tracks.is_empty() {
            return false;
        }
        let idx = rng.gen_range(0..self.tracks.len());
        self.tracks[idx].track_update(rng, noise)
    }

    pub fn apply<R: Rng>(
        &mut self,
        kind: MoveKind,
        graph: &HypothesisGraph,
        opts: &ProposalOptions,
        rng: &mut R,
    ) -> bool {
        match kind {
            MoveKind::Birth => self.track_birth(graph, rng),
            MoveKind::Death => self.track_death(rng),
            MoveKind::Diffusion => self.track_diffusion(rng, &opts.diffusion),
            MoveKind::Extension => self.track_extension(graph, rng),
            MoveKind::Merge => self.track_merge(graph, rng),
            MoveKind::Reduction => self.track_reduction(rng),
            MoveKind::Split => self.track_split(rng),
            MoveKind::Switch => self.track_switch(graph, rng),
        }
    }

    /// Draws a neighbouring scene: a copy of this one changed by the first
    /// applicable random move. Returns the unchanged copy and `None` when no
    /// move applied within `max_attempts` draws.
    ///
    pub fn propose<R: Rng>(
        &self,
        graph: &HypothesisGraph,
        filter: &ImmFilter,
        opts: &ProposalOptions,
        rng: &mut R,
    ) -> (Tracks, Option<MoveKind>) {
        let mut proposal = self.clone();
        for attempt in 0..opts.max_attempts {
            let kind = MoveKind::ALL[rng.gen_range(0..MoveKind::ALL.len())];
            if proposal.apply(kind, graph, opts, rng) {
                trace!("Move {:?} applied after {} attempts", kind, attempt + 1);
                proposal.refresh_motion(filter);
                return (proposal, Some(kind));
            }
        }
        trace!("No move applied in {} attempts", opts.max_attempts);
        (proposal, None)
    }

    pub fn refresh_motion(&mut self, filter: &ImmFilter) {
        for t in &mut self.tracks {
            t.refresh_motion(filter);
        }
    }

    /// Drops the nodes that left the graph window; tracks left with fewer
    /// than 2 nodes are removed. The selection forgets the sub-graphs the
    /// graph no longer stores. Returns the number of removed tracks.
    ///
    pub fn retain_live(&mut self, graph: &HypothesisGraph) -> usize {
        let selection = &mut self.selection;
        let before = self.tracks.len();
        self.tracks.retain_mut(|t| {
            t.retain_live(graph, selection);
            if t.len() < 2 {
                t.release(selection);
                false
            } else {
                true
            }
        });
        selection.forget_before(graph.first_sub_graph_id());
        before - self.tracks.len()
    }

    pub fn log_p(&self, posterior: &dyn Posterior) -> f64 {
        posterior.log_p(self)
    }

    pub fn p(&self, posterior: &dyn Posterior) -> f64 {
        self.log_p(posterior).exp()
    }

    /// Tracks are disjoint, follow graph edges, and the selection holds
    /// exactly their sub-graphs.
    ///
    pub fn is_consistent(&self, graph: &HypothesisGraph) -> bool {
        let mut held = HashSet::new();
        for t in &self.tracks {
            let nodes = t.nodes().collect::<Vec<_>>();
            if nodes.is_empty() || !nodes.windows(2).all(|w| graph.is_parent(w[0], w[1])) {
                return false;
            }
            for o in t.obstacles() {
                if o.sub_graph != graph.node(o.node).complete_sub_graph || !held.insert(o.sub_graph)
                {
                    return false;
                }
            }
        }
        let selected = self.selection.iter().collect::<HashSet<_>>();
        selected == held
    }

    pub fn moving_objects(&self) -> Vec<MovingObject> {
        self.tracks
            .iter()
            .filter_map(MovingObject::from_track)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::examples::{chain_scans, crossing_scans};
    use crate::graph::neighborhood::{NeighborhoodGraphUpdater, WindowedGraphUpdater};
    use crate::graph::{HypothesisGraph, NodeId};
    use crate::track::{Obstacle, Track};
    use crate::tracks::posterior::{ConstantPosterior, LengthMotionPosterior};
    use crate::tracks::{MoveKind, ProposalOptions, Tracks};
    use crate::utils::kalman::imm::ImmFilter;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn graph_of(scans: Vec<crate::graph::neighborhood::BoxModelHypotheses>) -> HypothesisGraph {
        let mut g = HypothesisGraph::new();
        let mut u = WindowedGraphUpdater::new(100.0, 5.0).unwrap();
        for s in &scans {
            u.update(&mut g, s).unwrap();
        }
        g
    }

    fn chain_track(g: &HypothesisGraph, id: u64, nodes: &[usize]) -> Track {
        let mut t = Track::new(id);
        for n in nodes {
            t.append_back(Obstacle::new(g, NodeId(*n)));
        }
        t
    }

    #[test]
    fn selection_stays_consistent_under_random_moves() {
        let g = graph_of(crossing_scans(6));
        let f = ImmFilter::default();
        let opts = ProposalOptions::default();
        let mut rng = StdRng::seed_from_u64(11);
        let mut tracks = Tracks::default();
        let mut applied = std::collections::HashSet::new();
        for _ in 0..2000 {
            let (next, kind) = tracks.propose(&g, &f, &opts, &mut rng);
            assert!(next.is_consistent(&g), "after {:?}: {:?}", kind, next);
            applied.extend(kind);
            tracks = next;
        }
        for kind in [
            MoveKind::Birth,
            MoveKind::Death,
            MoveKind::Diffusion,
            MoveKind::Extension,
            MoveKind::Reduction,
            MoveKind::Split,
            MoveKind::Merge,
        ] {
            assert!(applied.contains(&kind), "{:?} never applied", kind);
        }
    }

    #[test]
    fn birth_needs_an_extension() {
        let g = graph_of(chain_scans(1));
        let mut tracks = Tracks::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(!tracks.track_birth(&g, &mut rng));
        assert_eq!(tracks.selection().count(), 0);

        let g = graph_of(chain_scans(2));
        assert!(tracks.track_birth(&g, &mut rng));
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks.tracks()[0].len(), 2);
        assert_eq!(tracks.selection().count(), 2);
        // nothing left to start from
        assert!(!tracks.track_birth(&g, &mut rng));
        assert!(tracks.is_consistent(&g));
    }

    #[test]
    fn extension_takes_free_nodes_only() {
        let g = graph_of(chain_scans(4));
        let mut rng = StdRng::seed_from_u64(2);
        let mut tracks =
            Tracks::from_tracks(vec![chain_track(&g, 0, &[0, 1]), chain_track(&g, 1, &[2, 3])]);
        assert!(!tracks.track_extension(&g, &mut rng));
        assert!(tracks.track_merge(&g, &mut rng));
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks.tracks()[0].get_id(), 0);
        assert_eq!(tracks.tracks()[0].len(), 4);
        assert!(tracks.is_consistent(&g));
    }

    #[test]
    fn reduction_and_split_bounds() {
        let g = graph_of(chain_scans(4));
        let mut rng = StdRng::seed_from_u64(3);
        let mut tracks = Tracks::from_tracks(vec![chain_track(&g, 0, &[0, 1])]);
        assert!(!tracks.track_reduction(&mut rng));
        assert!(!tracks.track_split(&mut rng));

        let mut tracks = Tracks::from_tracks(vec![chain_track(&g, 0, &[0, 1, 2, 3])]);
        assert!(tracks.track_split(&mut rng));
        let lens = tracks.tracks().iter().map(|t| t.len()).collect::<Vec<_>>();
        assert_eq!(lens, vec![2, 2]);
        assert_eq!(tracks.tracks()[1].get_id(), 1);
        assert!(tracks.is_consistent(&g));

        let mut tracks = Tracks::from_tracks(vec![chain_track(&g, 0, &[0, 1, 2])]);
        assert!(tracks.track_reduction(&mut rng));
        assert_eq!(tracks.tracks()[0].len(), 2);
        assert_eq!(tracks.selection().count(), 2);
        assert!(tracks.is_consistent(&g));
    }

    #[test]
    fn switch_exchanges_tails() {
        let g = graph_of(crossing_scans(4));
        let mut rng = StdRng::seed_from_u64(4);
        // lanes: object 0 at even node ids, object 1 at odd ones
        let mut tracks = Tracks::from_tracks(vec![
            chain_track(&g, 0, &[0, 2, 4, 6]),
            chain_track(&g, 1, &[1, 3, 5, 7]),
        ]);
        assert!(tracks.track_switch(&g, &mut rng));
        assert!(tracks.is_consistent(&g));
        assert_eq!(tracks.selection().count(), 8);
        assert_ne!(
            tracks.tracks()[0].nodes().collect::<Vec<_>>(),
            vec![NodeId(0), NodeId(2), NodeId(4), NodeId(6)]
        );
    }

    #[test]
    fn identity_proposal_when_nothing_applies() {
        let g = HypothesisGraph::new();
        let mut rng = StdRng::seed_from_u64(5);
        let tracks = Tracks::default();
        let (next, kind) = tracks.propose(
            &g,
            &ImmFilter::default(),
            &ProposalOptions::default().max_attempts(10),
            &mut rng,
        );
        assert!(kind.is_none());
        assert!(next.is_empty());
        assert!(next.selection().shares_storage(tracks.selection()));
    }

    #[test]
    fn scores_and_retirement() {
        let scans = chain_scans(4);
        let f = ImmFilter::default();
        for (window, removed) in [(1.5, 1), (2.5, 0)] {
            let mut g = HypothesisGraph::new();
            let mut u = WindowedGraphUpdater::new(window, 5.0).unwrap();
            for s in &scans[..3] {
                u.update(&mut g, s).unwrap();
            }
            let mut tracks = Tracks::from_tracks(vec![chain_track(&g, 0, &[0, 1, 2])]);
            tracks.refresh_motion(&f);
            assert_eq!(tracks.p(&ConstantPosterior), 1.0);
            assert!(tracks.log_p(&LengthMotionPosterior::default()) > 0.0);

            u.update(&mut g, &scans[3]).unwrap();
            assert_eq!(tracks.retain_live(&g), removed);
            assert!(tracks.is_consistent(&g));
            if removed == 0 {
                let t = &tracks.tracks()[0];
                assert_eq!(t.front_node(), Some(NodeId(1)));
                assert!(t.obstacle(1).motion.is_some());
                assert_eq!(tracks.selection().count(), 2);
            } else {
                assert!(tracks.is_empty());
                assert_eq!(tracks.selection().count(), 0);
            }
        }
    }
}
