use crate::graph::{BoxModel, HypothesisGraph, NodeId, SensorState};
use crate::Errors;
use anyhow::Result;
use log::{debug, warn};

pub const DEFAULT_WINDOW: f64 = 5.0;
pub const DEFAULT_MAX_SPEED: f64 = 30.0;

/// One scan worth of box-model hypotheses. Every cluster holds the
/// alternative box models fitted to one segment and becomes one complete
/// sub-graph.
///
#[derive(Debug, Clone, Default)]
pub struct BoxModelHypotheses {
    pub timestamp: f64,
    pub sensor: SensorState,
    pub clusters: Vec<Vec<BoxModel>>,
}

impl BoxModelHypotheses {
    pub fn new(timestamp: f64, sensor: SensorState) -> Self {
        Self {
            timestamp,
            sensor,
            clusters: Vec::default(),
        }
    }

    pub fn cluster(mut self, alternatives: Vec<BoxModel>) -> Self {
        self.clusters.push(alternatives);
        self
    }
}

/// Folds a new scan into the hypothesis graph.
///
/// After an update every live node is either used by a track or free for
/// birth, and the disconnected sub-graphs reflect the current edges.
///
pub trait NeighborhoodGraphUpdater {
    fn update(&mut self, graph: &mut HypothesisGraph, hypotheses: &BoxModelHypotheses)
        -> Result<()>;
}

/// Sliding time window updater.
///
/// # Parameters
/// * `window` - nodes older than `timestamp - window` are retired;
/// * `max_speed` - maximal object speed used to gate associations, m/s.
///
/// New nodes are linked to the nodes of the previous scan, and to the live
/// nodes of older scans that are still without a child, so an object missed
/// in some scans keeps a path through the graph.
///
#[derive(Debug, Clone)]
pub struct WindowedGraphUpdater {
    window: f64,
    max_speed: f64,
    last_timestamp: Option<f64>,
}

impl Default for WindowedGraphUpdater {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_speed: DEFAULT_MAX_SPEED,
            last_timestamp: None,
        }
    }
}

impl WindowedGraphUpdater {
    pub fn new(window: f64, max_speed: f64) -> Result<Self> {
        if !window.is_finite() || window <= 0.0 {
            return Err(Errors::InvalidParameter("window", window.to_string()).into());
        }
        if !max_speed.is_finite() || max_speed <= 0.0 {
            return Err(Errors::InvalidParameter("max_speed", max_speed.to_string()).into());
        }
        Ok(Self {
            window,
            max_speed,
            last_timestamp: None,
        })
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    fn gate(&self, graph: &HypothesisGraph, parent: NodeId, child: &BoxModel, dt: f64) -> bool {
        let p = &graph.node(parent).box_model;
        p.class_id == child.class_id && p.pose.distance(&child.pose) <= self.max_speed * dt
    }
}

impl NeighborhoodGraphUpdater for WindowedGraphUpdater {
    fn update(
        &mut self,
        graph: &mut HypothesisGraph,
        hypotheses: &BoxModelHypotheses,
    ) -> Result<()> {
        let timestamp = hypotheses.timestamp;
        if let Some(last) = self.last_timestamp {
            if !(timestamp > last) {
                return Err(Errors::OutOfOrderScan {
                    last,
                    current: timestamp,
                }
                .into());
            }
        }

        graph.retire_before(timestamp - self.window);

        let mut new_nodes = Vec::default();
        for cluster in &hypotheses.clusters {
            if cluster.is_empty() {
                warn!("Empty cluster in scan at {:.3} ignored", timestamp);
                continue;
            }
            let sg = graph.add_complete_sub_graph(timestamp, hypotheses.sensor, cluster)?;
            new_nodes.extend(graph.sub_graph(sg).nodes.iter().copied());
        }

        let mut edges = Vec::default();
        if let Some(last) = self.last_timestamp {
            let parents = graph.nodes().filter(|n| {
                n.timestamp < timestamp
                    && !graph.is_retired(n.id)
                    && (n.timestamp >= last || n.children.is_empty())
            });
            for parent in parents {
                let dt = timestamp - parent.timestamp;
                for child in &new_nodes {
                    if self.gate(graph, parent.id, &graph.node(*child).box_model, dt) {
                        edges.push((parent.id, *child));
                    }
                }
            }
        }
        for (parent, child) in &edges {
            graph.link(*parent, *child)?;
        }

        graph.rebuild_disconnected_sub_graphs();
        debug!(
            "Scan {:.3}: {} clusters, {} nodes, {} edges, {} components",
            timestamp,
            hypotheses.clusters.len(),
            new_nodes.len(),
            edges.len(),
            graph.disconnected_sub_graphs().len()
        );

        self.last_timestamp = Some(timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::neighborhood::{
        BoxModelHypotheses, NeighborhoodGraphUpdater, WindowedGraphUpdater,
    };
    use crate::graph::{BoxModel, HypothesisGraph, NodeId, SensorState};
    use crate::Errors;

    fn scan(t: f64, xs: &[f64]) -> BoxModelHypotheses {
        xs.iter().fold(
            BoxModelHypotheses::new(t, SensorState::default()),
            |h, x| h.cluster(vec![BoxModel::new(*x, 0.0, 0.0, 1.0, 2.0, 1)]),
        )
    }

    #[test]
    fn links_gated_by_speed() {
        let mut g = HypothesisGraph::new();
        let mut u = WindowedGraphUpdater::new(10.0, 2.0).unwrap();
        u.update(&mut g, &scan(0.0, &[0.0, 50.0])).unwrap();
        u.update(&mut g, &scan(1.0, &[1.0, 49.5])).unwrap();
        assert!(g.is_parent(NodeId(0), NodeId(2)));
        assert!(!g.is_parent(NodeId(0), NodeId(3)));
        assert!(g.is_parent(NodeId(1), NodeId(3)));
        assert!(!g.is_parent(NodeId(1), NodeId(2)));
        assert_eq!(g.disconnected_sub_graphs().len(), 2);
    }

    #[test]
    fn class_mismatch_is_not_linked() {
        let mut g = HypothesisGraph::new();
        let mut u = WindowedGraphUpdater::default();
        u.update(&mut g, &scan(0.0, &[0.0])).unwrap();
        let other = BoxModelHypotheses::new(1.0, SensorState::default())
            .cluster(vec![BoxModel::new(0.5, 0.0, 0.0, 1.0, 2.0, 2)]);
        u.update(&mut g, &other).unwrap();
        assert!(g.node(NodeId(1)).parents.is_empty());
    }

    #[test]
    fn old_scans_are_retired() {
        let mut g = HypothesisGraph::new();
        let mut u = WindowedGraphUpdater::new(1.5, 5.0).unwrap();
        for t in 0..4 {
            u.update(&mut g, &scan(t as f64, &[t as f64])).unwrap();
        }
        assert!(g.is_retired(NodeId(0)));
        assert!(g.is_retired(NodeId(1)));
        assert!(!g.is_retired(NodeId(2)));
        assert_eq!(g.disconnected_sub_graphs().len(), 1);
        assert_eq!(g.disconnected_sub_graphs()[0].sub_graphs.len(), 2);
    }

    #[test]
    fn out_of_order_scan_is_rejected() {
        let mut g = HypothesisGraph::new();
        let mut u = WindowedGraphUpdater::default();
        u.update(&mut g, &scan(1.0, &[0.0])).unwrap();
        let err = u.update(&mut g, &scan(1.0, &[0.0])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Errors>(),
            Some(Errors::OutOfOrderScan { .. })
        ));
        assert!(WindowedGraphUpdater::new(0.0, 1.0).is_err());
    }

    #[test]
    fn missed_detection_keeps_a_path() {
        let mut g = HypothesisGraph::new();
        let mut u = WindowedGraphUpdater::new(10.0, 2.0).unwrap();
        u.update(&mut g, &scan(0.0, &[0.0])).unwrap();
        u.update(&mut g, &scan(1.0, &[1.0])).unwrap();
        // the object is missed at t = 2
        u.update(&mut g, &scan(2.0, &[])).unwrap();
        u.update(&mut g, &scan(3.0, &[3.0])).unwrap();
        assert!(g.is_parent(NodeId(1), NodeId(2)));
        // node 0 already continues through node 1
        assert!(!g.is_parent(NodeId(0), NodeId(2)));
        assert_eq!(g.disconnected_sub_graphs().len(), 1);

        // too far for the gap
        u.update(&mut g, &scan(4.0, &[])).unwrap();
        u.update(&mut g, &scan(5.0, &[20.0])).unwrap();
        assert!(g.node(NodeId(3)).parents.is_empty());
        assert_eq!(g.disconnected_sub_graphs().len(), 2);
    }

    #[test]
    fn storage_follows_the_window() {
        let mut g = HypothesisGraph::new();
        let mut u = WindowedGraphUpdater::new(1.0, 20.0).unwrap();
        for t in 0..1000 {
            let t = t as f64 * 0.1;
            u.update(&mut g, &scan(t, &[t, t + 50.0])).unwrap();
            assert!(g.len() <= 2 * 12, "{} nodes at {}", g.len(), t);
            assert!(g.num_sub_graphs() <= 2 * 12);
        }
        assert!(g.first_node_id() > NodeId(1900));
        assert_eq!(g.disconnected_sub_graphs().len(), 2);
    }
}
