use crate::Errors;
use anyhow::Result;
use log::debug;
use std::collections::{HashMap, VecDeque};

/// Neighborhood graph updater that folds new scans into the graph
pub mod neighborhood;

/// Stable index of a node in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Stable index of a complete sub-graph (a set of mutually exclusive nodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubGraphId(pub usize);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    pub fn distance(&self, other: &Pose) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Sensor origin and speed at acquisition time
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorState {
    pub pose: Pose,
    pub velocity: f64,
}

/// Oriented box fitted to a point cluster
///
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoxModel {
    pub pose: Pose,
    pub width: f64,
    pub length: f64,
    /// Object category assigned by the box fitter (car, bike, pedestrian, ...)
    pub class_id: u64,
}

impl BoxModel {
    pub fn new(x: f64, y: f64, theta: f64, width: f64, length: f64, class_id: u64) -> Self {
        Self {
            pose: Pose::new(x, y, theta),
            width,
            length,
            class_id,
        }
    }
}

/// One object hypothesis at one timestamp
///
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub box_model: BoxModel,
    pub timestamp: f64,
    pub sensor: SensorState,
    pub parents: Vec<NodeId>,
    pub children: Vec<NodeId>,
    pub complete_sub_graph: SubGraphId,
}

#[derive(Debug, Clone)]
pub struct CompleteSubGraph {
    pub id: SubGraphId,
    pub nodes: Vec<NodeId>,
    pub timestamp: f64,
    /// aged out of the tracking window; never offered to moves again
    pub retired: bool,
}

/// Connected component of the graph, expressed as complete sub-graphs
#[derive(Debug, Clone, Default)]
pub struct DisconnectedSubGraph {
    pub sub_graphs: Vec<SubGraphId>,
}

/// Arena of hypothesis nodes linked by temporal association edges.
///
/// Ids are stable for the life of the graph. Nodes are retired when they
/// leave the time window, and the retired front of the arena is dropped, so
/// storage follows the window rather than the whole history. Looking up a
/// dropped id with [node](HypothesisGraph::node) panics, [get_node](HypothesisGraph::get_node)
/// returns `Errors::UnknownNode`; [is_retired](HypothesisGraph::is_retired)
/// is answered for any id.
///
#[derive(Debug, Clone, Default)]
pub struct HypothesisGraph {
    nodes: VecDeque<GraphNode>,
    first_node: usize,
    sub_graphs: VecDeque<CompleteSubGraph>,
    first_sub_graph: usize,
    disconnected: Vec<DisconnectedSubGraph>,
}

impl HypothesisGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored nodes, retired ones not yet dropped included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn num_sub_graphs(&self) -> usize {
        self.sub_graphs.len()
    }

    /// Smallest node id still stored
    pub fn first_node_id(&self) -> NodeId {
        NodeId(self.first_node)
    }

    /// Smallest complete sub-graph id still stored
    pub fn first_sub_graph_id(&self) -> SubGraphId {
        SubGraphId(self.first_sub_graph)
    }

    fn node_index(&self, id: NodeId) -> Option<usize> {
        id.0.checked_sub(self.first_node)
            .filter(|i| *i < self.nodes.len())
    }

    fn sub_graph_index(&self, id: SubGraphId) -> Option<usize> {
        id.0.checked_sub(self.first_sub_graph)
            .filter(|i| *i < self.sub_graphs.len())
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.0 - self.first_node]
    }

    pub fn get_node(&self, id: NodeId) -> Result<&GraphNode> {
        self.node_index(id)
            .map(|i| &self.nodes[i])
            .ok_or_else(|| Errors::UnknownNode(id.0).into())
    }

    fn node_mut(&mut self, id: NodeId) -> &mut GraphNode {
        let i = id.0 - self.first_node;
        &mut self.nodes[i]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> + '_ {
        self.nodes.iter()
    }

    pub fn sub_graph(&self, id: SubGraphId) -> &CompleteSubGraph {
        &self.sub_graphs[id.0 - self.first_sub_graph]
    }

    pub fn get_sub_graph(&self, id: SubGraphId) -> Result<&CompleteSubGraph> {
        self.sub_graph_index(id)
            .map(|i| &self.sub_graphs[i])
            .ok_or_else(|| Errors::UnknownSubGraph(id.0).into())
    }

    pub fn sub_graphs(&self) -> impl Iterator<Item = &CompleteSubGraph> + '_ {
        self.sub_graphs.iter()
    }

    pub fn disconnected_sub_graphs(&self) -> &[DisconnectedSubGraph] {
        &self.disconnected
    }

    /// `true` for retired nodes, including the ones already dropped
    pub fn is_retired(&self, id: NodeId) -> bool {
        match self.node_index(id) {
            Some(i) => self.sub_graph(self.nodes[i].complete_sub_graph).retired,
            None => id.0 < self.first_node,
        }
    }

    /// `parent -> child` edge exists
    pub fn is_parent(&self, parent: NodeId, child: NodeId) -> bool {
        self.node_index(child)
            .map(|i| self.nodes[i].parents.contains(&parent))
            .unwrap_or(false)
    }

    /// Adds a group of mutually exclusive hypotheses observed at `timestamp`.
    ///
    /// The disconnected sub-graphs are not refreshed here, see
    /// [rebuild_disconnected_sub_graphs](HypothesisGraph::rebuild_disconnected_sub_graphs).
    ///
    pub fn add_complete_sub_graph(
        &mut self,
        timestamp: f64,
        sensor: SensorState,
        hypotheses: &[BoxModel],
    ) -> Result<SubGraphId> {
        if hypotheses.is_empty() {
            return Err(Errors::EmptyCluster.into());
        }
        if !timestamp.is_finite() {
            return Err(Errors::InvalidParameter("timestamp", timestamp.to_string()).into());
        }

        let sub_graph_id = SubGraphId(self.first_sub_graph + self.sub_graphs.len());
        let mut nodes = Vec::with_capacity(hypotheses.len());
        for box_model in hypotheses {
            let id = NodeId(self.first_node + self.nodes.len());
            self.nodes.push_back(GraphNode {
                id,
                box_model: *box_model,
                timestamp,
                sensor,
                parents: Vec::default(),
                children: Vec::default(),
                complete_sub_graph: sub_graph_id,
            });
            nodes.push(id);
        }
        self.sub_graphs.push_back(CompleteSubGraph {
            id: sub_graph_id,
            nodes,
            timestamp,
            retired: false,
        });
        Ok(sub_graph_id)
    }

    /// Adds a temporal association edge `parent -> child`.
    ///
    pub fn link(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let (parent_ts, child_ts) = (
            self.get_node(parent)?.timestamp,
            self.get_node(child)?.timestamp,
        );
        if child_ts <= parent_ts {
            return Err(Errors::NonIncreasingTimestamp {
                parent: parent_ts,
                child: child_ts,
            }
            .into());
        }
        if !self.node(parent).children.contains(&child) {
            self.node_mut(parent).children.push(child);
            self.node_mut(child).parents.push(parent);
        }
        Ok(())
    }

    /// Retires every complete sub-graph observed before `timestamp`, returning
    /// the newly retired ones. The retired front of the arena is dropped and
    /// edges to dropped nodes are forgotten.
    ///
    pub fn retire_before(&mut self, timestamp: f64) -> Vec<SubGraphId> {
        let retired = self
            .sub_graphs
            .iter_mut()
            .filter(|sg| !sg.retired && sg.timestamp < timestamp)
            .map(|sg| {
                sg.retired = true;
                sg.id
            })
            .collect::<Vec<_>>();
        if !retired.is_empty() {
            debug!(
                "Retired {} complete sub-graphs older than {:.3}",
                retired.len(),
                timestamp
            );
            self.drop_retired_front();
        }
        retired
    }

    fn drop_retired_front(&mut self) {
        while self.sub_graphs.front().map_or(false, |sg| sg.retired) {
            self.sub_graphs.pop_front();
            self.first_sub_graph += 1;
        }
        let first_sub_graph = self.first_sub_graph;
        while self
            .nodes
            .front()
            .map_or(false, |n| n.complete_sub_graph.0 < first_sub_graph)
        {
            self.nodes.pop_front();
            self.first_node += 1;
        }
        let first_node = self.first_node;
        for node in self.nodes.iter_mut() {
            node.parents.retain(|p| p.0 >= first_node);
            node.children.retain(|c| c.0 >= first_node);
        }
    }

    /// Groups live complete sub-graphs into connected components over the
    /// association edges.
    ///
    pub fn rebuild_disconnected_sub_graphs(&mut self) {
        let mut parent = (0..self.sub_graphs.len()).collect::<Vec<_>>();

        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        for node in &self.nodes {
            let a = match self.sub_graph_index(node.complete_sub_graph) {
                Some(a) if !self.sub_graphs[a].retired => a,
                _ => continue,
            };
            for child in &node.children {
                let b = match self
                    .node_index(*child)
                    .and_then(|i| self.sub_graph_index(self.nodes[i].complete_sub_graph))
                {
                    Some(b) if !self.sub_graphs[b].retired => b,
                    _ => continue,
                };
                let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
                if ra != rb {
                    parent[ra.max(rb)] = ra.min(rb);
                }
            }
        }

        let mut components: HashMap<usize, usize> = HashMap::default();
        let mut disconnected: Vec<DisconnectedSubGraph> = Vec::default();
        for (i, sg) in self.sub_graphs.iter().enumerate() {
            if sg.retired {
                continue;
            }
            let root = find(&mut parent, i);
            let idx = *components.entry(root).or_insert_with(|| {
                disconnected.push(DisconnectedSubGraph::default());
                disconnected.len() - 1
            });
            disconnected[idx].sub_graphs.push(sg.id);
        }
        self.disconnected = disconnected;
    }
}
