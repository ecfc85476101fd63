//! Road network graph and minimum-time routing over it.

use crate::error::{FleetError, FleetResult};
use crate::spatial::haversine_distance;
use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadNode {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadEdge {
    pub from: String,
    pub to: String,
    pub distance_m: f64,
    pub speed_limit_mps: f64,
    #[serde(default)]
    pub one_way: bool,
}

impl RoadEdge {
    /// Traversal time in seconds.
    pub fn travel_time_s(&self) -> f64 {
        self.distance_m / self.speed_limit_mps
    }
}

/// Road network as delivered by the map data provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoadNetwork {
    pub nodes: Vec<RoadNode>,
    pub edges: Vec<RoadEdge>,
}

/// Minimum-time route between two snapped road nodes.
#[derive(Debug, Clone)]
pub struct RoadPath {
    pub nodes: Vec<RoadNode>,
    pub travel_time_s: f64,
    pub distance_m: f64,
}

#[derive(Debug)]
pub struct RoadGraph {
    graph: DiGraph<RoadNode, RoadEdge>,
    index: HashMap<String, NodeIndex>,
    network: RoadNetwork,
}

impl RoadGraph {
    pub fn build(network: RoadNetwork) -> FleetResult<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node in &network.nodes {
            if index.contains_key(&node.id) {
                return Err(FleetError::DuplicateId(node.id.clone()));
            }
            let idx = graph.add_node(node.clone());
            index.insert(node.id.clone(), idx);
        }

        for edge in &network.edges {
            let (Some(&from), Some(&to)) = (index.get(&edge.from), index.get(&edge.to)) else {
                return Err(FleetError::Invalid(format!(
                    "road edge {} -> {} references an unknown node",
                    edge.from, edge.to
                )));
            };
            if edge.speed_limit_mps <= 0.0 || edge.distance_m < 0.0 {
                return Err(FleetError::Invalid(format!(
                    "road edge {} -> {} needs a positive speed limit and non-negative length",
                    edge.from, edge.to
                )));
            }
            graph.add_edge(from, to, edge.clone());
            if !edge.one_way {
                graph.add_edge(to, from, edge.clone());
            }
        }

        Ok(Self { graph, index, network })
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node(&self, id: &str) -> Option<&RoadNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    fn nearest_node(&self, lat: f64, lon: f64) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .min_by(|&a, &b| {
                let da = haversine_distance(lat, lon, self.graph[a].lat, self.graph[a].lon);
                let db = haversine_distance(lat, lon, self.graph[b].lat, self.graph[b].lon);
                da.total_cmp(&db)
            })
    }

    /// Dijkstra over traversal time between the nodes nearest `start` and `end`.
    ///
    /// `blocked` marks impassable nodes (restricted areas active at `at`).
    pub fn shortest_path<F>(
        &self,
        start: (f64, f64),
        end: (f64, f64),
        at: DateTime<Utc>,
        blocked: F,
    ) -> FleetResult<RoadPath>
    where
        F: Fn(f64, f64, DateTime<Utc>) -> bool,
    {
        let (Some(source), Some(target)) = (
            self.nearest_node(start.0, start.1),
            self.nearest_node(end.0, end.1),
        ) else {
            return Err(FleetError::NoPath("road network is empty".to_string()));
        };

        let passable = |idx: NodeIndex| {
            let node = &self.graph[idx];
            !blocked(node.lat, node.lon, at)
        };

        // A zero estimate turns A* into plain Dijkstra.
        let found = petgraph::algo::astar(
            &self.graph,
            source,
            |idx| idx == target,
            |edge| {
                if passable(edge.target()) {
                    edge.weight().travel_time_s()
                } else {
                    f64::INFINITY
                }
            },
            |_| 0.0,
        );

        let Some((travel_time_s, path)) = found else {
            return Err(FleetError::NoPath(format!(
                "road nodes {} and {} are not connected",
                self.graph[source].id, self.graph[target].id
            )));
        };
        if !travel_time_s.is_finite() || !passable(source) {
            return Err(FleetError::NoPath(format!(
                "every road route to {} crosses a restricted area",
                self.graph[target].id
            )));
        }

        // Parallel roads: the search took the fastest edge of each hop.
        let distance_m = path
            .windows(2)
            .filter_map(|pair| {
                self.graph
                    .edges_connecting(pair[0], pair[1])
                    .map(|edge| edge.weight())
                    .min_by(|a, b| a.travel_time_s().total_cmp(&b.travel_time_s()))
            })
            .map(|edge| edge.distance_m)
            .sum();

        Ok(RoadPath {
            nodes: path.into_iter().map(|idx| self.graph[idx].clone()).collect(),
            travel_time_s,
            distance_m,
        })
    }
}
