use crate::common::{Coordinate, Edge, EDGE_UNIT_COST, INF};

use std::collections::{BTreeSet, HashMap, HashSet};

/// Directed graph over grid coordinates. Successors are kept ordered so that
/// every search expands them deterministically.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    adjacency: HashMap<Coordinate, BTreeSet<Coordinate>>,
    weights: HashMap<Edge, f64>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn add_vertex(&mut self, coordinate: Coordinate) {
        self.adjacency.entry(coordinate).or_default();
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Coordinate> {
        self.adjacency.keys()
    }

    /// Insert `edge` with unit weight, replacing any earlier weight.
    pub fn add_edge(&mut self, edge: Edge) {
        self.add_weighted_edge(edge, EDGE_UNIT_COST);
    }

    pub fn add_weighted_edge(&mut self, edge: Edge, weight: f64) {
        self.add_vertex(edge.destination);
        self.adjacency
            .entry(edge.source)
            .or_default()
            .insert(edge.destination);
        if weight == EDGE_UNIT_COST {
            self.weights.remove(&edge);
        } else {
            self.weights.insert(edge, weight);
        }
    }

    pub fn remove_edge(&mut self, edge: &Edge) {
        if let Some(successors) = self.adjacency.get_mut(&edge.source) {
            successors.remove(&edge.destination);
        }
        self.weights.remove(edge);
    }

    pub fn contains_edge(&self, edge: &Edge) -> bool {
        self.adjacency
            .get(&edge.source)
            .is_some_and(|successors| successors.contains(&edge.destination))
    }

    pub fn successors_of(&self, coordinate: Coordinate) -> impl Iterator<Item = Coordinate> + '_ {
        self.adjacency
            .get(&coordinate)
            .into_iter()
            .flat_map(|successors| successors.iter().copied())
    }

    /// `INF` for an absent edge.
    pub fn weight_of(&self, edge: &Edge) -> f64 {
        if !self.contains_edge(edge) {
            return INF;
        }
        self.weights.get(edge).copied().unwrap_or(EDGE_UNIT_COST)
    }
}

/// The agents' belief about the world at the start of a run.
///
/// `open` edges are known traversable. `maybe_open` edges are assumed
/// traversable but turn out blocked once observed. `maybe_blocked` edges are
/// assumed blocked but turn out traversable once observed.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    vertices: BTreeSet<Coordinate>,
    open: HashSet<Edge>,
    maybe_open: HashSet<Edge>,
    maybe_blocked: HashSet<Edge>,
}

impl Snapshot {
    pub fn new(
        vertices: BTreeSet<Coordinate>,
        open: HashSet<Edge>,
        maybe_open: HashSet<Edge>,
        maybe_blocked: HashSet<Edge>,
    ) -> Self {
        Snapshot {
            vertices,
            open,
            maybe_open,
            maybe_blocked,
        }
    }

    /// The graph agents plan on: assumed-open edges at unit cost, assumed
    /// blocked edges present at infinite cost so they can still be observed.
    pub fn create(&self) -> Graph {
        let mut graph = self.create_with(true, false);
        for &edge in &self.maybe_blocked {
            graph.add_weighted_edge(edge, INF);
        }
        graph
    }

    /// Unit-cost graph of open edges plus the chosen uncertain categories.
    pub fn create_with(&self, include_maybe_open: bool, include_maybe_blocked: bool) -> Graph {
        let mut graph = Graph::new();
        for &vertex in &self.vertices {
            graph.add_vertex(vertex);
        }
        let mut edges: Vec<&Edge> = self.open.iter().collect();
        if include_maybe_open {
            edges.extend(&self.maybe_open);
        }
        if include_maybe_blocked {
            edges.extend(&self.maybe_blocked);
        }
        for &edge in edges {
            graph.add_edge(edge);
        }
        graph
    }

    /// The graph as it really is: open edges and edges assumed blocked.
    pub fn create_truth(&self) -> Graph {
        let mut graph = self.create_with(false, true);
        for edge in &self.maybe_open {
            graph.remove_edge(edge);
        }
        graph
    }

    pub fn vertices(&self) -> &BTreeSet<Coordinate> {
        &self.vertices
    }

    pub fn open_edges(&self) -> &HashSet<Edge> {
        &self.open
    }

    pub fn maybe_open_edges(&self) -> &HashSet<Edge> {
        &self.maybe_open
    }

    pub fn maybe_blocked_edges(&self) -> &HashSet<Edge> {
        &self.maybe_blocked
    }

    pub fn is_open_edge(&self, edge: &Edge) -> bool {
        self.open.contains(edge)
    }

    pub fn is_maybe_open_edge(&self, edge: &Edge) -> bool {
        self.maybe_open.contains(edge)
    }

    pub fn is_maybe_blocked_edge(&self, edge: &Edge) -> bool {
        self.maybe_blocked.contains(edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        let a = Coordinate::new(0, 0);
        let b = Coordinate::new(0, 1);
        let c = Coordinate::new(1, 0);
        let d = Coordinate::new(1, 1);
        Snapshot::new(
            [a, b, c, d].into_iter().collect(),
            [Edge::new(a, b), Edge::new(b, a)].into_iter().collect(),
            [Edge::new(a, c), Edge::new(c, a)].into_iter().collect(),
            [Edge::new(b, d), Edge::new(d, b)].into_iter().collect(),
        )
    }

    #[test]
    fn test_create_weights() {
        let graph = snapshot().create();
        assert_eq!(graph.weight_of(&Edge::new((0, 0), (0, 1))), 1.0);
        assert_eq!(graph.weight_of(&Edge::new((0, 0), (1, 0))), 1.0);
        assert_eq!(graph.weight_of(&Edge::new((0, 1), (1, 1))), INF);
        assert!(graph.contains_edge(&Edge::new((0, 1), (1, 1))));
        assert_eq!(graph.weight_of(&Edge::new((1, 0), (1, 1))), INF);
        assert!(!graph.contains_edge(&Edge::new((1, 0), (1, 1))));
    }

    #[test]
    fn test_create_with_and_truth() {
        let s = snapshot();
        let optimistic = s.create_with(true, true);
        assert_eq!(optimistic.weight_of(&Edge::new((0, 1), (1, 1))), 1.0);

        let truth = s.create_truth();
        assert!(!truth.contains_edge(&Edge::new((0, 0), (1, 0))));
        assert!(truth.contains_edge(&Edge::new((1, 1), (0, 1))));
    }

    #[test]
    fn test_add_and_remove_edge() {
        let mut graph = snapshot().create();
        let blocked = Edge::new((0, 1), (1, 1));
        graph.add_edge(blocked);
        assert_eq!(graph.weight_of(&blocked), 1.0);
        graph.remove_edge(&blocked);
        assert!(!graph.contains_edge(&blocked));
        let successors: Vec<_> = graph.successors_of(Coordinate::new(0, 1)).collect();
        assert_eq!(successors, vec![Coordinate::new(0, 0)]);
    }
}
