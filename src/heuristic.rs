use crate::common::{Agent, Coordinate, Edge, INF};
use crate::graph::Graph;

use clap::ValueEnum;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tracing::debug;

/// Uninformed cost-to-go used when no informed heuristic is available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceMetric {
    #[default]
    Manhattan,
    Chebyshev,
}

impl DistanceMetric {
    pub fn distance(&self, from: Coordinate, to: Coordinate) -> f64 {
        let dr = (from.row - to.row).abs();
        let dc = (from.column - to.column).abs();
        match self {
            DistanceMetric::Manhattan => (dr + dc) as f64,
            DistanceMetric::Chebyshev => dr.max(dc) as f64,
        }
    }
}

/// Exact shortest distances to a fixed set of targets: every agent goal and
/// the source of every edge assumed blocked.
#[derive(Debug, Clone, Default)]
pub struct InformedHeuristic {
    distances: HashMap<Coordinate, HashMap<Coordinate, f64>>,
}

impl InformedHeuristic {
    /// `graph` should be the optimistic graph where every uncertain edge is
    /// traversable, so that distances stay admissible after any observation.
    pub fn new<'a>(
        graph: &Graph,
        agents: &[Agent],
        maybe_blocked: impl IntoIterator<Item = &'a Edge>,
    ) -> Self {
        let mut heuristic = InformedHeuristic::default();
        let targets = agents
            .iter()
            .filter(|agent| !agent.is_placeholder())
            .map(|agent| agent.goal)
            .chain(maybe_blocked.into_iter().map(|edge| edge.source));
        for target in targets {
            if !heuristic.distances.contains_key(&target) {
                let table = dijkstra(graph, target);
                heuristic.distances.insert(target, table);
            }
        }
        debug!("informed heuristic over {} targets", heuristic.distances.len());
        heuristic
    }

    /// Distance from `from` to `target`; `INF` when unreachable or when
    /// `target` is not one of the precomputed targets.
    pub fn distance(&self, from: Coordinate, target: Coordinate) -> f64 {
        self.distances
            .get(&target)
            .and_then(|table| table.get(&from))
            .copied()
            .unwrap_or(INF)
    }
}

fn dijkstra(graph: &Graph, source: Coordinate) -> HashMap<Coordinate, f64> {
    let mut distances = HashMap::from([(source, 0.0)]);
    let mut heap = BinaryHeap::new();
    heap.push((Reverse(OrderedFloat(0.0)), source));

    while let Some((Reverse(OrderedFloat(cost)), current)) = heap.pop() {
        if cost > distances.get(&current).copied().unwrap_or(INF) {
            continue;
        }
        for next in graph.successors_of(current) {
            let next_cost = cost + graph.weight_of(&Edge::new(current, next));
            if next_cost < distances.get(&next).copied().unwrap_or(INF) {
                distances.insert(next, next_cost);
                heap.push((Reverse(OrderedFloat(next_cost)), next));
            }
        }
    }

    distances
}
