use crate::common::{Agent, Coordinate, Edge, Path, INF};
use crate::graph::Graph;
use crate::heuristic::DistanceMetric;

use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, instrument, trace};

type OpenEntry = (
    OrderedFloat<f64>,
    Reverse<OrderedFloat<f64>>,
    OrderedFloat<f64>,
    Coordinate,
);

fn construct_path(trace: &HashMap<Coordinate, Coordinate>, mut current: Coordinate) -> Path {
    let mut path = vec![current];
    while let Some(&previous) = trace.get(&current) {
        path.push(previous);
        current = previous;
    }
    path.reverse();
    path
}

/// Time-agnostic A* on the live graph, ignoring every other agent.
#[instrument(skip_all, name = "a_star", fields(agent = agent.id, start = %agent.start, goal = %agent.goal), level = "debug")]
pub fn a_star_search(graph: &Graph, agent: &Agent, metric: DistanceMetric) -> (Option<Path>, u64) {
    let mut open_list = BTreeSet::new();
    let mut closed_list = HashSet::new();
    let mut trace = HashMap::new();
    let mut g_costs = HashMap::from([(agent.start, 0.0)]);
    let mut expansions = 0;

    let start_h = metric.distance(agent.start, agent.goal);
    open_list.insert((
        OrderedFloat(start_h),
        Reverse(OrderedFloat(0.0)),
        OrderedFloat(start_h),
        agent.start,
    ));

    while let Some((_, Reverse(OrderedFloat(g)), _, current)) = open_list.pop_first() {
        if !closed_list.insert(current) {
            continue;
        }
        if current == agent.goal {
            debug!("found path with cost {g} after {expansions} expansions");
            return (Some(construct_path(&trace, current)), expansions);
        }

        expansions += 1;
        trace!("expand node: {current}");
        for neighbor in graph.successors_of(current) {
            if closed_list.contains(&neighbor) {
                continue;
            }
            let tentative_g = g + graph.weight_of(&Edge::new(current, neighbor));
            if tentative_g >= g_costs.get(&neighbor).copied().unwrap_or(INF) {
                continue;
            }
            g_costs.insert(neighbor, tentative_g);
            trace.insert(neighbor, current);
            let h = metric.distance(neighbor, agent.goal);
            let entry: OpenEntry = (
                OrderedFloat(tentative_g + h),
                Reverse(OrderedFloat(tentative_g)),
                OrderedFloat(h),
                neighbor,
            );
            open_list.insert(entry);
        }
    }

    debug!("cannot find solution");
    (None, expansions)
}
