//! Fixtures shared by the unit tests.
use crate::common::{Agent, Edge};
use crate::graph::Snapshot;
use crate::map::Map;

/// 4-connected snapshot of `rows` (`.` free, anything else an obstacle). Each
/// listed edge is moved, in both directions, into the corresponding uncertain
/// category.
pub(crate) fn grid_snapshot(rows: &[&str], maybe_open: &[Edge], maybe_blocked: &[Edge]) -> Snapshot {
    let base = Map::from_rows(rows, false).snapshot();
    let mut open = base.open_edges().clone();
    let both = |edges: &[Edge]| -> Vec<Edge> {
        edges
            .iter()
            .flat_map(|edge| [*edge, edge.reversed()])
            .collect()
    };
    let maybe_open = both(maybe_open);
    let maybe_blocked = both(maybe_blocked);
    for edge in maybe_open.iter().chain(&maybe_blocked) {
        open.remove(edge);
    }
    Snapshot::new(
        base.vertices().clone(),
        open,
        maybe_open.into_iter().collect(),
        maybe_blocked.into_iter().collect(),
    )
}

/// The 3x3 crossing: A goes corner to corner, B the other diagonal.
pub(crate) fn crossing_agents() -> Vec<Agent> {
    vec![
        Agent::new(0, (0, 0), (2, 2)),
        Agent::new(1, (2, 0), (0, 2)),
    ]
}
