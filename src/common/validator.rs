//! Conflict detection and plan legality checks over a set of agent paths.
use super::{makespan, Agent, Conflict, Coordinate, Edge, Path};
use crate::graph::Snapshot;

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Where the agent is at `t`; agents stay at their last coordinate forever.
pub fn coordinate_at(path: &Path, t: usize) -> Option<Coordinate> {
    path.get(t).or_else(|| path.last()).copied()
}

/// The move made between `t` and `t + 1`, if the path still moves then.
pub fn edge_at(path: &Path, t: usize) -> Option<Edge> {
    if t + 1 < path.len() {
        Some(Edge::new(path[t], path[t + 1]))
    } else {
        None
    }
}

/// Every vertex and edge conflict between non-empty paths, ordered by time.
pub fn find_conflicts(paths: &[Path]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    let makespan = makespan(paths);

    for t in 0..=makespan {
        let mut occupants: BTreeMap<Coordinate, Vec<usize>> = BTreeMap::new();
        let mut traversals: HashMap<Edge, usize> = HashMap::new();
        for (agent, path) in paths.iter().enumerate() {
            if let Some(coordinate) = coordinate_at(path, t) {
                occupants.entry(coordinate).or_default().push(agent);
            }
            if let Some(edge) = edge_at(path, t).filter(|edge| !edge.is_self_loop()) {
                traversals.insert(edge, agent);
            }
        }

        for (coordinate, agents) in occupants {
            if agents.len() > 1 {
                conflicts.push(Conflict::Vertex {
                    agents,
                    coordinate,
                    timestep: t,
                });
            }
        }

        let mut reported: HashSet<(usize, usize)> = HashSet::new();
        for (agent, path) in paths.iter().enumerate() {
            let Some(edge) = edge_at(path, t).filter(|edge| !edge.is_self_loop()) else {
                continue;
            };
            for crossing in edge.crossing_edges() {
                let Some(&other) = traversals.get(&crossing) else {
                    continue;
                };
                if other == agent || !reported.insert((agent.min(other), agent.max(other))) {
                    continue;
                }
                conflicts.push(Conflict::Edge {
                    agents: [agent, other],
                    edges: [edge, crossing],
                    timestep: t + 1,
                });
            }
        }
    }

    debug!("found {} conflicts", conflicts.len());
    conflicts
}

pub fn exists_conflict(paths: &[Path]) -> bool {
    !find_conflicts(paths).is_empty()
}

pub fn all_agents_reached_goals(agents: &[Agent], paths: &[Path]) -> bool {
    agents
        .iter()
        .zip(paths)
        .all(|(agent, path)| path.last() == Some(&agent.goal))
}

/// Every move (waits aside) uses an edge that is truly open.
pub fn only_valid_transitions(snapshot: &Snapshot, paths: &[Path]) -> bool {
    paths.iter().all(|path| {
        path.windows(2).all(|step| {
            let edge = Edge::new(step[0], step[1]);
            edge.is_self_loop()
                || snapshot.is_open_edge(&edge)
                || snapshot.is_maybe_blocked_edge(&edge)
        })
    })
}

pub fn is_legal_plan(snapshot: &Snapshot, agents: &[Agent], paths: &[Path]) -> bool {
    if !all_agents_reached_goals(agents, paths) {
        warn!("not every agent reached its goal");
        return false;
    }
    if !only_valid_transitions(snapshot, paths) {
        warn!("plan traverses an edge that does not exist");
        return false;
    }
    let conflicts = find_conflicts(paths);
    if let Some(first) = conflicts.first() {
        warn!("plan has {} conflicts, first {first:?}", conflicts.len());
        return false;
    }
    true
}
