use super::{Coordinate, Edge};

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

/// Forbids `constrained_agent` from occupying `coordinate` at `timestep`.
///
/// `conflicted_agent` records who the constraint protects; it takes no part in
/// equality, ordering or hashing.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Constraint {
    pub constrained_agent: usize,
    pub conflicted_agent: usize,
    pub coordinate: Coordinate,
    pub timestep: usize,
}

impl Constraint {
    pub fn new(
        constrained_agent: usize,
        conflicted_agent: usize,
        coordinate: Coordinate,
        timestep: usize,
    ) -> Self {
        Constraint {
            constrained_agent,
            conflicted_agent,
            coordinate,
            timestep,
        }
    }

    pub fn involves(&self, agent: usize) -> bool {
        self.constrained_agent == agent || self.conflicted_agent == agent
    }

    fn key(&self) -> (usize, usize, Coordinate) {
        (self.timestep, self.constrained_agent, self.coordinate)
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Constraint {}

impl Ord for Constraint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for Constraint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Constraint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

pub type ConstraintSet = BTreeSet<Constraint>;

/// Order-independent fingerprint of a constraint set.
pub(crate) fn fingerprint(constraints: &ConstraintSet) -> u64 {
    constraints.iter().fold(0, |acc, constraint| {
        let mut hasher = DefaultHasher::new();
        constraint.hash(&mut hasher);
        acc ^ hasher.finish()
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Conflict {
    /// Two or more agents occupy `coordinate` at `timestep`.
    Vertex {
        agents: Vec<usize>,
        coordinate: Coordinate,
        timestep: usize,
    },
    /// Two agents traverse crossing edges, arriving at `timestep`.
    Edge {
        agents: [usize; 2],
        edges: [Edge; 2],
        timestep: usize,
    },
}

impl Conflict {
    pub fn agents(&self) -> &[usize] {
        match self {
            Conflict::Vertex { agents, .. } => agents,
            Conflict::Edge { agents, .. } => agents,
        }
    }

    pub fn timestep(&self) -> usize {
        match self {
            Conflict::Vertex { timestep, .. } | Conflict::Edge { timestep, .. } => *timestep,
        }
    }

    /// The two branching constraints; each forbids one of the first two agents.
    pub fn resolve(&self) -> Vec<Constraint> {
        match self {
            Conflict::Vertex {
                agents,
                coordinate,
                timestep,
            } => vec![
                Constraint::new(agents[0], agents[1], *coordinate, *timestep),
                Constraint::new(agents[1], agents[0], *coordinate, *timestep),
            ],
            Conflict::Edge {
                agents,
                edges,
                timestep,
            } => vec![
                Constraint::new(agents[0], agents[1], edges[0].destination, *timestep),
                Constraint::new(agents[1], agents[0], edges[1].destination, *timestep),
            ],
        }
    }
}
