mod conflict;
mod deadline;
mod disjoint;
mod interval;
pub mod validator;

pub(crate) use conflict::fingerprint;
pub use conflict::{Conflict, Constraint, ConstraintSet};
pub use deadline::Deadline;
pub use disjoint::DisjointSets;
pub use interval::{SafeIntervals, State, TimeInterval, INF};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cost of traversing an edge whose weight was never set explicitly.
pub const EDGE_UNIT_COST: f64 = 1.0;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Coordinate {
    pub row: i32,
    pub column: i32,
}

impl Coordinate {
    pub const fn new(row: i32, column: i32) -> Self {
        Coordinate { row, column }
    }

    /// Unused agent slots carry this coordinate.
    pub const PLACEHOLDER: Coordinate = Coordinate::new(i32::MIN, i32::MIN);
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}

impl From<(i32, i32)> for Coordinate {
    fn from((row, column): (i32, i32)) -> Self {
        Coordinate::new(row, column)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Edge {
    pub source: Coordinate,
    pub destination: Coordinate,
}

impl Edge {
    pub fn new(source: impl Into<Coordinate>, destination: impl Into<Coordinate>) -> Self {
        Edge {
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.destination
    }

    pub fn reversed(&self) -> Edge {
        Edge {
            source: self.destination,
            destination: self.source,
        }
    }

    /// Edges that cannot be traversed in the same timestep as this one: the
    /// reverse traversal and, for a diagonal move, the opposite diagonal of the
    /// same unit square in either direction.
    pub fn crossing_edges(&self) -> Vec<Edge> {
        let mut crossings = vec![self.reversed()];
        let dr = self.destination.row - self.source.row;
        let dc = self.destination.column - self.source.column;
        if dr != 0 && dc != 0 {
            let a = Coordinate::new(self.source.row + dr, self.source.column);
            let b = Coordinate::new(self.source.row, self.source.column + dc);
            crossings.push(Edge::new(a, b));
            crossings.push(Edge::new(b, a));
        }
        crossings
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Agent {
    pub id: usize,
    pub start: Coordinate,
    pub goal: Coordinate,
}

impl Agent {
    pub fn new(id: usize, start: impl Into<Coordinate>, goal: impl Into<Coordinate>) -> Self {
        Agent {
            id,
            start: start.into(),
            goal: goal.into(),
        }
    }

    pub fn placeholder(id: usize) -> Self {
        Agent {
            id,
            start: Coordinate::PLACEHOLDER,
            goal: Coordinate::PLACEHOLDER,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.start == Coordinate::PLACEHOLDER && self.goal == Coordinate::PLACEHOLDER
    }
}

/// Position of an agent at every timestep, starting at its current position.
pub type Path = Vec<Coordinate>;
/// One path per agent slot; unused slots hold an empty path.
pub type Paths = Vec<Path>;

pub fn path_length(path: &Path) -> usize {
    path.len().saturating_sub(1)
}

pub fn sum_of_cost(paths: &[Path]) -> usize {
    paths.iter().map(path_length).sum()
}

pub fn makespan(paths: &[Path]) -> usize {
    paths.iter().map(path_length).max().unwrap_or(0)
}

/// Build a capacity-sized agent array holding only `group`; every other slot
/// is a placeholder.
pub fn extract_group_agents<'a>(
    group: impl IntoIterator<Item = &'a usize>,
    agents: &[Agent],
) -> Vec<Agent> {
    let mut extracted: Vec<Agent> = (0..agents.len()).map(Agent::placeholder).collect();
    for &i in group {
        extracted[i] = agents[i];
    }
    extracted
}
