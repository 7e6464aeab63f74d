use crate::common::Edge;
use crate::graph::{Graph, Snapshot};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

pub const CERTAIN_EDGE_PENALTY: f64 = 0.0;
pub const MAYBE_EDGE_PENALTY: f64 = 10.0;

pub type EdgeSet = BTreeSet<Edge>;

/// Shapes the focal ordering of the bounded-suboptimal planners through a
/// per-edge penalty. The execution loop keeps it informed about observations.
pub trait Policy {
    fn init(&mut self, snapshot: &Snapshot);
    /// `blocked`: assumed-open edges observed blocked. `opened`: assumed-blocked
    /// edges observed open.
    fn update(&mut self, blocked: &EdgeSet, opened: &EdgeSet);
    fn penalty(&self, edge: &Edge, graph: &Graph) -> f64;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    #[default]
    Baseline,
    RiskAverse,
    Explorative,
    Hybrid,
}

pub fn create_policy(kind: PolicyKind) -> Box<dyn Policy> {
    match kind {
        PolicyKind::Baseline => Box::new(Baseline),
        PolicyKind::RiskAverse => Box::new(RiskAverse::default()),
        PolicyKind::Explorative => Box::new(Explorative::default()),
        PolicyKind::Hybrid => Box::new(Hybrid::default()),
    }
}

/// No preference between edges.
#[derive(Debug, Default)]
pub struct Baseline;

impl Policy for Baseline {
    fn init(&mut self, _snapshot: &Snapshot) {}

    fn update(&mut self, _blocked: &EdgeSet, _opened: &EdgeSet) {}

    fn penalty(&self, _edge: &Edge, _graph: &Graph) -> f64 {
        CERTAIN_EDGE_PENALTY
    }

    fn name(&self) -> &'static str {
        "Baseline"
    }
}

/// Avoids edges that might turn out blocked.
#[derive(Debug, Default)]
pub struct RiskAverse {
    unobserved_maybe_open: HashSet<Edge>,
}

impl Policy for RiskAverse {
    fn init(&mut self, snapshot: &Snapshot) {
        self.unobserved_maybe_open = snapshot.maybe_open_edges().clone();
    }

    fn update(&mut self, blocked: &EdgeSet, _opened: &EdgeSet) {
        for edge in blocked {
            self.unobserved_maybe_open.remove(edge);
        }
    }

    fn penalty(&self, edge: &Edge, _graph: &Graph) -> f64 {
        if self.unobserved_maybe_open.contains(edge) {
            MAYBE_EDGE_PENALTY
        } else {
            CERTAIN_EDGE_PENALTY
        }
    }

    fn name(&self) -> &'static str {
        "RiskAverse"
    }
}

/// Prefers moves that bring an agent next to an edge that might turn out open.
#[derive(Debug, Default)]
pub struct Explorative {
    unobserved_maybe_blocked: HashSet<Edge>,
}

impl Policy for Explorative {
    fn init(&mut self, snapshot: &Snapshot) {
        self.unobserved_maybe_blocked = snapshot.maybe_blocked_edges().clone();
    }

    fn update(&mut self, _blocked: &EdgeSet, opened: &EdgeSet) {
        for edge in opened {
            self.unobserved_maybe_blocked.remove(edge);
        }
    }

    fn penalty(&self, edge: &Edge, graph: &Graph) -> f64 {
        let observes_something = graph.successors_of(edge.destination).any(|next| {
            self.unobserved_maybe_blocked
                .contains(&Edge::new(edge.destination, next))
        });
        if observes_something {
            -MAYBE_EDGE_PENALTY
        } else {
            CERTAIN_EDGE_PENALTY
        }
    }

    fn name(&self) -> &'static str {
        "Explorative"
    }
}

/// Risk-averse where it matters, explorative everywhere else.
#[derive(Debug, Default)]
pub struct Hybrid {
    risk_averse: RiskAverse,
    explorative: Explorative,
}

impl Policy for Hybrid {
    fn init(&mut self, snapshot: &Snapshot) {
        self.risk_averse.init(snapshot);
        self.explorative.init(snapshot);
    }

    fn update(&mut self, blocked: &EdgeSet, opened: &EdgeSet) {
        self.risk_averse.update(blocked, opened);
        self.explorative.update(blocked, opened);
    }

    fn penalty(&self, edge: &Edge, graph: &Graph) -> f64 {
        let risk = self.risk_averse.penalty(edge, graph);
        if risk != CERTAIN_EDGE_PENALTY {
            return risk;
        }
        self.explorative.penalty(edge, graph)
    }

    fn name(&self) -> &'static str {
        "Hybrid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::grid_snapshot;

    #[test]
    fn test_risk_averse_penalizes_until_observed() {
        let risky = Edge::new((0, 0), (0, 1));
        let snapshot = grid_snapshot(&["..", ".."], &[risky], &[]);
        let graph = snapshot.create();
        let mut policy = create_policy(PolicyKind::RiskAverse);
        policy.init(&snapshot);
        assert_eq!(policy.penalty(&risky, &graph), MAYBE_EDGE_PENALTY);
        assert_eq!(
            policy.penalty(&Edge::new((0, 0), (1, 0)), &graph),
            CERTAIN_EDGE_PENALTY
        );

        policy.update(&EdgeSet::from([risky]), &EdgeSet::new());
        assert_eq!(policy.penalty(&risky, &graph), CERTAIN_EDGE_PENALTY);
    }

    #[test]
    fn test_explorative_rewards_moving_next_to_unknown() {
        let unknown = Edge::new((1, 1), (1, 0));
        let snapshot = grid_snapshot(&["..", ".."], &[], &[unknown]);
        let graph = snapshot.create();
        let mut policy = create_policy(PolicyKind::Explorative);
        policy.init(&snapshot);
        assert_eq!(
            policy.penalty(&Edge::new((0, 1), (1, 1)), &graph),
            -MAYBE_EDGE_PENALTY
        );
        assert_eq!(
            policy.penalty(&Edge::new((1, 1), (0, 1)), &graph),
            CERTAIN_EDGE_PENALTY
        );
    }

    #[test]
    fn test_hybrid_prefers_risk_signal() {
        let risky = Edge::new((0, 0), (0, 1));
        let unknown = Edge::new((0, 1), (1, 1));
        let snapshot = grid_snapshot(&["..", ".."], &[risky], &[unknown]);
        let graph = snapshot.create();
        let mut policy = create_policy(PolicyKind::Hybrid);
        policy.init(&snapshot);
        assert_eq!(policy.penalty(&risky, &graph), MAYBE_EDGE_PENALTY);
        assert_eq!(policy.name(), "Hybrid");
    }
}
