mod cbs;
mod pp;

pub use cbs::CBS;
pub use pp::PP;

use crate::algorithm::{LowLevelPlanner, SearchContext};
use crate::common::{Agent, Paths};
use crate::graph::Graph;
use crate::stat::Expansions;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub found: bool,
    /// One slot per agent; every slot is empty when nothing was found.
    pub paths: Paths,
    pub expansions: Expansions,
    pub runtime: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplanOutcome {
    pub success: bool,
    pub expansions: Expansions,
}

/// Multi-agent planner. `agents` is capacity-sized: slot `i` holds agent `i`
/// or a placeholder, and returned paths use the same slots. The deadline in
/// `ctx` bounds every call.
pub trait Solver {
    /// Plan every non-placeholder agent from scratch.
    fn solve(&mut self, graph: &Graph, agents: &[Agent], ctx: &SearchContext) -> PlanOutcome;

    /// Repair `ongoing` in place after the agents in `affected` lost their
    /// plans' validity. Paths start at `current_timestep`.
    fn replan(
        &mut self,
        graph: &Graph,
        agents: &[Agent],
        ongoing: &mut Paths,
        affected: &BTreeSet<usize>,
        ctx: &SearchContext,
        current_timestep: usize,
    ) -> ReplanOutcome;

    fn name(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum HighLevelKind {
    #[default]
    Cbs,
    Pp,
}

pub fn create_solver(
    kind: HighLevelKind,
    low_level: Box<dyn LowLevelPlanner>,
    seed: u64,
) -> Box<dyn Solver> {
    match kind {
        HighLevelKind::Cbs => Box::new(CBS::new(low_level)),
        HighLevelKind::Pp => Box::new(PP::new(low_level, seed)),
    }
}
