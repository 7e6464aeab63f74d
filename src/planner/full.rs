use super::{search_context, Execution, OnlinePlanner, RunReport};
use crate::common::{sum_of_cost, Agent, Deadline};
use crate::graph::Snapshot;
use crate::heuristic::{DistanceMetric, InformedHeuristic};
use crate::policy::Policy;
use crate::solver::Solver;

use std::time::Duration;
use tracing::{info, instrument, warn};

/// Replans with the high-level solver whenever something is observed. With
/// independence detection only the affected agents are repaired, and nothing
/// is replanned when no agent is affected. Without it every observation
/// triggers a plan from scratch.
pub struct FullPlanner {
    solver: Box<dyn Solver>,
    policy: Box<dyn Policy>,
    metric: DistanceMetric,
    independence_detection: bool,
}

impl FullPlanner {
    pub fn new(
        solver: Box<dyn Solver>,
        policy: Box<dyn Policy>,
        metric: DistanceMetric,
        independence_detection: bool,
    ) -> Self {
        FullPlanner {
            solver,
            policy,
            metric,
            independence_detection,
        }
    }
}

impl OnlinePlanner for FullPlanner {
    #[instrument(skip_all, name = "full", fields(planner = %self.name(), agents = agents.len()))]
    fn run(
        &mut self,
        snapshot: &Snapshot,
        agents: &[Agent],
        heuristic: Option<&InformedHeuristic>,
        timeout: Duration,
    ) -> RunReport {
        let deadline = Deadline::start(timeout);
        let mut execution = Execution::new(snapshot, agents);
        self.policy.init(snapshot);

        let ctx = search_context(self.policy.as_ref(), heuristic, self.metric, &deadline);
        let initial = self.solver.solve(&execution.graph, &execution.agents, &ctx);
        info!(
            "initial plan found: {}, sum of cost: {}",
            initial.found,
            sum_of_cost(&initial.paths)
        );
        execution.stats.record_expansions(initial.expansions);
        execution.planned = initial.paths;
        let mut success = initial.found;

        while success && !deadline.exceeded() && !execution.finished() {
            if let Some(affected) = execution.observe(self.policy.as_mut(), heuristic, self.metric)
            {
                let ctx = search_context(self.policy.as_ref(), heuristic, self.metric, &deadline);
                if !self.independence_detection {
                    let outcome = self.solver.solve(&execution.graph, &execution.agents, &ctx);
                    execution.stats.record_expansions(outcome.expansions);
                    execution.stats.replans += 1;
                    execution.planned = outcome.paths;
                    success = outcome.found;
                } else if !affected.is_empty() {
                    let outcome = self.solver.replan(
                        &execution.graph,
                        &execution.agents,
                        &mut execution.planned,
                        &affected,
                        &ctx,
                        execution.timestep,
                    );
                    execution.stats.record_expansions(outcome.expansions);
                    execution.stats.replans += 1;
                    success = outcome.success;
                }
            }

            if success {
                execution.step();
            }
            execution.timestep += 1;
        }

        if deadline.exceeded() {
            warn!("deadline exceeded at t = {}", execution.timestep);
        }
        let success = success && !deadline.exceeded();
        execution.finish(self.name(), success, &deadline)
    }

    fn name(&self) -> String {
        let framework = if self.independence_detection {
            "Full+ID"
        } else {
            "Full"
        };
        format!(
            "{framework}+{}+{}",
            self.solver.name(),
            self.policy.name()
        )
    }
}
