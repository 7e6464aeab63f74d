use super::{search_context, Execution, OnlinePlanner, RunReport};
use crate::algorithm::a_star_search;
use crate::common::validator::find_conflicts;
use crate::common::{extract_group_agents, Agent, Deadline, DisjointSets, Paths};
use crate::graph::{Graph, Snapshot};
use crate::heuristic::{DistanceMetric, InformedHeuristic};
use crate::policy::Policy;
use crate::solver::Solver;

use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_RADIUS: usize = 5;

/// Every agent follows its own time-agnostic shortest path. Only collisions
/// within `radius` timesteps are resolved, by handing the colliding groups to
/// the high-level solver.
pub struct LocalPlanner {
    solver: Box<dyn Solver>,
    policy: Box<dyn Policy>,
    metric: DistanceMetric,
    radius: usize,
    independence_detection: bool,
}

impl LocalPlanner {
    pub fn new(
        solver: Box<dyn Solver>,
        policy: Box<dyn Policy>,
        metric: DistanceMetric,
        radius: usize,
        independence_detection: bool,
    ) -> Self {
        LocalPlanner {
            solver,
            policy,
            metric,
            radius,
            independence_detection,
        }
    }

    /// A* for each listed agent. False if any of them has no path.
    fn plan_individually(
        &self,
        graph: &Graph,
        agents: &[Agent],
        planned: &mut Paths,
        which: impl IntoIterator<Item = usize>,
    ) -> (bool, u64) {
        let mut success = true;
        let mut expansions = 0;
        for i in which {
            let (path, spent) = a_star_search(graph, &agents[i], self.metric);
            expansions += spent;
            match path {
                Some(path) => planned[i] = path,
                None => {
                    debug!("agent {i} has no path");
                    planned[i].clear();
                    success = false;
                }
            }
        }
        (success, expansions)
    }
}

fn groups_of(sets: &mut DisjointSets) -> Vec<Vec<usize>> {
    sets.sets()
        .into_iter()
        .filter(|group| group.len() > 1)
        .collect()
}

/// Groups of agents that collide within `radius` timesteps.
fn detect_collisions(planned: &Paths, radius: usize) -> Vec<Vec<usize>> {
    let mut sets = DisjointSets::new(planned.len());
    for conflict in find_conflicts(planned) {
        if conflict.timestep() <= radius {
            sets.union_all(conflict.agents());
        }
    }
    groups_of(&mut sets)
}

fn merge(previous: &[Vec<usize>], next: &[Vec<usize>], n: usize) -> Vec<Vec<usize>> {
    let mut sets = DisjointSets::new(n);
    for group in previous.iter().chain(next) {
        sets.union_all(group);
    }
    groups_of(&mut sets)
}

impl OnlinePlanner for LocalPlanner {
    #[instrument(skip_all, name = "local", fields(planner = %self.name(), agents = agents.len()))]
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

        let everyone: Vec<usize> = (0..agents.len()).collect();
        let (mut success, expansions) = self.plan_individually(
            &execution.graph,
            &execution.agents,
            &mut execution.planned,
            everyone.iter().copied(),
        );
        execution.stats.low_level_expand_nodes += expansions;
        info!("initial plan found: {success}");

        while success && !deadline.exceeded() && !execution.finished() {
            if let Some(affected) = execution.observe(self.policy.as_mut(), heuristic, self.metric)
            {
                let which: BTreeSet<usize> = if self.independence_detection {
                    affected
                } else {
                    everyone.iter().copied().collect()
                };
                let (replanned, expansions) = self.plan_individually(
                    &execution.graph,
                    &execution.agents,
                    &mut execution.planned,
                    which,
                );
                execution.stats.low_level_expand_nodes += expansions;
                execution.stats.replans += 1;
                success = replanned;
            }

            let mut groups = detect_collisions(&execution.planned, self.radius);
            while !groups.is_empty() && success && !deadline.exceeded() {
                let ctx = search_context(self.policy.as_ref(), heuristic, self.metric, &deadline);
                for group in &groups {
                    debug!("t = {}: resolve collision group {group:?}", execution.timestep);
                    let group_agents = extract_group_agents(group, &execution.agents);
                    let mut outcome = self.solver.solve(&execution.graph, &group_agents, &ctx);
                    execution.stats.record_expansions(outcome.expansions);
                    execution.stats.replans += 1;
                    if !outcome.found {
                        success = false;
                        break;
                    }
                    for &i in group {
                        execution.planned[i] = std::mem::take(&mut outcome.paths[i]);
                    }
                }

                if success {
                    let next = detect_collisions(&execution.planned, self.radius);
                    groups = if next.is_empty() {
                        next
                    } else {
                        merge(&groups, &next, agents.len())
                    };
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
            "Local+ID"
        } else {
            "Local"
        };
        format!(
            "{framework}+{}+{}",
            self.solver.name(),
            self.policy.name()
        )
    }
}
