use super::{PlanOutcome, ReplanOutcome, Solver};
use crate::algorithm::{LowLevelPlanner, SearchContext};
use crate::common::{Agent, Coordinate, Paths, SafeIntervals, INF};
use crate::graph::Graph;
use crate::stat::Expansions;

use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Share of the blocking agents unplanned per repair attempt.
const UNPLAN_RATIO: f64 = 0.1;

/// Prioritized planning with randomized priorities. Agents that cannot be
/// planned around the others trigger a repair: a sample of the agents that may
/// be in their way is unplanned, the blocked agents go first, then the sampled
/// agents are planned again.
pub struct PP {
    low_level: Box<dyn LowLevelPlanner>,
    rng: StdRng,
    expansions: Expansions,
}

impl PP {
    pub fn new(low_level: Box<dyn LowLevelPlanner>, seed: u64) -> Self {
        PP {
            low_level,
            rng: StdRng::seed_from_u64(seed),
            expansions: Expansions::default(),
        }
    }

    /// Plan `group` in random order around every other planned path. Returns
    /// the agents that got no path.
    fn replan_group(
        &mut self,
        graph: &Graph,
        agents: &[Agent],
        planned: &mut Paths,
        group: BTreeSet<usize>,
        ctx: &SearchContext,
    ) -> BTreeSet<usize> {
        for &agent in &group {
            planned[agent].clear();
        }
        let mut intervals = SafeIntervals::from_paths(planned);
        let mut order: Vec<usize> = group.iter().copied().collect();
        order.shuffle(&mut self.rng);

        let mut failed = group;
        for agent in order {
            self.expansions.high_level += 1;
            let (path, expansions) = self
                .low_level
                .search(graph, &agents[agent], &mut intervals, ctx);
            self.expansions.low_level += expansions;
            if let Some(path) = path {
                intervals.add_path(&path);
                planned[agent] = path;
                failed.remove(&agent);
            }
        }
        if !failed.is_empty() {
            debug!("blocked agents: {failed:?}");
        }
        failed
    }

    /// Planned agents that could stand in the way of a blocked one: their
    /// goal lies on a finite detour for it, or their path crosses its start.
    fn blocking_agents(
        &self,
        agents: &[Agent],
        blocked: &BTreeSet<usize>,
        planned: &Paths,
        ctx: &SearchContext,
    ) -> BTreeSet<usize> {
        let distance = |from: Coordinate, to: Coordinate| match ctx.heuristic {
            Some(heuristic) => heuristic.distance(from, to),
            None => ctx.metric.distance(from, to),
        };

        let mut candidates: Vec<usize> = (0..agents.len())
            .filter(|&i| !planned[i].is_empty())
            .collect();
        let mut blocking = BTreeSet::new();
        for &agent in blocked {
            let Agent { start, goal, .. } = agents[agent];
            candidates.retain(|&other| {
                let detour = distance(start, agents[other].goal) + distance(agents[other].goal, goal);
                if detour < INF || planned[other].contains(&start) {
                    blocking.insert(other);
                    false
                } else {
                    true
                }
            });
        }
        blocking
    }

    fn unplan_count(agents: &[Agent]) -> usize {
        ((UNPLAN_RATIO * agents.len() as f64).ceil() as usize).max(1)
    }
}

impl Solver for PP {
    #[instrument(skip_all, name = "pp_solve", fields(low_level = self.low_level.name()), level = "debug")]
    fn solve(&mut self, graph: &Graph, agents: &[Agent], ctx: &SearchContext) -> PlanOutcome {
        let start = Instant::now();
        let mut paths = vec![Vec::new(); agents.len()];
        let everyone: BTreeSet<usize> = agents
            .iter()
            .filter(|agent| !agent.is_placeholder())
            .map(|agent| agent.id)
            .collect();

        let outcome = self.replan(graph, agents, &mut paths, &everyone, ctx, 0);
        if !outcome.success {
            paths = vec![Vec::new(); agents.len()];
        }
        PlanOutcome {
            found: outcome.success,
            paths,
            expansions: outcome.expansions,
            runtime: start.elapsed(),
        }
    }

    #[instrument(skip_all, name = "pp_replan", fields(t = _current_timestep), level = "debug")]
    fn replan(
        &mut self,
        graph: &Graph,
        agents: &[Agent],
        ongoing: &mut Paths,
        affected: &BTreeSet<usize>,
        ctx: &SearchContext,
        _current_timestep: usize,
    ) -> ReplanOutcome {
        self.expansions = Expansions::default();
        let sample_size = PP::unplan_count(agents);

        let mut blocked = self.replan_group(graph, agents, ongoing, affected.clone(), ctx);
        while !blocked.is_empty() && !ctx.expired() {
            let mut blocking = self.blocking_agents(agents, &blocked, ongoing, ctx);
            if blocking.is_empty() {
                debug!("nothing left to move out of the way");
                break;
            }
            let mut unplanned = BTreeSet::new();
            while !blocked.is_empty() && !blocking.is_empty() && !ctx.expired() {
                let sample = blocking
                    .iter()
                    .copied()
                    .choose_multiple(&mut self.rng, sample_size);
                for agent in sample {
                    ongoing[agent].clear();
                    blocking.remove(&agent);
                    unplanned.insert(agent);
                }
                blocked = self.replan_group(graph, agents, ongoing, blocked, ctx);
            }
            let retry = self.replan_group(graph, agents, ongoing, unplanned, ctx);
            blocked.extend(retry);
        }

        let success = blocked.is_empty();
        info!(
            "{} replanned {} agents, success: {success}",
            self.name(),
            affected.len()
        );
        ReplanOutcome {
            success,
            expansions: self.expansions,
        }
    }

    fn name(&self) -> String {
        format!("PP+{}", self.low_level.name())
    }
}
