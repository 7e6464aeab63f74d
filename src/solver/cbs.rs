use super::{PlanOutcome, ReplanOutcome, Solver};
use crate::algorithm::{LowLevelPlanner, SearchContext};
use crate::common::validator::{coordinate_at, exists_conflict, find_conflicts};
use crate::common::{
    extract_group_agents, fingerprint, sum_of_cost, Agent, Conflict, Constraint, ConstraintSet,
    DisjointSets, Paths, SafeIntervals,
};
use crate::graph::Graph;
use crate::stat::Expansions;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::time::Instant;
use tracing::{debug, info, instrument, trace};

#[derive(Debug, Clone)]
struct ConstraintTreeNode {
    id: usize,
    paths: Paths,
    constraints: ConstraintSet,
    conflicts: Vec<Conflict>,
    cost: usize,
}

impl PartialEq for ConstraintTreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConstraintTreeNode {}

impl Ord for ConstraintTreeNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .cmp(&other.cost)
            .then_with(|| self.conflicts.len().cmp(&other.conflicts.len()))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ConstraintTreeNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Conflict-based search. Between calls it remembers the constraints of the
/// last solution, which groups agents for independence detection.
pub struct CBS {
    low_level: Box<dyn LowLevelPlanner>,
    lookup: HashSet<u64>,
    previous_constraints: ConstraintSet,
    expansions: Expansions,
    next_node_id: usize,
}

impl CBS {
    pub fn new(low_level: Box<dyn LowLevelPlanner>) -> Self {
        CBS {
            low_level,
            lookup: HashSet::new(),
            previous_constraints: ConstraintSet::new(),
            expansions: Expansions::default(),
            next_node_id: 0,
        }
    }

    fn node(&mut self, paths: Paths, constraints: ConstraintSet) -> ConstraintTreeNode {
        let id = self.next_node_id;
        self.next_node_id += 1;
        ConstraintTreeNode {
            id,
            conflicts: find_conflicts(&paths),
            cost: sum_of_cost(&paths),
            paths,
            constraints,
        }
    }

    fn root(
        &mut self,
        graph: &Graph,
        agents: &[Agent],
        ctx: &SearchContext,
    ) -> Option<ConstraintTreeNode> {
        let mut paths = vec![Vec::new(); agents.len()];
        for agent in agents.iter().filter(|agent| !agent.is_placeholder()) {
            let (path, expansions) =
                self.low_level
                    .search(graph, agent, &mut SafeIntervals::new(), ctx);
            self.expansions.low_level += expansions;
            match path {
                Some(path) => paths[agent.id] = path,
                None => {
                    debug!("agent {} has no path even without constraints", agent.id);
                    return None;
                }
            }
        }
        self.lookup.insert(fingerprint(&ConstraintSet::new()));
        Some(self.node(paths, ConstraintSet::new()))
    }

    /// One child per branching constraint of `conflict`, skipping constraint
    /// sets already generated and agents left without a path.
    fn expand(
        &mut self,
        graph: &Graph,
        agents: &[Agent],
        ctx: &SearchContext,
        node: &ConstraintTreeNode,
        conflict: &Conflict,
        open: &mut BTreeSet<ConstraintTreeNode>,
    ) {
        for constraint in conflict.resolve() {
            let mut constraints = node.constraints.clone();
            constraints.insert(constraint);
            let key = fingerprint(&constraints);
            if self.lookup.contains(&key) {
                trace!("skip duplicate constraint set");
                continue;
            }

            let constrained = constraint.constrained_agent;
            let mut intervals = SafeIntervals::from_constraints(&constraints, constrained);
            let (path, expansions) =
                self.low_level
                    .search(graph, &agents[constrained], &mut intervals, ctx);
            self.expansions.low_level += expansions;
            let Some(path) = path else {
                continue;
            };
            debug_assert_ne!(
                coordinate_at(&path, constraint.timestep),
                Some(constraint.coordinate)
            );

            self.lookup.insert(key);
            self.expansions.high_level += 1;
            let mut paths = node.paths.clone();
            paths[constrained] = path;
            let child = self.node(paths, constraints);
            open.insert(child);
        }
    }

    /// Best-first search over the constraint tree. On success returns the
    /// conflict-free paths and the constraints that produced them.
    fn search(
        &mut self,
        graph: &Graph,
        agents: &[Agent],
        ctx: &SearchContext,
    ) -> Option<(Paths, ConstraintSet)> {
        let mut open = BTreeSet::new();
        let mut solution = None;

        if let Some(root) = self.root(graph, agents, ctx) {
            open.insert(root);
        }
        while !ctx.expired() {
            let Some(node) = open.pop_first() else {
                break;
            };
            match node.conflicts.first() {
                None => {
                    debug!(
                        "solution with cost {} and {} constraints",
                        node.cost,
                        node.constraints.len()
                    );
                    solution = Some((node.paths, node.constraints));
                    break;
                }
                Some(conflict) => {
                    trace!("conflict: {conflict:?}");
                    self.expand(graph, agents, ctx, &node, conflict, &mut open);
                }
            }
        }

        self.lookup.clear();
        solution
    }

    /// Agents linked by a still-relevant constraint share a group. Constraints
    /// that lie in the past are dropped. Groups of placeholders alone are left
    /// out.
    fn partition(&mut self, agents: &[Agent], current_timestep: usize) -> Vec<Vec<usize>> {
        self.previous_constraints
            .retain(|constraint| constraint.timestep >= current_timestep);
        let mut groups = DisjointSets::new(agents.len());
        for constraint in &self.previous_constraints {
            groups.union(constraint.constrained_agent, constraint.conflicted_agent);
        }
        groups
            .sets()
            .into_iter()
            .filter(|group| group.iter().any(|&i| !agents[i].is_placeholder()))
            .collect()
    }

    /// Plan `group` on its own and splice the result into `ongoing`. The new
    /// constraints replace the group's old ones, shifted to absolute time.
    fn replan_group(
        &mut self,
        graph: &Graph,
        agents: &[Agent],
        ongoing: &mut Paths,
        group: &[usize],
        ctx: &SearchContext,
        current_timestep: usize,
    ) -> bool {
        debug!("replan group {group:?}");
        self.previous_constraints
            .retain(|constraint| !group.iter().any(|&agent| constraint.involves(agent)));
        let group_agents = extract_group_agents(group, agents);
        let Some((paths, constraints)) = self.search(graph, &group_agents, ctx) else {
            return false;
        };

        for &agent in group {
            ongoing[agent] = paths[agent].clone();
        }
        self.previous_constraints
            .extend(constraints.into_iter().map(|constraint| Constraint {
                timestep: constraint.timestep + current_timestep,
                ..constraint
            }));
        true
    }
}

/// Merge groups whose combined paths conflict. Each returned entry lists the
/// indices into `groups` that belong together.
fn conflicting_groups(groups: &[Vec<usize>], ongoing: &Paths) -> Vec<Vec<usize>> {
    let mut merged = DisjointSets::new(groups.len());
    for i in 0..groups.len() {
        for j in i + 1..groups.len() {
            if !merged.is_disjoint(i, j) {
                continue;
            }
            let paths: Paths = groups[i]
                .iter()
                .chain(&groups[j])
                .map(|&agent| ongoing[agent].clone())
                .collect();
            if exists_conflict(&paths) {
                merged.union(i, j);
            }
        }
    }
    merged.sets()
}

impl Solver for CBS {
    #[instrument(skip_all, name = "cbs_solve", fields(low_level = self.low_level.name()), level = "debug")]
    fn solve(&mut self, graph: &Graph, agents: &[Agent], ctx: &SearchContext) -> PlanOutcome {
        let start = Instant::now();
        self.expansions = Expansions::default();
        self.previous_constraints.clear();

        let solution = self.search(graph, agents, ctx);
        let timeout = ctx.expired();
        let (found, paths) = match solution {
            Some((paths, constraints)) if !timeout => {
                self.previous_constraints = constraints;
                (true, paths)
            }
            _ => (false, vec![Vec::new(); agents.len()]),
        };

        info!(
            "{} found: {found}, timeout: {timeout}, expansions: {:?}",
            self.name(),
            self.expansions
        );
        PlanOutcome {
            found,
            paths,
            expansions: self.expansions,
            runtime: start.elapsed(),
        }
    }

    #[instrument(skip_all, name = "cbs_replan", fields(t = current_timestep), level = "debug")]
    fn replan(
        &mut self,
        graph: &Graph,
        agents: &[Agent],
        ongoing: &mut Paths,
        affected: &BTreeSet<usize>,
        ctx: &SearchContext,
        current_timestep: usize,
    ) -> ReplanOutcome {
        self.expansions = Expansions::default();
        let mut groups = self.partition(agents, current_timestep);
        debug!("{} independent groups", groups.len());

        let mut succeeded = true;
        for group in groups
            .iter()
            .filter(|group| group.iter().any(|agent| affected.contains(agent)))
        {
            if !self.replan_group(graph, agents, ongoing, group, ctx, current_timestep) {
                succeeded = false;
                break;
            }
        }

        let mut conflicting = true;
        while succeeded && conflicting && !ctx.expired() {
            conflicting = false;
            let mut next_groups = Vec::new();
            for members in conflicting_groups(&groups, ongoing) {
                let mut group: Vec<usize> = members
                    .iter()
                    .flat_map(|&member| groups[member].iter().copied())
                    .collect();
                group.sort_unstable();
                if members.len() > 1 {
                    conflicting = true;
                    if !self.replan_group(graph, agents, ongoing, &group, ctx, current_timestep)
                    {
                        succeeded = false;
                        break;
                    }
                }
                next_groups.push(group);
            }
            groups = next_groups;
        }

        let success = succeeded && !conflicting && !ctx.expired();
        info!(
            "{} replanned {} affected agents, success: {success}",
            self.name(),
            affected.len()
        );
        ReplanOutcome {
            success,
            expansions: self.expansions,
        }
    }

    fn name(&self) -> String {
        format!("CBS+{}", self.low_level.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::tests::init_tracing;
    use crate::algorithm::Sipp;
    use crate::common::{Coordinate, Deadline};
    use crate::test_utils::{crossing_agents, grid_snapshot};
    use std::time::Duration;

    fn cbs() -> CBS {
        CBS::new(Box::new(Sipp::default()))
    }

    #[test]
    fn test_cbs_crossing() {
        init_tracing();
        let graph = grid_snapshot(&["...", "...", "..."], &[], &[]).create();
        let agents = crossing_agents();
        let mut solver = cbs();
        let ctx = SearchContext::default();
        let outcome = solver.solve(&graph, &agents, &ctx);
        assert!(outcome.found);
        assert!(find_conflicts(&outcome.paths).is_empty());
        assert!(sum_of_cost(&outcome.paths) >= 8);
        assert_eq!(solver.name(), "CBS+SIPP");
    }

    #[test]
    fn test_cbs_corridor_swap_times_out() {
        init_tracing();
        let graph = grid_snapshot(&["..."], &[], &[]).create();
        let agents = vec![Agent::new(0, (0, 0), (0, 2)), Agent::new(1, (0, 2), (0, 0))];
        let deadline = Deadline::start(Duration::from_millis(300));
        let ctx = SearchContext::default().with_deadline(&deadline);
        let outcome = cbs().solve(&graph, &agents, &ctx);
        assert!(!outcome.found);
        assert!(outcome.paths.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_cbs_plans_group_with_placeholders() {
        init_tracing();
        let graph = grid_snapshot(&["...", "...", "..."], &[], &[]).create();
        let agents = vec![
            Agent::placeholder(0),
            Agent::new(1, (2, 0), (0, 2)),
        ];
        let outcome = cbs().solve(&graph, &agents, &SearchContext::default());
        assert!(outcome.found);
        assert!(outcome.paths[0].is_empty());
        assert_eq!(outcome.paths[1].len(), 5);
    }

    #[test]
    fn test_partition_drops_stale_constraints() {
        let agents = vec![
            Agent::new(0, (0, 0), (0, 1)),
            Agent::new(1, (1, 0), (1, 1)),
            Agent::new(2, (2, 0), (2, 1)),
        ];
        let mut solver = cbs();
        solver
            .previous_constraints
            .insert(Constraint::new(0, 1, Coordinate::new(0, 1), 2));
        solver
            .previous_constraints
            .insert(Constraint::new(2, 1, Coordinate::new(2, 1), 7));

        assert_eq!(solver.partition(&agents, 0), vec![vec![0, 1, 2]]);
        assert_eq!(solver.partition(&agents, 5), vec![vec![0], vec![1, 2]]);
        assert_eq!(solver.previous_constraints.len(), 1);
    }

    #[test]
    fn test_conflicting_groups_merge() {
        let ongoing = vec![
            vec![Coordinate::new(0, 0), Coordinate::new(0, 1)],
            vec![Coordinate::new(1, 1), Coordinate::new(0, 1)],
            vec![Coordinate::new(2, 2)],
        ];
        let groups = vec![vec![0], vec![1], vec![2]];
        assert_eq!(
            conflicting_groups(&groups, &ongoing),
            vec![vec![0, 1], vec![2]]
        );
    }

    #[test]
    fn test_cbs_replan_affected_agent() {
        init_tracing();
        let graph = grid_snapshot(&["...", "...", "..."], &[], &[]).create();
        let agents = crossing_agents();
        let mut solver = cbs();
        let ctx = SearchContext::default();
        let outcome = solver.solve(&graph, &agents, &ctx);
        assert!(outcome.found);

        // Both agents advance one step, then agent 0 must replan from there.
        let mut ongoing: Paths = outcome.paths.iter().map(|path| path[1..].to_vec()).collect();
        let current = vec![
            Agent::new(0, ongoing[0][0], agents[0].goal),
            Agent::new(1, ongoing[1][0], agents[1].goal),
        ];
        ongoing[0].clear();
        let affected = BTreeSet::from([0]);
        let replanned = solver.replan(&graph, &current, &mut ongoing, &affected, &ctx, 1);
        assert!(replanned.success);
        assert!(find_conflicts(&ongoing).is_empty());
        assert_eq!(ongoing[0].first(), Some(&current[0].start));
        assert_eq!(ongoing[0].last(), Some(&current[0].goal));
    }
}
