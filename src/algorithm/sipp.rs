use super::{LowLevelPlanner, QueueKey, SearchContext, VertexTable};
use crate::common::{Agent, Path, SafeIntervals};
use crate::graph::Graph;

use std::collections::BTreeSet;
use tracing::{debug, instrument, trace};

/// Optimal safe-interval path planning.
#[derive(Debug, Default)]
pub struct Sipp {
    table: VertexTable,
    open: BTreeSet<QueueKey>,
    expansions: u64,
}

impl Sipp {
    fn push(&mut self, id: usize) {
        let vertex = &mut self.table[id];
        vertex.in_open = true;
        self.open.insert(vertex.f_key(id));
    }
}

impl LowLevelPlanner for Sipp {
    #[instrument(skip_all, name = "sipp", fields(agent = agent.id, start = %agent.start, goal = %agent.goal), level = "debug")]
    fn search(
        &mut self,
        graph: &Graph,
        agent: &Agent,
        intervals: &mut SafeIntervals,
        ctx: &SearchContext,
    ) -> (Option<Path>, u64) {
        self.expansions = 0;
        let mut goal = None;

        if let Some(root) = self.table.insert_root(agent, intervals, ctx, 1.0) {
            self.push(root);
        }

        while !ctx.expired() {
            let Some((_, _, _, current)) = self.open.pop_first() else {
                break;
            };
            self.table[current].in_open = false;
            if self.table[current].is_goal(agent) {
                goal = Some(current);
                break;
            }

            self.expansions += 1;
            trace!("expand {:?}", self.table[current].state);
            for (succ, arrival) in
                self.table
                    .successors(graph, agent, intervals, ctx, current, 1.0)
            {
                if arrival >= self.table[succ].g {
                    continue;
                }
                if self.table[succ].in_open {
                    let stale = self.table[succ].f_key(succ);
                    self.open.remove(&stale);
                }
                self.table[succ].g = arrival;
                self.table[succ].parent = Some(current);
                self.push(succ);
            }
        }

        let path = goal.map(|goal| self.table.path_to(goal));
        debug!(
            "expanded {} of {} vertices, found: {}",
            self.expansions,
            self.table.len(),
            path.is_some()
        );
        self.open.clear();
        self.table.clear();
        (path, self.expansions)
    }

    fn name(&self) -> &'static str {
        "SIPP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::tests::init_tracing;
    use crate::common::Coordinate;
    use crate::test_utils::grid_snapshot;

    #[test]
    fn test_sipp_detours_around_parked_agent() {
        init_tracing();
        let snapshot = grid_snapshot(&["...", "..."], &[], &[]);
        let graph = snapshot.create();
        let agent = Agent::new(0, (0, 0), (0, 2));
        let mut intervals = SafeIntervals::new();
        intervals.add_path(&vec![Coordinate::new(0, 1)]);

        let mut sipp = Sipp::default();
        let path = sipp
            .plan(&graph, &agent, &mut intervals, &SearchContext::default())
            .unwrap();
        assert_eq!(path.len(), 5);
        assert!(!path.contains(&Coordinate::new(0, 1)));
    }
}
