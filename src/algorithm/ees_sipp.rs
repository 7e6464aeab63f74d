use super::{focal_estimate, LowLevelPlanner, QueueKey, SearchContext, VertexId, VertexTable};
use crate::common::{Agent, Path, SafeIntervals};
use crate::graph::Graph;

use std::collections::BTreeSet;
use tracing::{debug, instrument, trace};

/// Explicit estimation search over safe intervals.
///
/// CLEANUP orders by admissible f, OPEN by inadmissible `f_hat = g + w * h`,
/// and FOCAL holds the OPEN vertices within `w` of OPEN's best `f_hat`,
/// ordered by the focal estimate.
#[derive(Debug)]
pub struct EesSipp {
    w: f64,
    table: VertexTable,
    cleanup: BTreeSet<QueueKey>,
    open: BTreeSet<QueueKey>,
    focal: BTreeSet<QueueKey>,
    expansions: u64,
}

impl EesSipp {
    pub fn new(w: f64) -> Self {
        EesSipp {
            w,
            table: VertexTable::default(),
            cleanup: BTreeSet::new(),
            open: BTreeSet::new(),
            focal: BTreeSet::new(),
            expansions: 0,
        }
    }

    fn best_f_hat(&self) -> Option<f64> {
        self.open.first().map(|(f_hat, ..)| f_hat.into_inner())
    }

    /// Drop `id` from every queue it is in.
    fn detach(&mut self, id: VertexId) {
        let vertex = &mut self.table[id];
        if vertex.in_cleanup {
            self.cleanup.remove(&vertex.f_key(id));
        }
        if vertex.in_open {
            self.open.remove(&vertex.f_hat_key(id));
        }
        if vertex.in_focal {
            self.focal.remove(&vertex.d_hat_key(id));
        }
        vertex.in_cleanup = false;
        vertex.in_open = false;
        vertex.in_focal = false;
    }

    fn insert_focal(&mut self, id: VertexId) {
        let vertex = &mut self.table[id];
        vertex.in_focal = true;
        self.focal.insert(vertex.d_hat_key(id));
    }

    fn insert_open(&mut self, id: VertexId) {
        let vertex = &mut self.table[id];
        vertex.in_cleanup = true;
        vertex.in_open = true;
        self.cleanup.insert(vertex.f_key(id));
        self.open.insert(vertex.f_hat_key(id));
    }

    /// Prefer FOCAL's best if it is provably within bound, then OPEN's best,
    /// then CLEANUP's best. Returns OPEN's best `f_hat` before the pop.
    fn pop(&mut self) -> Option<(f64, VertexId)> {
        let (best_f, .., cleanup_best) = *self.cleanup.first()?;
        let best_f_hat = self.best_f_hat()?;
        let bound = self.w * best_f.into_inner();

        let focal_best = self
            .focal
            .first()
            .map(|&(.., id)| id)
            .filter(|&id| self.table[id].f_hat() <= bound);
        let open_best = self
            .open
            .first()
            .map(|&(.., id)| id)
            .filter(|&id| self.table[id].f_hat() <= bound);

        let chosen = focal_best.or(open_best).unwrap_or(cleanup_best);
        self.detach(chosen);
        Some((best_f_hat, chosen))
    }

    fn push(&mut self, ctx: &SearchContext, graph: &Graph, parent: VertexId, succ: VertexId, arrival: f64) {
        if arrival >= self.table[succ].g {
            return;
        }
        self.detach(succ);
        let parent_coordinate = self.table[parent].state.coordinate;
        let vertex = &mut self.table[succ];
        if vertex.closed {
            trace!("reopen {:?} at {arrival}", vertex.state);
            vertex.closed = false;
        }
        vertex.g = arrival;
        vertex.parent = Some(parent);
        vertex.d_hat = focal_estimate(ctx, graph, parent_coordinate, vertex);
        let f_hat = vertex.f_hat();
        self.insert_open(succ);

        if self
            .best_f_hat()
            .is_some_and(|best| f_hat <= self.w * best)
        {
            self.insert_focal(succ);
        }
    }

    /// OPEN's best `f_hat` moved: rebuild FOCAL against the new bound.
    fn balance(&mut self) {
        let Some(best_f_hat) = self.best_f_hat() else {
            return;
        };
        let bound = self.w * best_f_hat;
        let open: Vec<VertexId> = self.open.iter().map(|&(.., id)| id).collect();
        for id in open {
            let within = self.table[id].f_hat() <= bound;
            let in_focal = self.table[id].in_focal;
            if within && !in_focal {
                self.insert_focal(id);
            } else if !within && in_focal {
                let vertex = &mut self.table[id];
                vertex.in_focal = false;
                self.focal.remove(&vertex.d_hat_key(id));
            }
        }
    }
}

impl LowLevelPlanner for EesSipp {
    #[instrument(skip_all, name = "ees_sipp", fields(agent = agent.id, start = %agent.start, goal = %agent.goal, w = self.w), level = "debug")]
    fn search(
        &mut self,
        graph: &Graph,
        agent: &Agent,
        intervals: &mut SafeIntervals,
        ctx: &SearchContext,
    ) -> (Option<Path>, u64) {
        self.expansions = 0;
        let mut goal = None;

        if let Some(root) = self.table.insert_root(agent, intervals, ctx, self.w) {
            self.insert_open(root);
            self.insert_focal(root);
        }

        while !ctx.expired() {
            let Some((best_f_hat, current)) = self.pop() else {
                break;
            };
            let mut bound_moved = self.best_f_hat() != Some(best_f_hat);
            self.table[current].closed = true;
            if self.table[current].is_goal(agent) {
                goal = Some(current);
                break;
            }

            self.expansions += 1;
            trace!("expand {:?}", self.table[current].state);
            for (succ, arrival) in
                self.table
                    .successors(graph, agent, intervals, ctx, current, self.w)
            {
                self.push(ctx, graph, current, succ, arrival);
            }
            bound_moved |= self.best_f_hat() != Some(best_f_hat);
            if bound_moved {
                self.balance();
            }
        }

        let path = goal.map(|goal| self.table.path_to(goal));
        debug!(
            "expanded {} of {} vertices, found: {}",
            self.expansions,
            self.table.len(),
            path.is_some()
        );
        self.cleanup.clear();
        self.open.clear();
        self.focal.clear();
        self.table.clear();
        (path, self.expansions)
    }

    fn name(&self) -> &'static str {
        "EES-SIPP"
    }
}
