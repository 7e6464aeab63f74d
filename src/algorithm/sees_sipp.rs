use super::{focal_estimate, LowLevelPlanner, QueueKey, SearchContext, VertexId, VertexTable};
use crate::common::{Agent, Path, SafeIntervals, INF};
use crate::graph::Graph;

use std::collections::BTreeSet;
use tracing::{debug, instrument, trace};

/// Simplified explicit estimation search: a sequence of best-first rounds on
/// the focal estimate, each bounded by thresholds on f and `f_hat`. A round
/// that fails raises each threshold to the smallest value that exceeded it.
#[derive(Debug)]
pub struct SeesSipp {
    w: f64,
    table: VertexTable,
    open: BTreeSet<QueueKey>,
    expansions: u64,
}

struct RoundOutcome {
    goal: Option<VertexId>,
    next_threshold_f: f64,
    next_threshold_f_hat: f64,
}

impl SeesSipp {
    pub fn new(w: f64) -> Self {
        SeesSipp {
            w,
            table: VertexTable::default(),
            open: BTreeSet::new(),
            expansions: 0,
        }
    }

    fn insert_open(&mut self, id: VertexId) {
        let vertex = &mut self.table[id];
        vertex.in_open = true;
        self.open.insert(vertex.d_hat_key(id));
    }

    /// One bounded round. g-values and parents survive between rounds; queue
    /// membership and closedness do not.
    #[allow(clippy::too_many_arguments)]
    fn round(
        &mut self,
        graph: &Graph,
        agent: &Agent,
        intervals: &mut SafeIntervals,
        ctx: &SearchContext,
        root: VertexId,
        threshold_f: f64,
        threshold_f_hat: f64,
    ) -> RoundOutcome {
        let mut outcome = RoundOutcome {
            goal: None,
            next_threshold_f: INF,
            next_threshold_f_hat: INF,
        };
        self.open.clear();
        for id in 0..self.table.len() {
            self.table[id].in_open = false;
            self.table[id].closed = false;
        }
        self.insert_open(root);

        while let Some((.., current)) = self.open.pop_first() {
            if ctx.expired() {
                return outcome;
            }
            self.table[current].in_open = false;
            self.table[current].closed = true;
            if self.table[current].is_goal(agent) {
                outcome.goal = Some(current);
                return outcome;
            }

            self.expansions += 1;
            trace!("expand {:?}", self.table[current].state);
            let parent_coordinate = self.table[current].state.coordinate;
            for (succ, arrival) in
                self.table
                    .successors(graph, agent, intervals, ctx, current, self.w)
            {
                let improved = arrival < self.table[succ].g;
                if improved {
                    let vertex = &mut self.table[succ];
                    if vertex.in_open {
                        self.open.remove(&vertex.d_hat_key(succ));
                    }
                    vertex.g = arrival;
                    vertex.parent = Some(current);
                    vertex.d_hat = focal_estimate(ctx, graph, parent_coordinate, vertex);
                    if vertex.in_open {
                        self.open.insert(vertex.d_hat_key(succ));
                    }
                }

                let vertex = &self.table[succ];
                let (f, f_hat) = (vertex.f(), vertex.f_hat());
                let over_f = f > self.w * threshold_f;
                let over_f_hat = f_hat > self.w * threshold_f_hat;
                if over_f {
                    outcome.next_threshold_f = outcome.next_threshold_f.min(f);
                }
                if over_f_hat {
                    outcome.next_threshold_f_hat = outcome.next_threshold_f_hat.min(f_hat);
                }
                if over_f || over_f_hat {
                    continue;
                }
                if !vertex.in_open && (!vertex.closed || improved) {
                    if vertex.closed {
                        trace!("reopen {:?} at {arrival}", vertex.state);
                        self.table[succ].closed = false;
                    }
                    self.insert_open(succ);
                }
            }
        }
        outcome
    }
}

impl LowLevelPlanner for SeesSipp {
    #[instrument(skip_all, name = "sees_sipp", fields(agent = agent.id, start = %agent.start, goal = %agent.goal, w = self.w), level = "debug")]
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
            let mut threshold_f = self.table[root].h;
            let mut threshold_f_hat = self.table[root].h_hat;
            let mut rounds = 0;
            while !ctx.expired() {
                rounds += 1;
                let outcome = self.round(
                    graph,
                    agent,
                    intervals,
                    ctx,
                    root,
                    threshold_f,
                    threshold_f_hat,
                );
                if outcome.goal.is_some() {
                    goal = outcome.goal;
                    break;
                }
                if outcome.next_threshold_f == INF && outcome.next_threshold_f_hat == INF {
                    break;
                }
                // Each threshold only moves past the values that broke it.
                if outcome.next_threshold_f < INF {
                    threshold_f = outcome.next_threshold_f;
                }
                if outcome.next_threshold_f_hat < INF {
                    threshold_f_hat = outcome.next_threshold_f_hat;
                }
            }
            debug!("{rounds} rounds");
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
        "SEES-SIPP"
    }
}
