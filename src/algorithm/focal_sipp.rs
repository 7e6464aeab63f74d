use super::{focal_estimate, LowLevelPlanner, QueueKey, SearchContext, VertexId, VertexTable};
use crate::common::{Agent, Path, SafeIntervals};
use crate::graph::Graph;

use std::collections::BTreeSet;
use tracing::{debug, instrument, trace};

/// Bounded-suboptimal SIPP: OPEN by f, FOCAL holds the open vertices with
/// `f <= w * f_min` ordered by the focal estimate.
#[derive(Debug)]
pub struct FocalSipp {
    w: f64,
    table: VertexTable,
    open: BTreeSet<QueueKey>,
    focal: BTreeSet<QueueKey>,
    expansions: u64,
}

impl FocalSipp {
    pub fn new(w: f64) -> Self {
        FocalSipp {
            w,
            table: VertexTable::default(),
            open: BTreeSet::new(),
            focal: BTreeSet::new(),
            expansions: 0,
        }
    }

    fn f_min(&self) -> Option<f64> {
        self.open.first().map(|(f, ..)| f.into_inner())
    }

    fn insert_focal(&mut self, id: VertexId) {
        let vertex = &mut self.table[id];
        vertex.in_focal = true;
        self.focal.insert(vertex.d_hat_key(id));
    }

    /// Take the best focal vertex, refilling FOCAL from OPEN if it ran dry.
    /// Returns the f lower bound before the pop alongside the vertex.
    fn pop(&mut self) -> Option<(f64, VertexId)> {
        let f_min = self.f_min()?;
        if self.focal.is_empty() {
            let bound = self.w * f_min;
            let refill: Vec<VertexId> = self
                .open
                .iter()
                .take_while(|(f, ..)| f.into_inner() <= bound)
                .map(|&(.., id)| id)
                .collect();
            for id in refill {
                self.insert_focal(id);
            }
        }

        let (.., id) = self.focal.pop_first()?;
        let vertex = &mut self.table[id];
        vertex.in_focal = false;
        vertex.in_open = false;
        self.open.remove(&vertex.f_key(id));
        Some((f_min, id))
    }

    fn push(&mut self, ctx: &SearchContext, graph: &Graph, parent: VertexId, succ: VertexId, arrival: f64) {
        if arrival >= self.table[succ].g {
            return;
        }
        let parent_coordinate = self.table[parent].state.coordinate;
        let vertex = &mut self.table[succ];
        if vertex.closed {
            trace!("reopen {:?} at {arrival}", vertex.state);
            vertex.closed = false;
        }
        if vertex.in_open {
            self.open.remove(&vertex.f_key(succ));
        }
        if vertex.in_focal {
            self.focal.remove(&vertex.d_hat_key(succ));
        }
        vertex.g = arrival;
        vertex.parent = Some(parent);
        vertex.d_hat = focal_estimate(ctx, graph, parent_coordinate, vertex);
        vertex.in_open = true;
        vertex.in_focal = false;
        self.open.insert(vertex.f_key(succ));

        let f = vertex.f();
        if self.f_min().is_some_and(|f_min| f <= self.w * f_min) {
            self.insert_focal(succ);
        }
    }

    /// OPEN's minimum moved: admit the vertices the new bound covers and
    /// evict the ones it no longer does.
    fn balance(&mut self) {
        let Some(f_min) = self.f_min() else {
            return;
        };
        let bound = self.w * f_min;
        let open: Vec<VertexId> = self.open.iter().map(|&(.., id)| id).collect();
        for id in open {
            let within = self.table[id].f() <= bound;
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

impl LowLevelPlanner for FocalSipp {
    #[instrument(skip_all, name = "focal_sipp", fields(agent = agent.id, start = %agent.start, goal = %agent.goal, w = self.w), level = "debug")]
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
            let vertex = &mut self.table[root];
            vertex.in_open = true;
            self.open.insert(vertex.f_key(root));
            self.insert_focal(root);
        }

        while !ctx.expired() {
            let Some((f_min, current)) = self.pop() else {
                break;
            };
            let mut f_min_moved = self.f_min() != Some(f_min);
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
            f_min_moved |= self.f_min() != Some(f_min);
            if f_min_moved {
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
        self.open.clear();
        self.focal.clear();
        self.table.clear();
        (path, self.expansions)
    }

    fn name(&self) -> &'static str {
        "Focal-SIPP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::tests::init_tracing;
    use crate::algorithm::Vertex;
    use crate::common::{path_length, Coordinate, Edge, State, TimeInterval};
    use crate::policy::{create_policy, PolicyKind};
    use crate::test_utils::grid_snapshot;

    #[test]
    fn test_focal_sipp_stays_within_bound() {
        init_tracing();
        let snapshot = grid_snapshot(&["....", ".@@.", "....", "...."], &[], &[]);
        let graph = snapshot.create();
        let agent = Agent::new(0, (0, 0), (3, 3));
        for w in [1.0, 1.2, 2.0] {
            let mut planner = FocalSipp::new(w);
            let path = planner
                .plan(&graph, &agent, &mut SafeIntervals::new(), &SearchContext::default())
                .unwrap();
            assert!(path_length(&path) as f64 <= w * 6.0);
        }
    }

    fn open_vertex(planner: &mut FocalSipp, column: i32, g: f64, h: f64) -> VertexId {
        let state = State::new(Coordinate::new(0, column), TimeInterval::default());
        let w = planner.w;
        let id = planner
            .table
            .get_or_insert_with(state, || Vertex::new(state, h, w));
        planner.table[id].g = g;
        planner.table[id].in_open = true;
        planner.open.insert(planner.table[id].f_key(id));
        id
    }

    #[test]
    fn test_balance_follows_f_min_both_ways() {
        let mut planner = FocalSipp::new(1.5);
        let a = open_vertex(&mut planner, 0, 10.0, 0.0);
        let b = open_vertex(&mut planner, 1, 13.0, 1.0);
        planner.balance();
        assert_eq!(planner.focal.len(), 2);

        // f_min drops to 6, so the bound shrinks to 9.
        let c = open_vertex(&mut planner, 2, 4.0, 2.0);
        planner.balance();
        assert_eq!(planner.focal.len(), 1);
        assert!(planner.table[c].in_focal);
        assert!(!planner.table[a].in_focal && !planner.table[b].in_focal);

        let (f_min, popped) = planner.pop().unwrap();
        assert_eq!((f_min, popped), (6.0, c));
        planner.balance();
        assert_eq!(planner.focal.len(), 2);
        assert!(planner.table[a].in_focal && planner.table[b].in_focal);
    }

    #[test]
    fn test_focal_sipp_policy_steers_away_from_risky_edge() {
        init_tracing();
        // Two equally short routes; the top one starts with an edge that might be blocked.
        let risky = Edge::new((0, 0), (0, 1));
        let snapshot = grid_snapshot(&["..", ".."], &[risky], &[]);
        let graph = snapshot.create();
        let agent = Agent::new(0, (0, 0), (1, 1));

        let mut planner = FocalSipp::new(1.0);
        let unguided = planner
            .plan(&graph, &agent, &mut SafeIntervals::new(), &SearchContext::default())
            .unwrap();
        assert_eq!(unguided[1], Coordinate::new(0, 1));

        let mut policy = create_policy(PolicyKind::RiskAverse);
        policy.init(&snapshot);
        let ctx = SearchContext {
            policy: Some(policy.as_ref()),
            ..SearchContext::default()
        };
        let guided = planner
            .plan(&graph, &agent, &mut SafeIntervals::new(), &ctx)
            .unwrap();
        assert_eq!(
            guided,
            vec![
                Coordinate::new(0, 0),
                Coordinate::new(1, 0),
                Coordinate::new(1, 1)
            ]
        );
    }
}
