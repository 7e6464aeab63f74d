mod astar;
mod ees_sipp;
mod focal_sipp;
mod sees_sipp;
mod sipp;

pub use astar::a_star_search;
pub use ees_sipp::EesSipp;
pub use focal_sipp::FocalSipp;
pub use sees_sipp::SeesSipp;
pub use sipp::Sipp;

use crate::common::{Agent, Coordinate, Deadline, Edge, Path, SafeIntervals, State, INF};
use crate::graph::Graph;
use crate::heuristic::{DistanceMetric, InformedHeuristic};
use crate::policy::Policy;

use clap::ValueEnum;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::ops::{Index, IndexMut};

/// Read-only guidance shared by every low-level call of one planning round.
#[derive(Clone, Copy, Default)]
pub struct SearchContext<'a> {
    pub heuristic: Option<&'a InformedHeuristic>,
    pub policy: Option<&'a dyn Policy>,
    pub metric: DistanceMetric,
    pub deadline: Option<&'a Deadline>,
}

impl<'a> SearchContext<'a> {
    pub fn with_deadline<'b>(&self, deadline: &'b Deadline) -> SearchContext<'b>
    where
        'a: 'b,
    {
        SearchContext {
            heuristic: self.heuristic,
            policy: self.policy,
            metric: self.metric,
            deadline: Some(deadline),
        }
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(Deadline::exceeded)
    }

    pub(crate) fn penalty(&self, edge: &Edge, graph: &Graph) -> Option<f64> {
        self.policy.map(|policy| policy.penalty(edge, graph))
    }
}

/// Single-agent planner over (coordinate, safe interval) states.
pub trait LowLevelPlanner {
    /// Earliest path reaching the goal in an interval that never ends, and the
    /// number of expansions spent. `None` when no such path exists or the
    /// deadline passed.
    fn search(
        &mut self,
        graph: &Graph,
        agent: &Agent,
        intervals: &mut SafeIntervals,
        ctx: &SearchContext,
    ) -> (Option<Path>, u64);

    fn plan(
        &mut self,
        graph: &Graph,
        agent: &Agent,
        intervals: &mut SafeIntervals,
        ctx: &SearchContext,
    ) -> Option<Path> {
        self.search(graph, agent, intervals, ctx).0
    }

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LowLevelKind {
    #[default]
    Sipp,
    FocalSipp,
    EesSipp,
    SeesSipp,
}

/// `w` only matters to the bounded-suboptimal variants.
pub fn create_low_level(kind: LowLevelKind, w: f64) -> Box<dyn LowLevelPlanner> {
    match kind {
        LowLevelKind::Sipp => Box::new(Sipp::default()),
        LowLevelKind::FocalSipp => Box::new(FocalSipp::new(w)),
        LowLevelKind::EesSipp => Box::new(EesSipp::new(w)),
        LowLevelKind::SeesSipp => Box::new(SeesSipp::new(w)),
    }
}

pub(crate) type VertexId = usize;

/// Queue entry: primary key, then lower h, then higher g, then insertion order.
/// Ties compare h with h and g with g, never one against the other.
pub(crate) type QueueKey = (
    OrderedFloat<f64>,
    OrderedFloat<f64>,
    Reverse<OrderedFloat<f64>>,
    VertexId,
);

#[derive(Debug, Clone)]
pub(crate) struct Vertex {
    pub(crate) state: State,
    pub(crate) parent: Option<VertexId>,
    pub(crate) g: f64,
    pub(crate) h: f64,
    pub(crate) h_hat: f64,
    pub(crate) d_hat: f64,
    pub(crate) in_open: bool,
    pub(crate) in_focal: bool,
    pub(crate) in_cleanup: bool,
    pub(crate) closed: bool,
}

impl Vertex {
    fn new(state: State, h: f64, w: f64) -> Self {
        Vertex {
            state,
            parent: None,
            g: INF,
            h,
            h_hat: w * h,
            d_hat: h,
            in_open: false,
            in_focal: false,
            in_cleanup: false,
            closed: false,
        }
    }

    pub(crate) fn f(&self) -> f64 {
        self.g + self.h
    }

    pub(crate) fn f_hat(&self) -> f64 {
        self.g + self.h_hat
    }

    fn key(&self, primary: f64, id: VertexId) -> QueueKey {
        (
            OrderedFloat(primary),
            OrderedFloat(self.h),
            Reverse(OrderedFloat(self.g)),
            id,
        )
    }

    pub(crate) fn f_key(&self, id: VertexId) -> QueueKey {
        self.key(self.f(), id)
    }

    pub(crate) fn f_hat_key(&self, id: VertexId) -> QueueKey {
        self.key(self.f_hat(), id)
    }

    pub(crate) fn d_hat_key(&self, id: VertexId) -> QueueKey {
        self.key(self.d_hat, id)
    }

    pub(crate) fn is_goal(&self, agent: &Agent) -> bool {
        self.state.coordinate == agent.goal && self.state.interval.is_unbounded()
    }
}

/// Arena of every vertex generated by one search, looked up by state.
#[derive(Debug, Default)]
pub(crate) struct VertexTable {
    vertices: Vec<Vertex>,
    lookup: HashMap<State, VertexId>,
}

impl VertexTable {
    pub(crate) fn clear(&mut self) {
        self.vertices.clear();
        self.lookup.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.vertices.len()
    }

    fn get_or_insert_with(&mut self, state: State, make: impl FnOnce() -> Vertex) -> VertexId {
        if let Some(&id) = self.lookup.get(&state) {
            return id;
        }
        let id = self.vertices.len();
        self.vertices.push(make());
        self.lookup.insert(state, id);
        id
    }

    /// Walk parents back to the root, materializing waits as repeated
    /// coordinates so that index equals timestep.
    pub(crate) fn path_to(&self, goal: VertexId) -> Path {
        let mut path = Vec::new();
        let mut current = goal;
        loop {
            let vertex = &self[current];
            path.push(vertex.state.coordinate);
            let Some(parent) = vertex.parent else {
                break;
            };
            let before = &self[parent];
            let waits = ((vertex.g - before.g) as usize).saturating_sub(1);
            path.extend(std::iter::repeat(before.state.coordinate).take(waits));
            current = parent;
        }
        path.reverse();
        path
    }

    /// Root vertex at the start's first safe interval, `None` if the start is
    /// unsafe at time zero.
    pub(crate) fn insert_root(
        &mut self,
        agent: &Agent,
        intervals: &mut SafeIntervals,
        ctx: &SearchContext,
        w: f64,
    ) -> Option<VertexId> {
        let interval = intervals.interval_at(agent.start, 0.0);
        if interval.is_empty() {
            return None;
        }
        let state = State::new(agent.start, interval);
        let h = estimate(ctx, intervals, agent.start, agent.goal, 0.0);
        let id = self.get_or_insert_with(state, || Vertex::new(state, h, w));
        self[id].g = 0.0;
        Some(id)
    }

    /// Every safe-interval state reachable from `current` by one move, with
    /// its earliest arrival time. Waiting is implicit in the arrival time.
    pub(crate) fn successors(
        &mut self,
        graph: &Graph,
        agent: &Agent,
        intervals: &mut SafeIntervals,
        ctx: &SearchContext,
        current: VertexId,
        w: f64,
    ) -> Vec<(VertexId, f64)> {
        let State {
            coordinate,
            interval,
        } = self[current].state;
        let departure = self[current].g;

        let mut successors = Vec::new();
        for next in graph.successors_of(coordinate) {
            if next == coordinate {
                continue;
            }
            let weight = graph.weight_of(&Edge::new(coordinate, next));
            let candidates: Vec<_> = intervals.intervals_of(next).iter().copied().collect();
            for safe in candidates {
                let arrival = safe.start.max(departure + weight);
                if arrival > interval.end {
                    break;
                }
                if !safe.intersects(arrival) {
                    continue;
                }
                let state = State::new(next, safe);
                let id = self.get_or_insert_with(state, || {
                    Vertex::new(state, estimate(ctx, intervals, next, agent.goal, arrival), w)
                });
                successors.push((id, arrival));
            }
        }
        successors
    }
}

impl Index<VertexId> for VertexTable {
    type Output = Vertex;

    fn index(&self, id: VertexId) -> &Vertex {
        &self.vertices[id]
    }
}

impl IndexMut<VertexId> for VertexTable {
    fn index_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.vertices[id]
    }
}

/// Cost-to-go from `coordinate` reached at `arrival`. With an informed
/// heuristic it is also bounded below by the wait until the goal becomes safe
/// for good.
pub(crate) fn estimate(
    ctx: &SearchContext,
    intervals: &mut SafeIntervals,
    coordinate: Coordinate,
    goal: Coordinate,
    arrival: f64,
) -> f64 {
    match ctx.heuristic {
        Some(informed) => informed
            .distance(coordinate, goal)
            .max(intervals.last_interval_start(goal) - arrival),
        None => ctx.metric.distance(coordinate, goal),
    }
}

/// Focal priority of reaching `succ` from `parent`.
pub(crate) fn focal_estimate(
    ctx: &SearchContext,
    graph: &Graph,
    parent: Coordinate,
    succ: &Vertex,
) -> f64 {
    match ctx.penalty(&Edge::new(parent, succ.state.coordinate), graph) {
        Some(penalty) => succ.h + penalty,
        None => succ.h,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::validator::{find_conflicts, only_valid_transitions};
    use crate::common::{path_length, TimeInterval};
    use crate::graph::Snapshot;
    use crate::test_utils::grid_snapshot;

    pub(crate) fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .try_init();
    }

    fn all_planners(w: f64) -> Vec<Box<dyn LowLevelPlanner>> {
        [
            LowLevelKind::Sipp,
            LowLevelKind::FocalSipp,
            LowLevelKind::EesSipp,
            LowLevelKind::SeesSipp,
        ]
        .into_iter()
        .map(|kind| create_low_level(kind, w))
        .collect()
    }

    fn open_grid() -> Snapshot {
        grid_snapshot(&["...", "...", "..."], &[], &[])
    }

    /// Path is well formed and never stands somewhere unsafe.
    fn assert_respects(path: &Path, agent: &Agent, intervals: &mut SafeIntervals, s: &Snapshot) {
        assert_eq!(path.first(), Some(&agent.start));
        assert_eq!(path.last(), Some(&agent.goal));
        assert!(only_valid_transitions(s, &[path.clone()]));
        for (t, &coordinate) in path.iter().enumerate() {
            assert!(
                intervals
                    .interval_at(coordinate, t as f64)
                    .intersects(t as f64),
                "{coordinate} unsafe at {t} in {path:?}"
            );
        }
    }

    #[test]
    fn test_corner_to_corner_on_open_grid() {
        init_tracing();
        let snapshot = open_grid();
        let graph = snapshot.create();
        let agent = Agent::new(0, (0, 0), (2, 2));
        for w in [1.0, 1.5] {
            for mut planner in all_planners(w) {
                let (path, expansions) = planner.search(
                    &graph,
                    &agent,
                    &mut SafeIntervals::new(),
                    &SearchContext::default(),
                );
                let path = path.unwrap();
                assert_eq!(path.len(), 5, "{} {path:?}", planner.name());
                assert!(expansions > 0);
            }
        }
    }

    #[test]
    fn test_informed_heuristic_gives_same_lengths() {
        init_tracing();
        let snapshot = grid_snapshot(&["...", ".@.", "..."], &[], &[]);
        let graph = snapshot.create();
        let agent = Agent::new(0, (0, 0), (2, 2));
        let informed = InformedHeuristic::new(&snapshot.create_with(true, true), &[agent], []);
        let ctx = SearchContext {
            heuristic: Some(&informed),
            ..SearchContext::default()
        };
        for mut planner in all_planners(1.0) {
            let path = planner
                .plan(&graph, &agent, &mut SafeIntervals::new(), &ctx)
                .unwrap();
            assert_eq!(path.len(), 5, "{}", planner.name());
        }
    }

    #[test]
    fn test_waits_out_reservation() {
        init_tracing();
        // One-row corridor; the middle cell is taken at t = 1 and t = 2.
        let snapshot = grid_snapshot(&["..."], &[], &[]);
        let graph = snapshot.create();
        let agent = Agent::new(0, (0, 0), (0, 2));
        for mut planner in all_planners(1.0) {
            let mut intervals = SafeIntervals::new();
            intervals.add(Coordinate::new(0, 1), 1.0);
            intervals.add(Coordinate::new(0, 1), 2.0);
            let path = planner
                .plan(&graph, &agent, &mut intervals, &SearchContext::default())
                .unwrap();
            assert_eq!(
                path,
                vec![
                    Coordinate::new(0, 0),
                    Coordinate::new(0, 0),
                    Coordinate::new(0, 0),
                    Coordinate::new(0, 1),
                    Coordinate::new(0, 2),
                ],
                "{}",
                planner.name()
            );
            assert_respects(&path, &agent, &mut intervals, &snapshot);
        }
    }

    #[test]
    fn test_avoids_reserved_path() {
        init_tracing();
        let snapshot = open_grid();
        let graph = snapshot.create();
        let other: Path = vec![
            Coordinate::new(2, 0),
            Coordinate::new(1, 0),
            Coordinate::new(0, 0),
            Coordinate::new(0, 1),
            Coordinate::new(0, 2),
        ];
        let agent = Agent::new(1, (0, 2), (2, 0));
        for w in [1.0, 2.0] {
            for mut planner in all_planners(w) {
                let mut intervals = SafeIntervals::from_paths(&[other.clone()]);
                let path = planner
                    .plan(&graph, &agent, &mut intervals, &SearchContext::default())
                    .unwrap();
                assert_respects(&path, &agent, &mut intervals, &snapshot);
                assert!(path_length(&path) as f64 <= w * 4.0 + 4.0);
            }
        }
    }

    #[test]
    fn test_goal_never_free_again() {
        init_tracing();
        let snapshot = open_grid();
        let graph = snapshot.create();
        let agent = Agent::new(0, (0, 0), (1, 1));
        for mut planner in all_planners(1.0) {
            let mut intervals = SafeIntervals::new();
            intervals.add_path(&vec![Coordinate::new(1, 2), Coordinate::new(1, 1)]);
            let (path, _) =
                planner.search(&graph, &agent, &mut intervals, &SearchContext::default());
            assert!(path.is_none(), "{}", planner.name());
        }
    }

    #[test]
    fn test_unreachable_goal() {
        init_tracing();
        let snapshot = grid_snapshot(&[".@."], &[], &[]);
        let graph = snapshot.create();
        let agent = Agent::new(0, (0, 0), (0, 2));
        for mut planner in all_planners(1.5) {
            let (path, _) = planner.search(
                &graph,
                &agent,
                &mut SafeIntervals::new(),
                &SearchContext::default(),
            );
            assert!(path.is_none(), "{}", planner.name());
        }
    }

    #[test]
    fn test_unsafe_start() {
        let snapshot = open_grid();
        let graph = snapshot.create();
        let agent = Agent::new(0, (0, 0), (2, 2));
        let mut intervals = SafeIntervals::new();
        intervals.add(agent.start, 0.0);
        for mut planner in all_planners(1.0) {
            assert!(planner
                .plan(&graph, &agent, &mut intervals, &SearchContext::default())
                .is_none());
        }
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        init_tracing();
        let snapshot = open_grid();
        let graph = snapshot.create();
        let agent = Agent::new(0, (2, 0), (0, 2));
        for mut planner in all_planners(1.5) {
            let first = planner.search(
                &graph,
                &agent,
                &mut SafeIntervals::new(),
                &SearchContext::default(),
            );
            let second = planner.search(
                &graph,
                &agent,
                &mut SafeIntervals::new(),
                &SearchContext::default(),
            );
            assert_eq!(first, second, "{}", planner.name());
        }
    }

    fn walk(cells: &[(i32, i32)]) -> Path {
        cells
            .iter()
            .map(|&(row, column)| Coordinate::new(row, column))
            .collect()
    }

    const BOUNDED: [LowLevelKind; 3] = [
        LowLevelKind::FocalSipp,
        LowLevelKind::EesSipp,
        LowLevelKind::SeesSipp,
    ];

    #[test]
    fn test_bounded_planners_reopen_improved_vertices() {
        init_tracing();
        // Greedy order reaches (0, 3) late through the top row, which is held
        // from t = 1 to t = 10. Only the bottom row gets there before the gate
        // (0, 4) is taken for good at t = 8.
        let snapshot = grid_snapshot(&[".......", ".....@@"], &[], &[]);
        let graph = snapshot.create();
        let agent = Agent::new(1, (0, 0), (0, 6));
        let mut gatekeeper = vec![Coordinate::new(1, 4); 8];
        gatekeeper.push(Coordinate::new(0, 4));
        let reserve = || {
            let mut intervals = SafeIntervals::from_paths(&[gatekeeper.clone()]);
            for t in 1..=10 {
                intervals.add(Coordinate::new(0, 1), t as f64);
            }
            intervals
        };

        let optimal = Sipp::default()
            .plan(&graph, &agent, &mut reserve(), &SearchContext::default())
            .unwrap();
        assert_eq!(path_length(&optimal), 8);

        for w in [1.0, 1.2, 2.0, 5.0] {
            for kind in BOUNDED {
                let mut planner = create_low_level(kind, w);
                let mut intervals = reserve();
                let path = planner
                    .plan(&graph, &agent, &mut intervals, &SearchContext::default())
                    .unwrap_or_else(|| panic!("{} at w = {w} found no path", planner.name()));
                assert!(
                    path_length(&path) as f64 <= w * 8.0,
                    "{} at w = {w}: {path:?}",
                    planner.name()
                );
                assert_respects(&path, &agent, &mut intervals, &snapshot);
                assert!(find_conflicts(&[gatekeeper.clone(), path]).is_empty());
            }
        }
    }

    #[test]
    fn test_bounded_planners_match_sipp_under_reservations() {
        init_tracing();
        let open = ["......", "......", "......", "......", "......", "......"];
        let walled = ["......", ".@@@@.", "......", ".@@@@.", "......", "......"];
        let gated = ["......", "......", "@@.@@@", "......"];
        let cases: Vec<(&[&str], Vec<Path>, Agent)> = vec![
            (
                &open[..],
                vec![
                    walk(&[(2, 5), (2, 4), (2, 3), (2, 2), (2, 1), (2, 0)]),
                    walk(&[(0, 3), (1, 3), (1, 3), (1, 3), (1, 4), (1, 5)]),
                    walk(&[(5, 0), (4, 0), (3, 0), (3, 1), (3, 2), (3, 3), (3, 4), (4, 4), (4, 5)]),
                ],
                Agent::new(3, (0, 0), (2, 5)),
            ),
            (
                &walled[..],
                vec![
                    walk(&[(2, 5), (2, 4), (2, 3), (2, 2), (2, 1), (2, 0), (3, 0), (4, 0)]),
                    walk(&[(0, 5), (1, 5), (2, 5)]),
                    walk(&[(5, 5), (5, 4), (5, 3)]),
                ],
                Agent::new(3, (0, 0), (4, 5)),
            ),
            (
                &gated[..],
                vec![
                    walk(&[(3, 0), (3, 1), (3, 2), (2, 2), (1, 2), (1, 1), (1, 0)]),
                    walk(&[(0, 5), (0, 4), (0, 4), (0, 4), (0, 4), (0, 4), (1, 4)]),
                    walk(&[(1, 5), (1, 4), (1, 3)]),
                ],
                Agent::new(3, (0, 0), (3, 5)),
            ),
            (
                // The goal's only neighbour is parked on for good.
                &gated[..],
                vec![walk(&[(3, 5), (3, 4)])],
                Agent::new(1, (0, 0), (3, 5)),
            ),
        ];

        for (rows, reserved, agent) in cases {
            let snapshot = grid_snapshot(rows, &[], &[]);
            let graph = snapshot.create();
            let reserved_intervals = SafeIntervals::from_paths(&reserved);
            let optimal = Sipp::default().plan(
                &graph,
                &agent,
                &mut reserved_intervals.clone(),
                &SearchContext::default(),
            );

            for w in [1.0, 1.2, 2.0, 5.0] {
                for kind in BOUNDED {
                    let mut planner = create_low_level(kind, w);
                    let mut intervals = reserved_intervals.clone();
                    let path =
                        planner.plan(&graph, &agent, &mut intervals, &SearchContext::default());
                    let (optimal, path) = match (&optimal, path) {
                        (Some(optimal), Some(path)) => (optimal, path),
                        (None, None) => continue,
                        (optimal, path) => panic!(
                            "{} at w = {w} for {agent:?}: SIPP {optimal:?}, got {path:?}",
                            planner.name()
                        ),
                    };
                    assert!(
                        path_length(&path) as f64 <= w * path_length(optimal) as f64,
                        "{} at w = {w} for {agent:?}: {path:?} vs {optimal:?}",
                        planner.name()
                    );
                    assert_respects(&path, &agent, &mut intervals, &snapshot);

                    let mut paths = reserved.clone();
                    paths.push(path);
                    let planned = paths.len() - 1;
                    assert!(
                        find_conflicts(&paths)
                            .iter()
                            .all(|conflict| !conflict.agents().contains(&planned)),
                        "{} at w = {w} collides: {paths:?}",
                        planner.name()
                    );
                }
            }
        }
    }

    #[test]
    fn test_path_to_materializes_waits() {
        let mut table = VertexTable::default();
        let a = State::new(Coordinate::new(0, 0), TimeInterval::new(0.0, INF));
        let b = State::new(Coordinate::new(0, 1), TimeInterval::new(3.0, INF));
        let root = table.get_or_insert_with(a, || Vertex::new(a, 1.0, 1.0));
        table[root].g = 0.0;
        let child = table.get_or_insert_with(b, || Vertex::new(b, 0.0, 1.0));
        table[child].g = 3.0;
        table[child].parent = Some(root);
        assert_eq!(
            table.path_to(child),
            vec![
                Coordinate::new(0, 0),
                Coordinate::new(0, 0),
                Coordinate::new(0, 0),
                Coordinate::new(0, 1)
            ]
        );
        assert_eq!(table.len(), 2);
    }
}
