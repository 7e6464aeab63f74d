mod full;
mod local;

pub use full::FullPlanner;
pub use local::{LocalPlanner, DEFAULT_RADIUS};

use crate::algorithm::{create_low_level, SearchContext};
use crate::common::validator::all_agents_reached_goals;
use crate::common::{makespan, path_length, sum_of_cost, Agent, Deadline, Edge, Path, Paths};
use crate::config::Config;
use crate::graph::{Graph, Snapshot};
use crate::heuristic::{DistanceMetric, InformedHeuristic};
use crate::policy::{create_policy, EdgeSet, Policy};
use crate::solver::create_solver;
use crate::stat::Stats;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tracing::{debug, info};

/// What an agent learned about an uncertain edge next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObservationKind {
    /// An edge assumed open turned out to be blocked.
    Blocked,
    /// An edge assumed blocked turned out to be open.
    Opened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub edge: Edge,
    pub kind: ObservationKind,
    pub timestep: usize,
    pub agent: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplanEvent {
    pub timestep: usize,
    pub observations: Vec<Observation>,
    pub affected: BTreeSet<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub planner: String,
    pub success: bool,
    /// Realized paths, pruned after each agent's final arrival. Empty on
    /// failure.
    pub paths: Paths,
    pub stats: Stats,
    pub events: Vec<ReplanEvent>,
}

/// Drives agents through a partially known graph: plan, then repeatedly
/// observe, replan where needed and advance one timestep.
pub trait OnlinePlanner {
    fn run(
        &mut self,
        snapshot: &Snapshot,
        agents: &[Agent],
        heuristic: Option<&InformedHeuristic>,
        timeout: Duration,
    ) -> RunReport;

    fn name(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FrameworkKind {
    #[default]
    Full,
    FullId,
    Local,
    LocalId,
}

pub fn create_planner(config: &Config) -> Box<dyn OnlinePlanner> {
    let low_level = create_low_level(config.low_level, config.suboptimality);
    let solver = create_solver(config.high_level, low_level, config.seed);
    let policy = create_policy(config.policy);
    let metric = config.metric();
    match config.framework {
        FrameworkKind::Full => Box::new(FullPlanner::new(solver, policy, metric, false)),
        FrameworkKind::FullId => Box::new(FullPlanner::new(solver, policy, metric, true)),
        FrameworkKind::Local => Box::new(LocalPlanner::new(
            solver,
            policy,
            metric,
            config.radius,
            false,
        )),
        FrameworkKind::LocalId => Box::new(LocalPlanner::new(
            solver,
            policy,
            metric,
            config.radius,
            true,
        )),
    }
}

/// Edges confirmed so far in one run.
#[derive(Debug, Default)]
pub(crate) struct Observer {
    observed: HashSet<Edge>,
}

impl Observer {
    /// Uncertain edges leaving any agent's coordinate that nobody has
    /// observed yet.
    pub(crate) fn observe(
        &mut self,
        agents: &[Agent],
        graph: &Graph,
        snapshot: &Snapshot,
        timestep: usize,
    ) -> Vec<Observation> {
        let mut observations = Vec::new();
        for agent in agents.iter().filter(|agent| !agent.is_placeholder()) {
            for next in graph.successors_of(agent.start) {
                let edge = Edge::new(agent.start, next);
                let kind = if snapshot.is_maybe_open_edge(&edge) {
                    ObservationKind::Blocked
                } else if snapshot.is_maybe_blocked_edge(&edge) {
                    ObservationKind::Opened
                } else {
                    continue;
                };
                if self.observed.insert(edge) {
                    observations.push(Observation {
                        edge,
                        kind,
                        timestep,
                        agent: agent.id,
                    });
                }
            }
        }
        observations
    }
}

fn edges_of(observations: &[Observation], kind: ObservationKind) -> EdgeSet {
    observations
        .iter()
        .filter(|observation| observation.kind == kind)
        .map(|observation| observation.edge)
        .collect()
}

/// Apply the truth of observed edges to the live graph.
pub(crate) fn update_graph(graph: &mut Graph, blocked: &EdgeSet, opened: &EdgeSet) {
    for edge in blocked {
        graph.remove_edge(edge);
    }
    for edge in opened {
        graph.add_edge(*edge);
    }
}

/// Agents whose plan uses a newly blocked edge, or whose plan could get
/// strictly shorter through a newly opened edge by an admissible estimate.
pub(crate) fn affected_agents(
    graph: &Graph,
    planned: &Paths,
    blocked: &EdgeSet,
    opened: &EdgeSet,
    heuristic: Option<&InformedHeuristic>,
    metric: DistanceMetric,
) -> BTreeSet<usize> {
    let distance = |from, to| match heuristic {
        Some(heuristic) => heuristic.distance(from, to),
        None => metric.distance(from, to),
    };

    let mut affected = BTreeSet::new();
    for (i, path) in planned.iter().enumerate() {
        let (Some(&start), Some(&goal)) = (path.first(), path.last()) else {
            continue;
        };
        let uses_blocked = path
            .windows(2)
            .any(|step| blocked.contains(&Edge::new(step[0], step[1])));
        let length = path_length(path) as f64;
        let shortcut = opened.iter().any(|edge| {
            distance(start, edge.source) + graph.weight_of(edge) + distance(edge.destination, goal)
                < length
        });
        if uses_blocked || shortcut {
            affected.insert(i);
        }
    }
    affected
}

/// Trim the trailing repeats of each path's final coordinate.
pub fn prune(paths: &[Path]) -> Paths {
    paths
        .iter()
        .map(|path| match path.last() {
            Some(goal) => {
                let arrival = path
                    .iter()
                    .rposition(|coordinate| coordinate != goal)
                    .map_or(0, |i| i + 1);
                path[..=arrival].to_vec()
            }
            None => Vec::new(),
        })
        .collect()
}

/// Mutable state of one run, shared by every framework.
pub(crate) struct Execution<'a> {
    snapshot: &'a Snapshot,
    pub(crate) graph: Graph,
    pub(crate) agents: Vec<Agent>,
    pub(crate) planned: Paths,
    pub(crate) realized: Paths,
    pub(crate) timestep: usize,
    pub(crate) stats: Stats,
    events: Vec<ReplanEvent>,
    observer: Observer,
}

impl<'a> Execution<'a> {
    pub(crate) fn new(snapshot: &'a Snapshot, agents: &[Agent]) -> Self {
        Execution {
            snapshot,
            graph: snapshot.create(),
            agents: agents.to_vec(),
            planned: vec![Vec::new(); agents.len()],
            realized: vec![Vec::new(); agents.len()],
            timestep: 0,
            stats: Stats::default(),
            events: Vec::new(),
            observer: Observer::default(),
        }
    }

    pub(crate) fn finished(&self) -> bool {
        all_agents_reached_goals(&self.agents, &self.realized)
    }

    /// Observe around every agent. On news, update the graph and the policy
    /// and return the agents whose plans are affected.
    pub(crate) fn observe(
        &mut self,
        policy: &mut dyn Policy,
        heuristic: Option<&InformedHeuristic>,
        metric: DistanceMetric,
    ) -> Option<BTreeSet<usize>> {
        let observations =
            self.observer
                .observe(&self.agents, &self.graph, self.snapshot, self.timestep);
        if observations.is_empty() {
            return None;
        }

        let blocked = edges_of(&observations, ObservationKind::Blocked);
        let opened = edges_of(&observations, ObservationKind::Opened);
        update_graph(&mut self.graph, &blocked, &opened);
        policy.update(&blocked, &opened);
        let affected =
            affected_agents(&self.graph, &self.planned, &blocked, &opened, heuristic, metric);
        info!(
            "t = {}: {} blocked, {} opened, affected agents {affected:?}",
            self.timestep,
            blocked.len(),
            opened.len()
        );
        self.events.push(ReplanEvent {
            timestep: self.timestep,
            observations,
            affected: affected.clone(),
        });
        Some(affected)
    }

    /// Move every agent one step along its plan; agents at the end of their
    /// plan wait.
    pub(crate) fn step(&mut self) {
        for ((agent, planned), realized) in self
            .agents
            .iter_mut()
            .zip(&mut self.planned)
            .zip(&mut self.realized)
        {
            let Some(&current) = planned.first() else {
                continue;
            };
            realized.push(current);
            if planned.len() > 1 {
                planned.remove(0);
            }
            agent.start = planned[0];
        }
        debug!("t = {}: stepped", self.timestep);
    }

    pub(crate) fn finish(mut self, planner: String, success: bool, deadline: &Deadline) -> RunReport {
        let paths = if success {
            prune(&self.realized)
        } else {
            Vec::new()
        };
        self.stats.costs = sum_of_cost(&paths);
        self.stats.makespan = makespan(&paths);
        self.stats.record_runtime(deadline.elapsed());
        info!("{planner} finished at t = {}, success: {success}", self.timestep);
        self.stats.print();
        RunReport {
            planner,
            success,
            paths,
            stats: self.stats,
            events: self.events,
        }
    }
}

/// Guidance for one planning call.
pub(crate) fn search_context<'a>(
    policy: &'a dyn Policy,
    heuristic: Option<&'a InformedHeuristic>,
    metric: DistanceMetric,
    deadline: &'a Deadline,
) -> SearchContext<'a> {
    SearchContext {
        heuristic,
        policy: Some(policy),
        metric,
        deadline: Some(deadline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::tests::init_tracing;
    use crate::algorithm::LowLevelKind;
    use crate::common::validator::is_legal_plan;
    use crate::common::Coordinate;
    use crate::policy::PolicyKind;
    use crate::solver::HighLevelKind;
    use crate::test_utils::grid_snapshot;

    #[test]
    fn test_every_framework_on_uncertain_map() {
        init_tracing();
        let map = crate::map::Map::from_file("map_file/test/uncertain.map", false).unwrap();
        let snapshot = map.snapshot();
        // Agent 0's shortest route crosses the `!` cell, which is really blocked.
        let agents = map.valid_agents(&[
            Agent::new(0, (0, 1), (2, 1)),
            Agent::new(1, (3, 0), (0, 0)),
        ]);
        assert_eq!(agents.len(), 2);
        let heuristic = InformedHeuristic::new(
            &snapshot.create_with(true, true),
            &agents,
            snapshot.maybe_blocked_edges(),
        );

        let frameworks = [
            FrameworkKind::Full,
            FrameworkKind::FullId,
            FrameworkKind::Local,
            FrameworkKind::LocalId,
        ];
        for (i, framework) in frameworks.into_iter().enumerate() {
            for high_level in [HighLevelKind::Cbs, HighLevelKind::Pp] {
                let config = Config {
                    framework,
                    high_level,
                    low_level: if i % 2 == 0 {
                        LowLevelKind::Sipp
                    } else {
                        LowLevelKind::EesSipp
                    },
                    policy: PolicyKind::RiskAverse,
                    ..Config::default()
                };
                let mut planner = create_planner(&config);
                let report = planner.run(
                    &snapshot,
                    &agents,
                    Some(&heuristic),
                    Duration::from_secs(10),
                );
                assert!(report.success, "{}", report.planner);
                assert!(!report.events.is_empty());
                assert_eq!(report.events[0].timestep, 0);
                assert!(is_legal_plan(&snapshot, &agents, &report.paths));
                assert!(!report.paths[0].contains(&Coordinate::new(1, 1)));
            }
        }
    }

    #[test]
    fn test_prune_trailing_goal() {
        let goal = Coordinate::new(0, 2);
        let paths = vec![
            vec![
                Coordinate::new(0, 0),
                goal,
                Coordinate::new(0, 1),
                goal,
                goal,
                goal,
            ],
            vec![goal],
            Vec::new(),
        ];
        let pruned = prune(&paths);
        assert_eq!(pruned[0].len(), 4);
        assert_eq!(pruned[1], vec![goal]);
        assert!(pruned[2].is_empty());
    }

    #[test]
    fn test_observe_once_per_edge() {
        init_tracing();
        let risky = Edge::new((0, 0), (0, 1));
        let snapshot = grid_snapshot(&["..", ".."], &[risky], &[]);
        let graph = snapshot.create();
        let agents = vec![Agent::new(0, (0, 0), (1, 1)), Agent::new(1, (1, 1), (0, 0))];
        let mut observer = Observer::default();

        let observations = observer.observe(&agents, &graph, &snapshot, 0);
        assert_eq!(
            observations,
            vec![Observation {
                edge: risky,
                kind: ObservationKind::Blocked,
                timestep: 0,
                agent: 0,
            }]
        );
        assert!(observer.observe(&agents, &graph, &snapshot, 1).is_empty());
    }

    #[test]
    fn test_affected_agents() {
        let snapshot = grid_snapshot(&["...", "...", "..."], &[], &[]);
        let graph = snapshot.create();
        let straight = vec![
            Coordinate::new(0, 0),
            Coordinate::new(0, 1),
            Coordinate::new(0, 2),
        ];
        let detour = vec![
            Coordinate::new(2, 0),
            Coordinate::new(2, 1),
            Coordinate::new(1, 1),
            Coordinate::new(1, 2),
            Coordinate::new(2, 2),
        ];
        let planned = vec![straight, detour];

        let blocked = EdgeSet::from([Edge::new((0, 1), (0, 2))]);
        let affected = affected_agents(
            &graph,
            &planned,
            &blocked,
            &EdgeSet::new(),
            None,
            DistanceMetric::Manhattan,
        );
        assert_eq!(affected, BTreeSet::from([0]));

        let opened = EdgeSet::from([Edge::new((2, 1), (2, 2))]);
        let affected = affected_agents(
            &graph,
            &planned,
            &EdgeSet::new(),
            &opened,
            None,
            DistanceMetric::Manhattan,
        );
        assert_eq!(affected, BTreeSet::from([1]));
    }
}
