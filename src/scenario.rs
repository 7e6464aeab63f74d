use crate::common::{Agent, Coordinate};
use crate::error::{MapfError, Result};

use rand::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route {
    pub start: Coordinate,
    pub goal: Coordinate,
}

type Bucket = Vec<Route>;

/// A MovingAI `.scen` file: routes grouped by bucket.
#[derive(Debug, Default)]
pub struct Scenario {
    pub map: String,
    pub map_width: usize,
    pub map_height: usize,
    pub buckets: BTreeMap<usize, Bucket>,
}

impl Scenario {
    pub fn load_from_scen(path: impl AsRef<Path>) -> Result<Scenario> {
        let file = File::open(path)?;
        Scenario::parse(BufReader::new(file))
    }

    pub fn parse(reader: impl BufRead) -> Result<Scenario> {
        let mut scenario = Scenario::default();

        // The first line is "version x.x".
        for (number, line) in reader.lines().enumerate().skip(1) {
            let line = line?;
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.is_empty() {
                continue;
            }
            if parts.len() < 8 {
                return Err(parse_error(number + 1, "expected at least 8 fields"));
            }
            let field = |i: usize| -> Result<i32> {
                parts[i]
                    .parse()
                    .map_err(|_| parse_error(number + 1, format!("bad number {:?}", parts[i])))
            };
            let bucket_index = field(0)? as usize;
            // Columns are x, rows are y.
            let route = Route {
                start: Coordinate::new(field(5)?, field(4)?),
                goal: Coordinate::new(field(7)?, field(6)?),
            };

            if scenario.map.is_empty() {
                scenario.map = parts[1].to_string();
                scenario.map_width = field(2)? as usize;
                scenario.map_height = field(3)? as usize;
            }
            scenario.buckets.entry(bucket_index).or_default().push(route);
        }

        Ok(scenario)
    }

    pub fn generate_agents_by_buckets<R: Rng + ?Sized>(
        &self,
        agent_buckets: &[usize],
        rng: &mut R,
    ) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = Vec::new();
        let mut used_routes: HashMap<usize, HashSet<usize>> = HashMap::new();

        for (agent_id, &bucket_index) in agent_buckets.iter().enumerate() {
            let bucket = self
                .buckets
                .get(&bucket_index)
                .ok_or(MapfError::BucketNotFound(bucket_index))?;

            let available_routes: Vec<usize> = (0..bucket.len())
                .filter(|idx| {
                    used_routes
                        .get(&bucket_index)
                        .map_or(true, |used| !used.contains(idx))
                })
                .collect();

            let &route_index =
                available_routes
                    .choose(rng)
                    .ok_or(MapfError::NotEnoughRoutes {
                        requested: agent_buckets.len(),
                        available: agent_id,
                    })?;

            let route = bucket[route_index];
            agents.push(Agent::new(agent_id, route.start, route.goal));
            used_routes
                .entry(bucket_index)
                .or_default()
                .insert(route_index);
        }

        info!("Generate scen: {agents:?}");
        Ok(agents)
    }

    /// Every route once, in random order. Callers filter for validity and
    /// take as many as they need.
    pub fn generate_agents_randomly<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Agent> {
        let mut routes: Vec<Route> = self.buckets.values().flatten().copied().collect();
        routes.sort();
        routes.dedup();
        routes.shuffle(rng);

        routes
            .into_iter()
            .enumerate()
            .map(|(id, route)| Agent::new(id, route.start, route.goal))
            .collect()
    }

    pub fn load_agents_from_yaml(path: impl AsRef<Path>) -> Result<Vec<Agent>> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let agents = serde_yaml::from_reader(reader)?;
        Ok(agents)
    }

    pub fn write_agents_to_yaml(path: impl AsRef<Path>, agents: &[Agent]) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = io::BufWriter::new(file);
        let yaml_data = serde_yaml::to_string(&agents)?;
        writer.write_all(yaml_data.as_bytes())?;

        Ok(())
    }
}

fn parse_error(line: usize, reason: impl Into<String>) -> MapfError {
    MapfError::Parse {
        kind: "scenario",
        line,
        reason: reason.into(),
    }
}
