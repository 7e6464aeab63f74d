use crate::algorithm::LowLevelKind;
use crate::heuristic::DistanceMetric;
use crate::planner::FrameworkKind;
use crate::policy::PolicyKind;
use crate::solver::HighLevelKind;

use anyhow::{anyhow, Context};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Parser, Debug, Default)]
#[command(
    name = "mapf-online",
    about = "Online multi-agent path finding on graphs with uncertain edges.",
    version = "1.0"
)]
pub struct Cli {
    #[arg(long, help = "Path to a YAML config file; flags override its values")]
    pub config: Option<String>,

    #[arg(long, help = "Path to the map file")]
    pub map_path: Option<String>,

    #[arg(long, help = "Path to the MovingAI scenario file")]
    pub scen_path: Option<String>,

    #[arg(long, help = "Path to a YAML agent list, used instead of the scenario")]
    pub agents_yaml: Option<String>,

    #[arg(long, help = "Path of the JSON run report")]
    pub output_path: Option<String>,

    #[arg(long, help = "Number of agents")]
    pub num_agents: Option<usize>,

    #[arg(long, help = "Seed for the random number generator")]
    pub seed: Option<u64>,

    #[arg(long, value_enum, help = "Execution framework")]
    pub framework: Option<FrameworkKind>,

    #[arg(long, value_enum, help = "High-level planner")]
    pub high_level: Option<HighLevelKind>,

    #[arg(long, value_enum, help = "Low-level planner")]
    pub low_level: Option<LowLevelKind>,

    #[arg(long, value_enum, help = "Edge penalty policy")]
    pub policy: Option<PolicyKind>,

    #[arg(long, help = "Suboptimality bound of the bounded low-level planners")]
    pub suboptimality: Option<f64>,

    #[arg(long, help = "Wall-clock budget of the whole run, in seconds")]
    pub timeout_secs: Option<u64>,

    #[arg(long, help = "Collision lookahead of the local frameworks, in timesteps")]
    pub radius: Option<usize>,

    #[arg(long, help = "Allow diagonal moves")]
    pub eight_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub map_path: String,
    pub scen_path: Option<String>,
    pub agents_yaml: Option<String>,
    pub output_path: Option<String>,
    pub num_agents: usize,
    pub seed: u64,
    pub framework: FrameworkKind,
    pub high_level: HighLevelKind,
    pub low_level: LowLevelKind,
    pub policy: PolicyKind,
    pub suboptimality: f64,
    pub timeout_secs: u64,
    pub radius: usize,
    pub eight_connected: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            map_path: "map_file/test/uncertain.map".to_string(),
            scen_path: None,
            agents_yaml: None,
            output_path: None,
            num_agents: 2,
            seed: 0,
            framework: FrameworkKind::default(),
            high_level: HighLevelKind::default(),
            low_level: LowLevelKind::default(),
            policy: PolicyKind::default(),
            suboptimality: 1.5,
            timeout_secs: 60,
            radius: crate::planner::DEFAULT_RADIUS,
            eight_connected: false,
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).context("invalid config")
    }

    pub fn override_from_command_line(mut self, cli: &Cli) -> anyhow::Result<Self> {
        if let Some(map_path) = &cli.map_path {
            self.map_path = map_path.clone();
        }
        if let Some(scen_path) = &cli.scen_path {
            self.scen_path = Some(scen_path.clone());
        }
        if let Some(agents_yaml) = &cli.agents_yaml {
            self.agents_yaml = Some(agents_yaml.clone());
        }
        if let Some(output_path) = &cli.output_path {
            self.output_path = Some(output_path.clone());
        }
        if let Some(num_agents) = cli.num_agents {
            self.num_agents = num_agents;
        }
        if let Some(seed) = cli.seed {
            self.seed = seed;
        }
        if let Some(framework) = cli.framework {
            self.framework = framework;
        }
        if let Some(high_level) = cli.high_level {
            self.high_level = high_level;
        }
        if let Some(low_level) = cli.low_level {
            self.low_level = low_level;
        }
        if let Some(policy) = cli.policy {
            self.policy = policy;
        }
        if let Some(suboptimality) = cli.suboptimality {
            self.suboptimality = suboptimality;
        }
        if let Some(timeout_secs) = cli.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
        if let Some(radius) = cli.radius {
            self.radius = radius;
        }
        if cli.eight_connected {
            self.eight_connected = true;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.suboptimality < 1.0 {
            return Err(anyhow!(
                "Suboptimality must be at least 1.0, got {}",
                self.suboptimality
            ));
        }
        if self.num_agents == 0 {
            return Err(anyhow!("At least one agent is required"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("Timeout must be positive"));
        }
        if self.radius == 0 {
            return Err(anyhow!("Local radius must be positive"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Admissible uninformed estimate for the map's connectivity.
    pub fn metric(&self) -> DistanceMetric {
        if self.eight_connected {
            DistanceMetric::Chebyshev
        } else {
            DistanceMetric::Manhattan
        }
    }
}
