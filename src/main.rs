use mapf_online::common::validator::is_legal_plan;
use mapf_online::config::{Cli, Config};
use mapf_online::heuristic::InformedHeuristic;
use mapf_online::map::Map;
use mapf_online::planner::create_planner;
use mapf_online::scenario::Scenario;

use anyhow::{anyhow, Context};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let config = if let Some(config_file) = cli.config.as_ref() {
        let config_str = std::fs::read_to_string(config_file)
            .with_context(|| format!("cannot read config file: {config_file}"))?;
        Config::from_yaml_str(&config_str)
            .with_context(|| format!("error with config file: {config_file}"))?
    } else {
        info!("No config file specified, using default config");
        Config::default()
    }
    .override_from_command_line(&cli)?;

    let map = Map::from_file(&config.map_path, config.eight_connected)
        .with_context(|| format!("error loading map: {}", config.map_path))?;

    let candidates = if let Some(path) = config.agents_yaml.as_ref() {
        Scenario::load_agents_from_yaml(path)
            .with_context(|| format!("error loading agents: {path}"))?
    } else if let Some(path) = config.scen_path.as_ref() {
        let scenario = Scenario::load_from_scen(path)
            .with_context(|| format!("error loading scenario: {path}"))?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        scenario.generate_agents_randomly(&mut rng)
    } else {
        return Err(anyhow!("either --agents-yaml or --scen-path is required"));
    };

    // Keep agents that can reach their goals on the true graph.
    let mut agents = map.valid_agents(&candidates);
    if agents.len() < config.num_agents {
        return Err(anyhow!(
            "only {} valid agents, {} requested",
            agents.len(),
            config.num_agents
        ));
    }
    agents.truncate(config.num_agents);

    let snapshot = map.snapshot();
    let heuristic = InformedHeuristic::new(
        &snapshot.create_with(true, true),
        &agents,
        snapshot.maybe_blocked_edges(),
    );

    let mut planner = create_planner(&config);
    info!(
        "{} with {} agents, {} maybe-open and {} maybe-blocked edges",
        planner.name(),
        agents.len(),
        snapshot.maybe_open_edges().len(),
        snapshot.maybe_blocked_edges().len()
    );
    let report = planner.run(&snapshot, &agents, Some(&heuristic), config.timeout());

    if report.success {
        if is_legal_plan(&snapshot, &agents, &report.paths) {
            info!("plan is legal");
        } else {
            error!("plan is not legal");
        }
    } else {
        error!("{} failed", report.planner);
    }

    if let Some(output_path) = config.output_path.as_ref() {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(output_path, json)
            .with_context(|| format!("cannot write report: {output_path}"))?;
        info!("report written to {output_path}");
    }

    Ok(())
}
