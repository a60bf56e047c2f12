//! Command-line driver for horde crowd scenarios

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use glam::{UVec3, Vec3};
use horde_grid::{EntityRef, GridConfig, GridEntry, Layer, QueryParams, SpatialGrid};
use rayon::prelude::*;
use serde::Serialize;

mod scenario;

use scenario::ScenarioConfig;

/// Runs crowd scenarios, plans paths and benchmarks grid queries
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Log debug output
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario file and report where the agents end up
    Simulate {
        /// Scenario file (JSON)
        #[clap(long, value_parser)]
        scenario: PathBuf,

        /// Overrides the tick count of the scenario
        #[clap(long)]
        ticks: Option<usize>,

        /// Output file for the final agent states (JSON)
        #[clap(long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Plan a path over the flow field of a scenario
    Path {
        /// Scenario file (JSON) with a flow field
        #[clap(long, value_parser)]
        scenario: PathBuf,

        /// Start position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        start: Vec3,

        /// End position (x,y,z)
        #[clap(long, value_parser = parse_vector)]
        end: Vec3,

        /// Output path file
        #[clap(long, value_parser)]
        output: Option<PathBuf>,
    },

    /// Time sphere queries against a randomly filled grid
    BenchQuery {
        /// Number of entities to insert
        #[clap(long, default_value = "10000")]
        entities: usize,

        /// Number of queries to run
        #[clap(long, default_value = "10000")]
        queries: usize,

        /// Query radius
        #[clap(long, default_value = "300.0")]
        radius: f32,

        /// Random seed
        #[clap(long, default_value = "1")]
        seed: u64,
    },
}

/// Final state of one agent
#[derive(Debug, Serialize)]
struct AgentReport {
    entity: u64,
    position: Vec3,
    state: String,
}

/// Parse a comma-separated vector
fn parse_vector(s: &str) -> Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').collect();

    if parts.len() != 3 {
        return Err(format!(
            "Vector must have 3 components, got {}",
            parts.len()
        ));
    }

    let mut values = [0.0; 3];
    for (value, part) in values.iter_mut().zip(&parts) {
        *value = part.trim().parse::<f32>().map_err(|e| e.to_string())?;
    }

    Ok(Vec3::from_array(values))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match args.command {
        Commands::Simulate {
            scenario,
            ticks,
            output,
        } => simulate(&scenario, ticks, output.as_deref()),
        Commands::Path {
            scenario,
            start,
            end,
            output,
        } => find_path(&scenario, start, end, output.as_deref()),
        Commands::BenchQuery {
            entities,
            queries,
            radius,
            seed,
        } => bench_query(entities, queries, radius, seed),
    }
}

/// Run a scenario to completion
fn simulate(scenario_path: &Path, ticks: Option<usize>, output: Option<&Path>) -> Result<()> {
    let scenario = ScenarioConfig::load(scenario_path)?;
    let (mut crowd, agents) = scenario.build_crowd()?;
    let ticks = ticks.unwrap_or(scenario.ticks);

    println!(
        "Simulating {} agents for {} ticks of {}s...",
        agents.len(),
        ticks,
        scenario.dt
    );

    let started = Instant::now();
    let mut path_recomputes = 0;
    for _ in 0..ticks {
        path_recomputes += crowd.tick(scenario.dt).path_recomputes;
    }
    let elapsed = started.elapsed();

    println!(
        "Finished in {:?} ({:?} per tick), {} path recomputes",
        elapsed,
        elapsed / ticks.max(1) as u32,
        path_recomputes
    );

    let reports: Vec<AgentReport> = crowd
        .agents()
        .iter()
        .map(|agent| AgentReport {
            entity: agent.entity.0,
            position: agent.position,
            state: format!("{:?}", agent.state),
        })
        .collect();

    if let Some(output_path) = output {
        println!("Saving agent states to {}...", output_path.display());
        let file = File::create(output_path)
            .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;
        serde_json::to_writer_pretty(file, &reports).context("Failed to write agent states")?;
    } else {
        for report in &reports {
            println!(
                "{}: {},{},{} {}",
                report.entity, report.position.x, report.position.y, report.position.z, report.state
            );
        }
    }

    Ok(())
}

/// Plan a path over the scenario's flow field
fn find_path(scenario_path: &Path, start: Vec3, end: Vec3, output: Option<&Path>) -> Result<()> {
    let scenario = ScenarioConfig::load(scenario_path)?;
    let field = scenario
        .build_field()?
        .ok_or_else(|| anyhow!("Scenario {} has no flow field", scenario_path.display()))?;

    println!("Finding path from {} to {}...", start, end);
    let path = field
        .find_path(start, end)
        .ok_or_else(|| anyhow!("No path from {} to {}", start, end))?;
    println!("Found path with {} waypoints", path.len());

    if let Some(output_path) = output {
        println!("Saving path to {}...", output_path.display());

        let mut file = File::create(output_path)
            .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;

        writeln!(file, "# Path from {} to {}", start, end)?;
        writeln!(file, "# {} waypoints", path.len())?;
        for waypoint in &path {
            writeln!(file, "{},{},{}", waypoint.x, waypoint.y, waypoint.z)?;
        }
    } else {
        println!("Path:");
        for (i, waypoint) in path.iter().enumerate() {
            println!("{}: {},{},{}", i, waypoint.x, waypoint.y, waypoint.z);
        }
    }

    Ok(())
}

/// Fill a grid with random entities and time parallel sphere queries
fn bench_query(entities: usize, queries: usize, radius: f32, seed: u64) -> Result<()> {
    let config = GridConfig::from_min_corner(Vec3::ZERO, Vec3::new(300.0, 300.0, 1000.0), UVec3::new(64, 64, 1));
    let mut grid = SpatialGrid::new(config).context("Invalid benchmark grid")?;
    let extent = grid.config().extent();

    let mut rng = fastrand::Rng::with_seed(seed);
    let mut random_point = || {
        Vec3::new(
            rng.f32() * extent.x,
            rng.f32() * extent.y,
            rng.f32() * extent.z,
        )
    };
    let entries: Vec<GridEntry> = (0..entities)
        .map(|i| GridEntry::new(EntityRef(i as u64 + 1), random_point(), 40.0))
        .collect();
    let origins: Vec<Vec3> = (0..queries).map(|_| random_point()).collect();

    let started = Instant::now();
    let writer = grid.writer();
    let inserted = entries
        .par_iter()
        .filter(|entry| writer.insert(Layer::Agents, **entry))
        .count();
    let insert_time = started.elapsed();
    println!("Inserted {} entities in {:?}", inserted, insert_time);

    let params = QueryParams::new();
    let started = Instant::now();
    let hits: usize = origins
        .par_iter()
        .map(|origin| grid.query_sphere(*origin, radius, &params).len())
        .sum();
    let query_time = started.elapsed();

    println!(
        "Ran {} queries in {:?} ({:.1} hits per query)",
        queries,
        query_time,
        hits as f64 / queries.max(1) as f64
    );
    Ok(())
}
