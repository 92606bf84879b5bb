//! Hide & Seek simulator CLI
//!
//! Runs scenario checks, or benchmarks many arenas in parallel.

use clap::Parser;
use hideseek_core::ArenaConfig;
use hideseek_sim::{run_parallel, PolicyKind, ScenarioId, ScenarioResult, ScenarioRunner, SimError};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Hide & Seek headless simulator
#[derive(Parser, Debug)]
#[command(name = "hideseek-sim")]
#[command(about = "Run hide-and-seek arenas headless", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Run this many arenas in parallel instead of scenarios
    #[arg(short, long, default_value = "0")]
    arenas: usize,

    /// Episodes per arena or per scenario
    #[arg(short, long, default_value = "2")]
    episodes: usize,

    /// Scenario to run (grace_period, timeout, capture_rush, shelter, chaos, solo, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Policy driving both teams in parallel mode (idle, random, heuristic)
    #[arg(short, long, default_value = "heuristic")]
    policy: PolicyKind,

    /// Arena configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export per-tick frames of a single scenario to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether every run passed.
fn run(args: &Args) -> Result<bool, SimError> {
    let config = match &args.config {
        Some(path) => ArenaConfig::from_json_file(path)?,
        None => ArenaConfig::default(),
    };

    // Determine base seed
    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    if !args.json {
        info!("Hide & Seek simulator v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "Arena {}m, {}v{}, {} steps, seed={}",
            config.arena_size, config.num_hiders, config.num_seekers, config.max_episode_steps, seed
        );
    }

    if args.arenas > 0 {
        return run_benchmark(args, config, seed);
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().map_err(SimError::UnknownScenario)?]
    };

    let runner = ScenarioRunner::new(seed)
        .with_config(config)
        .with_episodes(args.episodes);

    // Handle --export mode
    if let Some(path) = &args.export {
        if scenarios.len() > 1 {
            error!("--export only supports a single scenario, not 'all'");
            return Ok(false);
        }
        let result = runner.run_with_export(scenarios[0], path)?;
        report(&[result.clone()], args.json)?;
        return Ok(result.passed);
    }

    let results: Vec<ScenarioResult> = scenarios.iter().map(|s| runner.run(*s)).collect();
    report(&results, args.json)?;
    Ok(results.iter().all(|r| r.passed))
}

fn run_benchmark(args: &Args, config: ArenaConfig, seed: u64) -> Result<bool, SimError> {
    let reports = run_parallel(config, args.arenas, args.episodes, seed, args.policy)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for r in &reports {
            info!(
                "arena {} (seed={}): {} episodes, hiders {} / seekers {}, {} ticks",
                r.arena,
                r.seed,
                r.episodes.len(),
                r.hider_wins,
                r.seeker_wins,
                r.total_ticks
            );
        }
    }
    Ok(reports.iter().all(|r| r.episodes.len() == args.episodes))
}

fn report(results: &[ScenarioResult], json: bool) -> Result<(), SimError> {
    let total = results.len();
    let failed = results.iter().filter(|r| !r.passed).count();

    if json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "episodes": r.episodes,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for r in results {
        if r.passed {
            info!("✓ {} (seed={}) PASSED", r.scenario.name(), r.seed);
        } else {
            error!(
                "✗ {} (seed={}) FAILED: {}",
                r.scenario.name(),
                r.seed,
                r.failure_reason.as_deref().unwrap_or("unknown")
            );
        }
    }

    if failed == 0 {
        info!("All {} scenario runs passed", total);
    } else {
        error!("{}/{} scenario runs failed", failed, total);
    }
    Ok(())
}
