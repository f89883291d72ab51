//! `helixfit` CLI: scenario runs, replay import/export, fit metrics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kalman_core::batch::BatchFit;
use kalman_core::FitConfig;
use sim::replay::{load_replay, save_replay, ReplayLog};
use sim::scenarios::{Scenario, ScenarioKind};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "helixfit", about = "Helix track fitting CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a named scenario, fit every seed and report metrics.
    RunScenario {
        #[arg(value_enum)]
        scenario: ScenarioKind,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Fit configuration JSON overriding the scenario's
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also save the event as a replay log
        #[arg(long)]
        save_replay: Option<PathBuf>,
    },
    /// Refit a previously recorded event.
    Replay {
        /// Path to replay JSON file
        input: PathBuf,
        /// Fit configuration JSON overriding the recorded one
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output metrics to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunScenario {
            scenario,
            seed,
            config,
            output,
            save_replay: save_path,
        } => {
            let mut scenario = Scenario::build(scenario, seed);
            if let Some(path) = config {
                scenario.config = load_config(&path)?;
            }
            if let Some(rpath) = save_path.as_deref() {
                save_replay(&ReplayLog::from(&scenario), rpath)?;
                println!("Replay saved to {}", rpath.display());
            }
            fit_and_report(&scenario, output.as_deref())?;
        }
        Commands::Replay {
            input,
            config,
            output,
        } => {
            let log = load_replay(&input)?;
            let mut scenario = Scenario::from(log);
            if let Some(path) = config {
                scenario.config = load_config(&path)?;
            }
            fit_and_report(&scenario, output.as_deref())?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<FitConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading fit config {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("parsing fit config {}", path.display()))?;
    Ok(config)
}

fn fit_and_report(scenario: &Scenario, output_path: Option<&Path>) -> Result<()> {
    println!(
        "Fitting scenario '{}' (seed={}, {} planes, {} clusters, {} seeds)...",
        scenario.name,
        scenario.seed,
        scenario.detector.len(),
        scenario.event.n_clusters(),
        scenario.seeds.len(),
    );

    let start = std::time::Instant::now();
    let fits = scenario.fit();
    let elapsed = start.elapsed();
    let metrics = scenario.evaluate(&fits);

    for fit in &fits {
        print_fit(fit);
    }
    println!(
        "Done: {}/{} converged, mean χ²/ndf={:.3}, hit efficiency={:.3}, elapsed={:.3}s",
        metrics.n_converged,
        metrics.n_fits,
        metrics.mean_chi2_ndf(),
        metrics.hit_efficiency(),
        elapsed.as_secs_f64(),
    );

    if let Some(opath) = output_path {
        let tracks: Vec<_> = fits
            .iter()
            .map(|fit| match &fit.result {
                Ok(fitted) => serde_json::json!({
                    "particle": fit.particle.0,
                    "diagnostics": fitted.diagnostics,
                }),
                Err(e) => serde_json::json!({
                    "particle": fit.particle.0,
                    "error": e.to_string(),
                }),
            })
            .collect();
        let json = serde_json::json!({
            "scenario": scenario.name,
            "seed": scenario.seed,
            "elapsed_s": elapsed.as_secs_f64(),
            "efficiency": metrics.efficiency(),
            "curvature_bias": metrics.curvature_bias(),
            "curvature_resolution": metrics.curvature_resolution(),
            "rho_pull_rms": metrics.rho_pull_rms(),
            "rmse_position": metrics.rmse_position(),
            "mean_chi2_ndf": metrics.mean_chi2_ndf(),
            "hit_efficiency": metrics.hit_efficiency(),
            "tracks": tracks,
        });
        std::fs::write(opath, serde_json::to_string_pretty(&json)?)?;
        println!("Metrics saved to {}", opath.display());
    }

    Ok(())
}

fn print_fit(fit: &BatchFit) {
    match &fit.result {
        Ok(fitted) => {
            let d = &fitted.diagnostics;
            let rho = fitted
                .track
                .steps()
                .first()
                .map_or(f64::NAN, |s| s.best().vector.signed_inverse_radius());
            println!(
                "  {}: {} matched, {} missed, χ²={:.3} (ndf {}), ρ={:.6} 1/m{}",
                fit.particle,
                d.matched,
                d.missed,
                d.total_chi2,
                d.ndf,
                rho,
                if d.truncated { " [truncated]" } else { "" },
            );
        }
        Err(e) => println!("  {}: failed: {e}", fit.particle),
    }
}
