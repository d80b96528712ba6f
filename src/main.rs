//! Membrane Flux Analysis CLI
//!
//! Flux extraction, flux-decline and permeance modelling for filtration tests.

use anyhow::Context;
use clap::{Parser, Subcommand};
use membrane_flux_analysis::{
    config::{ExperimentConfig, ModuleSelection},
    core::FLUX_TABLE_FILE,
    models::DeclineFitOptions,
    pipeline::{run_decline, run_directory, run_permeance, RunReport},
    VERSION,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "membrane-flux")]
#[command(version = VERSION)]
#[command(about = "Flux and permeance analysis for membrane filtration tests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis on an input directory
    Run {
        /// Directory holding experiment.json, test_conditions.csv and data/
        #[arg(long, short)]
        input: PathBuf,

        /// Directory for the outputs
        #[arg(long, short)]
        output: PathBuf,

        /// Models to run (permeance, flux_decline, all or none); overrides experiment.json
        #[arg(long)]
        modules: Option<String>,
    },

    /// Compute the flux table only
    Flux {
        #[arg(long, short)]
        input: PathBuf,

        #[arg(long, short)]
        output: PathBuf,
    },

    /// Fit the flux decline model to an existing flux table
    Decline {
        /// Flux table written by a previous run
        #[arg(long)]
        table: PathBuf,

        #[arg(long, short)]
        output: PathBuf,

        /// experiment.json to take the fit options from
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Fit the permeance model to an existing flux table
    Permeance {
        /// Flux table written by a previous run
        #[arg(long)]
        table: PathBuf,

        #[arg(long, short)]
        output: PathBuf,
    },

    /// Show the validated configuration of an input directory
    Config {
        #[arg(long, short)]
        input: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            output,
            modules,
        } => cmd_run(&input, &output, modules.as_deref()),
        Commands::Flux { input, output } => cmd_flux(&input, &output),
        Commands::Decline {
            table,
            output,
            config,
        } => cmd_decline(&table, &output, config.as_deref()),
        Commands::Permeance { table, output } => cmd_permeance(&table, &output),
        Commands::Config { input } => cmd_config(&input),
    }
}

fn cmd_run(input: &Path, output: &Path, modules: Option<&str>) -> anyhow::Result<()> {
    let modules = modules
        .map(ModuleSelection::from_csv)
        .transpose()
        .context("Invalid --modules")?;

    let report = run_directory(input, output, modules)
        .with_context(|| format!("Flux analysis of {input:?} failed"))?;
    print_report(&report);
    Ok(())
}

fn cmd_flux(input: &Path, output: &Path) -> anyhow::Result<()> {
    let report = run_directory(input, output, Some(ModuleSelection::none()))
        .with_context(|| format!("Flux analysis of {input:?} failed"))?;
    print_report(&report);
    Ok(())
}

fn cmd_decline(table: &Path, output: &Path, config: Option<&Path>) -> anyhow::Result<()> {
    let options = match config {
        Some(path) => {
            ExperimentConfig::load(path)
                .with_context(|| format!("Could not load {path:?}"))?
                .decline_fit
        }
        None => DeclineFitOptions::default(),
    };

    let result = run_decline(table, output, options)
        .with_context(|| format!("Flux decline fit of {table:?} failed"))?;

    println!("Flux Decline Model");
    println!("==================");
    println!("  a0: {:.4} LMH", result.params.a0);
    println!("  a1: {:.4} LMH", result.params.a1);
    println!("  t0: {:.4} min", result.params.t0);
    println!("  R²: {:.6}", result.r_squared);
    println!("  Iterations: {}", result.iterations);
    Ok(())
}

fn cmd_permeance(table: &Path, output: &Path) -> anyhow::Result<()> {
    let result = run_permeance(table, output)
        .with_context(|| format!("Permeance fit of {table:?} failed"))?;

    println!("Permeance Model");
    println!("===============");
    for (i, fit) in result.channels.iter().enumerate() {
        println!(
            "  Specimen {}: {:.4} LMH/bar (intercept {:.4}, r² {:.4})",
            i + 1,
            fit.slope,
            fit.intercept,
            fit.r_squared
        );
    }
    println!(
        "  Mean: {:.4} ± {:.4} LMH/bar",
        result.mean.slope, result.std_dev.slope
    );
    Ok(())
}

fn cmd_config(input: &Path) -> anyhow::Result<()> {
    let path = ExperimentConfig::config_path(input);
    let config = ExperimentConfig::load(&path).with_context(|| format!("Could not load {path:?}"))?;
    let params = config.validate().context("Invalid configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {path:?}");
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!();
    println!("Derived parameters:");
    println!("  Surface area: {}", params.surface_area);
    println!("  Density factor: {:.7}", params.density_factor);
    println!("  Bracket offset: {} samples", params.offset_samples);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    println!("{}", report.summary);
    println!();
    println!(
        "Flux values saved to {:?}",
        report.output_dir.join(FLUX_TABLE_FILE)
    );

    if let Some(decline) = &report.outcomes.decline {
        match decline {
            Ok(result) => println!(
                "Flux decline: a0 = {:.2}, a1 = {:.2}, t0 = {:.2} min, R² = {:.4}",
                result.params.a0, result.params.a1, result.params.t0, result.r_squared
            ),
            Err(e) => println!("Flux decline not fitted: {e}"),
        }
    }

    if let Some(permeance) = &report.outcomes.permeance {
        match permeance {
            Ok(result) => println!(
                "Permeance: {:.4} ± {:.4} LMH/bar",
                result.mean.slope, result.std_dev.slope
            ),
            Err(e) => println!("Permeance not fitted: {e}"),
        }
    }
}
