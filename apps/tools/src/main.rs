use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use layout_optimizer::{Hyperparameters, Layout, LayoutOptimizer, MatrixShape};
use serde::Serialize;
use speller_server::{config::default_lags, load_settings, load_settings_from};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Operator tools for the c-VEP speller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Searches a lag layout that keeps similar codes apart on the grid.
    OptimizeLayout {
        #[arg(long)]
        rows: usize,
        #[arg(long)]
        cols: usize,
        #[arg(long)]
        seq_len: u32,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = 1000)]
        generations: usize,
        #[arg(long, default_value_t = 50)]
        population: usize,
        /// JSON array of row-major lags from a previous run.
        #[arg(long)]
        initial: Option<String>,
        #[arg(long)]
        verbose: bool,
    },
    /// Loads and validates a settings file.
    CheckConfig {
        /// Defaults to `SPELLER_CONFIG` or `speller.toml` plus env overrides.
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct LayoutReport {
    seq_len: u32,
    fitness: u64,
    baseline_fitness: u64,
    layout: Vec<Vec<u32>>,
}

#[derive(Serialize)]
struct MatrixSnippet {
    matrix: LagLayout,
}

#[derive(Serialize)]
struct LagLayout {
    rows: usize,
    cols: usize,
    lag_layout: Vec<u32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::OptimizeLayout {
            rows,
            cols,
            seq_len,
            seed,
            generations,
            population,
            initial,
            verbose,
        } => {
            let shape = MatrixShape::new(rows, cols);
            let lags = default_lags(seq_len as usize, shape.len());
            let baseline = Layout::new(shape, lags.clone())?.fitness(seq_len);
            let params = Hyperparameters {
                population_size: population,
                generations,
                seed,
                ..Hyperparameters::default()
            };

            let mut optimizer = LayoutOptimizer::new(seq_len, lags, shape, params)?;
            if let Some(raw) = initial {
                let cells: Vec<u32> =
                    serde_json::from_str(&raw).context("--initial must be a JSON array of lags")?;
                optimizer = optimizer.with_initial_state(Layout::new(shape, cells)?)?;
            }

            info!(rows, cols, seq_len, generations, "optimizing layout");
            let (layout, fitness) = optimizer.start(verbose)?;

            let report = LayoutReport {
                seq_len,
                fitness,
                baseline_fitness: baseline,
                layout: layout.rows(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);

            let snippet = MatrixSnippet {
                matrix: LagLayout {
                    rows,
                    cols,
                    lag_layout: layout.cells().to_vec(),
                },
            };
            println!();
            println!("{}", toml::to_string(&snippet)?);
        }
        Command::CheckConfig { path } => {
            let settings = match &path {
                Some(path) => load_settings_from(path)?,
                None => load_settings()?,
            };
            settings.validate().context("settings are not valid")?;
            let lags = settings.lags()?;
            println!(
                "ok: {} mode, {}x{} matrix, sequence length {}, lags {:?}",
                settings.run.mode.as_str(),
                settings.matrix.rows,
                settings.matrix.cols,
                settings.sequence_length()?,
                lags
            );
        }
    }

    Ok(())
}
