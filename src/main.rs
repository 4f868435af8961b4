mod analysis;
mod config;
mod engine;
mod kernel;
mod manager;
mod model;
mod record;
mod stats;

use crate::config::{Config, MutationType, PopulationSize};
use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Simulate a trajectory and save the resulting record.
    Simulate {
        #[command(flatten)]
        run: RunArgs,

        #[arg(long)]
        output: PathBuf,
    },

    /// Save the mutation kernel without simulating.
    Kernel {
        #[command(flatten)]
        run: RunArgs,

        #[arg(long)]
        output: PathBuf,
    },

    /// Find the equilibrium distribution and save it.
    Equilibrium {
        #[command(flatten)]
        run: RunArgs,

        #[arg(long)]
        output: PathBuf,
    },

    /// Compare the mean and variance of fitness across saved records.
    Compare {
        #[arg(long)]
        output: PathBuf,

        #[arg(required = true)]
        inputs: Vec<String>,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// TOML file with the full configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    percentage_of_mutations_that_are_beneficial: Option<f64>,

    #[arg(long, value_enum)]
    mutation_distribution_type: Option<MutationType>,

    #[arg(long, value_enum)]
    population_size: Option<PopulationSize>,

    #[arg(long)]
    number_of_years: Option<usize>,

    #[arg(long)]
    number_of_discrete_population_fitness_values: Option<usize>,
}

impl RunArgs {
    fn into_config(self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(file) => Config::from_file(file).context("failed to load config")?,
            None => Config::default(),
        };

        let run = &mut cfg.run;
        if let Some(pct) = self.percentage_of_mutations_that_are_beneficial {
            run.percentage_of_mutations_that_are_beneficial = Some(pct);
        }
        if let Some(kind) = self.mutation_distribution_type {
            run.mutation_distribution_type = kind;
        }
        if let Some(size) = self.population_size {
            run.population_size = size;
        }
        if let Some(n_years) = self.number_of_years {
            run.number_of_years = n_years;
        }
        if let Some(n_classes) = self.number_of_discrete_population_fitness_values {
            run.number_of_discrete_population_fitness_values = n_classes;
        }

        cfg.validate().context("failed to validate config")?;
        Ok(cfg)
    }
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    match args.command {
        Command::Simulate { run, output } => {
            let cfg = run.into_config().context("failed to construct cfg")?;
            Manager::new(cfg).run_simulation(output)?;
        }
        Command::Kernel { run, output } => {
            let cfg = run.into_config().context("failed to construct cfg")?;
            Manager::new(cfg).run_kernel(output)?;
        }
        Command::Equilibrium { run, output } => {
            let cfg = run.into_config().context("failed to construct cfg")?;
            Manager::new(cfg).run_equilibrium(output)?;
        }
        Command::Compare { output, inputs } => manager::run_comparison(&inputs, output)?,
    }

    Ok(())
}
