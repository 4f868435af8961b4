use crate::config::{MutationType, PopulationSize};
use crate::engine::{Engine, Equilibrium};
use crate::kernel::KernelSummary;
use crate::model::Trajectory;
use crate::stats::{fsum, mean_and_variance};
use anyhow::{Context, Result, bail};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Output of one simulation run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Record {
    pub mutation_type: MutationType,
    pub percentage_of_mutations_that_are_beneficial: Option<f64>,
    pub population_size: PopulationSize,
    pub number_of_years: usize,
    pub bin_width: f64,
    pub growth_rates: Vec<f64>,
    pub birth_rates: Vec<f64>,
    pub effects: Vec<f64>,
    /// Kernel probabilities at `effects`.
    pub mutation_probs: Vec<f64>,
    pub lossy: bool,
    pub kernel_summary: KernelSummary,
    pub trajectory: Trajectory,
    pub total_mass: Vec<f64>,
    /// Mass-weighted mean growth rate, absent for an empty population.
    pub mean_fitness: Vec<Option<f64>>,
    /// Mass-weighted growth rate variance, absent for an empty population.
    pub variance_fitness: Vec<Option<f64>>,
}

impl Record {
    pub fn new(engine: &Engine, trajectory: Trajectory) -> Self {
        let run = &engine.cfg().run;
        let classes = engine.classes();
        let kernel = engine.kernel();

        let mut total_mass = Vec::with_capacity(trajectory.len());
        let mut mean_fitness = Vec::with_capacity(trajectory.len());
        let mut variance_fitness = Vec::with_capacity(trajectory.len());
        for dist in trajectory.iter() {
            let (mean, var) = mean_and_variance(dist, classes.growth_rates());
            total_mass.push(fsum(dist));
            mean_fitness.push(mean.is_finite().then_some(mean));
            variance_fitness.push(var.is_finite().then_some(var));
        }

        Self {
            mutation_type: run.mutation_distribution_type,
            percentage_of_mutations_that_are_beneficial: run
                .percentage_of_mutations_that_are_beneficial,
            population_size: run.population_size,
            number_of_years: run.number_of_years,
            bin_width: classes.bin_width(),
            growth_rates: classes.growth_rates().to_vec(),
            birth_rates: classes.birth_rates().to_vec(),
            effects: classes.effects().to_vec(),
            mutation_probs: kernel.probs().to_vec(),
            lossy: kernel.is_lossy(),
            kernel_summary: kernel.summary(),
            trajectory,
            total_mass,
            mean_fitness,
            variance_fitness,
        }
    }
}

/// Kernel diagnostics, written without simulating.
#[derive(Debug, Serialize, Deserialize)]
pub struct KernelRecord {
    pub mutation_type: MutationType,
    pub percentage_of_mutations_that_are_beneficial: Option<f64>,
    pub bin_width: f64,
    pub effects: Vec<f64>,
    pub mutation_probs: Vec<f64>,
    pub lossy: bool,
    pub kernel_summary: KernelSummary,
}

impl KernelRecord {
    pub fn new(engine: &Engine) -> Self {
        let run = &engine.cfg().run;
        let classes = engine.classes();
        let kernel = engine.kernel();
        Self {
            mutation_type: run.mutation_distribution_type,
            percentage_of_mutations_that_are_beneficial: run
                .percentage_of_mutations_that_are_beneficial,
            bin_width: classes.bin_width(),
            effects: classes.effects().to_vec(),
            mutation_probs: kernel.probs().to_vec(),
            lossy: kernel.is_lossy(),
            kernel_summary: kernel.summary(),
        }
    }
}

/// Equilibrium distribution of the yearly update and its moments.
#[derive(Debug, Serialize, Deserialize)]
pub struct EquilibriumRecord {
    pub mutation_type: MutationType,
    pub percentage_of_mutations_that_are_beneficial: Option<f64>,
    pub lossy: bool,
    pub growth_rates: Vec<f64>,
    pub distribution: Vec<f64>,
    pub growth_factor: f64,
    /// Logarithm of `growth_factor`.
    pub growth_rate: f64,
    pub mean_fitness: f64,
    pub variance_fitness: f64,
    pub residual: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl EquilibriumRecord {
    pub fn new(engine: &Engine, equilibrium: Equilibrium) -> Self {
        let run = &engine.cfg().run;
        let growth_rates = engine.classes().growth_rates();
        let (mean_fitness, variance_fitness) =
            mean_and_variance(&equilibrium.distribution, growth_rates);
        Self {
            mutation_type: run.mutation_distribution_type,
            percentage_of_mutations_that_are_beneficial: run
                .percentage_of_mutations_that_are_beneficial,
            lossy: engine.kernel().is_lossy(),
            growth_rates: growth_rates.to_vec(),
            distribution: equilibrium.distribution,
            growth_factor: equilibrium.growth_factor,
            growth_rate: equilibrium.growth_factor.ln(),
            mean_fitness,
            variance_fitness,
            residual: equilibrium.residual,
            iterations: equilibrium.iterations,
            converged: equilibrium.converged,
        }
    }
}

/// Encoding of an output file, chosen by its extension.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Format {
    Json,
    MessagePack,
}

impl Format {
    pub fn from_path<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        match file.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("msgpack") => Ok(Format::MessagePack),
            _ => bail!("unsupported extension of {file:?}, expected .json or .msgpack"),
        }
    }
}

pub fn save<T: Serialize, P: AsRef<Path>>(value: &T, file: P) -> Result<()> {
    let file = file.as_ref();
    let format = Format::from_path(file)?;
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);

    match format {
        Format::Json => serde_json::to_writer(&mut writer, value).context("failed to serialize")?,
        Format::MessagePack => encode::write(&mut writer, value).context("failed to serialize")?,
    }

    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}

pub fn load<T: DeserializeOwned, P: AsRef<Path>>(file: P) -> Result<T> {
    let file = file.as_ref();
    let format = Format::from_path(file)?;
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let reader = BufReader::new(file);

    let value = match format {
        Format::Json => serde_json::from_reader(reader).context("failed to deserialize")?,
        Format::MessagePack => decode::from_read(reader).context("failed to deserialize")?,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::{env, fs};

    fn small_record() -> Record {
        let mut cfg = Config::default();
        cfg.run.number_of_years = 5;
        cfg.run.number_of_discrete_population_fitness_values = 51;
        let mut engine = Engine::new(cfg).unwrap();
        let trajectory = engine.perform_simulation().unwrap();
        Record::new(&engine, trajectory)
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(Format::from_path("a/b.json").unwrap(), Format::Json);
        assert_eq!(Format::from_path("b.msgpack").unwrap(), Format::MessagePack);
        assert!(Format::from_path("b.json.gz").is_err());
        assert!(Format::from_path("b").is_err());
    }

    #[test]
    fn record_describes_its_trajectory() {
        let record = small_record();

        assert_eq!(record.mutation_type, MutationType::Gaussian);
        assert_eq!(record.trajectory.len(), 5);
        assert_eq!(record.growth_rates.len(), 51);
        assert_eq!(record.mutation_probs.len(), 101);
        assert_eq!(record.effects.len(), 101);
        assert_eq!(record.total_mass.len(), 5);
        assert!((record.total_mass[0] - 1.0).abs() < 1e-14);
        assert!((record.mean_fitness[0].unwrap() - 0.044).abs() < 1e-3);
    }

    #[test]
    fn record_survives_both_formats() {
        let record = small_record();
        let dir = env::temp_dir().join(format!("mutsel-record-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        for name in ["record.json", "record.msgpack"] {
            let file = dir.join(name);
            save(&record, &file).unwrap();
            let loaded: Record = load(&file).unwrap();
            assert_eq!(loaded.trajectory, record.trajectory);
            assert_eq!(loaded.mutation_probs, record.mutation_probs);
            assert_eq!(loaded.mean_fitness, record.mean_fitness);
        }

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn long_closed_form_record_reloads() {
        let mut cfg = Config::default();
        cfg.run.mutation_distribution_type = MutationType::NoneExact;
        cfg.run.number_of_years = 5000;
        cfg.run.number_of_discrete_population_fitness_values = 51;
        let mut engine = Engine::new(cfg).unwrap();
        let trajectory = engine.perform_simulation().unwrap();
        let record = Record::new(&engine, trajectory);

        let dir = env::temp_dir().join(format!("mutsel-long-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("record.json");
        save(&record, &file).unwrap();
        let loaded: Record = load(&file).unwrap();
        assert_eq!(loaded.trajectory, record.trajectory);
        assert!(loaded.mean_fitness.iter().all(Option::is_some));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn equilibrium_record_has_moments() {
        let mut cfg = Config::default();
        cfg.run.mutation_distribution_type = MutationType::None;
        cfg.run.number_of_discrete_population_fitness_values = 11;
        let engine = Engine::new(cfg).unwrap();
        let equilibrium = engine.find_equilibrium().unwrap();
        let record = EquilibriumRecord::new(&engine, equilibrium);

        assert!(record.lossy);
        assert_eq!(record.distribution.len(), 11);
        assert!((record.mean_fitness - 0.15).abs() < 1e-6);
        assert!(record.variance_fitness < 1e-6);
        assert!((record.growth_rate - 0.15).abs() < 1e-6);
    }
}
