use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Family of the distribution of mutation effects on growth rate.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, ValueEnum)]
pub enum MutationType {
    /// No mutation, iterated year by year.
    #[value(name = "None")]
    None,
    /// No mutation, computed in closed form.
    #[value(name = "NoneExact")]
    NoneExact,
    /// Symmetric Gaussian effects.
    #[value(name = "Gaussian")]
    Gaussian,
    /// Reflected Gamma effects, reproducing the published kernel.
    #[value(name = "Gamma")]
    Gamma,
    /// Reflected Gamma effects, normalized to unit mass.
    #[value(name = "GammaRenormalized")]
    GammaRenormalized,
}

/// Whether the finite-population correction is applied after every year.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, ValueEnum)]
pub enum PopulationSize {
    #[value(name = "Finite")]
    Finite,
    #[value(name = "Infinite")]
    Infinite,
}

/// Options of a single run, as named on the command line.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Run {
    /// Fraction of mutations with a positive effect (Gamma kernels only).
    pub percentage_of_mutations_that_are_beneficial: Option<f64>,
    /// Mutation kernel family.
    pub mutation_distribution_type: MutationType,
    /// Finite-population correction switch.
    pub population_size: PopulationSize,
    /// Number of years in the trajectory, counting the initial year.
    pub number_of_years: usize,
    /// Number of fitness classes.
    pub number_of_discrete_population_fitness_values: usize,
}

impl Default for Run {
    fn default() -> Self {
        Self {
            percentage_of_mutations_that_are_beneficial: None,
            mutation_distribution_type: MutationType::Gaussian,
            population_size: PopulationSize::Finite,
            number_of_years: 300,
            number_of_discrete_population_fitness_values: 251,
        }
    }
}

/// Range of Malthusian growth rates covered by the fitness classes.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Grid {
    /// Death rate; the lowest growth rate is its negative.
    pub death_rate: f64,
    /// Highest growth rate.
    pub max_growth_rate: f64,
    /// Leave the highest growth rate out of the grid.
    pub exclude_max: bool,
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            death_rate: 0.1,
            max_growth_rate: 0.15,
            exclude_max: false,
        }
    }
}

/// Discretized Gaussian used as the initial distribution.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Init {
    pub mean: f64,
    pub std_dev: f64,
    /// Classes further than `crop` standard deviations from the mean start empty.
    pub crop: f64,
}

impl Default for Init {
    fn default() -> Self {
        Self {
            mean: 0.044,
            std_dev: 0.005,
            crop: 11.2,
        }
    }
}

/// Parameters of the mutation kernel families.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Mutation {
    pub gaussian_std_dev: f64,
    pub gamma_shape: f64,
    pub gamma_rate: f64,
    /// Lose the offspring whose effect falls outside the grid. When unset,
    /// every source class passes its offspring on in full.
    pub lossy: bool,
}

impl Default for Mutation {
    fn default() -> Self {
        Self {
            gaussian_std_dev: 0.002,
            gamma_shape: 0.5,
            gamma_rate: 0.5 / 0.001,
            lossy: true,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheme {
    /// Growth by `exp(m)` followed by mutation.
    Exponential,
    /// Euler steps of the birth-death equation.
    BirthDeath,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Selection {
    pub scheme: Scheme,
    /// Euler substeps per year (birth-death scheme only).
    pub steps_per_year: usize,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            scheme: Scheme::Exponential,
            steps_per_year: 1,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FiniteMethod {
    /// Zero every class at or below `threshold` times the largest class.
    Threshold,
    /// Integer counts with random births, deaths and mutations.
    Stochastic,
}

/// How expected births and deaths are adjusted to respect `max_size`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capacity {
    /// Cut births by the expected excess over `max_size`.
    VariableBirth,
    /// Raise deaths to at least the current excess over `max_size`.
    VariableDeath,
    /// Scale births by the room left after the expected deaths.
    Logistic,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Finite {
    pub method: FiniteMethod,
    pub threshold: f64,
    pub capacity: Capacity,
    /// Carrying capacity of the stochastic population.
    pub max_size: u64,
    /// Initial number of individuals, `max_size` when absent.
    pub init_size: Option<u64>,
    pub seed: u64,
}

impl Default for Finite {
    fn default() -> Self {
        Self {
            method: FiniteMethod::Threshold,
            threshold: 1e-9,
            capacity: Capacity::VariableBirth,
            max_size: 1_000_000_000,
            init_size: None,
            seed: 0,
        }
    }
}

/// Power iteration settings of the equilibrium search.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Equilibrium {
    /// Largest change of the normalized distribution accepted as converged.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for Equilibrium {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 100_000,
        }
    }
}

/// Simulation configuration parameters.
///
/// Every section falls back to the settings of the published experiments.
/// Loaded from a TOML file with [`Config::from_file`], then overridden from
/// the command line and checked with [`Config::validate`].
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub run: Run,
    pub grid: Grid,
    pub init: Init,
    pub mutation: Mutation,
    pub selection: Selection,
    pub finite: Finite,
    pub equilibrium: Equilibrium,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Missing sections and keys take their default values. The result is
    /// not validated, so that command line overrides can be applied first.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or deserialized.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to deserialize config")
    }

    /// Check every parameter, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        let run = &self.run;
        check_num(run.number_of_years, 1..=1_000_000).context("invalid number of years")?;
        check_num(run.number_of_discrete_population_fitness_values, 2..=100_000)
            .context("invalid number of fitness classes")?;
        if let Some(pct) = run.percentage_of_mutations_that_are_beneficial {
            check_num(pct, 0.0..=1.0)
                .context("invalid percentage of mutations that are beneficial")?;
        }
        if matches!(
            run.mutation_distribution_type,
            MutationType::Gamma | MutationType::GammaRenormalized
        ) && run.percentage_of_mutations_that_are_beneficial.is_none()
        {
            bail!(
                "{:?} mutations require a percentage of mutations that are beneficial",
                run.mutation_distribution_type
            );
        }

        let grid = &self.grid;
        check_finite(grid.death_rate).context("invalid death rate")?;
        check_finite(grid.max_growth_rate).context("invalid maximum growth rate")?;
        if grid.death_rate + grid.max_growth_rate <= 0.0 {
            bail!("maximum growth rate must exceed the negated death rate");
        }

        check_finite(self.init.mean).context("invalid initial mean")?;
        check_positive(self.init.std_dev).context("invalid initial standard deviation")?;
        check_positive(self.init.crop).context("invalid initial crop")?;

        check_positive(self.mutation.gaussian_std_dev)
            .context("invalid Gaussian standard deviation")?;
        check_positive(self.mutation.gamma_shape).context("invalid Gamma shape")?;
        check_positive(self.mutation.gamma_rate).context("invalid Gamma rate")?;

        check_num(self.selection.steps_per_year, 1..=10_000)
            .context("invalid number of steps per year")?;

        check_num(self.finite.threshold, 0.0..1.0).context("invalid finite threshold")?;
        let finite = &self.finite;
        check_num(finite.max_size, 1..).context("invalid maximum population size")?;
        if let Some(init_size) = finite.init_size {
            check_num(init_size, 1..=finite.max_size)
                .context("invalid initial population size")?;
        }

        check_positive(self.equilibrium.tolerance).context("invalid equilibrium tolerance")?;
        check_num(self.equilibrium.max_iterations, 1..=10_000_000)
            .context("invalid maximum number of equilibrium iterations")?;

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_finite(num: f64) -> Result<()> {
    if !num.is_finite() {
        bail!("number must be finite, but is {num:?}");
    }
    Ok(())
}

fn check_positive(num: f64) -> Result<()> {
    check_finite(num)?;
    if num <= 0.0 {
        bail!("number must be positive, but is {num:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn toml_sections_override_defaults() {
        let cfg = Config::from_toml(
            r#"
[run]
percentage_of_mutations_that_are_beneficial = 0.001
mutation_distribution_type = "Gamma"
population_size = "Infinite"
number_of_years = 2500
number_of_discrete_population_fitness_values = 501

[selection]
scheme = "birth-death"
steps_per_year = 4

[finite]
method = "stochastic"
capacity = "logistic"
init_size = 1000

[mutation]
lossy = false
"#,
        )
        .unwrap();

        assert_eq!(cfg.run.mutation_distribution_type, MutationType::Gamma);
        assert_eq!(cfg.run.population_size, PopulationSize::Infinite);
        assert_eq!(cfg.run.number_of_years, 2500);
        assert_eq!(cfg.selection.scheme, Scheme::BirthDeath);
        assert_eq!(cfg.selection.steps_per_year, 4);
        assert_eq!(cfg.finite.method, FiniteMethod::Stochastic);
        assert_eq!(cfg.finite.capacity, Capacity::Logistic);
        assert_eq!(cfg.finite.init_size, Some(1000));
        assert_eq!(cfg.finite.threshold, 1e-9);
        assert!(!cfg.mutation.lossy);
        assert_eq!(cfg.equilibrium, Equilibrium::default());
        assert_eq!(cfg.grid, Grid::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_mutation_type_is_rejected() {
        let result = Config::from_toml("[run]\nmutation_distribution_type = \"Cauchy\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(Config::from_toml("[grid]\nbin_width = 0.001\n").is_err());
    }

    #[test]
    fn zero_years_is_rejected() {
        let mut cfg = Config::default();
        cfg.run.number_of_years = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn single_class_is_rejected() {
        let mut cfg = Config::default();
        cfg.run.number_of_discrete_population_fitness_values = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn gamma_requires_beneficial_percentage() {
        let mut cfg = Config::default();
        cfg.run.mutation_distribution_type = MutationType::Gamma;
        assert!(cfg.validate().is_err());

        cfg.run.percentage_of_mutations_that_are_beneficial = Some(0.001);
        cfg.validate().unwrap();

        cfg.run.percentage_of_mutations_that_are_beneficial = Some(1.5);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_positive_widths_are_rejected() {
        let mut cfg = Config::default();
        cfg.mutation.gaussian_std_dev = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.init.std_dev = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn initial_size_above_capacity_is_rejected() {
        let mut cfg = Config::default();
        cfg.finite.max_size = 1000;
        cfg.finite.init_size = Some(1001);
        assert!(cfg.validate().is_err());

        cfg.finite.init_size = Some(1000);
        cfg.validate().unwrap();

        cfg.finite.init_size = Some(0);
        assert!(cfg.validate().is_err());
    }
}
