use crate::config::{self, Capacity, Config, FiniteMethod, PopulationSize, Scheme};
use crate::kernel::{Kernel, MutationModel, build_kernel};
use crate::model::{FitnessClasses, Trajectory, initial_distribution};
use crate::stats::fsum;
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Binomial, Poisson};

/// Correction applied to the population after every simulated year.
pub trait Correction {
    fn correct(&mut self, dist: Vec<f64>) -> Result<Vec<f64>>;
}

/// Infinite population: nothing to correct.
pub struct NoCorrection;

impl Correction for NoCorrection {
    fn correct(&mut self, dist: Vec<f64>) -> Result<Vec<f64>> {
        Ok(dist)
    }
}

/// Empties every class holding at most `threshold` times the largest class.
pub struct Threshold {
    threshold: f64,
}

impl Threshold {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Correction for Threshold {
    fn correct(&mut self, mut dist: Vec<f64>) -> Result<Vec<f64>> {
        let max = dist.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let cutoff = self.threshold * max;
        for val in dist.iter_mut().filter(|val| **val <= cutoff) {
            *val = 0.0;
        }
        Ok(dist)
    }
}

fn sample_binomial<R: Rng>(n: u64, prob: f64, rng: &mut R) -> Result<u64> {
    if n == 0 || prob <= 0.0 {
        return Ok(0);
    }
    let count = Binomial::new(n, prob.min(1.0))
        .context("failed to construct binomial distribution")?
        .sample(rng);
    Ok(count)
}

/// Split `n` individuals over the classes in proportion to `weights`.
///
/// Sampled as a chain of conditional binomials; the last class with a
/// positive weight takes whatever is left.
pub fn sample_multinomial<R: Rng>(n: u64, weights: &[f64], rng: &mut R) -> Result<Vec<u64>> {
    let mut counts = vec![0; weights.len()];
    let Some(i_last) = weights.iter().rposition(|&w| w > 0.0) else {
        return Ok(counts);
    };
    let mut n_left = n;
    let mut weight_left = fsum(weights);
    for (i, &weight) in weights.iter().enumerate().take(i_last + 1) {
        if n_left == 0 {
            break;
        }
        if weight <= 0.0 {
            continue;
        }
        let count = if i == i_last {
            n_left
        } else {
            sample_binomial(n_left, weight / weight_left, rng)?
        };
        counts[i] = count;
        n_left -= count;
        weight_left -= weight;
    }
    Ok(counts)
}

/// Population of individuals with random births, deaths and mutations,
/// held below a carrying capacity.
///
/// Every substep, deaths are binomial with the expected death fraction,
/// the number of births is Poisson and births are spread over the classes
/// their parents mutate into.
pub struct StochasticPopulation {
    counts: Vec<u64>,
    init_size: u64,
    max_size: f64,
    capacity: Capacity,
    rng: ChaCha12Rng,
}

impl StochasticPopulation {
    pub fn new(initial: &[f64], finite: &config::Finite) -> Result<Self> {
        let init_size = finite.init_size.unwrap_or(finite.max_size);
        let mut rng = ChaCha12Rng::seed_from_u64(finite.seed);
        let counts = sample_multinomial(init_size, initial, &mut rng)
            .context("failed to sample initial population")?;
        Ok(Self {
            counts,
            init_size,
            max_size: finite.max_size as f64,
            capacity: finite.capacity,
            rng,
        })
    }

    pub fn size(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Counts relative to the initial size.
    pub fn dist(&self) -> Vec<f64> {
        let scale = 1.0 / self.init_size as f64;
        self.counts.iter().map(|&n| n as f64 * scale).collect()
    }

    /// Advance the population by one year of `steps_per_year` substeps.
    pub fn advance(
        &mut self,
        kernel: &Kernel,
        classes: &FitnessClasses,
        steps_per_year: usize,
    ) -> Result<()> {
        let n_steps = steps_per_year as f64;
        let death_rate = classes.death_rate() / n_steps;
        for _ in 0..steps_per_year {
            let pop_size = self.size();
            if pop_size == 0 {
                break;
            }
            let pop_size = pop_size as f64;

            let parents: Vec<_> = self
                .counts
                .iter()
                .zip(classes.birth_rates())
                .map(|(&n, b)| n as f64 * b / n_steps)
                .collect();
            let expected = mutate(&parents, kernel);
            let (exp_deaths, exp_births) = limit(
                self.capacity,
                self.max_size,
                pop_size,
                death_rate * pop_size,
                fsum(&expected),
            );

            let death_prob = exp_deaths / pop_size;
            let mut deaths = Vec::with_capacity(self.counts.len());
            for &n in &self.counts {
                deaths.push(sample_binomial(n, death_prob, &mut self.rng)?);
            }

            let n_births = if exp_births > 0.0 {
                let poisson =
                    Poisson::new(exp_births).context("failed to construct poisson distribution")?;
                poisson.sample(&mut self.rng) as u64
            } else {
                0
            };
            let births = sample_multinomial(n_births, &expected, &mut self.rng)?;

            for ((count, birth), death) in self.counts.iter_mut().zip(births).zip(deaths) {
                *count = *count + birth - death;
            }
        }
        Ok(())
    }
}

/// Expected deaths and births adjusted to the carrying capacity.
fn limit(
    capacity: Capacity,
    max_size: f64,
    pop_size: f64,
    exp_deaths: f64,
    exp_births: f64,
) -> (f64, f64) {
    match capacity {
        Capacity::VariableBirth => {
            let excess = (pop_size - exp_deaths + exp_births - max_size).max(0.0);
            (exp_deaths, (exp_births - excess).max(0.0))
        }
        Capacity::VariableDeath => (exp_deaths.max(pop_size - max_size), exp_births),
        Capacity::Logistic => {
            let scale = (1.0 - (pop_size - exp_deaths) / max_size).max(0.0);
            (exp_deaths, scale * exp_births)
        }
    }
}

/// Grow every class by one year at its Malthusian rate.
pub fn select(dist: &[f64], growth_rates: &[f64]) -> Vec<f64> {
    dist.iter()
        .zip(growth_rates)
        .map(|(p, m)| p * m.exp())
        .collect()
}

/// Redistribute the mass of every class over all classes through `kernel`.
///
/// The mass received by class `j` is the sum over `i` of
/// `dist[i] * kernel(m[j] - m[i])`, each source scaled by its row weight.
pub fn mutate(dist: &[f64], kernel: &Kernel) -> Vec<f64> {
    let mut next = vec![0.0; dist.len()];
    for (i_src, &mass) in dist.iter().enumerate() {
        if mass == 0.0 {
            continue;
        }
        let mass = mass * kernel.row_weight(i_src);
        for (val, prob) in next.iter_mut().zip(kernel.row(i_src)) {
            *val += mass * prob;
        }
    }
    next
}

/// Advance the distribution of the previous year by one year.
pub fn step(
    prev: &[f64],
    kernel: &Kernel,
    classes: &FitnessClasses,
    scheme: Scheme,
    steps_per_year: usize,
) -> Vec<f64> {
    match scheme {
        Scheme::Exponential => mutate(&select(prev, classes.growth_rates()), kernel),
        Scheme::BirthDeath => {
            let n_steps = steps_per_year as f64;
            let death_factor = 1.0 - classes.death_rate() / n_steps;
            let mut dist = prev.to_vec();
            for _ in 0..steps_per_year {
                let parents: Vec<_> = dist
                    .iter()
                    .zip(classes.birth_rates())
                    .map(|(p, b)| p * b / n_steps)
                    .collect();
                let births = mutate(&parents, kernel);
                for (val, birth) in dist.iter_mut().zip(births) {
                    *val = *val * death_factor + birth;
                }
            }
            dist
        }
    }
}

/// Distribution in year `t` without mutation, straight from year `0`.
///
/// Empty classes stay empty.
pub fn closed_form(initial: &[f64], growth_rates: &[f64], t: usize) -> Vec<f64> {
    let t = t as f64;
    initial
        .iter()
        .zip(growth_rates)
        .map(|(&p, m)| if p == 0.0 { 0.0 } else { p * (t * m).exp() })
        .collect()
}

/// Dominant eigenvector of the yearly update, normalized to unit mass.
#[derive(Debug, Clone, PartialEq)]
pub struct Equilibrium {
    pub distribution: Vec<f64>,
    /// Yearly growth factor of the equilibrium population.
    pub growth_factor: f64,
    /// Largest deviation of the updated equilibrium from `growth_factor`
    /// times itself, relative to unit mass.
    pub residual: f64,
    pub iterations: usize,
    pub converged: bool,
}

enum Dynamics {
    Deterministic(Box<dyn Correction>),
    Stochastic,
}

struct Progress {
    n_years: usize,
    n_reports: usize,
    i_report: usize,
}

impl Progress {
    fn new(n_years: usize) -> Self {
        Self {
            n_years,
            n_reports: 20.min(n_years),
            i_report: 1,
        }
    }

    fn update(&mut self, t: usize) {
        if (t + 1) * self.n_reports >= self.i_report * self.n_years {
            let progress = 100.0 * (t + 1) as f64 / self.n_years as f64;
            log::info!("completed {progress:06.2}%");
            self.i_report += 1;
        }
    }
}

fn check_finite(dist: &[f64], t: usize) -> Result<()> {
    if dist.iter().any(|val| !val.is_finite()) {
        bail!("population overflowed in year {t}");
    }
    Ok(())
}

/// Simulation engine.
///
/// Holds the configuration, the fitness classes, the mutation kernel and the
/// finite-population dynamics, all built once from the configuration.
pub struct Engine {
    cfg: Config,
    classes: FitnessClasses,
    model: MutationModel,
    kernel: Kernel,
    dynamics: Dynamics,
}

impl Engine {
    /// Create a new `Engine` from a validated configuration.
    pub fn new(cfg: Config) -> Result<Self> {
        let classes = FitnessClasses::new(
            cfg.run.number_of_discrete_population_fitness_values,
            &cfg.grid,
        );
        let model = MutationModel::from_config(&cfg).context("failed to select mutation model")?;
        let mut kernel = build_kernel(&model, &classes);
        if !cfg.mutation.lossy {
            kernel = kernel.into_lossless();
        }

        let summary = kernel.summary();
        log::info!("{model:?} kernel: {summary:?}");
        if !model.uses_beneficial() && cfg.run.percentage_of_mutations_that_are_beneficial.is_some()
        {
            log::warn!("percentage of beneficial mutations is ignored by the {model:?} kernel");
        }

        let dynamics = match cfg.run.population_size {
            PopulationSize::Infinite => Dynamics::Deterministic(Box::new(NoCorrection)),
            PopulationSize::Finite => match cfg.finite.method {
                FiniteMethod::Threshold => {
                    Dynamics::Deterministic(Box::new(Threshold::new(cfg.finite.threshold)))
                }
                FiniteMethod::Stochastic => Dynamics::Stochastic,
            },
        };
        if model.is_closed_form() && cfg.run.population_size == PopulationSize::Finite {
            log::warn!("finite population dynamics are not applied to the closed form");
        } else if matches!(dynamics, Dynamics::Stochastic) {
            log::info!("stochastic population follows birth and death rates");
        }

        Ok(Self {
            cfg,
            classes,
            model,
            kernel,
            dynamics,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn classes(&self) -> &FitnessClasses {
        &self.classes
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Compute the trajectory for years `0 .. number_of_years`.
    pub fn perform_simulation(&mut self) -> Result<Trajectory> {
        let n_years = self.cfg.run.number_of_years;
        let initial = initial_distribution(&self.classes, &self.cfg.init);

        if self.model.is_closed_form() {
            return self.perform_closed_form(initial);
        }
        match &mut self.dynamics {
            Dynamics::Deterministic(correction) => {
                let mut trajectory = Trajectory::new(initial, n_years);
                let mut progress = Progress::new(n_years);
                for t in 1..n_years {
                    let prev = trajectory.last().context("trajectory is empty")?;
                    let next = step(
                        prev,
                        &self.kernel,
                        &self.classes,
                        self.cfg.selection.scheme,
                        self.cfg.selection.steps_per_year,
                    );
                    let next = correction
                        .correct(next)
                        .with_context(|| format!("failed to correct year {t}"))?;
                    check_finite(&next, t)?;
                    trajectory.push(next);
                    progress.update(t);
                }
                Ok(trajectory)
            }
            Dynamics::Stochastic => {
                let mut population = StochasticPopulation::new(&initial, &self.cfg.finite)
                    .context("failed to construct population")?;
                let mut trajectory = Trajectory::new(population.dist(), n_years);
                let mut progress = Progress::new(n_years);
                for t in 1..n_years {
                    population
                        .advance(
                            &self.kernel,
                            &self.classes,
                            self.cfg.selection.steps_per_year,
                        )
                        .with_context(|| format!("failed to advance year {t}"))?;
                    trajectory.push(population.dist());
                    progress.update(t);
                }
                Ok(trajectory)
            }
        }
    }

    fn perform_closed_form(&self, initial: Vec<f64>) -> Result<Trajectory> {
        let n_years = self.cfg.run.number_of_years;
        let mut trajectory = Trajectory::new(initial.clone(), n_years);
        let mut progress = Progress::new(n_years);
        for t in 1..n_years {
            let next = closed_form(&initial, self.classes.growth_rates(), t);
            check_finite(&next, t)?;
            trajectory.push(next);
            progress.update(t);
        }
        Ok(trajectory)
    }

    /// Find the equilibrium distribution by power iteration on the yearly
    /// update, starting from a uniform distribution.
    ///
    /// The finite-population dynamics play no part in it.
    pub fn find_equilibrium(&self) -> Result<Equilibrium> {
        let settings = &self.cfg.equilibrium;
        let update = |dist: &[f64]| {
            step(
                dist,
                &self.kernel,
                &self.classes,
                self.cfg.selection.scheme,
                self.cfg.selection.steps_per_year,
            )
        };
        let normalize = |dist: Vec<f64>, i_iter: usize| -> Result<(Vec<f64>, f64)> {
            let mass = fsum(&dist);
            if !mass.is_finite() || mass <= 0.0 {
                bail!("population mass is {mass:e} in iteration {i_iter}");
            }
            Ok((dist.iter().map(|val| val / mass).collect(), mass))
        };

        let n_classes = self.classes.n_classes();
        let mut dist = vec![1.0 / n_classes as f64; n_classes];
        let mut iterations = 0;
        let mut converged = false;
        while iterations < settings.max_iterations {
            iterations += 1;
            let (next, _) = normalize(update(&dist), iterations)?;
            let change = max_abs_diff(&next, &dist);
            dist = next;
            if change < settings.tolerance {
                converged = true;
                break;
            }
        }
        if converged {
            log::info!("equilibrium converged after {iterations} iterations");
        } else {
            log::warn!("equilibrium did not converge in {iterations} iterations");
        }

        let (image, growth_factor) = normalize(update(&dist), iterations + 1)?;
        let residual = max_abs_diff(&image, &dist);

        Ok(Equilibrium {
            distribution: dist,
            growth_factor,
            residual,
            iterations,
            converged,
        })
    }
}

fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}
