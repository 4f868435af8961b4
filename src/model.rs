use crate::config;
use crate::stats::fsum;
use serde::{Deserialize, Serialize};

/// Discrete fitness classes.
///
/// Class `i` grows at the Malthusian rate `growth_rates[i]`. Birth rates are
/// the growth rates shifted by the death rate, so that the first is zero, and
/// the representable mutation effects are all the differences between two
/// birth rates, from `-b[n-1]` through `0` to `b[n-1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FitnessClasses {
    growth_rates: Vec<f64>,
    birth_rates: Vec<f64>,
    effects: Vec<f64>,
    death_rate: f64,
    bin_width: f64,
}

impl FitnessClasses {
    pub fn new(n_classes: usize, grid: &config::Grid) -> Self {
        let death_rate = grid.death_rate;
        let span = grid.max_growth_rate + death_rate;

        let bin_width = if grid.exclude_max {
            span / n_classes as f64
        } else {
            span / (n_classes - 1) as f64
        };

        let mut growth_rates: Vec<f64> = (0..n_classes)
            .map(|k| k as f64 * bin_width - death_rate)
            .collect();
        if !grid.exclude_max {
            // Pin the upper endpoint to the configured maximum.
            if let Some(last) = growth_rates.last_mut() {
                *last = grid.max_growth_rate;
            }
        }

        let birth_rates: Vec<f64> = growth_rates.iter().map(|&m| m + death_rate).collect();

        let mut effects = Vec::with_capacity(2 * n_classes - 1);
        effects.extend(birth_rates.iter().rev().map(|&b| -b));
        effects.extend(birth_rates.iter().skip(1));

        Self {
            growth_rates,
            birth_rates,
            effects,
            death_rate,
            bin_width,
        }
    }

    pub fn n_classes(&self) -> usize {
        self.growth_rates.len()
    }

    pub fn growth_rates(&self) -> &[f64] {
        &self.growth_rates
    }

    pub fn birth_rates(&self) -> &[f64] {
        &self.birth_rates
    }

    /// Mutation effects, `2 * n_classes - 1` of them, zero in the middle.
    pub fn effects(&self) -> &[f64] {
        &self.effects
    }

    /// Index of the zero effect in [`FitnessClasses::effects`].
    pub fn zero_effect(&self) -> usize {
        self.n_classes() - 1
    }

    pub fn death_rate(&self) -> f64 {
        self.death_rate
    }

    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }
}

/// Discretized, cropped Gaussian over growth rates, normalized to unit mass.
pub fn initial_distribution(classes: &FitnessClasses, init: &config::Init) -> Vec<f64> {
    let weights: Vec<f64> = classes
        .growth_rates()
        .iter()
        .map(|&m| {
            let z = (m - init.mean) / init.std_dev;
            if z.abs() > init.crop {
                0.0
            } else {
                (-0.5 * z * z).exp()
            }
        })
        .collect();

    let norm = fsum(&weights);
    if norm == 0.0 {
        return weights;
    }
    weights.iter().map(|&w| w / norm).collect()
}

/// Population distributions over the fitness classes, one per year.
///
/// Year `0` is the initial condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trajectory {
    years: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn new(initial: Vec<f64>, n_years: usize) -> Self {
        let mut years = Vec::with_capacity(n_years);
        years.push(initial);
        Self { years }
    }

    pub fn push(&mut self, dist: Vec<f64>) {
        self.years.push(dist);
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn last(&self) -> Option<&[f64]> {
        self.years.last().map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f64]> {
        self.years.iter().map(Vec::as_slice)
    }
}
