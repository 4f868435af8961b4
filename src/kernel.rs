//! Mutation kernels over the representable growth-rate differences.
//!
//! A kernel assigns a probability to every effect in
//! [`FitnessClasses::effects`]. Offspring of class `i` land in class `j` with
//! the probability of effect `m[j] - m[i]`. Except for
//! [`MutationModel::GammaRenormalized`], the probabilities are built the way
//! the published experiments built them and are not normalized.

use crate::config::{Config, MutationType};
use crate::model::FitnessClasses;
use crate::stats::fsum;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Mutation kernel family together with the parameters it needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MutationModel {
    /// All offspring keep the parental growth rate.
    None,
    /// As [`MutationModel::None`], but the trajectory is computed in closed form.
    NoneExact,
    /// Centered normal density times the bin width.
    Gaussian { std_dev: f64 },
    /// Reflected Gamma density times the bin width, beneficial side weighted
    /// by `beneficial` and deleterious side by its complement.
    ///
    /// The density at zero effect is taken from the smallest deleterious
    /// effect instead of the Gamma density, which diverges there for
    /// `shape < 1`.
    Gamma {
        shape: f64,
        rate: f64,
        beneficial: f64,
    },
    /// Reflected Gamma density rescaled so that beneficial effects carry
    /// exactly `beneficial` and the rest carry `1 - beneficial`.
    GammaRenormalized {
        shape: f64,
        rate: f64,
        beneficial: f64,
    },
}

impl MutationModel {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let beneficial = || {
            cfg.run
                .percentage_of_mutations_that_are_beneficial
                .context("percentage of mutations that are beneficial is missing")
        };
        let mutation = &cfg.mutation;

        let model = match cfg.run.mutation_distribution_type {
            MutationType::None => MutationModel::None,
            MutationType::NoneExact => MutationModel::NoneExact,
            MutationType::Gaussian => MutationModel::Gaussian {
                std_dev: mutation.gaussian_std_dev,
            },
            MutationType::Gamma => MutationModel::Gamma {
                shape: mutation.gamma_shape,
                rate: mutation.gamma_rate,
                beneficial: beneficial()?,
            },
            MutationType::GammaRenormalized => MutationModel::GammaRenormalized {
                shape: mutation.gamma_shape,
                rate: mutation.gamma_rate,
                beneficial: beneficial()?,
            },
        };
        Ok(model)
    }

    /// Whether the trajectory is computed without iterating.
    pub fn is_closed_form(&self) -> bool {
        matches!(self, MutationModel::NoneExact)
    }

    /// Whether the beneficial percentage enters the kernel.
    pub fn uses_beneficial(&self) -> bool {
        matches!(
            self,
            MutationModel::Gamma { .. } | MutationModel::GammaRenormalized { .. }
        )
    }
}

/// Probabilities of the effects `(1 - n) w, ..., 0, ..., (n - 1) w`.
///
/// Every source class passes `row_weight` times its row on to the grid. The
/// weights are one for a lossy kernel, so offspring whose effect leaves the
/// grid are lost, and the inverse row sums for a lossless one.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    probs: Vec<f64>,
    row_weights: Vec<f64>,
    n_classes: usize,
}

/// Masses of the kernel split by the sign of the effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelSummary {
    pub total: f64,
    pub beneficial: f64,
    pub neutral: f64,
    pub deleterious: f64,
}

impl Kernel {
    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    /// Probabilities that an offspring of class `i_src` is born into each
    /// class, in class order.
    pub fn row(&self, i_src: usize) -> &[f64] {
        let start = self.n_classes - 1 - i_src;
        &self.probs[start..start + self.n_classes]
    }

    pub fn row_weight(&self, i_src: usize) -> f64 {
        self.row_weights[i_src]
    }

    pub fn is_lossy(&self) -> bool {
        self.row_weights.iter().all(|&weight| weight == 1.0)
    }

    /// Rescale every row so that each source class keeps all its offspring.
    pub fn into_lossless(mut self) -> Self {
        self.row_weights = (0..self.n_classes)
            .map(|i_src| {
                let sum = fsum(self.row(i_src));
                if sum > 0.0 { 1.0 / sum } else { 0.0 }
            })
            .collect();
        self
    }

    pub fn summary(&self) -> KernelSummary {
        let zero = self.n_classes - 1;
        let deleterious = fsum(&self.probs[..zero]);
        let neutral = self.probs[zero];
        let beneficial = fsum(&self.probs[zero + 1..]);
        KernelSummary {
            total: fsum(&self.probs),
            beneficial,
            neutral,
            deleterious,
        }
    }
}

/// Build the kernel of `model` over the effects of `classes`.
pub fn build_kernel(model: &MutationModel, classes: &FitnessClasses) -> Kernel {
    let effects = classes.effects();
    let delta = classes.bin_width();
    let zero = classes.zero_effect();

    let probs = match *model {
        MutationModel::None | MutationModel::NoneExact => {
            let mut probs = vec![0.0; effects.len()];
            probs[zero] = 1.0;
            probs
        }
        MutationModel::Gaussian { std_dev } => effects
            .iter()
            .map(|&x| gaussian_pdf(x, std_dev) * delta)
            .collect(),
        MutationModel::Gamma {
            shape,
            rate,
            beneficial,
        } => gamma_with_borrowed_zero(effects, zero, delta, shape, rate, beneficial),
        MutationModel::GammaRenormalized {
            shape,
            rate,
            beneficial,
        } => gamma_renormalized(effects, zero, delta, shape, rate, beneficial),
    };

    let n_classes = classes.n_classes();
    Kernel {
        probs,
        row_weights: vec![1.0; n_classes],
        n_classes,
    }
}

/// Reproduces the published Gamma kernel, zero-effect defect included.
fn gamma_with_borrowed_zero(
    effects: &[f64],
    zero: usize,
    delta: f64,
    shape: f64,
    rate: f64,
    beneficial: f64,
) -> Vec<f64> {
    let mut probs: Vec<f64> = effects
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            if i == zero {
                0.0
            } else {
                gamma_pdf(x.abs(), shape, rate)
            }
        })
        .collect();

    // Zero effect inherits the density of the smallest deleterious effect.
    probs[zero] = probs[zero - 1];

    for (i, prob) in probs.iter_mut().enumerate() {
        *prob *= if i > zero { beneficial } else { 1.0 - beneficial };
        *prob *= delta;
    }
    probs
}

fn gamma_renormalized(
    effects: &[f64],
    zero: usize,
    delta: f64,
    shape: f64,
    rate: f64,
    beneficial: f64,
) -> Vec<f64> {
    let mut probs: Vec<f64> = effects
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            if i == zero {
                0.0
            } else {
                gamma_pdf(x.abs(), shape, rate) * delta
            }
        })
        .collect();

    // Both reflected tails together approximate twice the unit mass. The
    // remainder is taken as is, even if the tails overshoot.
    probs[zero] = 2.0 - fsum(&probs);

    rescale(&mut probs[zero + 1..], beneficial);
    rescale(&mut probs[..=zero], 1.0 - beneficial);
    probs
}

fn rescale(probs: &mut [f64], target: f64) {
    let sum = fsum(probs);
    if sum > 0.0 {
        let factor = target / sum;
        probs.iter_mut().for_each(|prob| *prob *= factor);
    }
}

fn gaussian_pdf(x: f64, std_dev: f64) -> f64 {
    let z = x / std_dev;
    (-0.5 * z * z).exp() / (2.0 * PI).sqrt() / std_dev
}

fn gamma_pdf(x: f64, shape: f64, rate: f64) -> f64 {
    let y = x * rate;
    ((shape - 1.0) * y.ln() - y - libm::lgamma(shape)).exp() * rate
}
