use serde::{Deserialize, Serialize};

/// Compensated (Neumaier) sum.
pub fn fsum(vals: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut comp = 0.0;
    for &val in vals {
        let tmp = sum + val;
        if sum.abs() >= val.abs() {
            comp += (sum - tmp) + val;
        } else {
            comp += (val - tmp) + sum;
        }
        sum = tmp;
    }
    sum + comp
}

/// Mean and variance of `vals` weighted by `weights`.
///
/// Returns `NaN`s when the weights sum to zero.
pub fn mean_and_variance(weights: &[f64], vals: &[f64]) -> (f64, f64) {
    let norm = fsum(weights);
    if norm == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let mom_1: Vec<_> = weights.iter().zip(vals).map(|(w, x)| w * x).collect();
    let mom_2: Vec<_> = weights.iter().zip(vals).map(|(w, x)| w * x * x).collect();
    let mom_1 = fsum(&mom_1);
    let mom_2 = fsum(&mom_2);
    let mean = mom_1 / norm;
    let var = (mom_2 - mom_1 * mom_1 / norm) / norm;
    (mean, var)
}

/// Per-year values of one observable.
pub struct Series {
    vals: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesReport {
    pub first: f64,
    pub last: f64,
    pub min: f64,
    pub max: f64,
}

impl Series {
    pub fn new() -> Self {
        Self { vals: Vec::new() }
    }

    pub fn push(&mut self, val: f64) {
        self.vals.push(val);
    }

    pub fn vals(&self) -> &[f64] {
        &self.vals
    }

    pub fn report(&self) -> SeriesReport {
        let finite = self.vals.iter().copied().filter(|val| val.is_finite());
        SeriesReport {
            first: self.vals.first().copied().unwrap_or(f64::NAN),
            last: self.vals.last().copied().unwrap_or(f64::NAN),
            min: finite.clone().fold(f64::NAN, f64::min),
            max: finite.fold(f64::NAN, f64::max),
        }
    }

    /// Largest absolute difference over the years both series cover.
    pub fn max_abs_diff(&self, other: &Series) -> f64 {
        self.vals
            .iter()
            .zip(&other.vals)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}
