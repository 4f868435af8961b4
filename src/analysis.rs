use crate::config::MutationType;
use crate::record::{self, Record};
use crate::stats::{Series, fsum, mean_and_variance};
use anyhow::{Context, Result};
use std::path::Path;

/// Per-year observable of a trajectory.
pub trait Obs {
    fn name(&self) -> &'static str;
    fn update(&mut self, dist: &[f64], growth_rates: &[f64]);
    fn series(&self) -> &Series;

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "summary": self.series().report(),
            "values": self.series().vals(),
        })
    }
}

pub struct MeanFitness {
    series: Series,
}

impl MeanFitness {
    pub fn new() -> Self {
        Self {
            series: Series::new(),
        }
    }
}

impl Obs for MeanFitness {
    fn name(&self) -> &'static str {
        "mean_fitness"
    }

    fn update(&mut self, dist: &[f64], growth_rates: &[f64]) {
        let (mean, _) = mean_and_variance(dist, growth_rates);
        self.series.push(mean);
    }

    fn series(&self) -> &Series {
        &self.series
    }
}

pub struct VarianceFitness {
    series: Series,
}

impl VarianceFitness {
    pub fn new() -> Self {
        Self {
            series: Series::new(),
        }
    }
}

impl Obs for VarianceFitness {
    fn name(&self) -> &'static str {
        "variance_fitness"
    }

    fn update(&mut self, dist: &[f64], growth_rates: &[f64]) {
        let (_, var) = mean_and_variance(dist, growth_rates);
        self.series.push(var);
    }

    fn series(&self) -> &Series {
        &self.series
    }
}

pub struct TotalMass {
    series: Series,
}

impl TotalMass {
    pub fn new() -> Self {
        Self {
            series: Series::new(),
        }
    }
}

impl Obs for TotalMass {
    fn name(&self) -> &'static str {
        "total_mass"
    }

    fn update(&mut self, dist: &[f64], _growth_rates: &[f64]) {
        self.series.push(fsum(dist));
    }

    fn series(&self) -> &Series {
        &self.series
    }
}

struct Run {
    label: String,
    mutation_type: MutationType,
    n_years: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Run {
    fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = self.obs_ptr_vec.iter().map(|obs| obs.report()).collect();
        serde_json::json!({
            "label": self.label,
            "mutation_type": self.mutation_type,
            "n_years": self.n_years,
            "observables": reports,
        })
    }

    fn compare(&self, reference: &Run) -> serde_json::Value {
        let mut max_abs_diff = serde_json::Map::new();
        for (obs, ref_obs) in self.obs_ptr_vec.iter().zip(&reference.obs_ptr_vec) {
            let diff = obs.series().max_abs_diff(ref_obs.series());
            max_abs_diff.insert(obs.name().to_string(), serde_json::json!(diff));
        }
        serde_json::json!({
            "reference": reference.label,
            "label": self.label,
            "n_common_years": self.n_years.min(reference.n_years),
            "max_abs_diff": max_abs_diff,
        })
    }
}

/// Compares trajectories of several runs against the first one added.
pub struct Analyzer {
    runs: Vec<Run>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self { runs: Vec::new() }
    }

    pub fn n_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let record: Record = record::load(file).with_context(|| format!("failed to load {file:?}"))?;
        self.add_record(file.display().to_string(), &record);
        Ok(())
    }

    pub fn add_record(&mut self, label: String, record: &Record) {
        let mut obs_ptr_vec: Vec<Box<dyn Obs>> = Vec::new();
        obs_ptr_vec.push(Box::new(MeanFitness::new()));
        obs_ptr_vec.push(Box::new(VarianceFitness::new()));
        obs_ptr_vec.push(Box::new(TotalMass::new()));

        for dist in record.trajectory.iter() {
            for obs in &mut obs_ptr_vec {
                obs.update(dist, &record.growth_rates);
            }
        }

        self.runs.push(Run {
            label,
            mutation_type: record.mutation_type,
            n_years: record.trajectory.len(),
            obs_ptr_vec,
        });
    }

    pub fn report(&self) -> serde_json::Value {
        let runs: Vec<_> = self.runs.iter().map(|run| run.report()).collect();
        let comparisons: Vec<_> = match self.runs.split_first() {
            Some((reference, others)) => others.iter().map(|run| run.compare(reference)).collect(),
            None => Vec::new(),
        };
        serde_json::json!({ "runs": runs, "comparisons": comparisons })
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        record::save(&self.report(), file)
    }
}
