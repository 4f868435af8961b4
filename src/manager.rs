use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::Engine;
use crate::record::{self, EquilibriumRecord, Format, KernelRecord, Record};
use anyhow::{Context, Result, bail};
use glob::glob;
use std::path::{Path, PathBuf};

pub struct Manager {
    cfg: Config,
}

impl Manager {
    pub fn new(cfg: Config) -> Self {
        log::info!("{cfg:#?}");
        Self { cfg }
    }

    pub fn run_simulation<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        Format::from_path(file).context("invalid output file")?;

        let mut engine =
            Engine::new(self.cfg.clone()).context("failed to construct engine")?;
        let trajectory = engine
            .perform_simulation()
            .context("failed to perform simulation")?;

        let record = Record::new(&engine, trajectory);
        if let (Some(first), Some(last)) = (record.total_mass.first(), record.total_mass.last()) {
            log::info!("total mass went from {first:e} to {last:e}");
        }

        record::save(&record, file).with_context(|| format!("failed to save {file:?}"))?;
        log::info!("saved {file:?}");

        Ok(())
    }

    pub fn run_kernel<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        Format::from_path(file).context("invalid output file")?;

        let engine = Engine::new(self.cfg.clone()).context("failed to construct engine")?;
        let record = KernelRecord::new(&engine);

        record::save(&record, file).with_context(|| format!("failed to save {file:?}"))?;
        log::info!("saved {file:?}");

        Ok(())
    }

    pub fn run_equilibrium<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        Format::from_path(file).context("invalid output file")?;

        let engine = Engine::new(self.cfg.clone()).context("failed to construct engine")?;
        let equilibrium = engine
            .find_equilibrium()
            .context("failed to find equilibrium")?;

        let record = EquilibriumRecord::new(&engine, equilibrium);
        log::info!(
            "equilibrium growth rate {:e}, mean fitness {:e}, fitness variance {:e}",
            record.growth_rate,
            record.mean_fitness,
            record.variance_fitness
        );

        record::save(&record, file).with_context(|| format!("failed to save {file:?}"))?;
        log::info!("saved {file:?}");

        Ok(())
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Compare the records matching `patterns`, in pattern order.
pub fn run_comparison<P: AsRef<Path>>(patterns: &[String], file: P) -> Result<()> {
    let file = file.as_ref();
    Format::from_path(file).context("invalid output file")?;

    let mut inputs = Vec::new();
    for pattern in patterns {
        let mut matches: Vec<PathBuf> = glob(pattern)
            .with_context(|| format!("failed to glob {pattern:?}"))?
            .filter_map(Result::ok)
            .collect();
        matches.retain(|path| {
            let is_output = is_same_file(path, file);
            if is_output {
                log::info!("skipping output file {path:?}");
            }
            !is_output
        });
        if matches.is_empty() {
            bail!("no files match {pattern:?}");
        }
        matches.sort();
        inputs.extend(matches);
    }
    if inputs.len() < 2 {
        bail!("comparison needs at least 2 records, but found {}", inputs.len());
    }

    let mut analyzer = Analyzer::new();
    for input in &inputs {
        analyzer
            .add_file(input)
            .context("failed to add file")?;
        log::info!("loaded {input:?}");
    }

    analyzer
        .save_results(file)
        .with_context(|| format!("failed to save {file:?}"))?;
    log::info!("saved comparison of {} runs to {file:?}", analyzer.n_runs());

    Ok(())
}
