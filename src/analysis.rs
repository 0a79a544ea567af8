use crate::config::Config;
use crate::engine::Record;
use crate::model::GasKind;
use crate::stats::{Accumulator, TimeSeries};
use anyhow::{Context, Result};
use rmp_serde::decode;
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Observable computed from trajectory records.
pub trait Obs {
    fn update(&mut self, record: &Record) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

/// Fraction of records taken during the red phase.
pub struct RedFraction {
    acc: Accumulator,
}

impl RedFraction {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for RedFraction {
    fn update(&mut self, record: &Record) -> Result<()> {
        self.acc.add(if record.signal_is_red { 1.0 } else { 0.0 });
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "red_fraction": self.acc.report() })
    }
}

/// Running statistics of every gas level.
pub struct GasLevels {
    acc_vec: Vec<Accumulator>,
}

impl GasLevels {
    pub fn new() -> Self {
        let mut acc_vec = Vec::new();
        acc_vec.resize_with(GasKind::ALL.len(), Accumulator::new);
        Self { acc_vec }
    }
}

impl Obs for GasLevels {
    fn update(&mut self, record: &Record) -> Result<()> {
        for (acc, reading) in self.acc_vec.iter_mut().zip(&record.readings) {
            acc.add(reading.level);
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let reports: serde_json::Map<_, _> = GasKind::ALL
            .iter()
            .zip(&self.acc_vec)
            .map(|(gas, acc)| (gas.label().to_string(), serde_json::json!(acc.report())))
            .collect();
        serde_json::json!({ "gas_levels": reports })
    }
}

/// Equilibrated time-series statistics of every gas level.
///
/// `is_equil` is set when a level has settled within the analyzed records:
/// O2 pinned at 0 or 100, or pollutants back at their baseline on green.
/// Pollutants keep growing under a red signal, so a red run reports
/// `is_equil = false` for CO2 and CO, and the mean then covers the second
/// half of the records only.
pub struct GasSeries {
    series_vec: Vec<TimeSeries>,
}

impl GasSeries {
    pub fn new() -> Self {
        let mut series_vec = Vec::new();
        series_vec.resize_with(GasKind::ALL.len(), TimeSeries::new);
        Self { series_vec }
    }
}

impl Obs for GasSeries {
    fn update(&mut self, record: &Record) -> Result<()> {
        for (series, reading) in self.series_vec.iter_mut().zip(&record.readings) {
            series.push(reading.level);
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let reports: serde_json::Map<_, _> = GasKind::ALL
            .iter()
            .zip(&self.series_vec)
            .map(|(gas, series)| {
                (
                    gas.label().to_string(),
                    serde_json::json!(series.report()),
                )
            })
            .collect();
        serde_json::json!({ "gas_series": reports })
    }
}

pub struct Analyzer {
    cfg: Config,
    n_records: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(cfg: Config) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(RedFraction::new()),
            Box::new(GasLevels::new()),
            Box::new(GasSeries::new()),
        ];
        Self {
            cfg,
            n_records: 0,
            obs_ptr_vec,
        }
    }

    /// Feed every record of a trajectory file to the observables.
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        for _ in 0..self.cfg.driver.saves_per_file {
            let record: Record = decode::from_read(&mut reader).context("failed to read record")?;
            for obs in &mut self.obs_ptr_vec {
                obs.update(&record).context("failed to update observable")?;
            }
            self.n_records += 1;
        }
        Ok(())
    }

    pub fn n_records(&self) -> usize {
        self.n_records
    }

    pub fn report(&self) -> Vec<serde_json::Value> {
        self.obs_ptr_vec.iter().map(|obs| obs.report()).collect()
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer_pretty(&mut writer, &self.report())
            .context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}
