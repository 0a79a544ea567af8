use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Session configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Initial control inputs.
    #[serde(default)]
    pub init: InitConfig,

    /// Frame loop and output settings.
    pub driver: DriverConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InitConfig {
    /// Start in the red (idle) phase.
    pub signal_is_red: bool,
    /// Number of vehicles waiting at the signal.
    pub vehicle_count: u32,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            signal_is_red: true,
            vehicle_count: 12,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    /// Frames per second of the driving loop.
    pub fps: f64,
    /// Number of frames between trajectory records.
    pub frames_per_save: usize,
    /// Number of records written per trajectory file.
    pub saves_per_file: usize,
}

impl DriverConfig {
    /// Time between two frame timestamps.
    pub fn frame_interval(&self) -> f64 {
        1.0 / self.fps
    }
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::parse(&contents)
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        check_num(self.init.vehicle_count, 0..=99).context("invalid initial vehicle count")?;

        check_num(self.driver.fps, 1.0..=240.0).context("invalid frames per second")?;
        check_num(self.driver.frames_per_save, 1..10_000)
            .context("invalid number of frames per save")?;
        check_num(self.driver.saves_per_file, 1..10_000)
            .context("invalid number of saves per file")?;

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
