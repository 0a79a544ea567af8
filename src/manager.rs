use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::Engine;
use anyhow::{Context, Result, bail};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Session directory manager.
///
/// Every command loads the session checkpoint, applies itself and saves the
/// checkpoint again.
pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    pub fn create_session(&self) -> Result<()> {
        let checkpoint_file = self.checkpoint_file();
        if checkpoint_file.exists() {
            bail!("{checkpoint_file:?} already exists");
        }

        Engine::new(self.cfg.clone())
            .save_checkpoint(&checkpoint_file)
            .context("failed to save checkpoint")?;
        log::info!("created {checkpoint_file:?}");

        Ok(())
    }

    pub fn run_session(&self) -> Result<()> {
        let file_idx = self
            .count_trajectory_files()
            .context("failed to count trajectory files")?;

        // Records go to a partial file that only gets its final name once
        // the checkpoint is saved.
        let trajectory_file = self.trajectory_file(file_idx);
        let partial_file = trajectory_file.with_extension("msgpack.part");

        let result = self.update_session(|engine| {
            engine
                .perform_simulation(&partial_file)
                .context("failed to perform simulation")
        });
        if let Err(error) = result {
            if partial_file.exists() {
                fs::remove_file(&partial_file).ok();
            }
            return Err(error);
        }

        fs::rename(&partial_file, &trajectory_file)
            .with_context(|| format!("failed to rename {partial_file:?}"))?;
        log::info!("wrote {trajectory_file:?}");

        Ok(())
    }

    pub fn step_session(&self) -> Result<()> {
        self.update_session(|engine| {
            engine.step();
            log_readings(engine);
            Ok(())
        })
    }

    pub fn reset_session(&self) -> Result<()> {
        self.update_session(|engine| {
            engine.reset();
            log::info!("reset gas levels");
            Ok(())
        })
    }

    pub fn set_controls(
        &self,
        signal_is_red: Option<bool>,
        vehicle_count: Option<u32>,
    ) -> Result<()> {
        self.update_session(|engine| {
            engine.set_controls(signal_is_red, vehicle_count);
            let state = engine.state();
            log::info!(
                "signal {} with {} vehicles",
                state.signal_label(),
                state.vehicle_count
            );
            Ok(())
        })
    }

    pub fn toggle_session(&self) -> Result<()> {
        self.update_session(|engine| {
            let running = engine.toggle_running();
            log::info!("session {}", if running { "running" } else { "paused" });
            Ok(())
        })
    }

    pub fn show_session(&self) -> Result<()> {
        let engine = self.load_engine()?;
        print!("{}", format_readings(&engine));
        Ok(())
    }

    pub fn analyze_session(&self) -> Result<()> {
        let engine = self.load_engine()?;
        let mut analyzer = Analyzer::new(engine.cfg().clone());

        let n_files = self
            .count_trajectory_files()
            .context("failed to count trajectory files")?;
        for file_idx in 0..n_files {
            analyzer
                .add_file(self.trajectory_file(file_idx))
                .context("failed to add file")?;
        }
        log::info!("analyzed {} records", analyzer.n_records());

        analyzer
            .save_results(self.results_file())
            .context("failed to save results")?;

        Ok(())
    }

    pub fn clean_session(&self) -> Result<()> {
        let pattern = self.sim_dir.join("trajectory-*.msgpack");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let mut files: Vec<_> = glob(pattern)
            .context("failed to glob trajectory files")?
            .filter_map(Result::ok)
            .collect();
        let pattern = self.sim_dir.join("trajectory-*.msgpack.part");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        files.extend(
            glob(pattern)
                .context("failed to glob partial trajectory files")?
                .filter_map(Result::ok),
        );
        files.push(self.checkpoint_file());
        files.push(self.results_file());

        for file in files.iter().filter(|file| file.exists()) {
            fs::remove_file(file).with_context(|| format!("failed to remove {file:?}"))?;
            log::info!("removed {file:?}");
        }

        Ok(())
    }

    fn load_engine(&self) -> Result<Engine> {
        let checkpoint_file = self.checkpoint_file();
        let engine = Engine::load_checkpoint(&checkpoint_file)
            .with_context(|| format!("failed to load {checkpoint_file:?}"))?;
        if engine.cfg() != &self.cfg {
            bail!("checkpoint config differs from the current config");
        }
        log::info!("loaded {checkpoint_file:?}");
        Ok(engine)
    }

    fn update_session<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Engine) -> Result<()>,
    {
        let mut engine = self.load_engine()?;

        apply(&mut engine)?;

        engine
            .save_checkpoint(self.checkpoint_file())
            .context("failed to save checkpoint")?;

        Ok(())
    }

    fn count_trajectory_files(&self) -> Result<usize> {
        let pattern = self.sim_dir.join("trajectory-*.msgpack");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let count = glob(pattern)
            .context("failed to glob trajectory files")?
            .filter_map(Result::ok)
            .count();
        Ok(count)
    }

    fn checkpoint_file(&self) -> PathBuf {
        self.sim_dir.join("checkpoint.msgpack")
    }

    fn trajectory_file(&self, file_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("trajectory-{file_idx:04}.msgpack"))
    }

    fn results_file(&self) -> PathBuf {
        self.sim_dir.join("results.json")
    }
}

fn log_readings(engine: &Engine) {
    for reading in engine.state().readings() {
        log::info!(
            "{:<8} level {:>10.3} scaled {:>7.3}",
            reading.gas.label(),
            reading.level,
            reading.scaled
        );
    }
}

fn format_readings(engine: &Engine) -> String {
    let state = engine.state();
    let mut out = format!(
        "signal: {}  vehicles: {}  {}\n",
        state.signal_label(),
        state.vehicle_count,
        if engine.is_running() { "running" } else { "paused" }
    );
    out += &format!("{:<10} {:>10} {:>8}  {}\n", "gas", "level", "scaled", "color");
    for reading in state.readings() {
        out += &format!(
            "{:<10} {:>10.3} {:>8.3}  {}\n",
            reading.gas.label(),
            reading.level,
            reading.scaled,
            reading.gas.color()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DriverConfig, InitConfig};

    const CONFIG: &str = "
[driver]
fps = 10.0
frames_per_save = 2
saves_per_file = 4
";

    fn session_manager(dir: &Path) -> Manager {
        fs::write(dir.join("config.toml"), CONFIG).unwrap();
        let mgr = Manager::new(dir).unwrap();
        mgr.create_session().unwrap();
        mgr
    }

    #[test]
    fn failed_run_leaves_no_trajectory() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = session_manager(dir.path());

        let blocker = mgr.trajectory_file(0).with_extension("msgpack.part");
        fs::create_dir(&blocker).unwrap();
        assert!(mgr.run_session().is_err());
        assert!(!mgr.trajectory_file(0).exists());
        assert_eq!(mgr.count_trajectory_files().unwrap(), 0);

        fs::remove_dir(&blocker).unwrap();
        mgr.run_session().unwrap();
        assert!(mgr.trajectory_file(0).exists());
        assert!(!blocker.exists());
        assert_eq!(mgr.count_trajectory_files().unwrap(), 1);

        mgr.analyze_session().unwrap();
    }

    #[test]
    fn analysis_rejects_changed_config() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = session_manager(dir.path());
        mgr.run_session().unwrap();

        let changed = CONFIG.replace("saves_per_file = 4", "saves_per_file = 2");
        fs::write(dir.path().join("config.toml"), changed).unwrap();
        let mgr = Manager::new(dir.path()).unwrap();

        let err = mgr.analyze_session().unwrap_err();
        assert!(format!("{err:#}").contains("checkpoint config differs"));
        assert!(!mgr.results_file().exists());
    }

    #[test]
    fn readings_table_lists_every_gas() {
        let mut engine = Engine::new(Config {
            init: InitConfig::default(),
            driver: DriverConfig {
                fps: 10.0,
                frames_per_save: 1,
                saves_per_file: 1,
            },
        });
        engine.toggle_running();

        let table = format_readings(&engine);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "signal: RED  vehicles: 12  paused");
        assert!(lines[2].starts_with("CO2"));
        assert!(lines[4].starts_with("Fresh O2"));
        assert!(lines[4].contains("100.000"));
        assert!(lines[4].ends_with("#78B4FF"));
    }
}
