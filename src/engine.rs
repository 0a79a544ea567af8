use crate::config::Config;
use crate::model::{FORCED_STEP, Reading, SimulationState, clamp_step};
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Clock of the driving loop.
///
/// Turns timestamps into elapsed times, clamped so that a long gap between
/// two samples never produces a large step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameClock {
    prev_ts: f64,
}

impl FrameClock {
    pub fn new(now: f64) -> Self {
        Self { prev_ts: now }
    }

    /// Last sampled timestamp.
    pub fn now(&self) -> f64 {
        self.prev_ts
    }

    /// Record `now` and return the clamped time elapsed since the last sample.
    pub fn sample(&mut self, now: f64) -> f64 {
        let dt = clamp_step(now - self.prev_ts);
        self.prev_ts = now;
        dt
    }
}

/// Trajectory record written after every save interval.
#[derive(Debug, Serialize, Deserialize)]
pub struct Record {
    /// Frames elapsed since the session was created.
    pub frame: u64,
    /// Clock timestamp of the record.
    pub time: f64,

    pub signal_is_red: bool,
    pub vehicle_count: u32,

    pub readings: [Reading; 3],
}

/// Simulation engine.
///
/// Holds the configuration, the simulation state, the frame clock and the
/// run/pause flag, and provides methods to drive, save and load a session.
#[derive(Debug, Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    state: SimulationState,
    clock: FrameClock,
    frame: u64,
    running: bool,
}

impl Engine {
    /// Create a new `Engine` with initial levels and the configured controls.
    pub fn new(cfg: Config) -> Self {
        let state = SimulationState::new(cfg.init.signal_is_red, cfg.init.vehicle_count);
        Self {
            cfg,
            state,
            clock: FrameClock::new(0.0),
            frame: 0,
            running: true,
        }
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Flip the run/pause flag and return its new value.
    pub fn toggle_running(&mut self) -> bool {
        self.running = !self.running;
        self.running
    }

    /// Update the control inputs read by the next step.
    pub fn set_controls(&mut self, signal_is_red: Option<bool>, vehicle_count: Option<u32>) {
        if let Some(signal_is_red) = signal_is_red {
            self.state.signal_is_red = signal_is_red;
        }
        if let Some(vehicle_count) = vehicle_count {
            self.state.vehicle_count = vehicle_count;
        }
    }

    /// Advance the state by a single fixed step, regardless of the run/pause flag.
    pub fn step(&mut self) {
        self.state.advance(FORCED_STEP);
        log::debug!("forced step {:?}", self.state.readings());
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Drive the session and save the resulting records to a binary file.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        if !self.running {
            log::warn!("session is paused, levels will not change");
        }

        let saves_per_file = self.cfg.driver.saves_per_file;
        for i_save in 0..saves_per_file {
            for _ in 0..self.cfg.driver.frames_per_save {
                self.perform_frame();
            }

            encode::write(&mut writer, &self.record()).context("failed to serialize record")?;

            let progress = 100.0 * (i_save + 1) as f64 / saves_per_file as f64;
            log::info!("completed {progress:06.2}%");
        }

        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }

    /// Save a checkpoint of the entire engine.
    ///
    /// Can be used to continue the session later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }

    fn perform_frame(&mut self) {
        let now = self.clock.now() + self.cfg.driver.frame_interval();
        let dt = self.clock.sample(now);
        if self.running {
            self.state.advance(dt);
        }
        self.frame += 1;
    }

    fn record(&self) -> Record {
        Record {
            frame: self.frame,
            time: self.clock.now(),
            signal_is_red: self.state.signal_is_red,
            vehicle_count: self.state.vehicle_count,
            readings: self.state.readings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DriverConfig, InitConfig};

    fn test_config(fps: f64) -> Config {
        Config {
            init: InitConfig::default(),
            driver: DriverConfig {
                fps,
                frames_per_save: 4,
                saves_per_file: 3,
            },
        }
    }

    fn read_records(file: &Path, count: usize) -> Vec<Record> {
        let mut reader = BufReader::new(File::open(file).unwrap());
        (0..count)
            .map(|_| decode::from_read(&mut reader).unwrap())
            .collect()
    }

    #[test]
    fn clock_clamps_elapsed_time() {
        let mut clock = FrameClock::new(10.0);
        assert_eq!(clock.sample(10.1), 10.1 - 10.0);
        assert_eq!(clock.sample(500.0), 0.25);
        assert_eq!(clock.sample(499.0), 0.0);
        assert_eq!(clock.now(), 499.0);
    }

    #[test]
    fn forced_step_matches_direct_advance() {
        let mut engine = Engine::new(test_config(10.0));
        let mut state = SimulationState::new(true, 12);

        engine.step();
        state.advance(0.2);
        assert_eq!(engine.state(), &state);

        engine.toggle_running();
        engine.set_controls(Some(false), Some(40));
        engine.step();
        state.signal_is_red = false;
        state.vehicle_count = 40;
        state.advance(0.2);
        assert_eq!(engine.state(), &state);
    }

    #[test]
    fn simulation_writes_records() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("trajectory.msgpack");

        let mut engine = Engine::new(test_config(10.0));
        engine.perform_simulation(&file).unwrap();

        let records = read_records(&file, 3);
        let frames: Vec<_> = records.iter().map(|r| r.frame).collect();
        assert_eq!(frames, [4, 8, 12]);
        assert!((records[2].time - 1.2).abs() < 1e-9);
        assert!(records[0].readings[0].level < records[2].readings[0].level);

        let mut state = SimulationState::new(true, 12);
        for _ in 0..12 {
            state.advance(0.1);
        }
        assert!((engine.state().co2_level() - state.co2_level()).abs() < 1e-9);
    }

    #[test]
    fn slow_frame_rate_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(test_config(1.0));
        engine
            .perform_simulation(dir.path().join("trajectory.msgpack"))
            .unwrap();

        let mut state = SimulationState::new(true, 12);
        for _ in 0..12 {
            state.advance(0.25);
        }
        assert!((engine.state().co2_level() - state.co2_level()).abs() < 1e-9);
    }

    #[test]
    fn paused_simulation_keeps_levels() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("trajectory.msgpack");

        let mut engine = Engine::new(test_config(10.0));
        assert!(!engine.toggle_running());
        engine.perform_simulation(&file).unwrap();

        assert_eq!(engine.state(), &SimulationState::new(true, 12));
        let records = read_records(&file, 3);
        assert_eq!(records[2].frame, 12);
        assert_eq!(records[2].readings[2].level, 100.0);
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("checkpoint.msgpack");

        let mut engine = Engine::new(test_config(10.0));
        engine.step();
        engine.toggle_running();
        engine.save_checkpoint(&file).unwrap();

        let loaded = Engine::load_checkpoint(&file).unwrap();
        assert_eq!(loaded.cfg(), engine.cfg());
        assert_eq!(loaded.state(), engine.state());
        assert!(!loaded.is_running());
    }

    #[test]
    fn reset_keeps_controls() {
        let mut engine = Engine::new(test_config(10.0));
        engine.set_controls(None, Some(70));
        engine.step();
        engine.reset();
        assert_eq!(engine.state(), &SimulationState::new(true, 70));
    }
}
