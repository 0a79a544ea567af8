//! Gas-level model of vehicles idling at a traffic signal.
//!
//! The model is a handful of clamped linear updates driven by elapsed time.
//! Pollutants (CO2, CO) accumulate while the signal is red and decay toward
//! their baselines while it is green; fresh O2 is consumed on red and
//! recovers on green.

use serde::{Deserialize, Serialize};

/// CO2 emitted per idling vehicle per second.
pub const CO2_PER_VEH: f64 = 2.5;
/// CO emitted per idling vehicle per second.
pub const CO_PER_VEH: f64 = 1.6;
/// O2 consumed per idling vehicle per second.
pub const O2_CONSUME_PER_VEH: f64 = 0.8;
/// Base CO2 decay rate on green.
pub const DECAY_CO2: f64 = 1.1;
/// Base CO decay rate on green.
pub const DECAY_CO: f64 = 0.9;
/// Base O2 recovery rate on green.
pub const RECOVER_O2: f64 = 0.8;
/// Settling rate of pollutants on red.
pub const SLOW_DECAY: f64 = 0.05;

/// Largest time step a driver should pass to [`SimulationState::advance`].
pub const MAX_STEP: f64 = 0.25;
/// Time step of a forced single step.
pub const FORCED_STEP: f64 = 0.2;

const CO2_BASELINE: f64 = 0.0;
const CO_BASELINE: f64 = 0.0;
const O2_BASELINE: f64 = 100.0;

const PERCENT_MIN: f64 = 0.0;
const PERCENT_MAX: f64 = 100.0;

/// Length scale of the saturating pollutant display transform.
const DISPLAY_SCALE: f64 = 40.0;

/// Clamp an elapsed time to the range accepted by [`SimulationState::advance`].
pub fn clamp_step(dt: f64) -> f64 {
    dt.clamp(0.0, MAX_STEP)
}

/// Kind of gas tracked by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GasKind {
    Co2,
    Co,
    FreshO2,
}

impl GasKind {
    pub const ALL: [GasKind; 3] = [GasKind::Co2, GasKind::Co, GasKind::FreshO2];

    pub fn label(self) -> &'static str {
        match self {
            GasKind::Co2 => "CO2",
            GasKind::Co => "CO",
            GasKind::FreshO2 => "Fresh O2",
        }
    }

    /// Legend colour of the gas.
    pub fn color(self) -> &'static str {
        match self {
            GasKind::Co2 => "#58C759",
            GasKind::Co => "#FF9178",
            GasKind::FreshO2 => "#78B4FF",
        }
    }
}

/// Level of a single gas together with its display value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub gas: GasKind,
    pub level: f64,
    pub scaled: f64,
}

/// State of one simulation session.
///
/// `signal_is_red` and `vehicle_count` are control inputs owned by the
/// caller and read on every [`advance`](Self::advance). The gas levels can
/// only be changed through [`advance`](Self::advance) and
/// [`reset`](Self::reset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Red (idle) phase if `true`, green (flowing) phase otherwise.
    pub signal_is_red: bool,
    /// Number of vehicles waiting at the signal, expected in `0..=99`.
    pub vehicle_count: u32,

    co2_level: f64,
    co_level: f64,
    o2_level: f64,

    co2_baseline: f64,
    co_baseline: f64,
    o2_baseline: f64,
}

impl SimulationState {
    pub fn new(signal_is_red: bool, vehicle_count: u32) -> Self {
        Self {
            signal_is_red,
            vehicle_count,
            co2_level: CO2_BASELINE,
            co_level: CO_BASELINE,
            o2_level: O2_BASELINE,
            co2_baseline: CO2_BASELINE,
            co_baseline: CO_BASELINE,
            o2_baseline: O2_BASELINE,
        }
    }

    pub fn co2_level(&self) -> f64 {
        self.co2_level
    }

    pub fn co_level(&self) -> f64 {
        self.co_level
    }

    pub fn o2_level(&self) -> f64 {
        self.o2_level
    }

    pub fn level(&self, gas: GasKind) -> f64 {
        match gas {
            GasKind::Co2 => self.co2_level(),
            GasKind::Co => self.co_level(),
            GasKind::FreshO2 => self.o2_level(),
        }
    }

    /// Label of the current signal phase.
    pub fn signal_label(&self) -> &'static str {
        if self.signal_is_red { "RED" } else { "GREEN" }
    }

    /// Advance the gas levels by `dt` seconds.
    ///
    /// `dt` is expected in `[0, MAX_STEP]`, see [`clamp_step`]. A negative
    /// `dt` runs the update backwards and leaves the result unspecified.
    pub fn advance(&mut self, dt: f64) {
        let n_veh = self.vehicle_count as f64;

        if self.signal_is_red {
            self.co2_level += n_veh * CO2_PER_VEH * dt;
            self.co_level += n_veh * CO_PER_VEH * dt;
            self.o2_level =
                (self.o2_level - n_veh * O2_CONSUME_PER_VEH * dt).clamp(PERCENT_MIN, PERCENT_MAX);

            // Settle toward the baselines after accumulating.
            self.co2_level = self.co2_baseline.max(self.co2_level - SLOW_DECAY * dt);
            self.co_level = self.co_baseline.max(self.co_level - SLOW_DECAY * dt);
        } else {
            let flow = 1.0 + n_veh * 0.02;
            self.co2_level = decay(self.co2_level, self.co2_baseline, DECAY_CO2 * flow, dt);
            self.co_level = decay(self.co_level, self.co_baseline, DECAY_CO * flow, dt);
            self.o2_level = (self.o2_level + RECOVER_O2 * dt * (1.0 + n_veh * 0.05))
                .clamp(PERCENT_MIN, PERCENT_MAX);
        }
    }

    /// Restore the initial gas levels, keeping baselines and controls.
    pub fn reset(&mut self) {
        self.co2_level = CO2_BASELINE;
        self.co_level = CO_BASELINE;
        self.o2_level = O2_BASELINE;
    }

    /// Readings of all gases, in the order of [`GasKind::ALL`].
    pub fn readings(&self) -> [Reading; 3] {
        GasKind::ALL.map(|gas| {
            let level = self.level(gas);
            Reading {
                gas,
                level,
                scaled: scale_for_display(level, gas),
            }
        })
    }
}

/// One-sided linear decay of `val` toward the floor `base`.
fn decay(val: f64, base: f64, rate: f64, dt: f64) -> f64 {
    if val <= base {
        base
    } else {
        base.max(val - rate * dt)
    }
}

/// Map a gas level onto the `[0, 100]` display range.
///
/// Fresh O2 is already a percentage and is only clamped. Pollutant levels
/// are unbounded, so they go through a saturating transform that approaches
/// 100 as the level grows.
pub fn scale_for_display(val: f64, gas: GasKind) -> f64 {
    match gas {
        GasKind::FreshO2 => val.clamp(PERCENT_MIN, PERCENT_MAX),
        GasKind::Co2 | GasKind::Co => {
            let sat = PERCENT_MAX * (1.0 - (-val / DISPLAY_SCALE).exp());
            sat.clamp(PERCENT_MIN, PERCENT_MAX)
        }
    }
}
