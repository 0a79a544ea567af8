use serde::{Deserialize, Serialize};

/// Running mean, variance and extremes of a stream of values.
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
    min: f64,
    max: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        // Welford update.
        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;
        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;

        self.min = self.min.min(val);
        self.max = self.max.max(val);
    }

    pub fn report(&self) -> AccumulatorReport {
        if self.n_vals == 0 {
            return AccumulatorReport {
                mean: f64::NAN,
                std_dev: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
            };
        }
        AccumulatorReport {
            mean: self.mean,
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals - 1) as f64).sqrt()
            } else {
                f64::NAN
            },
            min: self.min,
            max: self.max,
        }
    }
}

/// Stored time series with equilibration-aware statistics.
pub struct TimeSeries {
    vals: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimeSeriesReport {
    pub mean: f64,
    pub std_dev: f64,
    pub sem: f64,
    pub is_equil: bool,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self { vals: Vec::new() }
    }

    pub fn push(&mut self, val: f64) {
        self.vals.push(val);
    }

    /// Statistics of the series after discarding its equilibration part.
    pub fn report(&self) -> TimeSeriesReport {
        if self.vals.is_empty() {
            return TimeSeriesReport {
                mean: f64::NAN,
                std_dev: f64::NAN,
                sem: f64::NAN,
                is_equil: false,
            };
        }
        let i_equil = opt_i_equil(&self.vals);
        let tail = &self.vals[i_equil..];
        TimeSeriesReport {
            mean: mean(tail),
            std_dev: var(tail).sqrt(),
            sem: sem(tail),
            is_equil: i_equil != self.vals.len() / 2,
        }
    }
}

fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        return f64::NAN;
    }
    vals.iter().sum::<f64>() / vals.len() as f64
}

fn var(vals: &[f64]) -> f64 {
    let n_vals = vals.len();
    if n_vals < 2 {
        return f64::NAN;
    }
    let mean = mean(vals);
    vals.iter().map(|&val| (val - mean).powi(2)).sum::<f64>() / (n_vals - 1) as f64
}

/// Standard error of the mean using the Flyvbjerg-Petersen blocking method.
fn sem(vals: &[f64]) -> f64 {
    let mut blocks = vals.to_vec();
    let mut sem2_ests = Vec::new();
    let mut sem2_errs = Vec::new();

    while blocks.len() >= 2 {
        let n_vals = blocks.len() as f64;
        let sem2_est = var(&blocks) / n_vals;
        sem2_ests.push(sem2_est);
        sem2_errs.push(sem2_est * (2.0 / (n_vals - 1.0)).sqrt());

        blocks = blocks
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect();
    }

    // First estimate above the lower error bound of every later one.
    for (idx, &sem2_est) in sem2_ests.iter().enumerate() {
        let max_low = sem2_ests[idx..]
            .iter()
            .zip(&sem2_errs[idx..])
            .map(|(est, err)| est - err)
            .fold(f64::NEG_INFINITY, f64::max);
        if sem2_est > max_low {
            return sem2_est.sqrt();
        }
    }

    sem2_ests.last().copied().unwrap_or(f64::NAN).sqrt()
}

/// Equilibration index minimizing the marginal standard error.
fn opt_i_equil(vals: &[f64]) -> usize {
    let n_vals = vals.len();
    let mut opt = n_vals / 2;
    let mut min_mse = f64::INFINITY;

    let n_idxs = n_vals.ilog2() + 1;
    for idx in 0..n_idxs {
        let i_equil = n_vals / 2usize.pow(n_idxs - idx);
        let tail = &vals[i_equil..];
        let n_tail = tail.len();
        let mse = var(tail) * (n_tail - 1) as f64 / n_tail.pow(2) as f64;
        if mse < min_mse {
            min_mse = mse;
            opt = i_equil;
        }
    }

    opt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_tracks_moments_and_extremes() {
        let mut acc = Accumulator::new();
        for val in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            acc.add(val);
        }
        let report = acc.report();
        assert!((report.mean - 5.0).abs() < 1e-12);
        assert!((report.std_dev - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(report.min, 2.0);
        assert_eq!(report.max, 9.0);
    }

    #[test]
    fn empty_accumulator_reports_nan() {
        let report = Accumulator::new().report();
        assert!(report.mean.is_nan());
        assert!(report.min.is_nan());
    }

    #[test]
    fn time_series_skips_transient() {
        let mut series = TimeSeries::new();
        for i in 0..64 {
            series.push(if i < 8 { 100.0 - i as f64 } else { (i % 2) as f64 });
        }
        let report = series.report();
        assert!((report.mean - 0.5).abs() < 0.1);
        assert!(report.sem.is_finite());
    }

    #[test]
    fn constant_series_has_zero_spread() {
        let mut series = TimeSeries::new();
        for _ in 0..32 {
            series.push(3.0);
        }
        let report = series.report();
        assert_eq!(report.mean, 3.0);
        assert_eq!(report.std_dev, 0.0);
        assert_eq!(report.sem, 0.0);
    }
}
