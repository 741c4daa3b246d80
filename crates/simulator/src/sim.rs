//! Stateful greenhouse climate simulator for local development.
//!
//! Each tick evolves three coupled channels:
//! - air temperature: random walk with mean reversion plus a diurnal cycle
//! - air humidity: falls as the air warms
//! - soil humidity: dries steadily, rises while watering is active
//!
//! Scenarios shift the set points and noise so the consumer's alerting can be
//! exercised without real hardware.

use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation
// ---------------------------------------------------------------------------

/// Irwin-Hall: sum of 12 uniform [0,1) values minus 6 approximates N(0,1).
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Mild climate hovering inside a typical preset. Rarely alerts.
    Stable,
    /// Hot, dry air and fast soil drying. Alerts on temperature and humidity.
    Heatwave,
    /// Normal set points, but noisy sensors and frequent spikes.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "heatwave" => Self::Heatwave,
            "flaky" => Self::Flaky,
            _ => Self::Stable,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Heatwave => write!(f, "heatwave"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

struct Profile {
    temp_center: f64,
    humidity_center: f64,
    walk_sigma: f64,
    noise_sigma: f64,
    spike_prob: f64,
    spike_sigma: f64,
    dry_per_tick: f64,
}

impl Profile {
    fn for_scenario(scenario: Scenario) -> Self {
        match scenario {
            Scenario::Stable => Profile {
                temp_center: 20.0,
                humidity_center: 55.0,
                walk_sigma: 0.2,
                noise_sigma: 0.1,
                spike_prob: 0.005,
                spike_sigma: 3.0,
                dry_per_tick: 0.05,
            },
            Scenario::Heatwave => Profile {
                temp_center: 33.0,
                humidity_center: 30.0,
                walk_sigma: 0.3,
                noise_sigma: 0.2,
                spike_prob: 0.01,
                spike_sigma: 3.0,
                dry_per_tick: 0.4,
            },
            Scenario::Flaky => Profile {
                temp_center: 20.0,
                humidity_center: 55.0,
                walk_sigma: 0.6,
                noise_sigma: 1.5,
                spike_prob: 0.10,
                spike_sigma: 8.0,
                dry_per_tick: 0.05,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// One tick's worth of readings, rounded to one decimal place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Climate {
    pub temperature: f64,
    pub air_humidity: f64,
    pub soil_humidity: f64,
}

pub struct ClimateSim {
    profile: Profile,
    temperature: f64,
    air_humidity: f64,
    soil_humidity: f64,
    mean_reversion: f64,
    diurnal_amplitude: f64,
    diurnal_period_ticks: f64,
    tick: u64,
    watering: bool,
    wet_per_tick: f64,
}

impl ClimateSim {
    /// `diurnal_period_ticks` is the length of one simulated day in samples.
    pub fn new(scenario: Scenario, diurnal_period_ticks: u32) -> Self {
        let profile = Profile::for_scenario(scenario);
        Self {
            temperature: profile.temp_center + gaussian(0.0, 0.5),
            air_humidity: profile.humidity_center + gaussian(0.0, 2.0),
            soil_humidity: 45.0,
            profile,
            mean_reversion: 0.1,
            diurnal_amplitude: 4.0,
            diurnal_period_ticks: f64::from(diurnal_period_ticks.max(1)),
            tick: 0,
            watering: false,
            wet_per_tick: 1.5,
        }
    }

    pub fn set_watering(&mut self, active: bool) {
        self.watering = active;
    }

    pub fn is_watering(&self) -> bool {
        self.watering
    }

    /// Advance one tick and return the instantaneous readings.
    pub fn sample(&mut self) -> Climate {
        let p = &self.profile;
        self.tick += 1;

        // Peaks mid-"day".
        let phase = 2.0 * std::f64::consts::PI * self.tick as f64 / self.diurnal_period_ticks;
        let diurnal = self.diurnal_amplitude * phase.sin();

        self.temperature += self.mean_reversion * (p.temp_center - self.temperature)
            + gaussian(0.0, p.walk_sigma);
        let air_temp = self.temperature + diurnal;

        // Warmer air holds more water, so relative humidity drops.
        let humidity_target = p.humidity_center - 1.5 * (air_temp - p.temp_center);
        self.air_humidity += self.mean_reversion * (humidity_target - self.air_humidity)
            + gaussian(0.0, p.walk_sigma * 2.0);
        self.air_humidity = self.air_humidity.clamp(0.0, 100.0);

        let wet = if self.watering { self.wet_per_tick } else { 0.0 };
        self.soil_humidity =
            (self.soil_humidity - p.dry_per_tick + wet + gaussian(0.0, 0.1)).clamp(0.0, 100.0);

        Climate {
            temperature: round1(air_temp + self.noise()),
            air_humidity: round1((self.air_humidity + self.noise()).clamp(0.0, 100.0)),
            soil_humidity: round1((self.soil_humidity + self.noise()).clamp(0.0, 100.0)),
        }
    }

    fn noise(&self) -> f64 {
        let p = &self.profile;
        let spike = if fastrand::f64() < p.spike_prob {
            gaussian(0.0, p.spike_sigma)
        } else {
            0.0
        };
        gaussian(0.0, p.noise_sigma) + spike
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }

    fn mean_abs_step(values: &[f64]) -> f64 {
        let steps: Vec<f64> = values.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
        mean(&steps)
    }

    #[test]
    fn humidities_stay_in_percent_range() {
        for scenario in [Scenario::Stable, Scenario::Heatwave, Scenario::Flaky] {
            let mut sim = ClimateSim::new(scenario, 48);
            for _ in 0..1000 {
                let c = sim.sample();
                assert!((0.0..=100.0).contains(&c.air_humidity), "{scenario}: {c:?}");
                assert!((0.0..=100.0).contains(&c.soil_humidity), "{scenario}: {c:?}");
                assert!((-40.0..=90.0).contains(&c.temperature), "{scenario}: {c:?}");
            }
        }
    }

    #[test]
    fn readings_are_rounded_to_one_decimal() {
        let mut sim = ClimateSim::new(Scenario::Stable, 48);
        let c = sim.sample();
        for v in [c.temperature, c.air_humidity, c.soil_humidity] {
            assert!(((v * 10.0).round() - v * 10.0).abs() < 1e-9, "not rounded: {v}");
        }
    }

    #[test]
    fn heatwave_runs_hotter_and_drier() {
        let mut stable = ClimateSim::new(Scenario::Stable, 48);
        let mut hot = ClimateSim::new(Scenario::Heatwave, 48);

        let (s, h): (Vec<Climate>, Vec<Climate>) =
            (0..200).map(|_| (stable.sample(), hot.sample())).unzip();

        let temp = |v: &[Climate]| mean(&v.iter().map(|c| c.temperature).collect::<Vec<_>>());
        let air = |v: &[Climate]| mean(&v.iter().map(|c| c.air_humidity).collect::<Vec<_>>());

        assert!(temp(&h) > temp(&s) + 5.0);
        assert!(air(&h) < air(&s));
    }

    #[test]
    fn stable_is_temporally_coherent() {
        let mut sim = ClimateSim::new(Scenario::Stable, 48);
        let temps: Vec<f64> = (0..200).map(|_| sim.sample().temperature).collect();
        assert!(mean_abs_step(&temps) < 2.0);
    }

    #[test]
    fn flaky_is_noisier_than_stable() {
        let mut stable = ClimateSim::new(Scenario::Stable, 48);
        let mut flaky = ClimateSim::new(Scenario::Flaky, 48);
        let s: Vec<f64> = (0..300).map(|_| stable.sample().temperature).collect();
        let f: Vec<f64> = (0..300).map(|_| flaky.sample().temperature).collect();
        assert!(mean_abs_step(&f) > mean_abs_step(&s));
    }

    #[test]
    fn soil_dries_without_watering() {
        let mut sim = ClimateSim::new(Scenario::Heatwave, 48);
        let first: f64 = (0..10).map(|_| sim.sample().soil_humidity).sum::<f64>() / 10.0;
        for _ in 0..50 {
            sim.sample();
        }
        let later: f64 = (0..10).map(|_| sim.sample().soil_humidity).sum::<f64>() / 10.0;
        assert!(later < first, "soil should dry: {first:.1} -> {later:.1}");
    }

    #[test]
    fn watering_raises_soil_humidity() {
        let mut sim = ClimateSim::new(Scenario::Stable, 48);
        let before: f64 = (0..10).map(|_| sim.sample().soil_humidity).sum::<f64>() / 10.0;

        sim.set_watering(true);
        assert!(sim.is_watering());
        for _ in 0..20 {
            sim.sample();
        }
        let after: f64 = (0..10).map(|_| sim.sample().soil_humidity).sum::<f64>() / 10.0;

        assert!(after > before, "watering should wet soil: {before:.1} -> {after:.1}");
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("stable"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("HEATWAVE"), Scenario::Heatwave);
        assert_eq!(Scenario::from_str_lossy("Flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("drying"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Stable);
    }

    #[test]
    fn scenario_display_round_trips() {
        for s in [Scenario::Stable, Scenario::Heatwave, Scenario::Flaky] {
            assert_eq!(Scenario::from_str_lossy(&s.to_string()), s);
        }
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let samples: Vec<f64> = (0..5000).map(|_| approx_std_normal()).collect();
        assert!(mean(&samples).abs() < 0.15);
    }
}
