//! Stateful barn light-level simulator for local development.
//!
//! Models a photoresistor node reporting 0..=255:
//! - Temporal coherence via random walk with mean reversion
//! - Diurnal (day/night) cycle
//! - Per-reading electronic noise
//! - Occasional spikes (a door opening, a torch)
//! - Per-barn offsets
//! - Closed-loop lamp response (level rises while the barn lights are on)

use std::fmt;

/// Highest value the sensor node reports.
pub const MAX_LIGHT: f64 = 255.0;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Bright barns hovering around the default 240 threshold, so lighting
    /// commands fire regularly.
    Day,
    /// Dark barns. Only the lamps push readings up.
    Night,
    /// Mid-range with heavy noise and frequent spikes.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "night" => Self::Night,
            "flaky" => Self::Flaky,
            _ => Self::Day,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Night => write!(f, "night"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-barn state
// ---------------------------------------------------------------------------

struct BarnState {
    /// Ambient level before noise and lamps. Evolves each tick.
    base: f64,
    /// Permanent per-barn offset (windows, orientation).
    offset: f64,
    lamps_on: bool,
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct LightLevelSim {
    barns: Vec<BarnState>,

    // Random walk parameters
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,

    noise_sigma: f64,

    // Spike parameters
    spike_prob: f32,
    spike_sigma: f64,

    // Diurnal cycle
    diurnal_amplitude: f64,
    diurnal_period_s: f64,

    /// Added to the reading while a barn's lamps are on.
    lamp_boost: f64,
}

impl LightLevelSim {
    /// `diurnal_period_s` is the day/night cycle length. Use 600 (10 min)
    /// for fast dev iteration or 86400 for real time.
    pub fn new(scenario: Scenario, barn_count: usize, diurnal_period_s: f64) -> Self {
        let (center, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma) = match scenario {
            Scenario::Day => (225.0, 6.0, 0.05, 4.0, 0.02_f32, 40.0),
            Scenario::Night => (30.0, 3.0, 0.08, 2.0, 0.01, 30.0),
            Scenario::Flaky => (150.0, 15.0, 0.03, 20.0, 0.10, 80.0),
        };

        let barns = (0..barn_count)
            .map(|_| BarnState {
                base: (center + gaussian(0.0, 10.0)).clamp(0.0, MAX_LIGHT),
                offset: gaussian(0.0, 8.0),
                lamps_on: false,
            })
            .collect();

        Self {
            barns,
            walk_sigma,
            mean_reversion: mean_rev,
            center,
            noise_sigma,
            spike_prob,
            spike_sigma,
            diurnal_amplitude: 20.0,
            diurnal_period_s,
            lamp_boost: 60.0,
        }
    }

    pub fn set_lamps(&mut self, index: usize, on: bool) {
        if let Some(barn) = self.barns.get_mut(index) {
            barn.lamps_on = on;
        }
    }

    pub fn lamps_on(&self, index: usize) -> bool {
        self.barns.get(index).is_some_and(|b| b.lamps_on)
    }

    /// Next reading for the barn at `index`. Each call advances that barn's
    /// random walk.
    pub fn sample(&mut self, index: usize) -> u8 {
        let barn = &mut self.barns[index];

        // -- Evolve the ambient level -------------------------------------

        let pull = self.mean_reversion * (self.center - barn.base);
        let walk = gaussian(0.0, self.walk_sigma);
        barn.base = (barn.base + pull + walk).clamp(0.0, MAX_LIGHT);

        // -- Build the instantaneous reading ------------------------------

        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let phase = 2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s;
        let diurnal = self.diurnal_amplitude * phase.sin();

        let noise = gaussian(0.0, self.noise_sigma);

        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        let lamps = if barn.lamps_on { self.lamp_boost } else { 0.0 };

        let reading = barn.base + barn.offset + diurnal + noise + spike + lamps;
        reading.round().clamp(0.0, MAX_LIGHT) as u8
    }

    pub fn barn_count(&self) -> usize {
        self.barns.len()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_of(sim: &mut LightLevelSim, index: usize, n: usize) -> f64 {
        (0..n).map(|_| sim.sample(index) as f64).sum::<f64>() / n as f64
    }

    #[test]
    fn temporal_coherence() {
        let mut sim = LightLevelSim::new(Scenario::Night, 1, 600.0);
        let samples: Vec<i32> = (0..100).map(|_| sim.sample(0) as i32).collect();
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .max()
            .unwrap();
        // Allow for the occasional spike, but nothing near the full range.
        assert!(max_jump < 200, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn per_barn_variation() {
        let mut sim = LightLevelSim::new(Scenario::Flaky, 2, 600.0);
        let diffs = (0..50).filter(|_| sim.sample(0) != sim.sample(1)).count();
        assert!(diffs > 0, "barns should diverge");
    }

    #[test]
    fn lamps_raise_readings() {
        let mut sim = LightLevelSim::new(Scenario::Night, 1, 600.0);
        for _ in 0..20 {
            sim.sample(0);
        }
        let dark = mean_of(&mut sim, 0, 30);

        sim.set_lamps(0, true);
        let lit = mean_of(&mut sim, 0, 30);

        assert!(lit > dark + 20.0, "lamps should brighten: dark={dark:.0} lit={lit:.0}");
    }

    #[test]
    fn set_lamps_out_of_range_is_ignored() {
        let mut sim = LightLevelSim::new(Scenario::Day, 1, 600.0);
        sim.set_lamps(5, true);
        assert!(!sim.lamps_on(5));
        assert!(!sim.lamps_on(0));
    }

    #[test]
    fn day_is_brighter_than_night() {
        let mut day = LightLevelSim::new(Scenario::Day, 1, 600.0);
        let mut night = LightLevelSim::new(Scenario::Night, 1, 600.0);
        assert!(mean_of(&mut day, 0, 50) > mean_of(&mut night, 0, 50));
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("day"), Scenario::Day);
        assert_eq!(Scenario::from_str_lossy("NIGHT"), Scenario::Night);
        assert_eq!(Scenario::from_str_lossy("Flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("unknown"), Scenario::Day);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Day);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Day.to_string(), "day");
        assert_eq!(Scenario::Night.to_string(), "night");
        assert_eq!(Scenario::Flaky.to_string(), "flaky");
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let mean = (0..n).map(|_| approx_std_normal()).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.15, "approx_std_normal mean should be near zero: {mean}");
    }
}
