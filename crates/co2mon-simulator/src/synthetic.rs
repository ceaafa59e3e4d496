//! Fake PWM sensor producing a slowly drifting CO2 level.

use std::thread;
use std::time::Duration;

use co2mon_core::sensors::{PulseError, PulseSource, PulseWidth};

/// One in this many measurements times out.
const TIMEOUT_ONE_IN: u32 = 20;

pub struct SyntheticPulses {
    cycle_period_us: u32,
    elapsed_secs: f64,
    rng: u32,
}

impl SyntheticPulses {
    pub fn new(cycle_period_us: u32, seed: u32) -> Self {
        Self {
            cycle_period_us,
            elapsed_secs: 0.0,
            // xorshift must not start at zero
            rng: seed | 1,
        }
    }

    fn next_random(&mut self) -> u32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }

    /// CO2 level the simulated room is at right now.
    fn target_ppm(&self) -> f64 {
        let t = self.elapsed_secs;
        // 450-1150 ppm over a long cycle, plus a little wobble
        800.0 + 350.0 * (t / 600.0).sin() + 15.0 * (t / 17.0).cos()
    }

    /// High-phase width for a concentration, inverting the sensor formula.
    fn high_for(&self, ppm: f64) -> PulseWidth {
        let span_us = f64::from(self.cycle_period_us) - 4_000.0;
        let high_us = 2_000.0 + ppm / 2_000.0 * span_us;
        PulseWidth::from_micros(high_us.round() as u32)
    }
}

impl PulseSource for SyntheticPulses {
    /// Blocks the calling thread for as long as a real measurement would.
    async fn measure_high(&mut self, timeout_us: u32) -> Result<PulseWidth, PulseError> {
        self.elapsed_secs += f64::from(self.cycle_period_us) / 1e6;

        if self.next_random() % TIMEOUT_ONE_IN == 0 {
            thread::sleep(Duration::from_micros(u64::from(timeout_us)));
            return Err(PulseError::Timeout { timeout_us });
        }

        thread::sleep(Duration::from_micros(u64::from(self.cycle_period_us)));
        Ok(self.high_for(self.target_ppm()))
    }
}
