//! PWM duty cycle to CO2 concentration
//!
//! The sensor holds its output high for `2 ms + (cycle - 4 ms) * ppm / range`
//! of every cycle, so the concentration is linear in the high time:
//!
//! ```text
//! ppm = 2000 * (high_ms - 2) / (high_ms + low_ms - 4)
//! ```
//!
//! Only the high phase is timed. The low phase is derived from the fixed cycle
//! period, which is what the sensor datasheet guarantees.

use thiserror_no_std::Error;

use crate::storage::Concentration;

/// Detection range of the sensor in ppm (the 2000 in the transfer function).
pub const SENSOR_RANGE_PPM: f64 = 2000.0;

/// Fixed head and tail of every cycle in milliseconds.
const CYCLE_MARGIN_MS: f64 = 2.0;

/// Every cycle opens with this much high time, whatever the concentration.
const HEADER_US: u32 = 2_000;

/// Duration of one PWM phase in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct PulseWidth(pub u32);

impl PulseWidth {
    pub const fn from_micros(us: u32) -> Self {
        Self(us)
    }

    pub const fn as_micros(self) -> u32 {
        self.0
    }

    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretError {
    #[error("no pulse observed")]
    NoPulse,
    #[error("high pulse of {high_us} us is not longer than the 2 ms cycle header")]
    BelowHeader { high_us: u32 },
    #[error("high pulse of {high_us} us does not fit in a {cycle_us} us cycle")]
    PulseExceedsCycle { high_us: u32, cycle_us: u32 },
    #[error("duty cycle arithmetic produced a non-finite concentration")]
    NonFinite,
}

/// Derive the low phase of a cycle from the measured high phase.
pub fn low_phase(high: PulseWidth, cycle_period_us: u32) -> Result<PulseWidth, InterpretError> {
    if high.0 == 0 {
        return Err(InterpretError::NoPulse);
    }

    match cycle_period_us.checked_sub(high.0) {
        Some(low) if low > 0 => Ok(PulseWidth(low)),
        _ => Err(InterpretError::PulseExceedsCycle {
            high_us: high.0,
            cycle_us: cycle_period_us,
        }),
    }
}

/// Convert a high/low pulse pair into a concentration rounded to 0.01 ppm.
///
/// The arithmetic runs in full precision and rounding happens once, on the
/// final quotient.
pub fn calculate_concentration(
    high: PulseWidth,
    low: PulseWidth,
) -> Result<Concentration, InterpretError> {
    if high.0 == 0 {
        return Err(InterpretError::NoPulse);
    }
    // Anything at or under the header is a glitch, not a zero reading
    if high.0 <= HEADER_US {
        return Err(InterpretError::BelowHeader { high_us: high.0 });
    }

    let high_ms = high.as_millis_f64();
    let low_ms = low.as_millis_f64();

    let ppm = SENSOR_RANGE_PPM * (high_ms - CYCLE_MARGIN_MS)
        / (high_ms + low_ms - 2.0 * CYCLE_MARGIN_MS);

    if !ppm.is_finite() {
        return Err(InterpretError::NonFinite);
    }

    Concentration::from_ppm(ppm).ok_or(InterpretError::NonFinite)
}

/// Interpret a measured high pulse against the sensor's cycle period.
pub fn interpret(high: PulseWidth, cycle_period_us: u32) -> Result<Concentration, InterpretError> {
    let low = low_phase(high, cycle_period_us)?;
    calculate_concentration(high, low)
}
