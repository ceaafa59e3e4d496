//! Sensor input abstractions
//!
//! The CO2 sensor reports its measurement as the width of the high phase of a
//! fixed-period PWM signal. Hardware bindings implement [`PulseSource`]; the
//! [`pwm`] module turns the measured width into a concentration.

pub mod pwm;

use thiserror_no_std::Error;

pub use pwm::{InterpretError, PulseWidth, calculate_concentration};

/// Failures while waiting for a pulse on the sensor pin.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseError {
    #[error("no pulse within {timeout_us} us")]
    Timeout { timeout_us: u32 },
    #[error("pulse input failed: {details}")]
    Hardware { details: &'static str },
}

/// Trait for inputs that can time the high phase of a PWM signal.
pub trait PulseSource {
    /// Wait for the next complete high pulse and return its width.
    ///
    /// Implementations must give up after `timeout_us` and return
    /// [`PulseError::Timeout`] rather than block the caller indefinitely.
    fn measure_high(
        &mut self,
        timeout_us: u32,
    ) -> impl Future<Output = Result<PulseWidth, PulseError>>;
}
