//! Timing the sensor's PWM high phase on a GPIO input.

use co2mon_core::sensors::{PulseError, PulseSource, PulseWidth};
use embassy_time::{Duration, Instant, with_deadline};
use esp_hal::gpio::Input;

pub struct PwmInput<'d> {
    pin: Input<'d>,
}

impl<'d> PwmInput<'d> {
    pub fn new(pin: Input<'d>) -> Self {
        Self { pin }
    }
}

impl PulseSource for PwmInput<'_> {
    /// Waits out a pulse already in progress, then times the next complete
    /// one. The timeout covers the whole wait, not just the pulse.
    async fn measure_high(&mut self, timeout_us: u32) -> Result<PulseWidth, PulseError> {
        let deadline = Instant::now() + Duration::from_micros(u64::from(timeout_us));

        let width = with_deadline(deadline, async {
            self.pin.wait_for_low().await;
            self.pin.wait_for_rising_edge().await;
            let rose = Instant::now();
            self.pin.wait_for_falling_edge().await;
            rose.elapsed()
        })
        .await
        .map_err(|_| PulseError::Timeout { timeout_us })?;

        let micros = u32::try_from(width.as_micros()).unwrap_or(u32::MAX);
        Ok(PulseWidth::from_micros(micros))
    }
}
