//! Periodic sampling of the PWM sensor into the log
//!
//! Each cycle walks `Idle → Measuring → Interpreting → Storing → Idle`. A
//! missing pulse, bad arithmetic or a failed write diverts to `Skipped`, costs
//! exactly that one cycle, and the next tick starts again from `Idle`. Nothing
//! is retried within a cycle; the period itself is the retry.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Ticker};
use log::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::metrics::QualityLevel;
use crate::sensors::{InterpretError, PulseError, PulseSource, pwm};
use crate::storage::{LogBackend, LogStore, Reading};

/// Log the counters every this many stored readings.
const STATS_LOG_INTERVAL: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Measuring,
    Interpreting,
    Storing,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No pulse within the timeout, or a zero-width one
    NoPulse,
    /// The pulse input itself failed
    Hardware(PulseError),
    Computation(InterpretError),
    /// The reading could not be written; it is lost
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Stored(Reading),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub stored: u32,
    pub missed_pulses: u32,
    pub computation_failures: u32,
    pub storage_failures: u32,
}

impl AcquisitionStats {
    fn record(&mut self, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Stored(_) => self.stored = self.stored.wrapping_add(1),
            CycleOutcome::Skipped(SkipReason::NoPulse | SkipReason::Hardware(_)) => {
                self.missed_pulses = self.missed_pulses.wrapping_add(1)
            }
            CycleOutcome::Skipped(SkipReason::Computation(_)) => {
                self.computation_failures = self.computation_failures.wrapping_add(1)
            }
            CycleOutcome::Skipped(SkipReason::Storage) => {
                self.storage_failures = self.storage_failures.wrapping_add(1)
            }
        }
    }
}

/// The sole writer of new readings.
pub struct Acquisition<'a, P, C, M, B>
where
    P: PulseSource,
    C: Clock,
    M: RawMutex,
    B: LogBackend,
{
    pulse: P,
    clock: C,
    store: &'a LogStore<M, B>,
    cycle_period_us: u32,
    pulse_timeout_us: u32,
    state: AcquisitionState,
    stats: AcquisitionStats,
}

impl<'a, P, C, M, B> Acquisition<'a, P, C, M, B>
where
    P: PulseSource,
    C: Clock,
    M: RawMutex,
    B: LogBackend,
{
    pub fn new(pulse: P, clock: C, store: &'a LogStore<M, B>, config: &MonitorConfig<'_>) -> Self {
        Self {
            pulse,
            clock,
            store,
            cycle_period_us: config.cycle_period_us,
            pulse_timeout_us: config.pulse_timeout_us,
            state: AcquisitionState::Idle,
            stats: AcquisitionStats::default(),
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.stats
    }

    fn transition(&mut self, next: AcquisitionState) {
        trace!("Acquisition {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn skip(&mut self, reason: SkipReason) -> CycleOutcome {
        self.transition(AcquisitionState::Skipped);
        CycleOutcome::Skipped(reason)
    }

    /// Run one measurement cycle and return to `Idle`.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.measure_and_store().await;
        self.stats.record(&outcome);
        self.transition(AcquisitionState::Idle);
        outcome
    }

    async fn measure_and_store(&mut self) -> CycleOutcome {
        self.transition(AcquisitionState::Measuring);
        let high = match self.pulse.measure_high(self.pulse_timeout_us).await {
            Ok(high) => high,
            Err(PulseError::Timeout { timeout_us }) => {
                warn!("Timeout reading from sensor (no pulse within {} us)", timeout_us);
                return self.skip(SkipReason::NoPulse);
            }
            Err(e) => {
                warn!("Sensor pulse input failed: {}", e);
                return self.skip(SkipReason::Hardware(e));
            }
        };

        self.transition(AcquisitionState::Interpreting);
        let low = match pwm::low_phase(high, self.cycle_period_us) {
            Ok(low) => low,
            Err(InterpretError::NoPulse) => {
                warn!("Sensor reported a zero-width pulse");
                return self.skip(SkipReason::NoPulse);
            }
            Err(e) => {
                warn!("Discarding pulse: {}", e);
                return self.skip(SkipReason::Computation(e));
            }
        };
        let concentration = match pwm::calculate_concentration(high, low) {
            Ok(concentration) => concentration,
            Err(e) => {
                warn!("Discarding pulse: {}", e);
                return self.skip(SkipReason::Computation(e));
            }
        };

        self.transition(AcquisitionState::Storing);
        let reading = Reading::new(self.clock.now(), concentration);
        if let Err(e) = self.store.append(reading).await {
            error!("Failed to store reading {}: {:?}", reading, e);
            return self.skip(SkipReason::Storage);
        }

        debug!(
            "ppm: {} ({}) | high {} ms, low {} ms",
            concentration,
            QualityLevel::assess(concentration).label(),
            high.as_millis_f64(),
            low.as_millis_f64()
        );
        CycleOutcome::Stored(reading)
    }

    /// Sample forever on a fixed period.
    ///
    /// A cycle that overruns the period is followed immediately by the next
    /// one; missed ticks are not queued up.
    pub async fn run(&mut self, interval: Duration) -> ! {
        info!(
            "Acquisition running every {} ms (cycle {} us, timeout {} us)",
            interval.as_millis(),
            self.cycle_period_us,
            self.pulse_timeout_us
        );

        let mut ticker = Ticker::every(interval);
        loop {
            let outcome = self.run_cycle().await;

            if matches!(outcome, CycleOutcome::Stored(_))
                && self.stats.stored % STATS_LOG_INTERVAL == 0
            {
                info!("Acquisition stats: {:?}", self.stats);
            }

            ticker.next().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::PulseWidth;
    use crate::storage::{Concentration, MemoryBackend};
    use alloc::collections::VecDeque;
    use core::cell::Cell;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    /// Replays a fixed list of pulse results, then times out forever.
    struct ScriptedPulses(VecDeque<Result<PulseWidth, PulseError>>);

    impl ScriptedPulses {
        fn new(script: &[Result<PulseWidth, PulseError>]) -> Self {
            Self(script.iter().copied().collect())
        }
    }

    impl PulseSource for ScriptedPulses {
        async fn measure_high(&mut self, timeout_us: u32) -> Result<PulseWidth, PulseError> {
            self.0
                .pop_front()
                .unwrap_or(Err(PulseError::Timeout { timeout_us }))
        }
    }

    /// Advances two seconds per reading.
    struct SteppingClock(Cell<u64>);

    impl Clock for SteppingClock {
        fn now(&self) -> u64 {
            let now = self.0.get();
            self.0.set(now + 2);
            now
        }
    }

    /// Memory backend whose next append can be made to fail.
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_appends: u32,
    }

    impl LogBackend for FlakyBackend {
        type Error = &'static str;

        fn ensure_exists(&mut self) -> Result<(), Self::Error> {
            self.inner.ensure_exists().map_err(|_| "ensure")
        }

        fn append(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
            if self.fail_appends > 0 {
                self.fail_appends -= 1;
                return Err("card removed");
            }
            self.inner.append(bytes).map_err(|_| "append")
        }

        fn read_all(&mut self, buf: &mut alloc::vec::Vec<u8>) -> Result<(), Self::Error> {
            self.inner.read_all(buf).map_err(|_| "read")
        }

        fn replace(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
            self.inner.replace(bytes).map_err(|_| "replace")
        }
    }

    const TIMEOUT: PulseError = PulseError::Timeout {
        timeout_us: 1_000_000,
    };

    #[test]
    fn test_valid_pulse_is_stored() {
        let store: LogStore<NoopRawMutex, _> = LogStore::new(MemoryBackend::new(), 10);
        block_on(store.init()).unwrap();
        let pulses = ScriptedPulses::new(&[Ok(PulseWidth::from_micros(40_000))]);
        let clock = SteppingClock(Cell::new(1_700_000_000));
        let mut acquisition = Acquisition::new(pulses, clock, &store, &MonitorConfig::DEFAULT);

        let expected = Reading::new(1_700_000_000, Concentration::from_centi_ppm(7_600));
        assert_eq!(
            block_on(acquisition.run_cycle()),
            CycleOutcome::Stored(expected)
        );
        assert_eq!(acquisition.state(), AcquisitionState::Idle);
        assert_eq!(block_on(store.read_recent(1)).unwrap(), [expected]);
        assert_eq!(acquisition.stats().stored, 1);
    }

    #[test]
    fn test_timeout_skips_cycle() {
        let store: LogStore<NoopRawMutex, _> = LogStore::new(MemoryBackend::new(), 10);
        block_on(store.init()).unwrap();
        let pulses = ScriptedPulses::new(&[Err(TIMEOUT), Ok(PulseWidth::from_micros(0))]);
        let clock = SteppingClock(Cell::new(0));
        let mut acquisition = Acquisition::new(pulses, clock, &store, &MonitorConfig::DEFAULT);

        assert_eq!(
            block_on(acquisition.run_cycle()),
            CycleOutcome::Skipped(SkipReason::NoPulse)
        );
        assert_eq!(
            block_on(acquisition.run_cycle()),
            CycleOutcome::Skipped(SkipReason::NoPulse)
        );
        assert_eq!(acquisition.state(), AcquisitionState::Idle);
        assert_eq!(acquisition.stats().missed_pulses, 2);
        assert_eq!(block_on(store.len()).unwrap(), 0);
    }

    #[test]
    fn test_hardware_failure_skips_cycle() {
        let store: LogStore<NoopRawMutex, _> = LogStore::new(MemoryBackend::new(), 10);
        block_on(store.init()).unwrap();
        let fault = PulseError::Hardware {
            details: "pin not configured",
        };
        let pulses = ScriptedPulses::new(&[Err(fault)]);
        let mut acquisition = Acquisition::new(
            pulses,
            SteppingClock(Cell::new(0)),
            &store,
            &MonitorConfig::DEFAULT,
        );

        assert_eq!(
            block_on(acquisition.run_cycle()),
            CycleOutcome::Skipped(SkipReason::Hardware(fault))
        );
    }

    #[test]
    fn test_glitch_pulse_is_not_stored() {
        let store: LogStore<NoopRawMutex, _> = LogStore::new(MemoryBackend::new(), 10);
        block_on(store.init()).unwrap();
        let pulses = ScriptedPulses::new(&[Ok(PulseWidth::from_micros(1_000))]);
        let mut acquisition = Acquisition::new(
            pulses,
            SteppingClock(Cell::new(0)),
            &store,
            &MonitorConfig::DEFAULT,
        );

        assert_eq!(
            block_on(acquisition.run_cycle()),
            CycleOutcome::Skipped(SkipReason::Computation(InterpretError::BelowHeader {
                high_us: 1_000
            }))
        );
        assert_eq!(acquisition.stats().computation_failures, 1);
        assert_eq!(block_on(store.len()).unwrap(), 0);
    }

    #[test]
    fn test_bad_duty_cycle_is_not_stored() {
        let store: LogStore<NoopRawMutex, _> = LogStore::new(MemoryBackend::new(), 10);
        block_on(store.init()).unwrap();
        let pulses = ScriptedPulses::new(&[Ok(PulseWidth::from_micros(2_000_000))]);
        let mut acquisition = Acquisition::new(
            pulses,
            SteppingClock(Cell::new(0)),
            &store,
            &MonitorConfig::DEFAULT,
        );

        assert!(matches!(
            block_on(acquisition.run_cycle()),
            CycleOutcome::Skipped(SkipReason::Computation(
                InterpretError::PulseExceedsCycle { .. }
            ))
        ));
        assert_eq!(acquisition.stats().computation_failures, 1);
        assert_eq!(block_on(store.len()).unwrap(), 0);
    }

    #[test]
    fn test_storage_failure_loses_only_one_cycle() {
        let backend = FlakyBackend {
            inner: MemoryBackend::new(),
            fail_appends: 1,
        };
        let store: LogStore<NoopRawMutex, _> = LogStore::new(backend, 10);
        block_on(store.init()).unwrap();
        let pulses = ScriptedPulses::new(&[
            Ok(PulseWidth::from_micros(40_000)),
            Ok(PulseWidth::from_micros(502_000)),
        ]);
        let mut acquisition = Acquisition::new(
            pulses,
            SteppingClock(Cell::new(100)),
            &store,
            &MonitorConfig::DEFAULT,
        );

        assert_eq!(
            block_on(acquisition.run_cycle()),
            CycleOutcome::Skipped(SkipReason::Storage)
        );
        assert_eq!(acquisition.state(), AcquisitionState::Idle);

        // 2000 * 500 / 1000 = 1000 ppm
        let expected = Reading::new(102, Concentration::from_centi_ppm(100_000));
        assert_eq!(
            block_on(acquisition.run_cycle()),
            CycleOutcome::Stored(expected)
        );
        assert_eq!(block_on(store.read_recent(5)).unwrap(), [expected]);
        assert_eq!(
            acquisition.stats(),
            AcquisitionStats {
                stored: 1,
                missed_pulses: 0,
                computation_failures: 0,
                storage_failures: 1,
            }
        );
    }
}
