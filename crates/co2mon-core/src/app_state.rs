//! Application-wide run state and startup error types

use core::cell::Cell;
use core::fmt::{self, Debug, Write};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Timer};
use log::{error, info, warn};
use thiserror_no_std::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    Uninitialized,
    StorageReady,
    WifiConnecting,
    WifiConnected,
    TimeSyncing,
    TimeKnown,
    SensorsRunning,
    /// Running without network or wall-clock time
    Degraded,
}

impl AppRunState {
    /// State once acquisition starts, from whether startup set the clock.
    pub const fn sampling(time_known: bool) -> Self {
        if time_known {
            Self::SensorsRunning
        } else {
            Self::Degraded
        }
    }
}

/// Shared view of the current [`AppRunState`], readable from any task.
pub struct RunState {
    state: Mutex<CriticalSectionRawMutex, Cell<AppRunState>>,
}

impl RunState {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(AppRunState::Uninitialized)),
        }
    }

    pub fn get(&self) -> AppRunState {
        self.state.lock(|cell| cell.get())
    }

    pub fn set(&self, next: AppRunState) {
        let previous = self.state.lock(|cell| cell.replace(next));
        if previous != next {
            info!("Run state: {:?} -> {:?}", previous, next);
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("WiFi connection failed: {0}")]
    Wifi(heapless::String<64>),
    #[error("Time sync failed: {0}")]
    TimeSync(heapless::String<64>),
    #[error("Storage error: {0}")]
    Storage(heapless::String<64>),
    #[error("Sensor error: {0}")]
    Sensor(heapless::String<64>),
    #[error("Query server error: {0}")]
    Server(heapless::String<64>),
}

impl AppError {
    pub fn wifi(cause: impl Debug) -> Self {
        Self::Wifi(describe(format_args!("{:?}", cause)))
    }

    pub fn time_sync(cause: impl Debug) -> Self {
        Self::TimeSync(describe(format_args!("{:?}", cause)))
    }

    pub fn storage(cause: impl Debug) -> Self {
        Self::Storage(describe(format_args!("{:?}", cause)))
    }

    pub fn sensor(cause: impl Debug) -> Self {
        Self::Sensor(describe(format_args!("{:?}", cause)))
    }

    pub fn server(cause: impl Debug) -> Self {
        Self::Server(describe(format_args!("{:?}", cause)))
    }
}

/// Format into a fixed-capacity string, truncating what does not fit.
fn describe<const N: usize>(args: fmt::Arguments<'_>) -> heapless::String<N> {
    struct Truncating<'s, const N: usize>(&'s mut heapless::String<N>);

    impl<const N: usize> Write for Truncating<'_, N> {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for c in s.chars() {
                if self.0.push(c).is_err() {
                    return Err(fmt::Error);
                }
            }
            Ok(())
        }
    }

    let mut out = heapless::String::new();
    // Running out of room is the only failure; keep the prefix
    let _ = Truncating(&mut out).write_fmt(args);
    out
}

/// Result of [`retry_bounded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt<T, E> {
    /// `op` succeeded on the given (1-based) attempt
    Succeeded(T, u32),
    /// Every attempt failed; carries the last error, `None` if zero attempts
    /// were allowed
    GaveUp(Option<E>),
}

impl<T, E> Attempt<T, E> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Succeeded(value, _) => Some(value),
            Self::GaveUp(_) => None,
        }
    }
}

/// Run `op` up to `max_attempts` times, sleeping `delay` between failures.
///
/// `op` receives the 1-based attempt number. Used for the network bring-up
/// steps, which may fail for a while and must not block the device forever.
pub async fn retry_bounded<T, E, F, Fut>(
    what: &str,
    max_attempts: u32,
    delay: Duration,
    mut op: F,
) -> Attempt<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Debug,
{
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Ok(value) => {
                info!("{} succeeded (attempt {}/{})", what, attempt, max_attempts);
                return Attempt::Succeeded(value, attempt);
            }
            Err(e) => {
                warn!("{} failed (attempt {}/{}): {:?}", what, attempt, max_attempts, e);
                last_error = Some(e);
            }
        }

        if attempt < max_attempts && delay.as_ticks() > 0 {
            Timer::after(delay).await;
        }
    }

    error!("{} gave up after {} attempts", what, max_attempts);
    Attempt::GaveUp(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    const NO_DELAY: Duration = Duration::from_ticks(0);

    #[test]
    fn test_sampling_state_ignores_later_link_changes() {
        let state = RunState::new();
        state.set(AppRunState::Degraded);
        // A reconnect elsewhere does not make an unsynced clock good
        state.set(AppRunState::WifiConnected);
        state.set(AppRunState::sampling(false));
        assert_eq!(state.get(), AppRunState::Degraded);

        state.set(AppRunState::WifiConnecting);
        state.set(AppRunState::sampling(true));
        assert_eq!(state.get(), AppRunState::SensorsRunning);
    }

    #[test]
    fn test_retry_succeeds_after_failures() {
        let mut calls = 0;
        let result = block_on(retry_bounded("connect", 5, NO_DELAY, |attempt| {
            calls += 1;
            async move { if attempt < 3 { Err("not yet") } else { Ok(attempt * 10) } }
        }));

        assert_eq!(result, Attempt::Succeeded(30, 3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_gives_up_with_last_error() {
        let mut calls = 0;
        let result: Attempt<(), u32> = block_on(retry_bounded("sync", 4, NO_DELAY, |attempt| {
            calls += 1;
            async move { Err(attempt) }
        }));

        assert_eq!(result, Attempt::GaveUp(Some(4)));
        assert_eq!(calls, 4);
        assert_eq!(result.ok(), None);
    }

    #[test]
    fn test_retry_zero_attempts_never_calls() {
        let mut calls = 0;
        let result = block_on(retry_bounded("noop", 0, NO_DELAY, |_| {
            calls += 1;
            async { Err::<(), ()>(()) }
        }));
        assert_eq!(result, Attempt::GaveUp(None));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_run_state_transitions() {
        let state = RunState::new();
        assert_eq!(state.get(), AppRunState::Uninitialized);
        state.set(AppRunState::StorageReady);
        state.set(AppRunState::Degraded);
        assert_eq!(state.get(), AppRunState::Degraded);
    }

    #[test]
    fn test_app_error_truncates_long_causes() {
        let long = "x".repeat(200);
        let AppError::Storage(details) = AppError::storage(long.as_str()) else {
            panic!("wrong variant");
        };
        // Debug adds the opening quote, then the prefix fills the capacity
        assert_eq!(details.len(), 64);
        assert!(details.starts_with("\"xxx"));
    }
}
