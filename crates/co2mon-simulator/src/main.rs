//! Desktop simulator for the co2mon PWM CO2 logger.
//!
//! Runs the real acquisition loop, log store and query service from
//! `co2mon-core` against a synthetic sensor and a log file in the working
//! directory, so the JSON interface can be exercised without hardware.
//!
//! ```text
//! co2mon-simulator [ADDR]        default 127.0.0.1:8080
//! curl 'http://127.0.0.1:8080/json?n=10'
//! ```
//!
//! Set `RUST_LOG=debug` to see every reading.

mod file_backend;
mod server;
mod synthetic;

use std::net::TcpListener;
use std::process;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use co2mon_core::acquisition::{Acquisition, CycleOutcome};
use co2mon_core::app_state::{AppError, AppRunState, RunState};
use co2mon_core::clock::WallClock;
use co2mon_core::config::MonitorConfig;
use co2mon_core::storage::LogStore;
use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{error, info};
use static_cell::StaticCell;

use file_backend::FileBackend;
use synthetic::SyntheticPulses;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const LOG_FILE: &str = "co2_data.txt";
const STATS_LOG_INTERVAL: u32 = 30;

type Store = LogStore<CriticalSectionRawMutex, FileBackend>;

static STORE: StaticCell<Store> = StaticCell::new();
static CLOCK: WallClock = WallClock::new();
static RUN_STATE: RunState = RunState::new();

fn main() {
    env_logger::init();
    info!("Starting co2mon simulator");

    let addr = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.into());
    let config = MonitorConfig {
        log_file_name: LOG_FILE,
        ..MonitorConfig::DEFAULT
    };

    if let Err(e) = run(&addr, config) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(addr: &str, config: MonitorConfig<'static>) -> Result<(), AppError> {
    let store: &'static Store = STORE.init(LogStore::new(
        FileBackend::new(config.log_file_name),
        config.max_entries,
    ));
    let records = block_on(store.init()).map_err(AppError::storage)?;
    info!("Log {} holds {} readings", config.log_file_name, records);
    RUN_STATE.set(AppRunState::StorageReady);

    let listener = TcpListener::bind(addr).map_err(AppError::server)?;
    thread::spawn(move || {
        server::serve(listener, store);
    });

    // The host clock stands in for SNTP
    RUN_STATE.set(AppRunState::TimeSyncing);
    let unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(AppError::time_sync)?
        .as_secs();
    CLOCK.set_unix_time(unix_secs);
    RUN_STATE.set(AppRunState::TimeKnown);

    let seed = (unix_secs & 0xffff_ffff) as u32;
    let pulses = SyntheticPulses::new(config.cycle_period_us, seed);
    let mut acquisition = Acquisition::new(pulses, &CLOCK, store, &config);
    let interval = Duration::from_millis(config.sample_interval_ms);
    RUN_STATE.set(AppRunState::SensorsRunning);

    loop {
        let started = Instant::now();
        let outcome = block_on(acquisition.run_cycle());

        if matches!(outcome, CycleOutcome::Stored(_))
            && acquisition.stats().stored % STATS_LOG_INTERVAL == 0
        {
            info!("Acquisition stats: {:?}", acquisition.stats());
        }

        if let Some(remaining) = interval.checked_sub(started.elapsed()) {
            thread::sleep(remaining);
        }
    }
}
