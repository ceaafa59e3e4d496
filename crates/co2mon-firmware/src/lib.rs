//! ESP32-S3 firmware-specific modules for co2mon
//!
//! This crate contains the hardware bindings that cannot compile on desktop
//! targets: the GPIO pulse timer for the sensor, the SD card wiring, Wi-Fi
//! bring-up, SNTP and the TCP front end of the query service.

#![no_std]

extern crate alloc;

pub mod http;
pub mod pwm_input;
pub mod sntp;
pub mod wifi;
pub mod wifi_secrets;

use co2mon_core::app_state::RunState;
use co2mon_core::clock::WallClock;
use co2mon_core::storage::{LogStore, SdCardBackend};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::Blocking;
use esp_hal::gpio::Output;
use esp_hal::spi::master::Spi;

pub type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;
pub type SdBackend = SdCardBackend<SdSpi, Delay, &'static WallClock>;
pub type Store = LogStore<CriticalSectionRawMutex, SdBackend>;

/// Timestamps for readings and for the FAT directory entries.
pub static CLOCK: WallClock = WallClock::new();

pub static RUN_STATE: RunState = RunState::new();
