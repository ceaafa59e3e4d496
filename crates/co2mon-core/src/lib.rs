//! Hardware-independent core library for co2mon
//!
//! This crate contains all platform-agnostic logic for the PWM CO2 logger:
//! turning a sensor duty cycle into a concentration, the bounded on-device
//! log, the JSON query service, and the periodic acquisition loop.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod acquisition;
pub mod app_state;
pub mod clock;
pub mod config;
pub mod metrics;
pub mod query;
pub mod sensors;
pub mod storage;
