//! Build-time device configuration
//!
//! Nothing here is negotiated at runtime. The firmware and the simulator both
//! start from [`MonitorConfig::DEFAULT`] and override at most a few fields
//! before handing the config to the tasks.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct Config<'a> {
    pub internet: InternetConfig<'a>,
    pub monitor: MonitorConfig<'a>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy)]
pub struct InternetConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

/// Constants that shape sampling, storage and serving.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig<'a> {
    /// Maximum number of readings kept in the log
    pub max_entries: usize,
    /// Full PWM cycle of the sensor in microseconds
    pub cycle_period_us: u32,
    /// Period of the acquisition loop in milliseconds
    pub sample_interval_ms: u64,
    /// Longest wait for a high pulse before the cycle is skipped
    pub pulse_timeout_us: u32,
    /// GPIO number the sensor's PWM output is wired to. Informational: the
    /// firmware claims the pin by its typed peripheral, so this must match
    /// the pin taken in the firmware's `main`.
    pub pwm_pin: u8,
    /// TCP port the query service listens on
    pub http_port: u16,
    /// SNTP attempts before continuing with uptime timestamps
    pub time_sync_attempts: u32,
    /// Wi-Fi association attempts before the link is given up on
    pub wifi_connect_attempts: u32,
    /// Name of the log file on the storage volume
    pub log_file_name: &'a str,
    /// Delay between startup and the first sample in milliseconds
    pub startup_delay_ms: u64,
}

impl MonitorConfig<'static> {
    pub const DEFAULT: Self = Self {
        max_entries: 100,
        cycle_period_us: 1_004_000,
        sample_interval_ms: 2_000,
        pulse_timeout_us: 1_000_000,
        pwm_pin: 13,
        http_port: 80,
        time_sync_attempts: 100,
        wifi_connect_attempts: 20,
        log_file_name: "CO2_DATA.TXT",
        startup_delay_ms: 2_000,
    };
}

impl Default for MonitorConfig<'_> {
    fn default() -> Self {
        MonitorConfig::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_deployed_device() {
        let config = MonitorConfig::default();
        assert_eq!(config.max_entries, 100);
        assert_eq!(config.cycle_period_us, 1_004_000);
        assert_eq!(config.sample_interval_ms, 2_000);
        assert_eq!(config.pwm_pin, 13);
        assert_eq!(config.http_port, 80);
    }

    #[test]
    fn test_config_deserializes_from_json() {
        let json = r#"{
            "internet": { "ssid": "lab", "password": "hunter2" },
            "monitor": {
                "max_entries": 10,
                "cycle_period_us": 1004000,
                "sample_interval_ms": 500,
                "pulse_timeout_us": 1000000,
                "pwm_pin": 4,
                "http_port": 8080,
                "time_sync_attempts": 3,
                "wifi_connect_attempts": 2,
                "log_file_name": "LOG.TXT",
                "startup_delay_ms": 0
            }
        }"#;

        let config: Config<'_> = serde_json::from_str(json).unwrap();
        assert_eq!(config.internet.ssid, "lab");
        assert_eq!(config.monitor.max_entries, 10);
        assert_eq!(config.monitor.log_file_name, "LOG.TXT");
    }
}
