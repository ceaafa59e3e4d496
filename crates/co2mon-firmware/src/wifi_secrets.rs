use co2mon_core::config::InternetConfig;

/// Credentials baked in at build time from `.env`.
pub const INTERNET: InternetConfig<'static> = InternetConfig {
    ssid: env!("WIFI_SSID"),
    password: env!("WIFI_PASSWORD"),
};
