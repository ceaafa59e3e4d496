//! Bakes the Wi-Fi credentials from `.env` into the firmware and selects the
//! esp-hal linker script.

fn main() {
    println!("cargo:rerun-if-changed=.env");

    // A missing .env is fine as long as the variables come from the environment
    let _ = dotenvy::dotenv();

    for key in ["WIFI_SSID", "WIFI_PASSWORD"] {
        match std::env::var(key) {
            Ok(value) => println!("cargo:rustc-env={key}={value}"),
            Err(_) => panic!("{key} must be set in .env or the environment"),
        }
        println!("cargo:rerun-if-env-changed={key}");
    }

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
