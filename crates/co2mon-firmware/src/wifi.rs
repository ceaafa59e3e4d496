//! Wi-Fi station bring-up with a bounded number of attempts.

use alloc::string::String;

use co2mon_core::app_state::AppRunState;
use co2mon_core::config::InternetConfig;
use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer, with_timeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent};
use log::{error, info, warn};

use crate::RUN_STATE;

const RETRY_DELAY: Duration = Duration::from_secs(1);
const DHCP_TIMEOUT: Duration = Duration::from_secs(15);
/// Pause after giving up before another round of attempts.
const GIVE_UP_BACKOFF: Duration = Duration::from_secs(60);

/// Result of the first connection round, for the startup sequence.
pub static FIRST_LINK: Signal<CriticalSectionRawMutex, bool> = Signal::new();

#[embassy_executor::task]
pub async fn net_task(mut runner: embassy_net::Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}

/// Keeps the station associated.
///
/// Each round makes up to `attempts` connection attempts. A round that gives
/// up leaves the device degraded (sampling continues, nothing is served) and
/// the next round starts after a long pause.
#[embassy_executor::task]
pub async fn wifi_task(
    mut controller: WifiController<'static>,
    stack: Stack<'static>,
    internet: InternetConfig<'static>,
    attempts: u32,
) {
    let mut first_round = true;

    loop {
        RUN_STATE.set(AppRunState::WifiConnecting);
        let connected = connect(&mut controller, stack, &internet, attempts).await;

        if connected {
            RUN_STATE.set(AppRunState::WifiConnected);
        }
        if first_round {
            FIRST_LINK.signal(connected);
            first_round = false;
        }

        if connected {
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            warn!("Wi-Fi link lost; reconnecting");
        } else {
            error!("Wi-Fi unavailable after {} attempts; running degraded", attempts);
            RUN_STATE.set(AppRunState::Degraded);
            Timer::after(GIVE_UP_BACKOFF).await;
        }
    }
}

async fn connect(
    controller: &mut WifiController<'static>,
    stack: Stack<'static>,
    internet: &InternetConfig<'static>,
    attempts: u32,
) -> bool {
    for attempt in 1..=attempts {
        match try_connect(controller, stack, internet).await {
            Ok(()) => {
                if let Some(cfg) = stack.config_v4() {
                    info!("Wi-Fi up: ip={} (attempt {})", cfg.address.address(), attempt);
                }
                return true;
            }
            Err(reason) => warn!("Wi-Fi attempt {}/{} failed: {}", attempt, attempts, reason),
        }
        Timer::after(RETRY_DELAY).await;
    }
    false
}

async fn try_connect(
    controller: &mut WifiController<'static>,
    stack: Stack<'static>,
    internet: &InternetConfig<'static>,
) -> Result<(), &'static str> {
    if !matches!(controller.is_started(), Ok(true)) {
        let client = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(String::from(internet.ssid))
                .with_password(String::from(internet.password)),
        );
        controller
            .set_config(&client)
            .map_err(|_| "configuration rejected")?;
        controller
            .start_async()
            .await
            .map_err(|_| "station failed to start")?;
        info!("Wi-Fi station started, SSID \"{}\"", internet.ssid);
    }

    controller
        .connect_async()
        .await
        .map_err(|_| "association failed")?;

    with_timeout(DHCP_TIMEOUT, stack.wait_config_up())
        .await
        .map_err(|_| "no DHCP lease")
}
