#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use co2mon_core::acquisition::Acquisition;
use co2mon_core::app_state::{AppError, AppRunState};
use co2mon_core::config::MonitorConfig;
use co2mon_core::storage::{LogStore, SdCardBackend};
use co2mon_firmware::http::{HTTP_WORKERS, http_worker};
use co2mon_firmware::pwm_input::PwmInput;
use co2mon_firmware::wifi::{FIRST_LINK, net_task, wifi_task};
use co2mon_firmware::wifi_secrets::INTERNET;
use co2mon_firmware::{CLOCK, RUN_STATE, Store, sntp};
use embassy_executor::Spawner;
use embassy_net::{Config as NetConfig, DhcpConfig, Stack, StackResources};
use embassy_time::{Delay, Duration, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::peripherals::WIFI;
use esp_hal::rng::Rng;
use esp_hal::spi::Mode;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};
use static_cell::StaticCell;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

static STORE: StaticCell<Store> = StaticCell::new();
static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let monitor = MonitorConfig::DEFAULT;
    info!("co2mon starting: {:?}", monitor);

    // SD card on SPI2. Without storage there is nothing to do.
    let spi_bus = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_khz(400))
            .with_mode(Mode::_0),
    )
    .expect("Failed to configure SD card SPI bus")
    .with_sck(peripherals.GPIO36)
    .with_mosi(peripherals.GPIO37)
    .with_miso(peripherals.GPIO35);
    let cs = Output::new(peripherals.GPIO4, Level::High, OutputConfig::default());
    let spi_device =
        ExclusiveDevice::new(spi_bus, cs, Delay).expect("Failed to claim SD card chip select");

    let sd_card = SdCard::new(spi_device, Delay);
    match sd_card.num_bytes() {
        Ok(bytes) => info!("SD card: {} MiB", bytes / (1024 * 1024)),
        Err(e) => panic!("{}", AppError::storage(e)),
    }

    let backend = SdCardBackend::new(sd_card, &CLOCK, monitor.log_file_name);
    let store: &'static Store = STORE.init(LogStore::new(backend, monitor.max_entries));
    if let Err(e) = store.init().await {
        panic!("{}", AppError::storage(e));
    }
    RUN_STATE.set(AppRunState::StorageReady);

    // The sensor pin is claimed before the network so a wiring fault stops
    // startup here.
    // Must agree with `monitor.pwm_pin`, which is only reported
    let pwm_pin = Input::new(
        peripherals.GPIO13,
        InputConfig::default().with_pull(Pull::None),
    );
    info!("PWM input on GPIO{}", monitor.pwm_pin);

    let network = start_network(&spawner, peripherals.WIFI, store, &monitor);

    let linked = match network {
        Some(stack) => FIRST_LINK.wait().await.then_some(stack),
        None => None,
    };

    // Time sync is best effort and happens once
    let time_known = match linked {
        Some(stack) => {
            RUN_STATE.set(AppRunState::TimeSyncing);
            let synced = sntp::sync_clock(stack, monitor.time_sync_attempts).await;
            if synced {
                RUN_STATE.set(AppRunState::TimeKnown);
            } else {
                warn!("Time unknown; readings carry seconds since boot");
                RUN_STATE.set(AppRunState::Degraded);
            }
            synced
        }
        None => {
            warn!("No network; readings carry seconds since boot");
            RUN_STATE.set(AppRunState::Degraded);
            false
        }
    };

    Timer::after(Duration::from_millis(monitor.startup_delay_ms)).await;

    let mut acquisition = Acquisition::new(PwmInput::new(pwm_pin), &CLOCK, store, &monitor);
    // From this startup's own result; wifi_task writes the shared state too
    RUN_STATE.set(AppRunState::sampling(time_known));
    acquisition
        .run(Duration::from_millis(monitor.sample_interval_ms))
        .await
}

/// Bring up the radio, the IP stack and the tasks that use them.
///
/// Returns `None` if the radio cannot be initialised; the device then logs
/// readings without serving them.
fn start_network(
    spawner: &Spawner,
    wifi: WIFI<'static>,
    store: &'static Store,
    monitor: &MonitorConfig<'static>,
) -> Option<Stack<'static>> {
    let radio = match esp_radio::init() {
        Ok(radio) => RADIO.init(radio),
        Err(e) => {
            error!("{}", AppError::wifi(e));
            return None;
        }
    };
    let (controller, interfaces) = match esp_radio::wifi::new(radio, wifi, Default::default()) {
        Ok(parts) => parts,
        Err(e) => {
            error!("{}", AppError::wifi(e));
            return None;
        }
    };

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        NetConfig::dhcpv4(DhcpConfig::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );

    spawner.spawn(net_task(runner).expect("net task"));
    spawner.spawn(
        wifi_task(controller, stack, INTERNET, monitor.wifi_connect_attempts).expect("wifi task"),
    );
    for worker in 0..HTTP_WORKERS {
        spawner.spawn(http_worker(stack, store, monitor.http_port, worker).expect("http worker"));
    }
    info!("Query service on port {} once the link is up", monitor.http_port);

    Some(stack)
}
