#[cfg(target_os = "espidf")]
mod http;
#[cfg(target_os = "espidf")]
mod net;
#[cfg(not(target_os = "espidf"))]
mod replay;
#[cfg(target_os = "espidf")]
mod sensor;

#[cfg(target_os = "espidf")]
use {
    embedded_svc::wifi,
    esp_idf_hal::{
        gpio::{AnyInputPin, PinDriver, Pull},
        peripherals::Peripherals,
    },
    esp_idf_svc::{
        eventloop::EspSystemEventLoop,
        nvs::EspDefaultNvsPartition,
        timer::EspTimerService,
        wifi::{AsyncWifi, EspWifi},
    },
    esp_idf_sys::{self as _, EspError},
    meter_pulse::{Config, ConfigError, EdgeSource as _, ReconcileError},
};

#[cfg(target_os = "espidf")]
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Esp(#[from] EspError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("WIFI_SSID was not set at build time")]
    NoNetwork,
}

/// Settings are baked into the image, just like the Wi-Fi credentials.
#[cfg(target_os = "espidf")]
fn baked(key: &str) -> Option<String> {
    let value = match key {
        "METER_PIN" => option_env!("METER_PIN"),
        "METER_SAMPLE_RATE_HZ" => option_env!("METER_SAMPLE_RATE_HZ"),
        "METER_QUEUE_LEN" => option_env!("METER_QUEUE_LEN"),
        "METER_ACTIVE_LOW" => option_env!("METER_ACTIVE_LOW"),
        "METER_MIN_DELAY_MS" => option_env!("METER_MIN_DELAY_MS"),
        "METER_INACTIVE_POLICY" => option_env!("METER_INACTIVE_POLICY"),
        "METER_DEBOUNCE_SCOPE" => option_env!("METER_DEBOUNCE_SCOPE"),
        "DOMOTICZ_PROTOCOL" => option_env!("DOMOTICZ_PROTOCOL"),
        "DOMOTICZ_HOST" => option_env!("DOMOTICZ_HOST"),
        "DOMOTICZ_PORT" => option_env!("DOMOTICZ_PORT"),
        "DOMOTICZ_IDX" => option_env!("DOMOTICZ_IDX"),
        "INFLUX_PROTOCOL" => option_env!("INFLUX_PROTOCOL"),
        "INFLUX_HOST" => option_env!("INFLUX_HOST"),
        "INFLUX_PORT" => option_env!("INFLUX_PORT"),
        "INFLUX_DB" => option_env!("INFLUX_DB"),
        "INFLUX_QUERY_PREFIX" => option_env!("INFLUX_QUERY_PREFIX"),
        "INFLUX_INCREMENT" => option_env!("INFLUX_INCREMENT"),
        "INFLUX_USER" => option_env!("INFLUX_USER"),
        "INFLUX_PASSWORD" => option_env!("INFLUX_PASSWORD"),
        "HTTP_TIMEOUT_MS" => option_env!("HTTP_TIMEOUT_MS"),
        "RECONCILE_ATTEMPTS" => option_env!("RECONCILE_ATTEMPTS"),
        "RECONCILE_BACKOFF_MS" => option_env!("RECONCILE_BACKOFF_MS"),
        "WIFI_SSID" => option_env!("WIFI_SSID"),
        "WIFI_PASSWORD" => option_env!("WIFI_PASSWORD"),
        _ => None,
    };
    value.map(str::to_owned)
}

#[cfg(target_os = "espidf")]
fn main() -> Result<(), StartupError> {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_sys::link_patches();

    esp_idf_svc::log::EspLogger::initialize_default();

    let config = Config::from_lookup(baked)?;
    let ssid = config.wifi_ssid.as_deref().ok_or(StartupError::NoNetwork)?;
    let password = config.wifi_password.as_deref().unwrap_or_default();

    let Peripherals { modem, .. } = Peripherals::take().ok_or_else(EspError::from_infallible::<-1>)?;

    // SAFETY: the pin number comes from the image configuration and no other driver claims it.
    let pin = unsafe { AnyInputPin::new(config.sensor.pin) };
    let mut pin = PinDriver::input(pin)?;
    // The sensor module drives its output push-pull.
    pin.set_pull(Pull::Floating)?;

    // Initialize other services
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let timer_svc = EspTimerService::new()?;

    // Set up Wi-Fi driver
    let wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;
    let mut wifi = AsyncWifi::wrap(wifi, sysloop, timer_svc)?;
    // The scan in `net::init` needs the station mode up already.
    wifi.set_configuration(&wifi::Configuration::Client(Default::default()))?;
    esp_idf_hal::task::block_on(net::init(&mut wifi, ssid, password))?;

    let mut transport = http::EspTransport::new(config.http_timeout)?;
    let seed = match meter_pulse::reconciler(&config) {
        Some(reconciler) => Some(reconciler.seed(&mut transport, std::thread::sleep)?),
        None => None,
    };

    let mut debouncer = meter_pulse::assemble(&config, seed, transport);
    let mut sensor = sensor::LineSensor::new(pin, config.sensor);
    log::info!("starting waiting loop forever");
    sensor.run(&mut debouncer)?;
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
fn main() -> std::process::ExitCode {
    replay::main()
}
