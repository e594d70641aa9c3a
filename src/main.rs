#![cfg_attr(not(target_os = "espidf"), allow(dead_code))]

mod button;
mod config;
mod flow;
#[cfg(target_os = "espidf")]
mod http;
mod meter;
#[cfg(target_os = "espidf")]
mod mqtt;
#[cfg(target_os = "espidf")]
mod net;
mod reading;
mod server;
mod smoothing;
mod snapshot;
mod transmit;

use config::Config;

fn describe(config: &Config) {
    log::info!(
        "counting {:?} edges at {} pulses per L/min, smoothing over {} samples, reporting to {}",
        config.edge,
        config.calibration,
        config.window,
        config.destination,
    );
}

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use core::pin::pin;
    use embedded_svc::utils::asyncify::Asyncify as _;
    use esp_idf_hal::{
        gpio::{PinDriver, Pins, Pull},
        peripherals::Peripherals,
    };
    use esp_idf_svc::{
        eventloop::EspSystemEventLoop,
        nvs::EspDefaultNvsPartition,
        timer::EspTimerService,
        wifi::{AsyncWifi, EspWifi},
    };
    use esp_idf_sys::EspError;
    use futures::future::{select, Either};
    use std::sync::Arc;

    use crate::{
        button::Shutdown,
        config::Destination,
        flow::PulseCounter,
        meter::FlowMeter,
        server::Latest,
        snapshot::Pipeline,
        transmit::{Console, Sink},
    };

    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_sys::link_patches();

    esp_idf_svc::log::EspLogger::initialize_default();

    let config = Config::compiled()?;
    describe(&config);

    let Peripherals {
        modem,
        pins: Pins {
            gpio27: flow_sensor_pin,
            gpio0: stop_pin,
            ..
        },
        ..
    } = Peripherals::take().ok_or_else(EspError::from_infallible::<-1>)?;

    // Set up pins. The sensor pulls its open-collector output low, the BOOT button is the stop button.
    let mut flow = PinDriver::input(flow_sensor_pin)?;
    flow.set_pull(Pull::Down)?;
    let mut stop = PinDriver::input(stop_pin)?;
    stop.set_pull(Pull::Up)?;

    // Initialize other services
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let timer_svc = EspTimerService::new()?;

    let wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;
    let mut wifi = AsyncWifi::wrap(wifi, sysloop, timer_svc.clone())?;

    // Set up asynchronous timer
    let mut timer_svc = timer_svc.into_async();
    let mut timer = timer_svc.timer()?;

    esp_idf_hal::task::block_on(async move {
        let _sntp = match config.wifi {
            Some((ssid, password)) => {
                net::init(&mut wifi, ssid, password).await?;
                Some(net::sync_clock(&mut timer).await?)
            }
            None => {
                log::warn!("no Wi-Fi configured, timestamps start at the epoch");
                None
            }
        };

        let latest = Arc::new(Latest::default());
        let _server = config.query_port.map(|port| server::serve(port, latest.clone())).transpose()?;

        let sink = match &config.destination {
            Destination::Http { endpoint } => Sink::Http(http::HttpSink::new(endpoint.to_string())?),
            Destination::Mqtt(settings) => Sink::Mqtt(mqtt::MqttSink::connect(settings)?),
            Destination::Console => Sink::Console(Console::stdout()),
        };

        let shutdown = Shutdown::new();
        let counter = PulseCounter::new();
        let pipeline = Pipeline {
            meter: FlowMeter::new(config.calibration, config.window),
            sink,
            pause: timer,
            schedule: config.schedule,
            tags: config.tags,
            compat: config.compat,
            latest: &latest,
            shutdown: &shutdown,
        };

        let run = pin!(snapshot::run(flow, config.edge, &counter, pipeline));
        let stop = pin!(button::stop(stop, &shutdown));
        let outcome = match select(run, stop).await {
            Either::Left((outcome, _)) => outcome,
            Either::Right((pressed, run)) => {
                pressed?;
                run.await
            }
        };
        outcome.map_err(|err| anyhow::anyhow!("flow sensor lost: {err:?}"))
    })?;

    log::info!("exiting");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::compiled()?;
    describe(&config);
    anyhow::bail!("no flow sensor is wired to this target; flash the firmware to an ESP32 to sample")
}
