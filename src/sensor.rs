use esp_idf_hal::{
    delay::FreeRtos,
    gpio::{AnyInputPin, Input, PinDriver},
};
use esp_idf_sys::EspError;
use meter_pulse::{config::SensorConfig, EdgeHandler, EdgeSource, MajorityFilter};
use std::time::Instant;

/// Polled line sensor with a majority vote over the last few samples.
pub struct LineSensor<'d> {
    pin: PinDriver<'d, AnyInputPin, Input>,
    filter: MajorityFilter,
    period_ms: u32,
}

impl<'d> LineSensor<'d> {
    pub fn new(pin: PinDriver<'d, AnyInputPin, Input>, config: SensorConfig) -> Self {
        let period_ms = config.sample_period().as_millis().max(1) as u32;
        log::debug!("sampling line sensor every {period_ms} ms with a window of {}", config.queue_len);
        Self { pin, filter: MajorityFilter::new(config.queue_len, config.active_low), period_ms }
    }
}

impl EdgeSource for LineSensor<'_> {
    type Error = EspError;

    /// Never returns: the pin cannot fail once configured.
    fn run<H: EdgeHandler>(&mut self, handler: &mut H) -> Result<(), EspError> {
        let origin = Instant::now();
        loop {
            FreeRtos::delay_ms(self.period_ms);
            let Some(edge) = self.filter.push(self.pin.is_high()) else {
                continue;
            };
            log::debug!("{edge} edge, window {}", self.filter.window());
            handler.on_edge(edge, origin.elapsed());
        }
    }
}
