use super::{check, Pulse, Sink, SinkError};
use crate::{config::DomoticzConfig, edge::Edge, transport::Transport};

/// Reports the absolute meter reading to a Domoticz counter device.
///
/// The device must use a divider of 1000 so that one unit of the running
/// counter shows up as one liter rather than ten.
pub struct DomoticzSink {
    base: String,
    idx: u32,
}

impl DomoticzSink {
    pub fn new(config: &DomoticzConfig) -> Self {
        Self { base: config.endpoint.base(), idx: config.idx }
    }

    pub fn update_url(&self, count: i64) -> String {
        let Self { base, idx } = self;
        format!("{base}/json.htm?type=command&param=udevice&idx={idx}&svalue={count}")
    }

    /// Query used at startup to read the persisted counter back.
    pub fn reading_url(&self) -> String {
        let Self { base, idx } = self;
        format!("{base}/json.htm?type=devices&rid={idx}")
    }
}

impl Sink for DomoticzSink {
    fn name(&self) -> &'static str {
        "domoticz"
    }

    fn wants(&self, edge: Edge) -> bool {
        edge == Edge::Active
    }

    fn deliver(&self, pulse: &Pulse, transport: &mut dyn Transport) -> Result<(), SinkError> {
        let count = pulse.reading.ok_or(SinkError::MissingReading)?;
        check(transport.get(&self.update_url(count))?)?;
        Ok(())
    }
}
