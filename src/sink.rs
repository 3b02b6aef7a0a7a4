mod domoticz;
mod influx;

pub use domoticz::DomoticzSink;
pub use influx::InfluxSink;

use crate::{
    edge::Edge,
    transport::{Response, Transport, TransportError},
};
use core::time::Duration;

/// Normalized event handed to the sinks once per accepted edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub edge: Edge,
    pub at: Duration,
    /// Running counter after this pulse, if the deployment keeps one.
    pub reading: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("rejected with status {0}")]
    Status(u16),
    #[error("no seeded reading to report")]
    MissingReading,
}

/// Ensures a 2xx status, otherwise surfaces the status as the error.
pub(crate) fn check(response: Response) -> Result<Response, SinkError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(SinkError::Status(response.status))
    }
}

/// Delivery target for pulses. Stateless apart from its configuration.
pub trait Sink {
    fn name(&self) -> &'static str;

    /// Whether this sink cares about edges of the given kind at all.
    fn wants(&self, edge: Edge) -> bool;

    fn deliver(&self, pulse: &Pulse, transport: &mut dyn Transport) -> Result<(), SinkError>;
}

/// Per-pulse delivery summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans a pulse out to every interested sink over one transport.
pub struct Dispatcher<T> {
    transport: T,
    sinks: Vec<Box<dyn Sink>>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport, sinks: Vec::new() }
    }

    pub fn with_sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Delivers to each sink in turn. A failing sink is logged and skipped; it never stops the others.
    pub fn dispatch(&mut self, pulse: &Pulse) -> Report {
        let mut report = Report::default();
        for sink in self.sinks.iter().filter(|sink| sink.wants(pulse.edge)) {
            match sink.deliver(pulse, &mut self.transport) {
                Ok(()) => {
                    log::debug!("{} accepted {} pulse at {:?}", sink.name(), pulse.edge, pulse.at);
                    report.delivered += 1;
                }
                Err(err) => {
                    log::warn!("{} failed to record {} pulse: {err}", sink.name(), pulse.edge);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::transport::{Method, Response, Transport, TransportError};
    use std::collections::VecDeque;

    /// Records requests and plays back canned answers; answers `200` once the script runs dry.
    #[derive(Default)]
    pub struct Scripted {
        pub requests: Vec<(Method, String, String)>,
        pub answers: VecDeque<Result<u16, &'static str>>,
    }

    impl Scripted {
        fn answer(&mut self, method: Method, url: &str, body: &[u8]) -> Result<Response, TransportError> {
            self.requests.push((method, url.into(), String::from_utf8_lossy(body).into_owned()));
            match self.answers.pop_front().unwrap_or(Ok(200)) {
                Ok(status) => Ok(Response { status, body: Vec::new() }),
                Err(reason) => Err(TransportError::new(method, url, reason)),
            }
        }
    }

    impl Transport for Scripted {
        fn get(&mut self, url: &str) -> Result<Response, TransportError> {
            self.answer(Method::Get, url, &[])
        }

        fn post(&mut self, url: &str, body: &[u8]) -> Result<Response, TransportError> {
            self.answer(Method::Post, url, body)
        }
    }
}
