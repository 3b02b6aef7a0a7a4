use super::{check, Pulse, Sink, SinkError};
use crate::{config::InfluxConfig, edge::Edge, transport::Transport};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything but RFC 3986 unreserved characters gets escaped in a query value.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

fn encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

/// Writes a fixed increment per pulse as an InfluxDB line-protocol point.
pub struct InfluxSink {
    url: String,
    query_prefix: String,
    increment: f64,
}

impl InfluxSink {
    pub fn new(config: &InfluxConfig) -> Self {
        let InfluxConfig { endpoint, db, query_prefix, increment, credentials } = config;
        let mut url = format!("{}/write?db={}&precision=s", endpoint.base(), encode(db));
        if let Some((user, password)) = credentials {
            url.push_str(&format!("&u={}&p={}", encode(user), encode(password)));
        }
        Self { url, query_prefix: query_prefix.clone(), increment: *increment }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> String {
        format!("{}{:.6}", self.query_prefix, self.increment)
    }
}

impl Sink for InfluxSink {
    fn name(&self) -> &'static str {
        "influx"
    }

    /// Both kinds; whether `Inactive` edges ever get here is up to the debouncer policy.
    fn wants(&self, _: Edge) -> bool {
        true
    }

    fn deliver(&self, _: &Pulse, transport: &mut dyn Transport) -> Result<(), SinkError> {
        check(transport.post(&self.url, self.body().as_bytes())?)?;
        Ok(())
    }
}
