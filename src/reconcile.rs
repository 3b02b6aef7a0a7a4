//! Startup recovery of the running counter from Domoticz.
//!
//! This is the one place where a sink failure is fatal: running with an
//! unseeded counter would silently under-report every pulse that follows.

use crate::transport::{Transport, TransportError};
use core::time::Duration;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    /// Gives a freshly booted Domoticz about two minutes to come up.
    fn default() -> Self {
        Self { attempts: 10, backoff: Duration::from_secs(10) }
    }
}

/// Why a single read attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum ReadingError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("device query answered with status {0}")]
    Status(u16),
    #[error("malformed device list: {0}")]
    Json(#[from] serde_json::Error),
    #[error("device list is empty")]
    NoDevice,
    #[error("{field} is not a decimal number: `{value}`")]
    Decimal { field: &'static str, value: String },
    #[error("counter {counter} minus offset {offset} is out of range")]
    OutOfRange { counter: i64, offset: i64 },
}

#[derive(Debug, thiserror::Error)]
#[error("could not read the meter after {attempts} attempts: {last}")]
pub struct ReconcileError {
    pub attempts: u32,
    #[source]
    pub last: ReadingError,
}

#[derive(Deserialize)]
struct Devices {
    #[serde(default)]
    result: Vec<Device>,
}

#[derive(Deserialize)]
struct Device {
    /// Like `"13.456 m3"`.
    #[serde(rename = "Counter")]
    counter: String,
    #[serde(rename = "AddjValue")]
    offset: Decimal,
}

/// Domoticz sends the offset as a string or a bare number depending on its version.
#[derive(Deserialize)]
#[serde(untagged)]
enum Decimal {
    Text(String),
    Number(f64),
}

impl Decimal {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

/// Parses a decimal string into thousandths, rounding toward negative infinity.
///
/// Works on the digits directly so that `"13.456"` is exactly `13456` rather
/// than whatever a binary float happens to multiply out to.
pub fn milli_units(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole = if whole.is_empty() { 0 } else { whole.parse::<i64>().ok()? };
    let mut thousandths = 0;
    for (i, digit) in fraction.bytes().chain(core::iter::repeat(b'0')).take(3).enumerate() {
        thousandths += i64::from(digit - b'0') * [100, 10, 1][i];
    }
    let remainder = fraction.bytes().skip(3).any(|b| b != b'0');

    let magnitude = whole.checked_mul(1000)?.checked_add(thousandths)?;
    Some(match (negative, remainder) {
        (false, _) => magnitude,
        (true, false) => -magnitude,
        (true, true) => -magnitude - 1,
    })
}

/// Persisted meter state as reported by Domoticz, in thousandths of the display unit.
///
/// [`Reading::parse`] refuses readings whose `counter - offset` does not fit an `i64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reading {
    pub counter: i64,
    pub offset: i64,
    pub unit: String,
}

impl Reading {
    /// Counter value to continue from.
    pub fn seed(&self) -> i64 {
        self.counter.wrapping_sub(self.offset)
    }

    pub fn parse(body: &[u8]) -> Result<Self, ReadingError> {
        let Devices { result } = serde_json::from_slice(body)?;
        let Device { counter, offset } = result.into_iter().next().ok_or(ReadingError::NoDevice)?;

        let offset = offset.into_text();
        let offset = milli_units(&offset).ok_or(ReadingError::Decimal { field: "AddjValue", value: offset })?;

        let mut parts = counter.split_whitespace();
        let value = parts.next().and_then(milli_units);
        let unit = parts.next().unwrap_or_default().to_owned();
        let counter = value.ok_or(ReadingError::Decimal { field: "Counter", value: counter })?;

        if counter.checked_sub(offset).is_none() {
            return Err(ReadingError::OutOfRange { counter, offset });
        }
        Ok(Self { counter, offset, unit })
    }
}

pub struct Reconciler {
    url: String,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(url: String, retry: RetryPolicy) -> Self {
        Self { url, retry }
    }

    pub fn read(&self, transport: &mut impl Transport) -> Result<Reading, ReadingError> {
        let response = transport.get(&self.url)?;
        if !response.is_success() {
            return Err(ReadingError::Status(response.status));
        }
        Reading::parse(&response.body)
    }

    /// Reads the counter, retrying with a fixed backoff. `sleep` is called between attempts only.
    pub fn seed(&self, transport: &mut impl Transport, mut sleep: impl FnMut(Duration)) -> Result<i64, ReconcileError> {
        let RetryPolicy { attempts, backoff } = self.retry;
        let attempts = attempts.max(1);
        log::info!("getting current meter reading from {}", self.url);

        let mut attempt = 1;
        loop {
            match self.read(transport) {
                Ok(reading) => {
                    let seed = reading.seed();
                    log::info!(
                        "using {seed} as current reading (counter={} {}, offset={})",
                        reading.counter,
                        reading.unit,
                        reading.offset
                    );
                    return Ok(seed);
                }
                Err(err) if attempt < attempts => {
                    log::warn!("could not get current meter reading, retrying in {backoff:?} ({attempt}/{attempts}): {err}");
                    sleep(backoff);
                    attempt += 1;
                }
                Err(last) => {
                    log::warn!("could not get current meter reading, failing ({attempt}/{attempts}): {last}");
                    return Err(ReconcileError { attempts, last });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Method, Response};

    /// Fails the first `failures` requests, then serves `body`.
    struct Flaky {
        failures: u32,
        calls: u32,
        body: &'static str,
    }

    impl Transport for Flaky {
        fn get(&mut self, url: &str) -> Result<Response, TransportError> {
            self.calls += 1;
            if self.calls <= self.failures {
                return Err(TransportError::new(Method::Get, url, "connection refused"));
            }
            Ok(Response { status: 200, body: self.body.as_bytes().to_vec() })
        }

        fn post(&mut self, url: &str, _: &[u8]) -> Result<Response, TransportError> {
            Err(TransportError::new(Method::Post, url, "unexpected"))
        }
    }

    const DEVICES: &str = r#"{"result":[{"AddjValue":"1.000","Counter":"13.456 m3","Name":"Water"}],"status":"OK"}"#;

    fn reconciler() -> Reconciler {
        Reconciler::new("http://127.0.0.1:8080/json.htm?type=devices&rid=23".into(), RetryPolicy::default())
    }

    #[test]
    fn decimals_become_thousandths() {
        assert_eq!(milli_units("13.456"), Some(13456));
        assert_eq!(milli_units("1.000"), Some(1000));
        assert_eq!(milli_units("0.5"), Some(500));
        assert_eq!(milli_units("7"), Some(7000));
        assert_eq!(milli_units(".25"), Some(250));
        assert_eq!(milli_units("2.0019"), Some(2001));
        assert_eq!(milli_units("-0.0011"), Some(-2));
        assert_eq!(milli_units("-1.5"), Some(-1500));
        assert_eq!(milli_units("+3.1"), Some(3100));
    }

    #[test]
    fn garbage_is_not_a_decimal() {
        for text in ["", ".", "-", "1.2.3", "12a", "1e3", "m3"] {
            assert_eq!(milli_units(text), None, "{text:?}");
        }
    }

    #[test]
    fn seed_subtracts_the_offset() {
        let reading = Reading::parse(DEVICES.as_bytes()).unwrap();
        assert_eq!(reading, Reading { counter: 13456, offset: 1000, unit: "m3".into() });
        assert_eq!(reading.seed(), 12456);
    }

    #[test]
    fn numeric_offsets_are_accepted() {
        let body = br#"{"result":[{"AddjValue":0.25,"Counter":"2.000 m3"}]}"#;
        assert_eq!(Reading::parse(body).unwrap().seed(), 1750);
    }

    #[test]
    fn empty_result_is_an_error() {
        assert!(matches!(Reading::parse(br#"{"status":"OK"}"#), Err(ReadingError::NoDevice)));
        assert!(matches!(Reading::parse(br#"{"result":[]}"#), Err(ReadingError::NoDevice)));
    }

    #[test]
    fn malformed_counter_names_the_field() {
        let body = br#"{"result":[{"AddjValue":"0","Counter":"lots"}]}"#;
        let err = Reading::parse(body).unwrap_err();
        assert!(matches!(err, ReadingError::Decimal { field: "Counter", .. }));
    }

    #[test]
    fn unrepresentable_seed_is_an_error() {
        let body = br#"{"result":[{"AddjValue":"-1","Counter":"9223372036854775.807 m3"}]}"#;
        let err = Reading::parse(body).unwrap_err();
        assert!(matches!(err, ReadingError::OutOfRange { counter: i64::MAX, offset: -1000 }), "{err}");

        let body = br#"{"result":[{"AddjValue":"0","Counter":"9223372036854775.807 m3"}]}"#;
        assert_eq!(Reading::parse(body).unwrap().seed(), i64::MAX);
    }

    #[test]
    fn succeeds_on_the_last_attempt() {
        let mut transport = Flaky { failures: 9, calls: 0, body: DEVICES };
        let mut slept = Vec::new();
        let seed = reconciler().seed(&mut transport, |d| slept.push(d)).unwrap();
        assert_eq!(seed, 12456);
        assert_eq!(transport.calls, 10);
        assert_eq!(slept, vec![Duration::from_secs(10); 9]);
    }

    #[test]
    fn gives_up_after_every_attempt_fails() {
        let mut transport = Flaky { failures: u32::MAX, calls: 0, body: DEVICES };
        let mut sleeps = 0;
        let err = reconciler().seed(&mut transport, |_| sleeps += 1).unwrap_err();
        assert_eq!(err.attempts, 10);
        assert!(matches!(err.last, ReadingError::Transport(_)));
        assert_eq!(transport.calls, 10);
        assert_eq!(sleeps, 9);
    }

    #[test]
    fn bad_status_and_bad_body_are_retried() {
        struct Sequence(Vec<Response>);

        impl Transport for Sequence {
            fn get(&mut self, _: &str) -> Result<Response, TransportError> {
                Ok(self.0.remove(0))
            }

            fn post(&mut self, url: &str, _: &[u8]) -> Result<Response, TransportError> {
                Err(TransportError::new(Method::Post, url, "unexpected"))
            }
        }

        let mut transport = Sequence(vec![
            Response { status: 503, body: Vec::new() },
            Response { status: 200, body: b"<html>starting</html>".to_vec() },
            Response { status: 200, body: DEVICES.as_bytes().to_vec() },
        ]);
        let seed = reconciler().seed(&mut transport, |_| {}).unwrap();
        assert_eq!(seed, 12456);
        assert!(transport.0.is_empty());
    }
}
