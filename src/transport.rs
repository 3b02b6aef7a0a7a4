use std::fmt;

/// Outcome of a single HTTP exchange, already fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Largest response body a transport keeps.
pub const BODY_LIMIT: usize = 4096;

/// Response bodies that do not fit [`BODY_LIMIT`] are refused, never cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("response body exceeds {} bytes", BODY_LIMIT)]
pub struct BodyTooLarge;

/// Scratch space for reading a body: one byte past the limit, so an oversized body fills it.
pub fn body_buffer() -> Vec<u8> {
    vec![0; BODY_LIMIT + 1]
}

/// Keeps the `count` bytes read into a [`body_buffer`].
pub fn finish_body(mut buf: Vec<u8>, count: usize) -> Result<Vec<u8>, BodyTooLarge> {
    if count > BODY_LIMIT {
        return Err(BodyTooLarge);
    }
    buf.truncate(count);
    Ok(buf)
}

/// Query parameters whose values never leave the process in logs or errors.
const SECRET_PARAMS: [&str; 1] = ["p"];

/// `url` with secret query values masked, fit for logging.
pub fn redact(url: &str) -> String {
    let Some((path, query)) = url.split_once('?') else {
        return url.into();
    };
    let query = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if SECRET_PARAMS.contains(&key) => format!("{key}=***"),
            _ => pair.into(),
        })
        .collect::<Vec<_>>()
        .join("&");
    format!("{path}?{query}")
}

/// Transport-level failure: the request never produced a status line.
#[derive(Debug, thiserror::Error)]
#[error("{method} {url} failed: {reason}")]
pub struct TransportError {
    pub method: Method,
    /// Already passed through [`redact`].
    pub url: String,
    pub reason: String,
}

impl TransportError {
    pub fn new(method: Method, url: &str, reason: impl fmt::Display) -> Self {
        Self { method, url: redact(url), reason: reason.to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
        })
    }
}

/// Blocking HTTP client with its own bounded timeout.
pub trait Transport {
    fn get(&mut self, url: &str) -> Result<Response, TransportError>;
    fn post(&mut self, url: &str, body: &[u8]) -> Result<Response, TransportError>;
}

/// Logs every request instead of sending it and answers with an empty `200`.
#[derive(Debug, Default)]
pub struct DryRunTransport {
    sent: usize,
}

impl DryRunTransport {
    /// Number of requests that would have been sent so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    fn record(&mut self, method: Method, url: &str, body: &[u8]) -> Response {
        self.sent += 1;
        let url = redact(url);
        if body.is_empty() {
            log::info!("dry run: {method} {url}");
        } else {
            let body = String::from_utf8_lossy(body);
            log::info!("dry run: {method} {url} <- {body}");
        }
        Response { status: 200, body: Vec::new() }
    }
}

impl Transport for DryRunTransport {
    fn get(&mut self, url: &str) -> Result<Response, TransportError> {
        Ok(self.record(Method::Get, url, &[]))
    }

    fn post(&mut self, url: &str, body: &[u8]) -> Result<Response, TransportError> {
        Ok(self.record(Method::Post, url, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_any_2xx() {
        let ok = |status| Response { status, body: Vec::new() }.is_success();
        assert!(ok(200));
        assert!(ok(204));
        assert!(!ok(199));
        assert!(!ok(301));
        assert!(!ok(500));
    }

    #[test]
    fn dry_run_counts_requests() {
        let mut transport = DryRunTransport::default();
        let res = transport.get("http://localhost/json.htm").unwrap();
        assert_eq!(res.status, 200);
        transport.post("http://localhost/write", b"x value=1").unwrap();
        assert_eq!(transport.sent(), 2);
    }

    #[test]
    fn error_message_names_the_request() {
        let err = TransportError::new(Method::Post, "http://db:8086/write", "connection refused");
        assert_eq!(err.to_string(), "POST http://db:8086/write failed: connection refused");
    }

    #[test]
    fn errors_never_show_the_password() {
        let url = "http://db:8086/write?db=home&precision=s&u=meter&p=p%26ss%231";
        let err = TransportError::new(Method::Post, url, "timed out");
        let text = err.to_string();
        assert!(!text.contains("p%26ss%231"), "{text}");
        assert_eq!(text, "POST http://db:8086/write?db=home&precision=s&u=meter&p=*** failed: timed out");
    }

    #[test]
    fn redaction_leaves_other_parameters_alone() {
        let url = "http://meter.lan/json.htm?type=devices&rid=23";
        assert_eq!(redact(url), url);
        assert_eq!(redact("http://meter.lan/write"), "http://meter.lan/write");
        assert_eq!(redact("http://x/w?p=1&pp=2"), "http://x/w?p=***&pp=2");
    }

    #[test]
    fn bodies_up_to_the_limit_are_kept() {
        let mut buf = body_buffer();
        buf[..3].copy_from_slice(b"{}\n");
        assert_eq!(finish_body(buf, 3).unwrap(), b"{}\n");
        assert_eq!(finish_body(body_buffer(), BODY_LIMIT).unwrap().len(), BODY_LIMIT);
    }

    #[test]
    fn oversized_bodies_are_refused() {
        let buf = body_buffer();
        let full = buf.len();
        assert_eq!(finish_body(buf, full), Err(BodyTooLarge));
    }
}
