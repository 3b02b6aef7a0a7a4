use core::time::Duration;
use embedded_svc::{
    http::{client::Client, Method as HttpMethod},
    io::Write as _,
    utils::io::try_read_full,
};
use esp_idf_svc::{
    errors::EspIOError,
    http::client::{Configuration, EspHttpConnection},
};
use esp_idf_sys::EspError;
use meter_pulse::transport::{self, BodyTooLarge, Method, Response, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error(transparent)]
    Esp(#[from] EspIOError),
    #[error(transparent)]
    TooLarge(#[from] BodyTooLarge),
}

pub struct EspTransport {
    client: Client<EspHttpConnection>,
}

impl EspTransport {
    /// Server certificates are not verified; see `sdkconfig.defaults`.
    pub fn new(timeout: Duration) -> Result<Self, EspError> {
        let conn = EspHttpConnection::new(&Configuration {
            timeout: Some(timeout),
            use_global_ca_store: false,
            crt_bundle_attach: None,
            ..Default::default()
        })?;
        Ok(Self { client: Client::wrap(conn) })
    }

    fn send(&mut self, method: HttpMethod, url: &str, data: &[u8]) -> Result<Response, SendError> {
        let len = data.len().to_string();
        let headers = [("Content-Length", len.as_str())];
        let mut req = self.client.request(method, url, &headers)?;
        req.write_all(data)?;
        req.flush()?;

        let mut res = req.submit()?;
        let status = res.status();
        let (_, body) = res.split();

        let mut buf = transport::body_buffer();
        let count = try_read_full(body, &mut buf).map_err(|(err, _)| err)?;
        Ok(Response { status, body: transport::finish_body(buf, count)? })
    }
}

impl Transport for EspTransport {
    fn get(&mut self, url: &str) -> Result<Response, TransportError> {
        self.send(HttpMethod::Get, url, &[]).map_err(|err| TransportError::new(Method::Get, url, err))
    }

    fn post(&mut self, url: &str, body: &[u8]) -> Result<Response, TransportError> {
        self.send(HttpMethod::Post, url, body).map_err(|err| TransportError::new(Method::Post, url, err))
    }
}
