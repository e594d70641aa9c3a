use embedded_svc::{
    http::client::asynch::{Client, TrivialUnblockingConnection},
    io::asynch::Write as _,
    utils::io::asynch::try_read_full,
};
use esp_idf_svc::{errors::EspIOError, http::client::EspHttpConnection};
use esp_idf_sys::EspError;

use crate::{
    reading::Reading,
    transmit::{check_status, Reconnect, Transmit, TransmitError},
};

pub type HttpClient = Client<TrivialUnblockingConnection<EspHttpConnection>>;

struct Post {
    count: usize,
    status: u16,
}

async fn send_post(http: &mut HttpClient, url: &str, data: &[u8], out: &mut [u8]) -> Result<Post, EspIOError> {
    let len = data.len().to_string();
    let headers = [("Content-Type", "application/json"), ("Content-Length", len.as_str())];
    let mut req = http.post(url, &headers).await?;
    req.write_all(data).await?;
    req.flush().await?;

    let mut res = req.submit().await?;
    let status = res.status();
    let (_, body) = res.split();

    let count = try_read_full(body, out).await.map_err(|(err, _)| err)?;
    Ok(Post { count, status })
}

fn connect() -> Result<HttpClient, EspError> {
    let conn = EspHttpConnection::new(&Default::default())?;
    Ok(HttpClient::wrap(TrivialUnblockingConnection::new(conn)))
}

/// Posts each reading as JSON to the collector. A transport failure leaves the
/// connection mid-request, so it is dropped and rebuilt on the next send.
pub struct HttpSink {
    http: Reconnect<HttpClient>,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: String) -> Result<Self, EspError> {
        Ok(Self { http: Reconnect::new(connect()?), endpoint })
    }
}

impl Transmit for HttpSink {
    async fn send(&mut self, reading: &Reading) -> Result<(), TransmitError> {
        let bytes = reading.to_json()?;
        let mut http = self.http.checkout(connect)?;
        // The collector's reply is only logged, so a short prefix is enough.
        let mut buf = [0; 128];
        let Post { count, status } = send_post(&mut http, &self.endpoint, &bytes, &mut buf).await?;
        self.http.checkin(http);
        let reply = String::from_utf8_lossy(&buf[..count]);
        log::debug!("collector answered {status}: {reply}");
        check_status(status)
    }
}
