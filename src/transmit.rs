use core::str::FromStr;
use std::io::{self, Write};

use crate::reading::Reading;

#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    #[error("collector answered with status {0}")]
    Status(u16),
    #[error("reading could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("console write failed: {0}")]
    Console(#[from] io::Error),
    #[cfg(target_os = "espidf")]
    #[error("transport failure: {0}")]
    Io(#[from] esp_idf_svc::errors::EspIOError),
    #[cfg(target_os = "espidf")]
    #[error("platform failure: {0}")]
    Esp(#[from] esp_idf_sys::EspError),
}

/// Any 2xx answer counts as delivered; everything else drops the reading.
pub fn check_status(status: u16) -> Result<(), TransmitError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(TransmitError::Status(status))
    }
}

/// A lazily built connection. Only a send that completed checks it back in, so a
/// connection left mid-request is dropped and the next checkout builds a fresh one.
pub struct Reconnect<C> {
    conn: Option<C>,
}

impl<C> Reconnect<C> {
    pub fn new(conn: C) -> Self {
        Self { conn: Some(conn) }
    }

    pub fn checkout<E>(&mut self, connect: impl FnOnce() -> Result<C, E>) -> Result<C, E> {
        match self.conn.take() {
            Some(conn) => Ok(conn),
            None => {
                log::info!("rebuilding connection after a transport failure");
                connect()
            }
        }
    }

    pub fn checkin(&mut self, conn: C) {
        self.conn = Some(conn);
    }
}

/// A destination for readings. A failed send is final: the reading is not retried.
#[allow(async_fn_in_trait)]
pub trait Transmit {
    async fn send(&mut self, reading: &Reading) -> Result<(), TransmitError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkKind {
    Http,
    Mqtt,
    Console,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown sink `{0}` (expected `http`, `mqtt` or `console`)")]
pub struct UnknownSink(String);

impl FromStr for SinkKind {
    type Err = UnknownSink;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "mqtt" => Ok(Self::Mqtt),
            "console" | "stdout" => Ok(Self::Console),
            other => Err(UnknownSink(other.into())),
        }
    }
}

/// Prints one JSON document per line.
pub struct Console<W = io::Stdout> {
    out: W,
}

impl Console {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Transmit for Console<W> {
    async fn send(&mut self, reading: &Reading) -> Result<(), TransmitError> {
        let mut line = reading.to_json()?;
        line.push(b'\n');
        self.out.write_all(&line)?;
        self.out.flush()?;
        Ok(())
    }
}

/// The sink chosen at startup.
pub enum Sink {
    Console(Console),
    #[cfg(target_os = "espidf")]
    Http(crate::http::HttpSink),
    #[cfg(target_os = "espidf")]
    Mqtt(crate::mqtt::MqttSink),
}

impl Transmit for Sink {
    async fn send(&mut self, reading: &Reading) -> Result<(), TransmitError> {
        match self {
            Self::Console(console) => console.send(reading).await,
            #[cfg(target_os = "espidf")]
            Self::Http(http) => http.send(reading).await,
            #[cfg(target_os = "espidf")]
            Self::Mqtt(mqtt) => mqtt.send(reading).await,
        }
    }
}
