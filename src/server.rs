use std::sync::Mutex;

use serde::Serialize;

use crate::reading::{iso8601, Reading};

/// The most recent reading, shared with the query endpoint.
#[derive(Debug, Default)]
pub struct Latest {
    reading: Mutex<Option<Reading>>,
}

#[derive(Serialize)]
struct Query<'r> {
    flow_rate: f32,
    timestamp: &'r str,
}

impl Latest {
    pub fn record(&self, reading: &Reading) {
        // A poisoned lock only means a reader panicked mid-clone; the slot is still usable.
        let mut slot = self.reading.lock().unwrap_or_else(|poison| poison.into_inner());
        *slot = Some(reading.clone());
    }

    pub fn get(&self) -> Option<Reading> {
        self.reading.lock().unwrap_or_else(|poison| poison.into_inner()).clone()
    }

    /// Body for `GET /api/water-flow`, if anything has been measured yet.
    pub fn query(&self) -> Option<serde_json::Result<Vec<u8>>> {
        let reading = self.get()?;
        let timestamp = iso8601(&reading.timestamp);
        Some(serde_json::to_vec(&Query { flow_rate: reading.flow_rate, timestamp: &timestamp }))
    }
}

#[cfg(target_os = "espidf")]
pub use device::serve;

#[cfg(target_os = "espidf")]
mod device {
    use embedded_svc::{http::Method, io::Write as _};
    use esp_idf_svc::http::server::{Configuration, EspHttpServer};
    use esp_idf_sys::EspError;
    use std::sync::Arc;

    use super::Latest;

    pub fn serve(port: u16, latest: Arc<Latest>) -> Result<EspHttpServer, EspError> {
        let mut server = EspHttpServer::new(&Configuration { http_port: port, ..Default::default() })?;
        server.fn_handler("/api/water-flow", Method::Get, move |req| {
            match latest.query() {
                Some(Ok(body)) => {
                    let mut res = req.into_response(200, None, &[("Content-Type", "application/json")])?;
                    res.write_all(&body)?;
                }
                Some(Err(err)) => {
                    log::warn!("could not encode latest reading: {err}");
                    req.into_status_response(500)?;
                }
                None => {
                    req.into_status_response(404)?;
                }
            }
            Ok(())
        })?;
        log::info!("serving latest flow rate on port {port}");
        Ok(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Tags;
    use chrono::{TimeZone, Utc};

    #[test]
    fn query_is_empty_until_first_reading() {
        let latest = Latest::default();
        assert!(latest.query().is_none());

        let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        latest.record(&Reading::new(1.2, at, &Tags::default(), true));
        latest.record(&Reading::new(3.4, at, &Tags::default(), true));

        let body = latest.query().unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, serde_json::json!({ "flow_rate": 3.4, "timestamp": "2024-03-09T12:00:00.000Z" }));
    }
}
